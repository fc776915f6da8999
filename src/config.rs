//! Typed configuration structs for the runtime, session persistence, and
//! distributed transport, mirroring the defaults named throughout the
//! design. This library never parses CLI args or config files itself —
//! these structs are built programmatically or deserialized by a host
//! binary (see `bin/caxton-cli.rs`), following
//! `message_router::config::RouterConfig`'s shape.

use serde::{Deserialize, Serialize};

/// Top-level configuration a host binary loads from a TOML file: the
/// union of the runtime, session, and distributed transport configs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CaxtonConfig {
    /// Local runtime tuning.
    pub runtime: RuntimeConfig,
    /// Session persistence configuration.
    pub session: SessionConfig,
    /// Distributed (gRPC) transport configuration.
    pub distributed: DistributedConfig,
}

use std::time::Duration;

/// Configuration for a `Runtime`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of each agent's buffered mailbox channel.
    pub channel_buffer_size: usize,
    /// Upper bound on simultaneously in-flight `Call`/`CallParallel`
    /// invocations. `0` means unbounded.
    pub max_concurrent_calls: usize,
    /// Whether metrics counters are recorded.
    pub enable_metrics: bool,
    /// Whether tracing spans are opened around dispatch.
    pub enable_tracing: bool,
    /// Overall timeout for a phase's ready-poll loop in
    /// `start_agents_phased`.
    #[serde(with = "humantime_serde_duration")]
    pub agent_start_timeout: Duration,
    /// How long `send` blocks on a saturated channel before returning a
    /// timeout error.
    #[serde(with = "humantime_serde_duration")]
    pub send_timeout: Duration,
    /// Percentage (0-100) of channel capacity above which a utilization
    /// warning is logged, when metrics are enabled.
    pub channel_full_warning_threshold: u8,
    /// Deadline for draining every registered agent's `stop()` in
    /// `Runtime::stop`. Agents still running past this deadline cause
    /// `stop` to return a timeout error instead of waiting forever.
    #[serde(with = "humantime_serde_duration")]
    pub stop_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 100,
            max_concurrent_calls: 0,
            enable_metrics: true,
            enable_tracing: true,
            agent_start_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            channel_full_warning_threshold: 80,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Storage backend selection for `SessionConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStore {
    /// Filesystem-backed storage, see `storage::file`.
    File,
    /// Redis-backed storage, see `storage::remote_kv`.
    RemoteKv,
}

/// Automatic checkpoint policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCheckpoint {
    /// Whether automatic checkpointing is enabled.
    pub on: bool,
    /// How many messages between automatic checkpoints.
    pub interval: u32,
}

impl Default for AutoCheckpoint {
    fn default() -> Self {
        Self {
            on: false,
            interval: 10,
        }
    }
}

/// Configuration for session persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether session persistence is enabled at all.
    pub enabled: bool,
    /// Which backend realization to use.
    pub store: SessionStore,
    /// Base directory for the `File` store.
    pub base_dir: String,
    /// Automatic checkpoint policy.
    pub auto_checkpoint: AutoCheckpoint,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store: SessionStore::File,
            base_dir: "./sessions".to_string(),
            auto_checkpoint: AutoCheckpoint::default(),
        }
    }
}

/// TLS/mTLS configuration for the distributed runtime's transport.
///
/// Precedence at connection time: `external_tls` disables app-level TLS
/// entirely; else `enabled` turns on server/client TLS (mTLS if `ca_file`
/// is set); else plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedTlsConfig {
    /// Enables app-level TLS.
    pub enabled: bool,
    /// Server certificate path (PEM).
    pub cert_file: Option<String>,
    /// Server private key path (PEM).
    pub key_file: Option<String>,
    /// CA bundle path; presence implies mutual TLS.
    pub ca_file: Option<String>,
    /// Expected server name for client-side SNI/verification.
    pub server_name: Option<String>,
    /// Requests disabling peer verification. Refused outside the
    /// non-production environment allow-list.
    pub insecure_skip_verify: bool,
    /// An external mesh sidecar (e.g. a service mesh) already terminates
    /// TLS; the runtime serves plaintext internally.
    pub external_tls: bool,
}

impl Default for DistributedTlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            server_name: None,
            insecure_skip_verify: false,
            external_tls: false,
        }
    }
}

/// Configuration for the distributed (gRPC) runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedConfig {
    /// Address the server listens on, e.g. `0.0.0.0:7780`.
    pub listen_addr: String,
    /// Default timeout applied to a server-side `Execute` call.
    #[serde(with = "humantime_serde_duration")]
    pub execute_timeout: Duration,
    /// Transport security configuration.
    pub tls: DistributedTlsConfig,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7780".to_string(),
            execute_timeout: Duration::from_secs(30),
            tls: DistributedTlsConfig::default(),
        }
    }
}

/// The closed allow-list of `ENVIRONMENT` values under which
/// `insecure_skip_verify` is honored. Unset or any other value is treated
/// as production and the request is refused.
pub const NON_PRODUCTION_ENVIRONMENTS: &[&str] = &["development", "dev", "staging", "local", "test"];

/// Returns whether `environment` (the value of the `ENVIRONMENT` variable,
/// if any) permits `insecure_skip_verify`.
#[must_use]
pub fn is_non_production(environment: Option<&str>) -> bool {
    environment
        .map(|value| NON_PRODUCTION_ENVIRONMENTS.contains(&value))
        .unwrap_or(false)
}

mod humantime_serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_defaults_match_the_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.channel_buffer_size, 100);
        assert_eq!(config.max_concurrent_calls, 0);
        assert_eq!(config.agent_start_timeout, Duration::from_secs(30));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.channel_full_warning_threshold, 80);
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
    }

    #[test]
    fn non_production_allow_list_is_closed() {
        assert!(is_non_production(Some("development")));
        assert!(is_non_production(Some("staging")));
        assert!(!is_non_production(Some("production")));
        assert!(!is_non_production(None));
    }

    #[test]
    fn runtime_config_roundtrips_through_json() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.channel_buffer_size, parsed.channel_buffer_size);
    }

    #[test]
    fn caxton_config_parses_a_partial_toml_document() {
        let toml = r#"
            [runtime]
            max_concurrent_calls = 4

            [distributed]
            listen_addr = "0.0.0.0:9000"
        "#;
        let config: CaxtonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.max_concurrent_calls, 4);
        assert_eq!(config.distributed.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.session.store, SessionStore::File);
    }
}
