//! Distributed variant of the runtime: the same `Agent` contract, reached
//! transparently over gRPC for agents that live on another node.
//!
//! `local` agents are dispatched exactly as `Runtime` would; `remote`
//! agents are recorded by `connect` and reached through the generated
//! `AgentService` client. TLS/mTLS posture follows `DistributedTlsConfig`'s
//! precedence, see `tls::configure_server`/`tls::configure_client`.

pub mod client;
pub mod server;
pub mod tls;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::sync::LazyLock;
use tonic::transport::Channel;

use crate::agent::AgentName;
use crate::config::DistributedConfig;
use crate::error::CaxtonError;
use crate::message::Message;
use crate::runtime::Runtime;

/// Generated client/server stubs and message types for `AgentService`.
pub mod proto {
    #![allow(clippy::all, missing_docs)]
    tonic::include_proto!("caxton.agent.v1");
}

/// The wire-format validation regex for agent names, re-checked on every
/// RPC independent of the local `AgentName` newtype's own validation.
pub static AGENT_NAME_WIRE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").expect("static regex is valid"));

/// Errors surfaced by the distributed transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer returned a gRPC status.
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// Establishing a channel to a remote node failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The address that failed to connect.
        addr: String,
        /// The underlying transport error.
        #[source]
        source: tonic::transport::Error,
    },

    /// A wire message failed to decode into the in-process `Message` type.
    #[error("malformed wire message: {0}")]
    Decode(String),

    /// An agent name failed the wire validation regex.
    #[error("invalid agent name on the wire: {0}")]
    InvalidAgentName(String),

    /// Generic backend failure surfaced through the transport boundary.
    #[error("backend error: {0}")]
    Backend(String),

    /// TLS configuration was invalid or forbidden in this environment.
    #[error("tls configuration error: {0}")]
    Tls(String),
}

impl From<Message> for proto::WireMessage {
    fn from(message: Message) -> Self {
        proto::WireMessage {
            id: message.id.to_string(),
            message_type: message.message_type,
            payload: message.payload,
            timestamp_unix_millis: message.timestamp.timestamp_millis(),
            metadata: message.metadata,
        }
    }
}

impl TryFrom<proto::WireMessage> for Message {
    type Error = TransportError;

    fn try_from(wire: proto::WireMessage) -> Result<Self, Self::Error> {
        let id = uuid::Uuid::parse_str(&wire.id)
            .map_err(|e| TransportError::Decode(format!("bad message id: {e}")))?;
        let timestamp = Utc
            .timestamp_millis_opt(wire.timestamp_unix_millis)
            .single()
            .ok_or_else(|| TransportError::Decode("bad timestamp".to_string()))?;

        Ok(Message {
            id,
            message_type: wire.message_type,
            payload: wire.payload,
            timestamp,
            metadata: wire.metadata,
        })
    }
}

/// Validates an agent name against the wire-format regex, independent of
/// whether it parses as a local `AgentName`.
pub fn validate_wire_agent_name(name: &str) -> Result<(), TransportError> {
    if AGENT_NAME_WIRE_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(TransportError::InvalidAgentName(name.to_string()))
    }
}

/// A remote agent binding: the node address it was connected at.
struct RemoteAgent {
    addr: String,
    channel: Channel,
}

/// Runtime extended to dispatch to agents hosted on other nodes.
pub struct DistributedRuntime {
    local: Arc<Runtime>,
    remotes: DashMap<AgentName, RemoteAgent>,
    config: DistributedConfig,
}

impl DistributedRuntime {
    /// Wraps a local `Runtime` with distributed dispatch, under `config`.
    #[must_use]
    pub fn new(local: Arc<Runtime>, config: DistributedConfig) -> Self {
        Self {
            local,
            remotes: DashMap::new(),
            config,
        }
    }

    /// Access to the wrapped local runtime, e.g. to `register` agents.
    #[must_use]
    pub fn local(&self) -> &Arc<Runtime> {
        &self.local
    }

    /// Records `name` as bound to a remote node at `addr`, eagerly
    /// connecting (lazily reconnecting on transport failure).
    pub async fn connect(&self, name: AgentName, addr: String) -> Result<(), CaxtonError> {
        let channel = client::build_channel(&addr, &self.config.tls)
            .await
            .map_err(CaxtonError::Transport)?;
        tracing::info!(agent = %name, address = %addr, "connected remote agent");
        self.remotes.insert(name, RemoteAgent { addr, channel });
        Ok(())
    }

    /// All agent names known to this runtime, local first, then remote,
    /// alphabetically within each group.
    #[must_use]
    pub fn list(&self) -> Vec<AgentName> {
        let mut local = self.local.list();
        let mut remote: Vec<AgentName> = self.remotes.iter().map(|e| e.key().clone()).collect();
        remote.sort();
        local.extend(remote);
        local
    }

    /// Dispatches to `target`: locally if registered there, otherwise via
    /// unary RPC to the node it was `connect`ed at.
    pub async fn call(&self, target: &AgentName, msg: Message) -> Result<Message, CaxtonError> {
        if self.local.get(target).is_ok() {
            return self.local.call(target, msg).await;
        }

        let remote = self
            .remotes
            .get(target)
            .ok_or_else(|| CaxtonError::NotFound(target.to_string()))?;
        let channel = remote.channel.clone();
        tracing::debug!(agent = %target, address = %remote.addr, "dispatching call to remote agent");
        drop(remote);

        client::execute(channel, target, msg, self.config.execute_timeout).await
    }

    /// Delivers `msg`: locally if registered there, otherwise via unary RPC.
    pub async fn send(&self, target: &AgentName, msg: Message) -> Result<(), CaxtonError> {
        if self.local.get(target).is_ok() {
            return self.local.send(target, msg).await;
        }

        let remote = self
            .remotes
            .get(target)
            .ok_or_else(|| CaxtonError::NotFound(target.to_string()))?;
        let channel = remote.channel.clone();
        drop(remote);

        client::send(channel, target, msg).await
    }

    /// Drains `source`'s mailbox: locally if registered there, otherwise by
    /// opening the peer's `Listen` stream and fanning it into a local
    /// channel of the configured buffer size.
    pub async fn recv(
        &self,
        source: &AgentName,
    ) -> Result<tokio::sync::mpsc::Receiver<Message>, CaxtonError> {
        if self.local.get(source).is_ok() {
            return self.local.recv(source).await;
        }

        let remote = self
            .remotes
            .get(source)
            .ok_or_else(|| CaxtonError::NotFound(source.to_string()))?;
        let channel = remote.channel.clone();
        drop(remote);

        client::listen(channel, source.clone(), 100).await
    }

    /// Starts local agents in dependency order; remote agents named in
    /// `dependencies` are assumed already live and are skipped.
    pub async fn start_agents_phased(
        &self,
        dependencies: &HashMap<AgentName, Vec<AgentName>>,
    ) -> Result<(), CaxtonError> {
        let local_only: HashMap<AgentName, Vec<AgentName>> = dependencies
            .iter()
            .filter(|(name, _)| self.local.get(name).is_ok())
            .map(|(name, deps)| (name.clone(), deps.clone()))
            .collect();
        self.local.start_agents_phased(&local_only).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_pattern_matches_local_agent_name_rules() {
        assert!(validate_wire_agent_name("router").is_ok());
        assert!(validate_wire_agent_name("router-2").is_ok());
        assert!(validate_wire_agent_name("Router").is_err());
        assert!(validate_wire_agent_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn message_roundtrips_through_the_wire_type() {
        let message = Message::new("greeting", "hello");
        let wire: proto::WireMessage = message.clone().into();
        let restored = Message::try_from(wire).unwrap();
        assert_eq!(message.id, restored.id);
        assert_eq!(message.payload, restored.payload);
    }
}
