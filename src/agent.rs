//! The polymorphic agent capability set.
//!
//! `Agent` is the closed set of methods every agent must implement.
//! Extension capabilities (session-aware execution, checkpointable state,
//! memory-reader injection) are discovered by capability-check rather than
//! required up front: hosts must treat their absence as the standard
//! execution path, never as an error.

use async_trait::async_trait;
use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::error::CaxtonError;
use crate::message::Message;
use crate::session::Session;

/// Validated, display-safe agent name. Unique within a `Runtime`.
///
/// The same validation also governs the wire format: remote peers re-check
/// `^[a-z][a-z0-9_-]{0,63}$` on every RPC, so a name that round-trips through
/// construction here is always valid on the wire too.
#[nutype(
    sanitize(trim),
    validate(regex = r"^[a-z][a-z0-9_-]{0,63}$"),
    derive(
        Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
        TryFrom, Into
    )
)]
pub struct AgentName(String);

/// Long-lived, named handler invoked by a `Runtime`.
///
/// Implementors are expected to be cheap to clone (typically an `Arc`
/// wrapper around shared state) since the runtime holds one handle per
/// registration and may dispatch to it from many tasks concurrently.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's unique name within its runtime.
    fn name(&self) -> &AgentName;

    /// A human-readable role description, surfaced in observability spans.
    fn role(&self) -> &str;

    /// Whether the agent is currently willing to receive `Execute` calls.
    ///
    /// May lag behind `Start` completing; `StartAgentsPhased` polls this
    /// before considering a dependency level satisfied.
    fn ready(&self) -> bool;

    /// Runs any startup work needed before `ready()` can return `true`.
    async fn start(&self) -> Result<(), CaxtonError>;

    /// Processes one message and returns the response.
    ///
    /// Errors propagate to the caller unchanged; the runtime never
    /// interprets or retries them.
    async fn execute(&self, input: Message) -> Result<Message, CaxtonError>;

    /// Runs graceful shutdown work. Best-effort; the runtime proceeds to the
    /// next agent even if this returns an error.
    async fn stop(&self) -> Result<(), CaxtonError>;

    /// Returns this agent as a `SessionAwareAgent` if it implements that
    /// extension capability. Default: not implemented.
    fn as_session_aware(&self) -> Option<&dyn SessionAwareAgent> {
        None
    }

    /// Returns this agent as a `CheckpointableAgent` if it implements that
    /// extension capability. Default: not implemented.
    fn as_checkpointable(&self) -> Option<&dyn CheckpointableAgent> {
        None
    }
}

/// Extension capability: an agent that wants the session threaded through
/// its own execution so it can append intermediate entries itself.
#[async_trait]
pub trait SessionAwareAgent: Send + Sync {
    /// Executes with direct access to the session the call is bound to.
    async fn execute_with_session(
        &self,
        input: Message,
        session: &Session,
    ) -> Result<Message, CaxtonError>;
}

/// Extension capability: an agent whose internal state can be snapshotted
/// and restored independent of session entries.
pub trait CheckpointableAgent: Send + Sync {
    /// Serializes internal state to an opaque blob.
    fn snapshot_state(&self) -> Result<Vec<u8>, CaxtonError>;

    /// Restores internal state from a blob previously returned by
    /// `snapshot_state`.
    fn restore_state(&self, blob: &[u8]) -> Result<(), CaxtonError>;
}

/// Extension capability: an agent that wants read access to another
/// component's memory store injected at construction time, rather than
/// discovered. Hosts that wire up memory-backed agents check for this
/// marker trait to decide whether injection is required.
pub trait MemoryAwareAgent: Send + Sync {
    /// Injects a reader the agent can use to recall prior context.
    fn set_memory_reader(&self, reader: std::sync::Arc<dyn MemoryReader>);
}

/// Read-only view over a memory store, passed to `MemoryAwareAgent`s.
#[async_trait]
pub trait MemoryReader: Send + Sync {
    /// Recalls entries relevant to a free-text query, most relevant first.
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<String>, CaxtonError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_accepts_valid_names() {
        assert!(AgentName::try_new("router").is_ok());
        assert!(AgentName::try_new("router-2").is_ok());
        assert!(AgentName::try_new("router_2").is_ok());
    }

    #[test]
    fn agent_name_rejects_invalid_names() {
        assert!(AgentName::try_new("Router").is_err());
        assert!(AgentName::try_new("2router").is_err());
        assert!(AgentName::try_new("").is_err());
        assert!(AgentName::try_new("a".repeat(65)).is_err());
    }
}
