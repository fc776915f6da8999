//! Crate-level error taxonomy for Caxton.
//!
//! Component modules define their own fine-grained error enums
//! (`GraphError`, `StorageError`, `VotingError`, `OrchestrationError`,
//! `TransportError`); this module collects the kinds a caller sees at the
//! `Runtime`/`Manager` boundary and converts the component errors into it.

use thiserror::Error;

use crate::agent::AgentName;

/// Main error type for Caxton runtime operations.
#[derive(Error, Debug)]
pub enum CaxtonError {
    /// Referenced agent, session, or checkpoint could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An agent with this name is already registered.
    #[error("agent already registered: {0}")]
    AlreadyExists(AgentName),

    /// The agent was looked up but has not reported `Ready` yet.
    #[error("agent not ready: {0}")]
    NotReady(AgentName),

    /// An operation requires the runtime to be started first.
    #[error("runtime not started")]
    NotStarted,

    /// `Start` was called on a runtime that is already running.
    #[error("runtime already started")]
    AlreadyStarted,

    /// The dependency graph supplied to phased startup contains a cycle.
    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),

    /// The dependency graph references a node that was never added.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// A channel send, readiness wait, or RPC exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An ensemble's agreement threshold was not met.
    #[error("validation gate failed: agreement {agreement:.2} below threshold {threshold:.2}")]
    ValidationGate {
        /// Observed fraction of participants agreeing on the winner.
        agreement: f64,
        /// Configured minimum agreement fraction.
        threshold: f64,
    },

    /// Unanimous voting saw disagreeing contents.
    #[error("voters disagree: {0}")]
    Disagreement(String),

    /// A router saw a label with no routing table entry and no default.
    #[error("unrouted label: {0}")]
    Unrouted(String),

    /// A path component (agent name, session id, checkpoint id) failed the
    /// traversal-safety check.
    #[error("invalid path component: {0}")]
    InvalidPathComponent(String),

    /// An operation was attempted on a storage backend after `Close`.
    #[error("storage is closed")]
    ClosedStorage,

    /// A session-aware operation was attempted without a configured manager.
    #[error("no session manager configured")]
    NotConfigured,

    /// Underlying transport (RPC, I/O) failure.
    #[error("transport error: {0}")]
    Transport(#[from] crate::distributed::TransportError),

    /// An agent's `Execute` returned an application-level error.
    #[error("agent execution failed: {0}")]
    Execution(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Wrapped I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<crate::graph::GraphError> for CaxtonError {
    fn from(err: crate::graph::GraphError) -> Self {
        match err {
            crate::graph::GraphError::Cycle(path) => Self::CycleDetected(path),
            crate::graph::GraphError::UnknownDependency(name) => Self::UnknownDependency(name),
            crate::graph::GraphError::SelfDependency(name) => {
                Self::CycleDetected(format!("{name} -> {name}"))
            }
        }
    }
}

impl From<crate::storage::StorageError> for CaxtonError {
    fn from(err: crate::storage::StorageError) -> Self {
        match err {
            crate::storage::StorageError::NotFound(id) => Self::NotFound(id),
            crate::storage::StorageError::Closed => Self::ClosedStorage,
            crate::storage::StorageError::InvalidPathComponent(s) => {
                Self::InvalidPathComponent(s)
            }
            crate::storage::StorageError::Io(e) => Self::Io(e),
            crate::storage::StorageError::Serialization(e) => Self::Serialization(e),
            crate::storage::StorageError::Backend(s) => {
                Self::Transport(crate::distributed::TransportError::Backend(s))
            }
        }
    }
}

impl From<crate::voting::VotingError> for CaxtonError {
    fn from(err: crate::voting::VotingError) -> Self {
        match err {
            crate::voting::VotingError::NoResponses => {
                Self::NotFound("no responses to vote over".to_string())
            }
            crate::voting::VotingError::MissingWeight(voter) => {
                Self::Disagreement(format!("no weight provided for voter {voter}"))
            }
            crate::voting::VotingError::NotUnanimous(count) => {
                Self::Disagreement(format!("{count} distinct answers"))
            }
        }
    }
}
