//! Storage backend contract for session persistence.
//!
//! A `StorageBackend` persists an append-only entry log, a per-session
//! metadata index, and checkpoints. Two realizations are provided: a
//! filesystem backend (`file`) and a Redis-backed remote-KV backend
//! (`remote_kv`). Both are safe for concurrent callers and reject
//! traversal-unsafe path components before touching disk or network.
//!
//! # Submodules
//!
//! - `file` - one JSON index plus one JSONL entry log plus one checkpoint
//!   file per session, as described in the external interfaces section of
//!   the design doc.
//! - `remote_kv` - Redis-backed realization using a namespaced key layout.
//! - `test_utils` - an in-memory mock used by the rest of the crate's tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentName;

pub mod file;
pub mod remote_kv;

#[cfg(test)]
pub mod test_utils;

/// Errors surfaced by a `StorageBackend`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The referenced session or checkpoint does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation was attempted after `close()`.
    #[error("storage is closed")]
    Closed,

    /// A path component failed the traversal-safety check: it was empty or
    /// contained `/`, `\`, or `..`.
    #[error("invalid path component: {0}")]
    InvalidPathComponent(String),

    /// Underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying remote backend failure (e.g. Redis).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The kind of a session log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A `Message` appended via `AppendMessage`.
    Message,
    /// A checkpoint marker.
    Checkpoint,
    /// Arbitrary session metadata recorded inline in the log.
    Metadata,
}

/// One append-only record in a session's entry log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Unique id of this entry.
    pub id: String,
    /// Id of the entry this one is causally chained from, if any.
    pub parent_id: Option<String>,
    /// Append timestamp.
    pub timestamp: DateTime<Utc>,
    /// Entry kind.
    pub kind: EntryKind,
    /// Opaque payload, interpreted by `Session` based on `kind`.
    pub data: HashMap<String, String>,
}

/// Per-session metadata index record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Session id, globally unique, supplied by the caller (the `Manager`).
    pub id: String,
    /// Name of the agent this session belongs to.
    pub agent_name: AgentName,
    /// Optional owning user id.
    pub user_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent mutation.
    pub updated_at: DateTime<Utc>,
    /// Number of entries of kind `Message`.
    pub message_count: u64,
    /// Id of the current leaf entry, if any have been appended.
    pub current_leaf: Option<String>,
}

/// A checkpoint: a snapshot of the leaf entry plus an integrity checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id, globally unique, supplied by the caller.
    pub id: String,
    /// Id of the session this checkpoint belongs to.
    pub session_id: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Id of the leaf entry at the time of the snapshot.
    pub entry_id: String,
    /// SHA-256 hash of the concatenation of all entry ids up to `entry_id`.
    pub checksum: String,
    /// Optional caller-supplied metadata.
    pub metadata: Option<HashMap<String, String>>,
}

/// Filter applied to `list_sessions`, after sorting newest-updated first.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Restrict to sessions owned by this user, if set.
    pub user_id: Option<String>,
    /// Maximum number of results to return.
    pub limit: Option<usize>,
    /// Number of newest-first results to skip before taking `limit`.
    pub offset: Option<usize>,
}

/// Persistent storage contract for session state.
///
/// Every method that takes a path-like component (`agent_name`,
/// `session_id`, checkpoint id) must reject it with
/// `StorageError::InvalidPathComponent` if it is empty or contains `/`,
/// `\`, or `..` — this is a hard security requirement for the filesystem
/// backend and is enforced uniformly so callers can rely on it regardless
/// of which backend is configured.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persists session metadata, creating or overwriting it.
    async fn save_session(&self, meta: &SessionMetadata) -> StorageResult<()>;

    /// Loads session metadata by agent and session id.
    async fn load_session(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Option<SessionMetadata>>;

    /// Deletes a session's metadata, entries, and checkpoints.
    async fn delete_session(&self, agent_name: &AgentName, session_id: &str) -> StorageResult<()>;

    /// Lists sessions for an agent, newest-updated first, with `filter`
    /// applied after sorting.
    async fn list_sessions(
        &self,
        agent_name: &AgentName,
        filter: SessionFilter,
    ) -> StorageResult<Vec<SessionMetadata>>;

    /// Durably appends one entry to a session's log, in strict append
    /// order per session id.
    async fn append_entry(
        &self,
        agent_name: &AgentName,
        session_id: &str,
        entry: SessionEntry,
    ) -> StorageResult<()>;

    /// Loads all entries for a session, in append order.
    async fn load_entries(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Vec<SessionEntry>>;

    /// Persists a checkpoint.
    async fn save_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint: &Checkpoint,
    ) -> StorageResult<()>;

    /// Loads a checkpoint by id.
    async fn load_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint_id: &str,
    ) -> StorageResult<Option<Checkpoint>>;

    /// Releases any held resources. Operations after `close` fail with
    /// `StorageError::Closed`.
    async fn close(&self) -> StorageResult<()>;
}

/// Validates that a caller-supplied path component is safe to splice into a
/// filesystem path or storage key: non-empty, and free of `/`, `\`, and
/// `..`.
pub fn validate_path_component(component: &str) -> StorageResult<()> {
    if component.is_empty()
        || component.contains('/')
        || component.contains('\\')
        || component.contains("..")
    {
        return Err(StorageError::InvalidPathComponent(component.to_string()));
    }
    Ok(())
}
