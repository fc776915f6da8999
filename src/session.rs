//! Sessions: a per-agent, append-only conversation log with checkpoint and
//! restore support, and the `SessionManager` that hands out cached handles
//! to them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::AgentName;
use crate::message::Message;
use crate::storage::{
    Checkpoint, EntryKind, SessionEntry, SessionFilter, SessionMetadata, StorageBackend,
};

/// Errors raised by session and manager operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The referenced session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The referenced checkpoint does not exist.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// A checkpoint was passed to `restore` for a different session.
    #[error("checkpoint {checkpoint_id} belongs to session {actual}, not {expected}")]
    CheckpointSessionMismatch {
        /// The checkpoint's id.
        checkpoint_id: String,
        /// The session id the checkpoint actually belongs to.
        actual: String,
        /// The session id `restore` was called on.
        expected: String,
    },

    /// The checkpoint's recorded leaf entry could not be found in the
    /// loaded entry log.
    #[error("checkpoint entry {0} not present in session log")]
    CheckpointEntryMissing(String),

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    /// Message payload failed to (de)serialize into/out of an entry.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

const MESSAGE_FIELD: &str = "message";

fn entry_from_message(parent_id: Option<String>, message: &Message) -> Result<SessionEntry, SessionError> {
    let mut data = HashMap::new();
    data.insert(MESSAGE_FIELD.to_string(), serde_json::to_string(message)?);
    Ok(SessionEntry {
        id: Uuid::new_v4().to_string(),
        parent_id,
        timestamp: Utc::now(),
        kind: EntryKind::Message,
        data,
    })
}

fn message_from_entry(entry: &SessionEntry) -> Result<Option<Message>, SessionError> {
    if entry.kind != EntryKind::Message {
        return Ok(None);
    }
    let Some(raw) = entry.data.get(MESSAGE_FIELD) else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(raw)?))
}

/// Reconstructs the causally active view of a session's entries by
/// following `parent_id` links back from `leaf`, per the design choice
/// documented for the restore/truncation open question: the on-disk log
/// is never truncated, so reloads must walk the chain rather than trust
/// append order alone.
fn active_view(entries: &[SessionEntry], leaf: Option<&str>) -> Vec<SessionEntry> {
    let Some(leaf_id) = leaf else {
        return Vec::new();
    };
    let by_id: HashMap<&str, &SessionEntry> =
        entries.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut chain = Vec::new();
    let mut cursor = Some(leaf_id);
    while let Some(id) = cursor {
        let Some(entry) = by_id.get(id) else {
            break;
        };
        chain.push((*entry).clone());
        cursor = entry.parent_id.as_deref();
    }
    chain.reverse();
    chain
}

/// A logical conversation log bound to one agent (and optionally one user),
/// backed by a `StorageBackend`.
pub struct Session {
    id: String,
    agent_name: AgentName,
    user_id: Option<String>,
    backend: Arc<dyn StorageBackend>,
    inner: RwLock<Inner>,
}

struct Inner {
    entries: Vec<SessionEntry>,
    loaded: bool,
    metadata: SessionMetadata,
}

impl Session {
    fn new(metadata: SessionMetadata, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            id: metadata.id.clone(),
            agent_name: metadata.agent_name.clone(),
            user_id: metadata.user_id.clone(),
            backend,
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                loaded: false,
                metadata,
            }),
        }
    }

    /// The session's unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent this session belongs to.
    #[must_use]
    pub fn agent_name(&self) -> &AgentName {
        &self.agent_name
    }

    /// The owning user id, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    async fn ensure_loaded(&self, inner: &mut Inner) -> Result<(), SessionError> {
        if inner.loaded {
            return Ok(());
        }
        let all_entries = self.backend.load_entries(&self.agent_name, &self.id).await?;
        inner.entries = active_view(&all_entries, inner.metadata.current_leaf.as_deref());
        inner.loaded = true;
        Ok(())
    }

    /// Appends `message` to the session log.
    ///
    /// The new entry's `parent_id` is the id of the current leaf entry, so
    /// causal history survives any future restore/truncation.
    #[tracing::instrument(name = "session.append_message", skip(self, message), fields(session_id = %self.id))]
    pub async fn append_message(&self, message: Message) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        self.ensure_loaded(&mut inner).await?;

        let parent_id = inner.metadata.current_leaf.clone();
        let entry = entry_from_message(parent_id, &message)?;

        self.backend
            .append_entry(&self.agent_name, &self.id, entry.clone())
            .await?;

        inner.metadata.current_leaf = Some(entry.id.clone());
        inner.metadata.message_count += 1;
        inner.metadata.updated_at = Utc::now();
        inner.entries.push(entry);

        self.backend.save_session(&inner.metadata).await?;
        Ok(())
    }

    /// Returns every message appended so far, in append order.
    pub async fn get_messages(&self) -> Result<Vec<Message>, SessionError> {
        let mut inner = self.inner.write().await;
        self.ensure_loaded(&mut inner).await?;

        inner
            .entries
            .iter()
            .filter_map(|entry| message_from_entry(entry).transpose())
            .collect()
    }

    /// Snapshots the current leaf plus a checksum over every entry id up to
    /// it, and persists the checkpoint.
    pub async fn checkpoint(&self) -> Result<Checkpoint, SessionError> {
        let mut inner = self.inner.write().await;
        self.ensure_loaded(&mut inner).await?;

        let Some(leaf) = inner.metadata.current_leaf.clone() else {
            return Err(SessionError::CheckpointEntryMissing(
                "session has no entries yet".to_string(),
            ));
        };

        let mut hasher = Sha256::new();
        for entry in &inner.entries {
            hasher.update(entry.id.as_bytes());
        }
        let checksum = format!("{:x}", hasher.finalize());

        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            session_id: self.id.clone(),
            timestamp: Utc::now(),
            entry_id: leaf,
            checksum,
            metadata: None,
        };

        self.backend
            .save_checkpoint(&self.agent_name, &checkpoint)
            .await?;
        Ok(checkpoint)
    }

    /// Restores the in-memory view to the prefix ending at `checkpoint`'s
    /// leaf entry. The on-disk log is untouched; a subsequent append
    /// threads its `parent_id` from the restored leaf.
    pub async fn restore(&self, checkpoint_id: &str) -> Result<(), SessionError> {
        let checkpoint = self
            .backend
            .load_checkpoint(&self.agent_name, checkpoint_id)
            .await?
            .ok_or_else(|| SessionError::CheckpointNotFound(checkpoint_id.to_string()))?;

        if checkpoint.session_id != self.id {
            return Err(SessionError::CheckpointSessionMismatch {
                checkpoint_id: checkpoint.id,
                actual: checkpoint.session_id,
                expected: self.id.clone(),
            });
        }

        let all_entries = self.backend.load_entries(&self.agent_name, &self.id).await?;
        if !all_entries.iter().any(|e| e.id == checkpoint.entry_id) {
            return Err(SessionError::CheckpointEntryMissing(checkpoint.entry_id));
        }

        let restored = active_view(&all_entries, Some(checkpoint.entry_id.as_str()));
        let message_count = restored
            .iter()
            .filter(|e| e.kind == EntryKind::Message)
            .count() as u64;

        let mut inner = self.inner.write().await;
        inner.entries = restored;
        inner.loaded = true;
        inner.metadata.current_leaf = Some(checkpoint.entry_id);
        inner.metadata.message_count = message_count;
        inner.metadata.updated_at = Utc::now();

        self.backend.save_session(&inner.metadata).await?;
        Ok(())
    }

    /// Flushes any dirty metadata. Cached `Session` objects are otherwise
    /// always consistent with the last mutation, since every mutator
    /// persists before returning; `close` exists for symmetry with the
    /// storage backend's lifecycle and to support explicit eviction from a
    /// manager's cache.
    pub async fn close(&self) -> Result<(), SessionError> {
        let inner = self.inner.read().await;
        self.backend.save_session(&inner.metadata).await?;
        Ok(())
    }
}

/// Options accepted by `SessionManager::create`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Owning user id, if any.
    pub user_id: Option<String>,
}

/// Binds `Session` objects to a `StorageBackend`, caching at most one live
/// `Session` per session id.
pub struct SessionManager {
    backend: Arc<dyn StorageBackend>,
    cache: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Creates a manager over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a brand new session for `agent_name`, persists its metadata,
    /// and caches it.
    pub async fn create(
        &self,
        agent_name: &AgentName,
        options: CreateOptions,
    ) -> Result<Arc<Session>, SessionError> {
        let now = Utc::now();
        let metadata = SessionMetadata {
            id: Uuid::new_v4().to_string(),
            agent_name: agent_name.clone(),
            user_id: options.user_id,
            created_at: now,
            updated_at: now,
            message_count: 0,
            current_leaf: None,
        };
        self.backend.save_session(&metadata).await?;

        let session = Arc::new(Session::new(metadata.clone(), self.backend.clone()));
        self.cache
            .write()
            .await
            .insert(metadata.id.clone(), session.clone());
        Ok(session)
    }

    /// Retrieves a session by id, from cache if present, otherwise loading
    /// its metadata and caching the result.
    pub async fn get(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> Result<Arc<Session>, SessionError> {
        if let Some(cached) = self.cache.read().await.get(session_id) {
            return Ok(cached.clone());
        }

        let metadata = self
            .backend
            .load_session(agent_name, session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let session = Arc::new(Session::new(metadata, self.backend.clone()));
        self.cache
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// Returns the first session owned by `user_id` for `agent_name`, or
    /// creates a new one. If `user_id` is empty, always creates a new
    /// session (there is nothing to look up).
    pub async fn get_or_create(
        &self,
        agent_name: &AgentName,
        user_id: &str,
    ) -> Result<Arc<Session>, SessionError> {
        if user_id.is_empty() {
            return self.create(agent_name, CreateOptions::default()).await;
        }

        let existing = self
            .backend
            .list_sessions(
                agent_name,
                SessionFilter {
                    user_id: Some(user_id.to_string()),
                    limit: Some(1),
                    offset: None,
                },
            )
            .await?;

        if let Some(meta) = existing.into_iter().next() {
            return self.get(agent_name, &meta.id).await;
        }

        self.create(
            agent_name,
            CreateOptions {
                user_id: Some(user_id.to_string()),
            },
        )
        .await
    }

    /// Lists sessions for an agent matching `filter`.
    pub async fn list(
        &self,
        agent_name: &AgentName,
        filter: SessionFilter,
    ) -> Result<Vec<SessionMetadata>, SessionError> {
        Ok(self.backend.list_sessions(agent_name, filter).await?)
    }

    /// Deletes a session and evicts it from the cache.
    pub async fn delete(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> Result<(), SessionError> {
        self.backend.delete_session(agent_name, session_id).await?;
        self.cache.write().await.remove(session_id);
        Ok(())
    }

    /// Closes every cached session and the backend itself.
    pub async fn close(&self) -> Result<(), SessionError> {
        let cache = self.cache.read().await;
        for session in cache.values() {
            session.close().await?;
        }
        drop(cache);
        self.backend.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::MockStorageBackend;

    fn agent() -> AgentName {
        AgentName::try_new("scribe").unwrap()
    }

    fn backend() -> Arc<dyn StorageBackend> {
        Arc::new(MockStorageBackend::new())
    }

    #[tokio::test]
    async fn append_then_get_messages_preserves_order() {
        let manager = SessionManager::new(backend());
        let session = manager.create(&agent(), CreateOptions::default()).await.unwrap();

        session
            .append_message(Message::new("request", "m1"))
            .await
            .unwrap();
        session
            .append_message(Message::new("request", "m2"))
            .await
            .unwrap();

        let messages = session.get_messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, "m1");
        assert_eq!(messages[1].payload, "m2");
    }

    #[tokio::test]
    async fn restore_truncates_to_checkpoint_and_allows_further_appends() {
        let manager = SessionManager::new(backend());
        let session = manager.create(&agent(), CreateOptions::default()).await.unwrap();

        session.append_message(Message::new("m", "m1")).await.unwrap();
        session.append_message(Message::new("m", "m2")).await.unwrap();
        let checkpoint = session.checkpoint().await.unwrap();
        session.append_message(Message::new("m", "m3")).await.unwrap();
        session.append_message(Message::new("m", "m4")).await.unwrap();

        let messages = session.get_messages().await.unwrap();
        assert_eq!(messages.len(), 4);

        session.restore(&checkpoint.id).await.unwrap();
        let messages = session.get_messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, "m1");
        assert_eq!(messages[1].payload, "m2");

        session.append_message(Message::new("m", "m5")).await.unwrap();
        let messages = session.get_messages().await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].payload, "m5");
    }

    #[tokio::test]
    async fn restore_is_idempotent() {
        let manager = SessionManager::new(backend());
        let session = manager.create(&agent(), CreateOptions::default()).await.unwrap();
        session.append_message(Message::new("m", "m1")).await.unwrap();
        let checkpoint = session.checkpoint().await.unwrap();
        session.append_message(Message::new("m", "m2")).await.unwrap();

        session.restore(&checkpoint.id).await.unwrap();
        let after_first = session.get_messages().await.unwrap();
        session.restore(&checkpoint.id).await.unwrap();
        let after_second = session.get_messages().await.unwrap();

        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn restore_rejects_checkpoint_from_another_session() {
        let backend = backend();
        let manager = SessionManager::new(backend.clone());
        let session_a = manager.create(&agent(), CreateOptions::default()).await.unwrap();
        let session_b = manager.create(&agent(), CreateOptions::default()).await.unwrap();

        session_a.append_message(Message::new("m", "m1")).await.unwrap();
        let checkpoint = session_a.checkpoint().await.unwrap();

        let result = session_b.restore(&checkpoint.id).await;
        assert!(matches!(
            result,
            Err(SessionError::CheckpointSessionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn get_or_create_reuses_session_for_same_user() {
        let manager = SessionManager::new(backend());
        let first = manager.get_or_create(&agent(), "user-1").await.unwrap();
        first.append_message(Message::new("m", "hi")).await.unwrap();

        let second = manager.get_or_create(&agent(), "user-1").await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn get_or_create_always_creates_for_empty_user() {
        let manager = SessionManager::new(backend());
        let first = manager.get_or_create(&agent(), "").await.unwrap();
        let second = manager.get_or_create(&agent(), "").await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn manager_resumes_sessions_across_a_fresh_manager_over_the_same_backend() {
        let backend = backend();
        let agent_name = agent();

        {
            let manager = SessionManager::new(backend.clone());
            let session = manager
                .get_or_create(&agent_name, "user-1")
                .await
                .unwrap();
            session.append_message(Message::new("m", "m1")).await.unwrap();
            manager.close().await.unwrap();
        }

        let manager = SessionManager::new(backend);
        let sessions = manager
            .list(
                &agent_name,
                SessionFilter {
                    user_id: Some("user-1".to_string()),
                    limit: None,
                    offset: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);

        let session = manager.get(&agent_name, &sessions[0].id).await.unwrap();
        let messages = session.get_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, "m1");
    }

    #[test]
    fn message_count_matches_message_kind_entries() {
        let entries = vec![
            SessionEntry {
                id: "1".to_string(),
                parent_id: None,
                timestamp: Utc::now(),
                kind: EntryKind::Message,
                data: HashMap::new(),
            },
            SessionEntry {
                id: "2".to_string(),
                parent_id: Some("1".to_string()),
                timestamp: Utc::now(),
                kind: EntryKind::Checkpoint,
                data: HashMap::new(),
            },
        ];
        let view = active_view(&entries, Some("2"));
        let count = view.iter().filter(|e| e.kind == EntryKind::Message).count();
        assert_eq!(count, 1);
    }
}
