//! In-memory mock `StorageBackend` used by the rest of the crate's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Checkpoint, SessionEntry, SessionFilter, SessionMetadata, StorageBackend, StorageError,
    StorageResult, validate_path_component,
};
use crate::agent::AgentName;

#[derive(Default)]
struct State {
    sessions: HashMap<(String, String), SessionMetadata>,
    entries: HashMap<(String, String), Vec<SessionEntry>>,
    checkpoints: HashMap<(String, String), Checkpoint>,
}

/// A `StorageBackend` held entirely in memory, for tests.
pub struct MockStorageBackend {
    state: Mutex<State>,
    closed: std::sync::atomic::AtomicBool,
}

impl Default for MockStorageBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStorageBackend {
    /// Creates an empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockStorageBackend {
    async fn save_session(&self, meta: &SessionMetadata) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(&meta.id)?;
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .insert((meta.agent_name.to_string(), meta.id.clone()), meta.clone());
        Ok(())
    }

    async fn load_session(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Option<SessionMetadata>> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .get(&(agent_name.to_string(), session_id.to_string()))
            .cloned())
    }

    async fn delete_session(&self, agent_name: &AgentName, session_id: &str) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let key = (agent_name.to_string(), session_id.to_string());
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(&key);
        state.entries.remove(&key);
        state
            .checkpoints
            .retain(|_, c| c.session_id != session_id);
        Ok(())
    }

    async fn list_sessions(
        &self,
        agent_name: &AgentName,
        filter: SessionFilter,
    ) -> StorageResult<Vec<SessionMetadata>> {
        self.check_open()?;
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<SessionMetadata> = state
            .sessions
            .values()
            .filter(|s| s.agent_name == *agent_name)
            .filter(|s| match &filter.user_id {
                Some(uid) => s.user_id.as_deref() == Some(uid.as_str()),
                None => true,
            })
            .cloned()
            .collect();

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let offset = filter.offset.unwrap_or(0);
        let sessions: Vec<SessionMetadata> = sessions.into_iter().skip(offset).collect();
        Ok(match filter.limit {
            Some(limit) => sessions.into_iter().take(limit).collect(),
            None => sessions,
        })
    }

    async fn append_entry(
        &self,
        agent_name: &AgentName,
        session_id: &str,
        entry: SessionEntry,
    ) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let key = (agent_name.to_string(), session_id.to_string());
        let mut state = self.state.lock().unwrap();
        state.entries.entry(key).or_default().push(entry);
        Ok(())
    }

    async fn load_entries(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Vec<SessionEntry>> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let key = (agent_name.to_string(), session_id.to_string());
        let state = self.state.lock().unwrap();
        Ok(state.entries.get(&key).cloned().unwrap_or_default())
    }

    async fn save_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint: &Checkpoint,
    ) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(&checkpoint.id)?;
        let mut state = self.state.lock().unwrap();
        state.checkpoints.insert(
            (agent_name.to_string(), checkpoint.id.clone()),
            checkpoint.clone(),
        );
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        self.check_open()?;
        validate_path_component(checkpoint_id)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .checkpoints
            .get(&(agent_name.to_string(), checkpoint_id.to_string()))
            .cloned())
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}
