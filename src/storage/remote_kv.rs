//! Redis-backed `StorageBackend`.
//!
//! Key layout, under a configurable prefix (default `aixgo:session:`):
//!
//! ```text
//! <prefix>meta:<agent>:<session>                 # string, JSON SessionMetadata
//! <prefix>entries:<agent>:<session>               # list, JSON SessionEntry per element
//! <prefix>agent:<agent>                           # set of session ids
//! <prefix>user:<agent>:<user>                      # set of session ids
//! <prefix>checkpoint:<agent>:<checkpoint>          # string, JSON Checkpoint
//! <prefix>session_checkpoints:<agent>:<session>    # set of checkpoint ids
//! ```
//!
//! An optional TTL applies to every key touched for a session and is
//! refreshed on every `append_entry`.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{
    Checkpoint, SessionEntry, SessionFilter, SessionMetadata, StorageBackend, StorageError,
    StorageResult, validate_path_component,
};
use crate::agent::AgentName;

const DEFAULT_PREFIX: &str = "aixgo:session:";

/// `StorageBackend` realized over Redis.
pub struct RemoteKvStorageBackend {
    manager: ConnectionManager,
    prefix: String,
    ttl: Option<Duration>,
    closed: std::sync::atomic::AtomicBool,
}

impl RemoteKvStorageBackend {
    /// Connects to `redis_url` using the default key prefix and no TTL.
    pub async fn connect(redis_url: &str) -> StorageResult<Self> {
        Self::connect_with(redis_url, DEFAULT_PREFIX.to_string(), None).await
    }

    /// Connects to `redis_url` with an explicit key prefix and optional TTL
    /// applied to (and refreshed on append for) every session's keys.
    pub async fn connect_with(
        redis_url: &str,
        prefix: String,
        ttl: Option<Duration>,
    ) -> StorageResult<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StorageError::Backend(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self {
            manager,
            prefix,
            ttl,
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn meta_key(&self, agent: &str, session: &str) -> String {
        format!("{}meta:{agent}:{session}", self.prefix)
    }

    fn entries_key(&self, agent: &str, session: &str) -> String {
        format!("{}entries:{agent}:{session}", self.prefix)
    }

    fn agent_index_key(&self, agent: &str) -> String {
        format!("{}agent:{agent}", self.prefix)
    }

    fn user_index_key(&self, agent: &str, user: &str) -> String {
        format!("{}user:{agent}:{user}", self.prefix)
    }

    fn checkpoint_key(&self, agent: &str, checkpoint_id: &str) -> String {
        format!("{}checkpoint:{agent}:{checkpoint_id}", self.prefix)
    }

    fn session_checkpoints_key(&self, agent: &str, session: &str) -> String {
        format!("{}session_checkpoints:{agent}:{session}", self.prefix)
    }

    async fn refresh_ttl(&self, keys: &[&str]) -> StorageResult<()> {
        let Some(ttl) = self.ttl else {
            return Ok(());
        };
        let mut conn = self.manager.clone();
        for key in keys {
            let _: () = conn
                .expire(*key, ttl.as_secs() as i64)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for RemoteKvStorageBackend {
    async fn save_session(&self, meta: &SessionMetadata) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(&meta.id)?;
        let agent = meta.agent_name.to_string();
        let mut conn = self.manager.clone();

        let value = serde_json::to_string(meta)?;
        let meta_key = self.meta_key(&agent, &meta.id);
        let _: () = conn
            .set(&meta_key, value)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let agent_key = self.agent_index_key(&agent);
        let _: () = conn
            .sadd(&agent_key, &meta.id)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if let Some(user_id) = &meta.user_id {
            let user_key = self.user_index_key(&agent, user_id);
            let _: () = conn
                .sadd(&user_key, &meta.id)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        self.refresh_ttl(&[&meta_key]).await
    }

    async fn load_session(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Option<SessionMetadata>> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let mut conn = self.manager.clone();
        let key = self.meta_key(&agent_name.to_string(), session_id);
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    async fn delete_session(&self, agent_name: &AgentName, session_id: &str) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let agent = agent_name.to_string();
        let mut conn = self.manager.clone();

        let existing = self.load_session(agent_name, session_id).await?;

        let meta_key = self.meta_key(&agent, session_id);
        let entries_key = self.entries_key(&agent, session_id);
        let agent_key = self.agent_index_key(&agent);
        let session_checkpoints_key = self.session_checkpoints_key(&agent, session_id);

        let checkpoint_ids: Vec<String> = conn
            .smembers(&session_checkpoints_key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        for checkpoint_id in &checkpoint_ids {
            let checkpoint_key = self.checkpoint_key(&agent, checkpoint_id);
            let _: () = conn
                .del(&checkpoint_key)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        let _: () = conn
            .del(&[
                meta_key.as_str(),
                entries_key.as_str(),
                session_checkpoints_key.as_str(),
            ])
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let _: () = conn
            .srem(&agent_key, session_id)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if let Some(meta) = existing {
            if let Some(user_id) = meta.user_id {
                let user_key = self.user_index_key(&agent, &user_id);
                let _: () = conn
                    .srem(&user_key, session_id)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
        }

        Ok(())
    }

    async fn list_sessions(
        &self,
        agent_name: &AgentName,
        filter: SessionFilter,
    ) -> StorageResult<Vec<SessionMetadata>> {
        self.check_open()?;
        let agent = agent_name.to_string();
        let mut conn = self.manager.clone();

        let session_ids: Vec<String> = match &filter.user_id {
            Some(user_id) => conn
                .smembers(self.user_index_key(&agent, user_id))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            None => conn
                .smembers(self.agent_index_key(&agent))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        };

        let mut sessions = Vec::with_capacity(session_ids.len());
        for session_id in session_ids {
            if let Some(meta) = self.load_session(agent_name, &session_id).await? {
                sessions.push(meta);
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let offset = filter.offset.unwrap_or(0);
        let sessions: Vec<SessionMetadata> = sessions.into_iter().skip(offset).collect();
        let sessions = match filter.limit {
            Some(limit) => sessions.into_iter().take(limit).collect(),
            None => sessions,
        };
        Ok(sessions)
    }

    async fn append_entry(
        &self,
        agent_name: &AgentName,
        session_id: &str,
        entry: SessionEntry,
    ) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let agent = agent_name.to_string();
        let mut conn = self.manager.clone();

        let key = self.entries_key(&agent, session_id);
        let value = serde_json::to_string(&entry)?;
        let _: () = conn
            .rpush(&key, value)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let meta_key = self.meta_key(&agent, session_id);
        self.refresh_ttl(&[&key, &meta_key]).await
    }

    async fn load_entries(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Vec<SessionEntry>> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let mut conn = self.manager.clone();
        let key = self.entries_key(&agent_name.to_string(), session_id);
        let raw: Vec<String> = conn
            .lrange(&key, 0, -1)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(StorageError::from))
            .collect()
    }

    async fn save_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint: &Checkpoint,
    ) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(&checkpoint.id)?;
        let agent = agent_name.to_string();
        let mut conn = self.manager.clone();

        let key = self.checkpoint_key(&agent, &checkpoint.id);
        let value = serde_json::to_string(checkpoint)?;
        let _: () = conn
            .set(&key, value)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let session_checkpoints_key =
            self.session_checkpoints_key(&agent, &checkpoint.session_id);
        let _: () = conn
            .sadd(&session_checkpoints_key, &checkpoint.id)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn load_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        self.check_open()?;
        validate_path_component(checkpoint_id)?;
        let mut conn = self.manager.clone();
        let key = self.checkpoint_key(&agent_name.to_string(), checkpoint_id);
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}
