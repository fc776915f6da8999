//! Filesystem-backed `StorageBackend`.
//!
//! Layout, per the external interfaces section of the design doc:
//!
//! ```text
//! <base_dir>/<agent_name>/sessions.json           # index of this agent's sessions
//! <base_dir>/<agent_name>/<session_id>.jsonl       # append-only entry log, one JSON object per line
//! <base_dir>/<agent_name>/checkpoints/<checkpoint_id>.json
//! ```
//!
//! Directories are created with mode `0700` and files with mode `0600` on
//! unix; every agent/session/checkpoint id is validated with
//! `validate_path_component` before it is spliced into a path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    Checkpoint, EntryKind, SessionEntry, SessionFilter, SessionMetadata, StorageBackend,
    StorageError, StorageResult, validate_path_component,
};
use crate::agent::AgentName;

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// `StorageBackend` realized over the local filesystem.
pub struct FileStorageBackend {
    base_dir: PathBuf,
    closed: std::sync::atomic::AtomicBool,
    /// Per-agent lock guarding the `sessions.json` index file.
    index_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Per-(agent, session) lock guarding append ordering on the JSONL log.
    append_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl FileStorageBackend {
    /// Creates a backend rooted at `base_dir`. The directory is created on
    /// first use, not here.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            closed: std::sync::atomic::AtomicBool::new(false),
            index_locks: DashMap::new(),
            append_locks: DashMap::new(),
        }
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn agent_dir(&self, agent_name: &str) -> StorageResult<PathBuf> {
        validate_path_component(agent_name)?;
        Ok(self.base_dir.join(agent_name))
    }

    fn checkpoints_dir(&self, agent_name: &str) -> StorageResult<PathBuf> {
        Ok(self.agent_dir(agent_name)?.join("checkpoints"))
    }

    fn sessions_index_path(&self, agent_name: &str) -> StorageResult<PathBuf> {
        Ok(self.agent_dir(agent_name)?.join("sessions.json"))
    }

    fn entries_path(&self, agent_name: &str, session_id: &str) -> StorageResult<PathBuf> {
        validate_path_component(session_id)?;
        Ok(self.agent_dir(agent_name)?.join(format!("{session_id}.jsonl")))
    }

    fn checkpoint_path(&self, agent_name: &str, checkpoint_id: &str) -> StorageResult<PathBuf> {
        validate_path_component(checkpoint_id)?;
        Ok(self
            .checkpoints_dir(agent_name)?
            .join(format!("{checkpoint_id}.json")))
    }

    async fn ensure_dir(dir: &Path) -> StorageResult<()> {
        fs::create_dir_all(dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            fs::set_permissions(dir, perms).await?;
        }
        Ok(())
    }

    async fn write_file_secure(path: &Path, contents: &[u8]) -> StorageResult<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(contents).await?;
        file.flush().await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(FILE_MODE);
            fs::set_permissions(path, perms).await?;
        }
        Ok(())
    }

    fn index_lock(&self, agent_name: &str) -> Arc<Mutex<()>> {
        self.index_locks
            .entry(agent_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn append_lock(&self, agent_name: &str, session_id: &str) -> Arc<Mutex<()>> {
        self.append_locks
            .entry((agent_name.to_string(), session_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_index(
        &self,
        agent_name: &str,
    ) -> StorageResult<HashMap<String, SessionMetadata>> {
        let path = self.sessions_index_path(agent_name)?;
        match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(
        &self,
        agent_name: &str,
        index: &HashMap<String, SessionMetadata>,
    ) -> StorageResult<()> {
        let dir = self.agent_dir(agent_name)?;
        Self::ensure_dir(&dir).await?;
        let path = self.sessions_index_path(agent_name)?;
        let bytes = serde_json::to_vec_pretty(index)?;
        Self::write_file_secure(&path, &bytes).await
    }
}

#[async_trait]
impl StorageBackend for FileStorageBackend {
    async fn save_session(&self, meta: &SessionMetadata) -> StorageResult<()> {
        self.check_open()?;
        let agent_name = meta.agent_name.to_string();
        validate_path_component(&meta.id)?;
        let lock = self.index_lock(&agent_name);
        let _guard = lock.lock().await;

        let mut index = self.read_index(&agent_name).await?;
        index.insert(meta.id.clone(), meta.clone());
        self.write_index(&agent_name, &index).await
    }

    async fn load_session(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Option<SessionMetadata>> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let agent_name = agent_name.to_string();
        let lock = self.index_lock(&agent_name);
        let _guard = lock.lock().await;
        let index = self.read_index(&agent_name).await?;
        Ok(index.get(session_id).cloned())
    }

    async fn delete_session(&self, agent_name: &AgentName, session_id: &str) -> StorageResult<()> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let agent_name_str = agent_name.to_string();

        {
            let lock = self.index_lock(&agent_name_str);
            let _guard = lock.lock().await;
            let mut index = self.read_index(&agent_name_str).await?;
            index.remove(session_id);
            self.write_index(&agent_name_str, &index).await?;
        }

        let entries_path = self.entries_path(&agent_name_str, session_id)?;
        match fs::remove_file(&entries_path).await {
            Ok(()) | Err(_) => {}
        }

        let checkpoints_dir = self.checkpoints_dir(&agent_name_str)?;
        if let Ok(mut read_dir) = fs::read_dir(&checkpoints_dir).await {
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let path = entry.path();
                if let Ok(bytes) = fs::read(&path).await {
                    if let Ok(ckpt) = serde_json::from_slice::<Checkpoint>(&bytes) {
                        if ckpt.session_id == session_id {
                            let _ = fs::remove_file(&path).await;
                        }
                    }
                }
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
        let agent_name_str = agent_name.to_string();
        let lock = self.index_lock(&agent_name_str);
        let _guard = lock.lock().await;
        let index = self.read_index(&agent_name_str).await?;

        let mut sessions: Vec<SessionMetadata> = index
            .into_values()
            .filter(|s| match &filter.user_id {
                Some(uid) => s.user_id.as_deref() == Some(uid.as_str()),
                None => true,
            })
            .collect();

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
        let agent_name_str = agent_name.to_string();
        let dir = self.agent_dir(&agent_name_str)?;
        Self::ensure_dir(&dir).await?;

        let lock = self.append_lock(&agent_name_str, session_id);
        let _guard = lock.lock().await;

        let path = self.entries_path(&agent_name_str, session_id)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(FILE_MODE);
            fs::set_permissions(&path, perms).await?;
        }

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_entries(
        &self,
        agent_name: &AgentName,
        session_id: &str,
    ) -> StorageResult<Vec<SessionEntry>> {
        self.check_open()?;
        validate_path_component(session_id)?;
        let agent_name_str = agent_name.to_string();
        let lock = self.append_lock(&agent_name_str, session_id);
        let _guard = lock.lock().await;

        let path = self.entries_path(&agent_name_str, session_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let text = String::from_utf8_lossy(&bytes);
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str::<SessionEntry>(line)?);
        }
        let _ = EntryKind::Message; // kinds are interpreted by Session, not here
        Ok(entries)
    }

    async fn save_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint: &Checkpoint,
    ) -> StorageResult<()> {
        self.check_open()?;
        let agent_name_str = agent_name.to_string();
        validate_path_component(&checkpoint.id)?;
        let dir = self.checkpoints_dir(&agent_name_str)?;
        Self::ensure_dir(&dir).await?;
        let path = self.checkpoint_path(&agent_name_str, &checkpoint.id)?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        Self::write_file_secure(&path, &bytes).await
    }

    async fn load_checkpoint(
        &self,
        agent_name: &AgentName,
        checkpoint_id: &str,
    ) -> StorageResult<Option<Checkpoint>> {
        self.check_open()?;
        let agent_name_str = agent_name.to_string();
        let path = self.checkpoint_path(&agent_name_str, checkpoint_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}
