//! Local file backend
//!
//! State lives in a JSON file (default: converge.state.json) next to a
//! `.lock` file created exclusively while a command holds the state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "converge.state.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::with_path(
            config
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_STATE_FILE)),
        )
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        }
    }

    async fn create_lock(&self, lock: &LockInfo) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(lock)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await?;
        file.write_all(&content).await?;
        file.sync_all().await
    }

    async fn remove_lock(&self) -> BackendResult<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::Io(format!("Failed to remove lock file: {}", e))),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        };

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;
        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(stored) = self.read_state().await? {
            if stored.lineage != state.lineage {
                return Err(BackendError::LineageMismatch {
                    expected: stored.lineage,
                    actual: state.lineage.clone(),
                });
            }
            if stored.serial >= state.serial {
                return Err(BackendError::StaleSerial {
                    stored: stored.serial,
                    writing: state.serial,
                });
            }
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        // Readers never see a partially written file
        let tmp_path = self.state_path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;
        fs::rename(&tmp_path, &self.state_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to replace state file: {}", e)))?;

        log::debug!(
            "wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);

        match self.create_lock(&lock).await {
            Ok(()) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(BackendError::Io(format!("Failed to create lock file: {}", e))),
        }

        match self.read_lock().await? {
            Some(existing) if !existing.is_expired() => Err(BackendError::locked(&existing)),
            existing => {
                if let Some(existing) = existing {
                    log::warn!(
                        "breaking expired lock {} held by {}",
                        existing.id,
                        existing.who
                    );
                }
                self.remove_lock().await?;
                match self.create_lock(&lock).await {
                    Ok(()) => Ok(lock),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.read_lock().await? {
                        Some(winner) => Err(BackendError::locked(&winner)),
                        None => Err(BackendError::Io("Lock file changed while acquiring".to_string())),
                    },
                    Err(e) => Err(BackendError::Io(format!("Failed to create lock file: {}", e))),
                }
            }
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        match self.read_lock().await? {
            None => Err(BackendError::LockNotFound(lock.id.clone())),
            Some(existing) if existing.id != lock.id => Err(BackendError::LockMismatch {
                expected: existing.id,
                actual: lock.id.clone(),
            }),
            Some(_) => self.remove_lock().await,
        }
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        match self.read_lock().await? {
            None => Err(BackendError::LockNotFound(lock_id.to_string())),
            Some(existing) if existing.id != lock_id => Err(BackendError::LockMismatch {
                expected: existing.id,
                actual: lock_id.to_string(),
            }),
            Some(_) => self.remove_lock().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use converge_core::resource::{ObservedState, ResourceId};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn backend(dir: &TempDir) -> LocalBackend {
        LocalBackend::with_path(dir.path().join("converge.state.json"))
    }

    #[tokio::test]
    async fn read_before_first_write() {
        let dir = TempDir::new().unwrap();
        assert!(backend(&dir).read_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let mut state = StateFile::new();
        state.record(
            &ResourceId::new("vpclattice_auth_policy", "svc"),
            Some(ObservedState::new("arn:aws:vpc-lattice:us-east-1:123456789012:service/svc-1", json!({}))),
        );
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let read = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.resources, state.resources);
        assert!(!dir.path().join("converge.state.json.tmp").exists());
    }

    #[tokio::test]
    async fn stale_serial_is_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let mut state = StateFile::new();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let result = backend.write_state(&state).await;
        assert!(matches!(
            result,
            Err(BackendError::StaleSerial { stored: 1, writing: 1 })
        ));

        state.increment_serial();
        backend.write_state(&state).await.unwrap();
    }

    #[tokio::test]
    async fn other_lineage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let mut state = StateFile::new();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let mut other = StateFile::new();
        other.serial = 10;
        let result = backend.write_state(&other).await;
        assert!(matches!(result, Err(BackendError::LineageMismatch { .. })));
    }

    #[tokio::test]
    async fn corrupt_state_file() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        std::fs::write(backend.state_path(), "not json").unwrap();

        let result = backend.read_state().await;
        assert!(matches!(result, Err(BackendError::InvalidState(_))));
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert!(dir.path().join("converge.state.lock").exists());

        match backend.acquire_lock("destroy").await {
            Err(BackendError::Locked { lock_id, operation, .. }) => {
                assert_eq!(lock_id, lock.id);
                assert_eq!(operation, "apply");
            }
            other => panic!("expected Locked, got {:?}", other),
        }

        backend.release_lock(&lock).await.unwrap();
        let next = backend.acquire_lock("destroy").await.unwrap();
        backend.release_lock(&next).await.unwrap();
    }

    #[tokio::test]
    async fn release_checks_the_lock_id() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let lock = backend.acquire_lock("apply").await.unwrap();
        let other = LockInfo::new("apply");
        assert!(matches!(
            backend.release_lock(&other).await,
            Err(BackendError::LockMismatch { .. })
        ));

        backend.release_lock(&lock).await.unwrap();
        assert!(matches!(
            backend.release_lock(&lock).await,
            Err(BackendError::LockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let stale = LockInfo::with_ttl("apply", Duration::seconds(-1));
        backend.create_lock(&stale).await.unwrap();

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_ne!(lock.id, stale.id);
        assert_eq!(backend.read_lock().await.unwrap(), Some(lock));
    }

    #[tokio::test]
    async fn force_unlock() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert!(matches!(
            backend.force_unlock("other").await,
            Err(BackendError::LockMismatch { .. })
        ));
        backend.force_unlock(&lock.id).await.unwrap();
        assert!(backend.read_lock().await.unwrap().is_none());
    }
}
