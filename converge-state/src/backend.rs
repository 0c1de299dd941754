//! Where state and its lock live

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::state::StateFile;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    #[error("No lock is held (expected {0})")]
    LockNotFound(String),

    #[error("Lock is held as {expected}, not {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unknown state backend '{0}'")]
    UnsupportedBackend(String),

    #[error("Unreadable state: {0}")]
    InvalidState(String),

    /// The stored state belongs to a different history
    #[error("Stored state has lineage {expected}, refusing to overwrite it with {actual}")]
    LineageMismatch { expected: String, actual: String },

    /// The stored state was written after this copy was read
    #[error("Stale state: stored serial {stored} is not older than {writing}")]
    StaleSerial { stored: u64, writing: u64 },

    #[error("State I/O failed: {0}")]
    Io(String),

    #[error("Could not encode state: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Storage for the state file and its lock
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the current state; `None` before the first write
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Write the state
    ///
    /// Fails if the stored state has another lineage or a serial not older
    /// than `state.serial`.
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Fails with `Locked` while another unexpired lock is held
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Remove a lock by id regardless of who holds it
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;
}

/// `backend` section of the manifest
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendConfig {
    /// Backend type; only "local" is supported
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,
    /// State file path for the local backend
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_backend_type() -> String {
    "local".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_names_the_holder() {
        let lock = LockInfo::new("apply");
        let error = BackendError::locked(&lock);
        assert_eq!(
            error.to_string(),
            format!(
                "State is locked by {} (lock ID: {}, operation: apply)",
                lock.who, lock.id
            )
        );
    }

    #[test]
    fn config_defaults_to_local() {
        let config: BackendConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BackendConfig::default());

        let config: BackendConfig =
            serde_json::from_str(r#"{"type": "local", "path": "prod.state.json"}"#).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("prod.state.json")));
    }
}
