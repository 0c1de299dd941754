//! Converge State Management
//!
//! Persists the last-known observed state of managed resources between
//! commands, with a lock guarding the state while a command mutates it.
//!
//! - **StateFile**: every managed resource with its remote identity and observed attributes
//! - **StateBackend**: storage for the state file and its lock
//! - **LockInfo**: who holds the state and until when
//!
//! # Example
//!
//! ```ignore
//! use converge_state::{create_backend, BackendConfig, StateFile};
//!
//! let backend = create_backend(&BackendConfig::default())?;
//! let lock = backend.acquire_lock("apply").await?;
//!
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! state.record(&id, Some(observed));
//! state.increment_serial();
//! backend.write_state(&state).await?;
//!
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
