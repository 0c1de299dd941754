//! Converge Core
//!
//! Reconciliation engine for declarative cloud resources: typed field
//! tables, pure payload mapping, diffing, asynchronous operation polling,
//! and drift detection over an injected remote client.

pub mod config;
pub mod data_source;
pub mod differ;
pub mod drift;
pub mod error;
pub mod mapper;
pub mod plan;
pub mod poller;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod testing;

pub use config::{PollConfig, ReconcilerConfig};
pub use error::{Error, ReconcileError};
pub use mapper::{Readiness, ResourceKind};
pub use reconciler::{ReconcileRequest, Reconciled, Reconciler};
