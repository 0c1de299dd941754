//! Converge AWS Cloud Control Provider
//!
//! Remote client facade over AWS Cloud Control API and the resource kinds
//! it serves.
//!
//! ## Module Structure
//!
//! - `resources` - Resource and data source kinds with their field tables
//! - `provider` - AwsccProvider and the per-type Cloud Control client
//! - `utils` - Helper functions for payload conversion

pub mod provider;
pub mod resources;
pub mod utils;

// Re-export main types
pub use provider::{AwsccProvider, CloudControlResource};
pub use resources::registry;
pub use utils::normalize_region;
