// Shared infrastructure: errors, configuration and the two counting primitives
// the pool is built from.

pub mod config;
pub mod errors;
pub mod gate;
pub mod tracker;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use errors::{PoolError, Result};
pub use gate::{AdmissionGate, AdmissionToken};
pub use tracker::{CompletionGuard, CompletionTracker};
