//! # actionpool: bounded-concurrency execution of expanding action graphs
//!
//! An [`Action`] is an optional work routine plus prerequisite actions that
//! must finish before it runs. A routine may return follow-up actions, which
//! the [`Pool`] schedules once it returns. A single admission gate bounds how
//! many routines run at once, and a panic or error in one routine is reported
//! to the pool's diagnostic sink without disturbing any other action.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use actionpool::{Action, Pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Pool::with_capacity(4)?;
//!
//!     let load = Action::new(|| {
//!         println!("loading");
//!         vec![Action::new(|| {
//!             println!("indexing, after loading");
//!             Vec::new()
//!         })]
//!     });
//!     pool.submit(Action::new(|| Vec::new()).with_dependency(load)).await;
//!
//!     let doubled = pool.map(vec![1, 2, 3], |x| x * 2).await;
//!     assert_eq!(doubled, vec![Some(2), Some(4), Some(6)]);
//!
//!     pool.wait_and_close().await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod pool;

// Re-exports for convenience
pub use crate::core::config::{PoolConfig, PoolConfigBuilder, MAX_CONCURRENT_ENV};
pub use crate::core::errors::{PoolError, Result};
pub use crate::pool::{
    Action, DiagnosticSink, ExecutionState, Fault, MemorySink, Pool, PoolStats, Routine,
    StderrSink, WriterSink,
};
