//! Admission-controlled execution of dynamically expanding action graphs.

pub mod action;
pub mod diagnostics;
pub mod execution;
mod panics;
pub mod pool;

pub use action::{Action, Routine};
pub use diagnostics::{DiagnosticSink, MemorySink, StderrSink, WriterSink};
pub use execution::{ExecutionState, Fault};
pub use pool::{Pool, PoolStats};
