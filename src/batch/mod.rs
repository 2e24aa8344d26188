//! Failure-isolated batch execution.

pub mod executor;

pub use executor::{BatchExecutor, BatchOutcome};
