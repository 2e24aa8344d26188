//! sluice-batch: asynchronous write buffering with failure-isolated batches.
//!
//! Producers hand single write statements to a bounded in-memory queue.
//! Consumer workers drain the queue in batches and execute each batch on
//! one pooled database connection. A failing statement is logged and
//! skipped without discarding the rest of its batch.
//!
//! # Architecture
//!
//! - **Bounded**: fixed-capacity channels with an explicit overflow policy
//! - **Single-flight**: each worker executes one batch at a time
//! - **Fail-open**: a batch without a connection is logged and dropped
//! - **Observable**: tracing spans per batch and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`batch`]: Batch execution with per-statement failure isolation
//! - [`config`]: CLI and environment configuration
//! - [`consumer`]: Consumer pools, workers and the pool registry
//! - [`dao`]: The `synchronous`/`asynchronous` facade
//! - [`flow`]: Bounded queue and batch drains
//! - [`observability`]: Metrics and tracing setup
//! - [`replay`]: Statement input for the CLI
//! - [`statement`]: Statement trait and the SQL implementation
//! - [`storage`]: Connection provider and SQLite pool

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // consumer::pool::ConsumerPool is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::cast_possible_truncation,   // usize/u128 -> u64 for metrics
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod batch;
pub mod config;
pub mod consumer;
pub mod dao;
pub mod flow;
pub mod observability;
pub mod replay;
pub mod statement;
pub mod storage;

pub use batch::{BatchExecutor, BatchOutcome};
pub use consumer::{BatchConsumer, ConsumeError, ConsumerPool, PoolConfig, PoolError, PoolManager};
pub use dao::{BatchDao, DaoConfig, DaoError};
pub use flow::{OverflowPolicy, QueueConfig, QueueError};
pub use statement::{ExecutionError, SqlStatement, Statement};
pub use storage::{AcquireError, ConnectionProvider, SqlitePool, SqlitePoolOptions};

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) batch ID.
///
/// Batch IDs tag the tracing span of each executed batch so a batch's
/// per-statement errors can be correlated in logs.
///
/// # Example
///
/// ```
/// let id = sluice_batch::generate_batch_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_batch_id() -> String {
    Uuid::now_v7().to_string()
}
