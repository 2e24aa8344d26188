//! Consumer pools that drain the queue and hand batches to a callback.
//!
//! Provides:
//! - [`BatchConsumer`]: the per-batch callback with error and exit hooks
//! - [`ConsumerPool`]: named worker set driving one drain per worker
//! - [`PoolManager`]: explicit registry of pools by name

pub mod pool;
pub mod registry;

pub use pool::{ConsumerHandle, ConsumerPool, PoolConfig, PoolError};
pub use registry::PoolManager;

use thiserror::Error;

/// Failure of a consumer callback for one batch.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("Batch consumption failed: {0}")]
    Failed(String),

    #[error("Batch consumer panicked: {0}")]
    Panicked(String),
}

/// Callback invoked by pool workers for every drained batch.
///
/// `consume` runs on the blocking thread pool, so it may do synchronous
/// database work. A returned error or a panic is routed to `on_error`;
/// the worker keeps running either way.
pub trait BatchConsumer<T>: Send + Sync + 'static {
    /// Process one batch.
    fn consume(&self, batch: &[T]) -> Result<(), ConsumeError>;

    /// Called with the batch whose consumption failed.
    fn on_error(&self, batch: &[T], error: &ConsumeError) {
        tracing::error!(size = batch.len(), error = %error, "Batch consumer failed");
    }

    /// Called once when the worker stops.
    fn on_exit(&self) {}
}
