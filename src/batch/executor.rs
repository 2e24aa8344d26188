//! Batch execution with per-statement failure isolation.
//!
//! One connection is acquired per batch and every statement is applied to
//! it in order. A failing statement is logged and skipped; the rest of the
//! batch still runs. If no connection can be acquired, the batch is
//! dropped and logged. Nothing is retried and nothing propagates to the
//! caller.
//!
//! No transaction is opened around a batch: each statement is as atomic
//! as its own `apply`.

use std::time::Instant;

use crate::generate_batch_id;
use crate::observability::metrics::{record_batch_dropped, record_batch_executed};
use crate::statement::Statement;
use crate::storage::ConnectionProvider;

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was empty; no connection was acquired.
    Empty,
    /// No connection could be acquired, so none of the statements ran.
    Dropped { size: usize },
    /// Every statement was attempted.
    Executed { applied: usize, failed: usize },
}

/// Applies batches of statements against connections from a provider.
#[derive(Debug)]
pub struct BatchExecutor<P> {
    provider: P,
}

impl<P: ConnectionProvider> BatchExecutor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Execute `batch` on a single connection.
    ///
    /// Blocks the calling thread for the duration of the batch.
    #[tracing::instrument(skip_all, fields(batch_id = %generate_batch_id(), size = batch.len()))]
    pub fn execute<S>(&self, batch: &[S]) -> BatchOutcome
    where
        S: Statement<P::Connection>,
    {
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        let start = Instant::now();
        tracing::debug!("Executing batch");

        let mut conn = match self.provider.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Connection acquisition failed, dropping batch");
                record_batch_dropped(batch.len());
                return BatchOutcome::Dropped { size: batch.len() };
            }
        };

        let mut failed = 0;
        for (index, statement) in batch.iter().enumerate() {
            if let Err(e) = statement.apply(&mut conn) {
                failed += 1;
                tracing::error!(error = %e, index, "Statement execution failed");
            }
        }
        drop(conn);

        let applied = batch.len() - failed;
        record_batch_executed(applied, failed, start.elapsed().as_secs_f64());

        if failed > 0 {
            tracing::warn!(applied, failed, "Batch executed with failures");
        } else {
            tracing::debug!(applied, "Batch executed");
        }

        BatchOutcome::Executed { applied, failed }
    }
}
