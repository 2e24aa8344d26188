//! Named consumer pool and its worker loop.
//!
//! A worker owns a [`QueueDrain`] over one or more channels. It waits for a
//! batch, runs the consumer on the blocking thread pool, waits for it to
//! finish, then drains again, so a worker never has two batches in flight.
//! Consumer errors and panics are reported through
//! [`BatchConsumer::on_error`] and never end the loop; only queue close or
//! pool shutdown does.
//!
//! Effective parallelism is `min(channels, max_workers)`: a channel is
//! never shared between workers, so extra worker slots stay idle.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{BatchConsumer, ConsumeError};
use crate::flow::queue::{ChannelReceiver, QueueDrain};

/// Error type for pool creation and startup.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid configuration for consumer pool '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("No Tokio runtime available to start consumers")]
    NoRuntime,

    #[error("Consumer pool '{0}' is shut down")]
    ShutDown(String),
}

/// Worker bounds of a consumer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 20,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self, name: &str) -> Result<(), PoolError> {
        let invalid = |reason: String| PoolError::InvalidConfig {
            name: name.to_string(),
            reason,
        };
        if self.max_workers == 0 {
            return Err(invalid("max_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(invalid(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }
}

/// A named set of long-lived consumer workers.
#[derive(Debug)]
pub struct ConsumerPool {
    name: String,
    config: PoolConfig,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    next_worker: AtomicUsize,
}

/// Workers started by one [`ConsumerPool::consume`] call.
#[derive(Debug)]
pub struct ConsumerHandle {
    pool: String,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker of this attachment to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(pool = %self.pool, error = %e, "Consumer worker terminated abnormally");
            }
        }
    }
}

impl ConsumerPool {
    /// Create a pool after validating its bounds.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Result<Self, PoolError> {
        let name = name.into();
        config.validate(&name)?;
        Ok(Self {
            name,
            config,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_worker: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of workers currently running across all attachments.
    pub fn active_workers(&self) -> usize {
        self.tracker.len()
    }

    /// Start workers draining `receivers` into `consumer`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn consume<T, C>(
        &self,
        receivers: Vec<ChannelReceiver<T>>,
        max_batch_size: usize,
        consumer: Arc<C>,
    ) -> Result<ConsumerHandle, PoolError>
    where
        T: Send + 'static,
        C: BatchConsumer<T>,
    {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown(self.name.clone()));
        }
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let channels = receivers.len();
        let drains = QueueDrain::split(receivers, self.config.max_workers, max_batch_size);
        if drains.len() < self.config.min_workers {
            tracing::debug!(
                pool = %self.name,
                min_workers = self.config.min_workers,
                channels,
                "Fewer channels than min_workers; extra slots stay idle"
            );
        }

        let handles: Vec<_> = drains
            .into_iter()
            .map(|drain| {
                let worker = self.next_worker.fetch_add(1, Ordering::Relaxed);
                let task = run_worker(
                    self.name.clone(),
                    worker,
                    drain,
                    Arc::clone(&consumer),
                    self.shutdown.clone(),
                );
                self.tracker.spawn_on(task, &runtime)
            })
            .collect();

        tracing::info!(pool = %self.name, workers = handles.len(), channels, "Consumers started");

        Ok(ConsumerHandle {
            pool: self.name.clone(),
            handles,
        })
    }

    /// Stop every worker of this pool and wait for them.
    ///
    /// Each worker finishes its current batch, then executes whatever is
    /// already queued on its channels before exiting. Items enqueued after
    /// that are not consumed.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(pool = %self.name, "Consumer pool shut down");
    }
}

async fn run_worker<T, C>(
    pool: String,
    worker: usize,
    mut drain: QueueDrain<T>,
    consumer: Arc<C>,
    shutdown: CancellationToken,
) where
    T: Send + 'static,
    C: BatchConsumer<T>,
{
    tracing::debug!(pool = %pool, worker, channels = ?drain.channels(), "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            batch = drain.drain_batch() => Some(batch),
        };
        match next {
            Some(Some(batch)) => dispatch(&pool, worker, &consumer, batch).await,
            Some(None) => break,
            None => {
                flush(&pool, worker, &mut drain, &consumer).await;
                break;
            }
        }
    }

    consumer.on_exit();
    tracing::debug!(pool = %pool, worker, "Worker stopped");
}

/// Execute every batch that is ready without waiting for more.
async fn flush<T, C>(pool: &str, worker: usize, drain: &mut QueueDrain<T>, consumer: &Arc<C>)
where
    T: Send + 'static,
    C: BatchConsumer<T>,
{
    let mut flushed = 0;
    while let Some(batch) = drain.try_drain_batch() {
        flushed += batch.len();
        dispatch(pool, worker, consumer, batch).await;
    }
    if flushed > 0 {
        tracing::info!(pool, worker, flushed, "Flushed queued items on shutdown");
    }
}

async fn dispatch<T, C>(pool: &str, worker: usize, consumer: &Arc<C>, batch: Vec<T>)
where
    T: Send + 'static,
    C: BatchConsumer<T>,
{
    let task_consumer = Arc::clone(consumer);
    let joined = tokio::task::spawn_blocking(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| task_consumer.consume(&batch)));
        (batch, result)
    })
    .await;

    let (batch, error) = match joined {
        Ok((_, Ok(Ok(())))) => return,
        Ok((batch, Ok(Err(e)))) => (batch, e),
        Ok((batch, Err(payload))) => (batch, ConsumeError::Panicked(panic_message(payload.as_ref()))),
        Err(e) => {
            tracing::error!(pool, worker, error = %e, "Batch consumer task failed, batch lost");
            return;
        }
    };

    let reported = panic::catch_unwind(AssertUnwindSafe(|| consumer.on_error(&batch, &error)));
    if let Err(payload) = reported {
        tracing::error!(
            pool,
            worker,
            error = %error,
            panic = %panic_message(payload.as_ref()),
            "Batch error handler panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
