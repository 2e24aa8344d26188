//! Batch DAO: the public entry point for buffered writes.
//!
//! - [`BatchDao::synchronous`] executes a batch on the calling thread.
//! - [`BatchDao::asynchronous`] enqueues one statement; a consumer worker
//!   later executes it as part of a batch through the same path.
//!
//! Construction registers (or reuses) the named consumer pool, builds the
//! bounded queue, and starts the workers with `synchronous` as their batch
//! callback.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::batch::{BatchExecutor, BatchOutcome};
use crate::consumer::{BatchConsumer, ConsumeError, ConsumerHandle, ConsumerPool, PoolConfig, PoolError, PoolManager};
use crate::flow::queue::{BoundedQueue, QueueConfig, QueueError};
use crate::statement::Statement;
use crate::storage::ConnectionProvider;

/// Pool name used when none is configured.
pub const DEFAULT_POOL_NAME: &str = "SQLITE_ASYNCHRONOUS_BATCH_PERSISTENT";

/// Error type for DAO construction. Both variants are fatal: without a
/// working write path the DAO cannot be used.
#[derive(Debug, Error)]
pub enum DaoError {
    #[error("Consumer pool configuration error: {0}")]
    Pool(#[from] PoolError),

    #[error("Queue configuration error: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration of a [`BatchDao`].
///
/// Effective concurrency is `min(queue.channels, pool.max_workers)`. With
/// the default single channel, exactly one worker executes batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoConfig {
    /// Name of the consumer pool to register or reuse
    pub pool_name: String,
    /// Worker bounds, used only if the pool does not exist yet
    pub pool: PoolConfig,
    /// Queue sizing and overflow policy
    pub queue: QueueConfig,
    /// Upper bound on statements executed per batch. A batch holds only
    /// the statements ready when it is drained, so a large bound costs
    /// nothing for small batches.
    pub max_batch_size: usize,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            pool_name: DEFAULT_POOL_NAME.to_string(),
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
            max_batch_size: 10_000,
        }
    }
}

/// Buffered write access over a connection provider.
pub struct BatchDao<P: ConnectionProvider, S> {
    executor: Arc<BatchExecutor<P>>,
    queue: BoundedQueue<S>,
    pool: Arc<ConsumerPool>,
    consumers: Mutex<Option<ConsumerHandle>>,
}

impl<P, S> BatchDao<P, S>
where
    P: ConnectionProvider,
    S: Statement<P::Connection>,
{
    /// Wire the queue to a consumer pool and start consuming.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid worker bounds, queue sizing, or batch size, or when
    /// no runtime is available to run the workers.
    pub fn new(provider: P, pools: &PoolManager, config: DaoConfig) -> Result<Self, DaoError> {
        let pool = pools.get_or_create(&config.pool_name, config.pool)?;

        if config.max_batch_size == 0 {
            return Err(QueueError::InvalidConfig("max_batch_size must be at least 1".into()).into());
        }
        let (queue, receivers) = BoundedQueue::new(config.queue)?;

        let executor = Arc::new(BatchExecutor::new(provider));
        let consumer = Arc::new(SynchronousConsumer {
            executor: Arc::clone(&executor),
        });
        let consumers = pool.consume(receivers, config.max_batch_size, consumer)?;

        tracing::info!(
            pool = %config.pool_name,
            channels = config.queue.channels,
            channel_capacity = config.queue.channel_capacity,
            workers = consumers.workers(),
            "Batch DAO started"
        );

        Ok(Self {
            executor,
            queue,
            pool,
            consumers: Mutex::new(Some(consumers)),
        })
    }

    /// Execute `batch` now, on the calling thread.
    ///
    /// An empty batch is a no-op. Connection and statement failures are
    /// logged and reported in the outcome, never returned as errors.
    pub fn synchronous(&self, batch: &[S]) -> BatchOutcome {
        self.executor.execute(batch)
    }

    /// Enqueue `statement` for execution by a consumer worker.
    ///
    /// Returns once the statement is queued, before it runs. Waits only if
    /// the queue is full and the overflow policy says to wait.
    pub async fn asynchronous(&self, statement: S) -> Result<(), QueueError> {
        self.queue.produce(statement).await
    }

    /// Statements queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn pool(&self) -> &Arc<ConsumerPool> {
        &self.pool
    }

    pub fn provider(&self) -> &P {
        self.executor.provider()
    }

    /// Stop accepting statements, execute what is queued, and wait for
    /// this DAO's workers to exit.
    pub async fn shutdown(&self) {
        self.queue.close();
        let consumers = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumers) = consumers {
            consumers.join().await;
        }
        tracing::info!(pool = %self.pool.name(), "Batch DAO shut down");
    }
}

/// Consumer callback that runs drained batches through the synchronous path.
struct SynchronousConsumer<P> {
    executor: Arc<BatchExecutor<P>>,
}

impl<P, S> BatchConsumer<S> for SynchronousConsumer<P>
where
    P: ConnectionProvider,
    S: Statement<P::Connection>,
{
    fn consume(&self, batch: &[S]) -> Result<(), ConsumeError> {
        self.executor.execute(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::queue::OverflowPolicy;
    use crate::statement::ExecutionError;
    use crate::storage::AcquireError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Condvar;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    #[derive(Default)]
    struct Journal {
        applied: Mutex<Vec<&'static str>>,
        acquired: AtomicUsize,
        unavailable: AtomicBool,
    }

    struct JournalConnection(Arc<Journal>);

    #[derive(Clone, Default)]
    struct JournalProvider(Arc<Journal>);

    impl ConnectionProvider for JournalProvider {
        type Connection = JournalConnection;

        fn acquire(&self) -> Result<JournalConnection, AcquireError> {
            self.0.acquired.fetch_add(1, Ordering::SeqCst);
            if self.0.unavailable.load(Ordering::SeqCst) {
                return Err(AcquireError::Unavailable("down".into()));
            }
            Ok(JournalConnection(Arc::clone(&self.0)))
        }
    }

    /// Blocks `apply` until opened.
    #[derive(Default)]
    struct Gate {
        entered: AtomicBool,
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            self.entered.store(true, Ordering::SeqCst);
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
        }

        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }
    }

    enum Op {
        Write(&'static str),
        Fail(&'static str),
        Gated(Arc<Gate>),
    }

    impl Statement<JournalConnection> for Op {
        fn apply(&self, conn: &mut JournalConnection) -> Result<(), ExecutionError> {
            match self {
                Op::Write(name) => {
                    conn.0.applied.lock().unwrap().push(*name);
                    Ok(())
                }
                Op::Fail(name) => Err(ExecutionError::Failed(format!("{name} failed"))),
                Op::Gated(gate) => {
                    gate.wait();
                    Ok(())
                }
            }
        }
    }

    fn dao(provider: JournalProvider, queue: QueueConfig) -> BatchDao<JournalProvider, Op> {
        let config = DaoConfig {
            queue,
            ..DaoConfig::default()
        };
        BatchDao::new(provider, &PoolManager::new(), config).unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_synchronous_empty_batch_is_noop() {
        let provider = JournalProvider::default();
        let dao = dao(provider.clone(), QueueConfig::default());

        assert_eq!(dao.synchronous(&[]), BatchOutcome::Empty);
        assert_eq!(provider.0.acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_synchronous_isolates_failures() {
        let provider = JournalProvider::default();
        let dao = dao(provider.clone(), QueueConfig::default());

        let outcome = dao.synchronous(&[Op::Fail("s1"), Op::Write("s2")]);

        assert_eq!(outcome, BatchOutcome::Executed { applied: 1, failed: 1 });
        assert_eq!(*provider.0.applied.lock().unwrap(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_synchronous_drops_batch_without_connection() {
        let provider = JournalProvider::default();
        provider.0.unavailable.store(true, Ordering::SeqCst);
        let dao = dao(provider.clone(), QueueConfig::default());

        let outcome = dao.synchronous(&[Op::Write("a"), Op::Write("b")]);

        assert_eq!(outcome, BatchOutcome::Dropped { size: 2 });
        assert!(provider.0.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pool_config_is_fatal() {
        let config = DaoConfig {
            pool_name: "invalid".into(),
            pool: PoolConfig {
                min_workers: 4,
                max_workers: 2,
            },
            ..DaoConfig::default()
        };
        let result = BatchDao::<JournalProvider, Op>::new(JournalProvider::default(), &PoolManager::new(), config);

        assert!(matches!(result, Err(DaoError::Pool(PoolError::InvalidConfig { .. }))));
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_fatal() {
        let config = DaoConfig {
            max_batch_size: 0,
            ..DaoConfig::default()
        };
        let result = BatchDao::<JournalProvider, Op>::new(JournalProvider::default(), &PoolManager::new(), config);

        assert!(matches!(result, Err(DaoError::Queue(QueueError::InvalidConfig(_)))));
    }

    #[tokio::test]
    async fn test_asynchronous_delivers_in_order() {
        let provider = JournalProvider::default();
        let dao = dao(provider.clone(), QueueConfig::default());

        for name in ["a", "b", "c", "d"] {
            dao.asynchronous(Op::Write(name)).await.unwrap();
        }
        wait_until(|| provider.0.applied.lock().unwrap().len() == 4).await;

        assert_eq!(*provider.0.applied.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_full_queue_suspends_producer_until_slot_frees() {
        let provider = JournalProvider::default();
        let dao = dao(
            provider.clone(),
            QueueConfig {
                channels: 1,
                channel_capacity: 2,
                overflow: OverflowPolicy::Block,
            },
        );

        // Occupy the single worker so nothing drains
        let gate = Arc::new(Gate::default());
        dao.asynchronous(Op::Gated(Arc::clone(&gate))).await.unwrap();
        wait_until(|| gate.entered.load(Ordering::SeqCst)).await;

        dao.asynchronous(Op::Write("A")).await.unwrap();
        dao.asynchronous(Op::Write("B")).await.unwrap();
        assert_eq!(dao.pending(), 2);

        let mut third = tokio_test::task::spawn(dao.asynchronous(Op::Write("C")));
        assert_pending!(third.poll());
        assert_eq!(dao.pending(), 2);
        assert!(dao.pending() <= dao.queue.capacity());

        gate.release();
        wait_until(|| third.is_woken()).await;
        assert_ready!(third.poll()).unwrap();
        drop(third);

        wait_until(|| provider.0.applied.lock().unwrap().len() == 3).await;
        assert_eq!(*provider.0.applied.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_drop_new_policy_rejects_when_full() {
        let provider = JournalProvider::default();
        let dao = dao(
            provider.clone(),
            QueueConfig {
                channels: 1,
                channel_capacity: 1,
                overflow: OverflowPolicy::DropNew,
            },
        );

        let gate = Arc::new(Gate::default());
        dao.asynchronous(Op::Gated(Arc::clone(&gate))).await.unwrap();
        wait_until(|| gate.entered.load(Ordering::SeqCst)).await;

        dao.asynchronous(Op::Write("kept")).await.unwrap();
        let rejected = dao.asynchronous(Op::Write("rejected")).await;
        assert_eq!(rejected, Err(QueueError::Full { channel: 0 }));

        gate.release();
        dao.shutdown().await;
        assert_eq!(*provider.0.applied.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_worker_continues_after_dropped_batch() {
        let provider = JournalProvider::default();
        let dao = dao(provider.clone(), QueueConfig::default());

        provider.0.unavailable.store(true, Ordering::SeqCst);
        dao.asynchronous(Op::Write("lost")).await.unwrap();
        wait_until(|| provider.0.acquired.load(Ordering::SeqCst) == 1).await;

        provider.0.unavailable.store(false, Ordering::SeqCst);
        dao.asynchronous(Op::Write("kept")).await.unwrap();
        wait_until(|| provider.0.applied.lock().unwrap().len() == 1).await;

        assert_eq!(*provider.0.applied.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queue() {
        let provider = JournalProvider::default();
        let dao = dao(provider.clone(), QueueConfig::default());

        for name in ["x", "y", "z"] {
            dao.asynchronous(Op::Write(name)).await.unwrap();
        }
        dao.shutdown().await;

        assert_eq!(*provider.0.applied.lock().unwrap(), vec!["x", "y", "z"]);
        assert_eq!(dao.asynchronous(Op::Write("late")).await, Err(QueueError::Closed));
    }
}
