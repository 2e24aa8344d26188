//! Bounded statement queue.
//!
//! Producers enqueue single items; consumer workers drain them in groups.
//! The queue is split into one or more channels, each a bounded
//! `tokio::sync::mpsc` channel. Producers are spread across channels
//! round-robin, and each channel delivers in FIFO order.
//!
//! When a channel is full the configured [`OverflowPolicy`] decides what
//! `produce` does. Items are never dropped silently: a rejected item is
//! reported back to the producer as [`QueueError::Full`].

use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics::{record_enqueued, record_rejected};

/// Default wait before a blocked producer gives up.
pub const DEFAULT_OVERFLOW_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for queue operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue channel {channel} is full")]
    Full { channel: usize },

    #[error("Queue is closed")]
    Closed,
}

/// What `produce` does when its channel is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait until a slot frees up or the queue closes.
    Block,
    /// Wait up to the given duration, then reject the item.
    BlockWithTimeout(Duration),
    /// Reject the item immediately.
    DropNew,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::BlockWithTimeout(DEFAULT_OVERFLOW_TIMEOUT)
    }
}

/// Sizing and overflow behavior of a [`BoundedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of independent FIFO channels
    pub channels: usize,
    /// Maximum pending items per channel
    pub channel_capacity: usize,
    /// Behavior when a channel is full
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            channel_capacity: 10_000,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Check that the queue can be built from this configuration.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.channels == 0 {
            return Err(QueueError::InvalidConfig("channels must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Producer side of the queue.
///
/// Shared by reference between producers; all methods take `&self`.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    config: QueueConfig,
    /// Emptied on close so receivers observe end-of-stream once drained.
    senders: RwLock<Vec<mpsc::Sender<T>>>,
    next: AtomicUsize,
    pending: Arc<AtomicUsize>,
    closed: CancellationToken,
}

/// Consumer side of one channel.
#[derive(Debug)]
pub struct ChannelReceiver<T> {
    index: usize,
    rx: mpsc::Receiver<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> ChannelReceiver<T> {
    /// Position of this channel within its queue.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Create a queue and the receivers for each of its channels.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConfig`] for zero channels or zero capacity.
    pub fn new(config: QueueConfig) -> Result<(Self, Vec<ChannelReceiver<T>>), QueueError> {
        config.validate()?;

        let pending = Arc::new(AtomicUsize::new(0));
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..config.channels)
            .map(|index| {
                let (tx, rx) = mpsc::channel(config.channel_capacity);
                let receiver = ChannelReceiver {
                    index,
                    rx,
                    pending: Arc::clone(&pending),
                };
                (tx, receiver)
            })
            .unzip();

        let queue = Self {
            config,
            senders: RwLock::new(senders),
            next: AtomicUsize::new(0),
            pending,
            closed: CancellationToken::new(),
        };
        Ok((queue, receivers))
    }

    /// Enqueue one item.
    ///
    /// Suspends only when the selected channel is full and the overflow
    /// policy says to wait.
    pub async fn produce(&self, item: T) -> Result<(), QueueError> {
        let (channel, sender) = {
            let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
            if senders.is_empty() {
                return Err(QueueError::Closed);
            }
            let channel = self.next.fetch_add(1, Ordering::Relaxed) % senders.len();
            (channel, senders[channel].clone())
        };

        let result = match self.reserve(channel, &sender).await {
            Ok(permit) => {
                // The slot is held by the permit, so the count never exceeds
                // capacity and is raised before a drain can take the item
                self.pending.fetch_add(1, Ordering::SeqCst);
                permit.send(item);
                record_enqueued();
                Ok(())
            }
            Err(e) => {
                match &e {
                    QueueError::Full { .. } => {
                        tracing::warn!(channel, policy = ?self.config.overflow, "Queue full, statement rejected");
                        record_rejected("full");
                    }
                    _ => record_rejected("closed"),
                }
                Err(e)
            }
        };
        result
    }

    async fn reserve<'a>(
        &self,
        channel: usize,
        sender: &'a mpsc::Sender<T>,
    ) -> Result<mpsc::Permit<'a, T>, QueueError> {
        match self.config.overflow {
            OverflowPolicy::DropNew => sender.try_reserve().map_err(|e| match e {
                TrySendError::Full(()) => QueueError::Full { channel },
                TrySendError::Closed(()) => QueueError::Closed,
            }),
            OverflowPolicy::Block => tokio::select! {
                permit = sender.reserve() => permit.map_err(|_| QueueError::Closed),
                () = self.closed.cancelled() => Err(QueueError::Closed),
            },
            OverflowPolicy::BlockWithTimeout(timeout) => tokio::select! {
                permit = tokio::time::timeout(timeout, sender.reserve()) => match permit {
                    Ok(permit) => permit.map_err(|_| QueueError::Closed),
                    Err(_) => Err(QueueError::Full { channel }),
                },
                () = self.closed.cancelled() => Err(QueueError::Closed),
            },
        }
    }

    /// Stop accepting items.
    ///
    /// Items already queued stay available to the drains, which end once
    /// those are consumed. Producers waiting for space fail with
    /// [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.cancel();
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!(pending = self.len(), "Queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of items enqueued but not yet taken by a drain.
    ///
    /// Producers still waiting for space are not counted.
    pub fn len(&self) -> usize {
        // A drain frees the slot just before it lowers the count
        self.pending.load(Ordering::SeqCst).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity across all channels.
    pub fn capacity(&self) -> usize {
        self.config.channels * self.config.channel_capacity
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

/// A consumer's view of one or more channels.
///
/// Yields groups of ready items, at most `max_batch_size` at a time.
pub struct QueueDrain<T> {
    channels: Vec<usize>,
    max_batch_size: usize,
    items: BoxStream<'static, T>,
}

impl<T: Send + 'static> QueueDrain<T> {
    /// Merge `receivers` into one drain.
    pub fn new(receivers: Vec<ChannelReceiver<T>>, max_batch_size: usize) -> Self {
        let channels = receivers.iter().map(ChannelReceiver::index).collect();
        let streams = receivers.into_iter().map(|receiver| {
            let pending = receiver.pending;
            ReceiverStream::new(receiver.rx)
                .inspect(move |_| {
                    pending.fetch_sub(1, Ordering::SeqCst);
                })
                .boxed()
        });
        Self {
            channels,
            max_batch_size: max_batch_size.max(1),
            items: stream::select_all(streams).boxed(),
        }
    }

    /// Distribute `receivers` round-robin over `workers` drains.
    ///
    /// Never returns more drains than receivers.
    pub fn split(receivers: Vec<ChannelReceiver<T>>, workers: usize, max_batch_size: usize) -> Vec<Self> {
        let workers = workers.clamp(1, receivers.len().max(1));
        let mut groups: Vec<Vec<ChannelReceiver<T>>> = (0..workers).map(|_| Vec::new()).collect();
        for (i, receiver) in receivers.into_iter().enumerate() {
            groups[i % workers].push(receiver);
        }
        groups
            .into_iter()
            .filter(|group| !group.is_empty())
            .map(|group| Self::new(group, max_batch_size))
            .collect()
    }

    /// Wait for the next group of items.
    ///
    /// Returns `None` once every channel is closed and empty. The batch
    /// grows with the items actually ready, not with `max_batch_size`.
    pub async fn drain_batch(&mut self) -> Option<Vec<T>> {
        let first = self.items.next().await?;
        let mut batch = vec![first];
        self.take_ready(&mut batch);
        Some(batch)
    }

    /// Take the next group of items only if one is ready right now.
    pub fn try_drain_batch(&mut self) -> Option<Vec<T>> {
        let first = self.items.next().now_or_never().flatten()?;
        let mut batch = vec![first];
        self.take_ready(&mut batch);
        Some(batch)
    }

    fn take_ready(&mut self, batch: &mut Vec<T>) {
        while batch.len() < self.max_batch_size {
            match self.items.next().now_or_never() {
                Some(Some(item)) => batch.push(item),
                _ => break,
            }
        }
    }

    /// Channel indexes this drain reads from.
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }
}

impl<T> std::fmt::Debug for QueueDrain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDrain")
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}
