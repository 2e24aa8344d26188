//! Flow control between producers and batch consumers.
//!
//! Provides:
//! - A bounded, multi-channel statement queue with explicit overflow policy
//! - Batch drains that hand ready items to consumer workers

pub mod queue;

pub use queue::{BoundedQueue, ChannelReceiver, OverflowPolicy, QueueConfig, QueueDrain, QueueError};
