//! Configuration parsing for the sluice-batch CLI.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Defaults matching the reference write path (1 channel x 10000, 1..20 workers)

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::consumer::PoolConfig;
use crate::dao::{DaoConfig, DEFAULT_POOL_NAME};
use crate::flow::queue::{OverflowPolicy, QueueConfig};
use crate::storage::SqlitePoolOptions;

/// Overflow behavior names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverflowMode {
    /// Wait for space indefinitely
    Block,
    /// Wait for space up to --overflow-timeout-ms
    Timeout,
    /// Reject immediately when full
    Drop,
}

/// sluice-batch: replay SQL statements through the buffered batch writer.
#[derive(Parser, Debug, Clone)]
#[command(name = "sluice-batch")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// SQLite database file to write to
    #[arg(short, long, env = "SLUICE_BATCH_DB", default_value = "./data/sluice-batch.db")]
    pub db: PathBuf,

    /// File of statements, one per line (reads stdin when omitted)
    #[arg(short, long, env = "SLUICE_BATCH_INPUT")]
    pub input: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Name of the consumer pool
    #[arg(long, env = "SLUICE_BATCH_POOL_NAME", default_value = DEFAULT_POOL_NAME)]
    pub pool_name: String,

    /// Minimum consumer workers
    #[arg(long, env = "SLUICE_BATCH_MIN_WORKERS", default_value_t = 1)]
    pub min_workers: usize,

    /// Maximum consumer workers (effective workers never exceed --channels)
    #[arg(long, env = "SLUICE_BATCH_MAX_WORKERS", default_value_t = 20)]
    pub max_workers: usize,

    /// Number of queue channels (replay order is only kept with 1)
    #[arg(long, env = "SLUICE_BATCH_CHANNELS", default_value_t = 1)]
    pub channels: usize,

    /// Capacity of each queue channel
    #[arg(long, env = "SLUICE_BATCH_CHANNEL_CAPACITY", default_value_t = 10_000)]
    pub channel_capacity: usize,

    /// Maximum statements per executed batch
    #[arg(long, env = "SLUICE_BATCH_MAX_BATCH_SIZE", default_value_t = 10_000)]
    pub max_batch_size: usize,

    /// What to do when the queue is full
    #[arg(long, env = "SLUICE_BATCH_OVERFLOW", value_enum, default_value_t = OverflowMode::Timeout)]
    pub overflow: OverflowMode,

    /// Producer wait before rejecting, for --overflow timeout
    #[arg(long, env = "SLUICE_BATCH_OVERFLOW_TIMEOUT_MS", default_value_t = 5000)]
    pub overflow_timeout_ms: u64,

    /// Size of the SQLite connection pool
    #[arg(long, env = "SLUICE_BATCH_CONNECTION_POOL_SIZE", default_value_t = 10)]
    pub connection_pool_size: u32,

    /// How long a batch waits for a pooled connection
    #[arg(long, env = "SLUICE_BATCH_ACQUIRE_TIMEOUT_MS", default_value_t = 30_000)]
    pub acquire_timeout_ms: u64,

    /// SQLite busy timeout per connection
    #[arg(long, env = "SLUICE_BATCH_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        match self.overflow {
            OverflowMode::Block => OverflowPolicy::Block,
            OverflowMode::Timeout => {
                OverflowPolicy::BlockWithTimeout(Duration::from_millis(self.overflow_timeout_ms))
            }
            OverflowMode::Drop => OverflowPolicy::DropNew,
        }
    }

    /// Batch DAO settings derived from this configuration.
    pub fn dao_config(&self) -> DaoConfig {
        DaoConfig {
            pool_name: self.pool_name.clone(),
            pool: PoolConfig {
                min_workers: self.min_workers,
                max_workers: self.max_workers,
            },
            queue: QueueConfig {
                channels: self.channels,
                channel_capacity: self.channel_capacity,
                overflow: self.overflow_policy(),
            },
            max_batch_size: self.max_batch_size,
        }
    }

    /// Connection pool settings derived from this configuration.
    pub fn pool_options(&self) -> SqlitePoolOptions {
        SqlitePoolOptions {
            max_size: self.connection_pool_size,
            connection_timeout: Duration::from_millis(self.acquire_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}
