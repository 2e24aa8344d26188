//! sluice-batch: replay SQL statements through the buffered batch writer.
//!
//! # Usage
//!
//! ```bash
//! sluice-batch --db ./data/app.db --input statements.sql
//! cat statements.jsonl | sluice-batch --db ./data/app.db --overflow block
//! ```
//!
//! Environment variables can also be used:
//! - `SLUICE_BATCH_DB`: SQLite database file
//! - `SLUICE_BATCH_CHANNELS`: Number of queue channels
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use sluice_batch::config::Config;
use sluice_batch::observability::metrics::init_metrics_with_endpoint;
use sluice_batch::observability::tracing::init_tracing;
use sluice_batch::replay::{read_statements, replay};
use sluice_batch::{BatchDao, PoolManager, SqlStatement, SqlitePool};
use std::fs;
use std::io::{self, BufReader};

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  sluice-batch v{} - buffered batch writer

  Configuration:
    Database:   {}
    Channels:   {} x {}
    Workers:    {}..{}
    Batch size: {}
    Overflow:   {:?}
"#,
        version,
        config.db.display(),
        config.channels,
        config.channel_capacity,
        config.min_workers,
        config.max_workers,
        config.max_batch_size,
        config.overflow_policy(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    if let Some(parent) = config.db.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    print_banner(&config);

    let statements = match &config.input {
        Some(path) => {
            let file = fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            read_statements(BufReader::new(file))?
        }
        None => read_statements(io::stdin().lock())?,
    };
    tracing::info!(count = statements.len(), "Statements loaded");
    if config.channels > 1 {
        tracing::warn!(
            channels = config.channels,
            "Statements are spread over several channels; replay order is not preserved"
        );
    }

    let sqlite = SqlitePool::open(&config.db, config.pool_options())
        .with_context(|| format!("failed to open {}", config.db.display()))?;
    let pools = PoolManager::new();
    let dao: BatchDao<SqlitePool, SqlStatement> = BatchDao::new(sqlite, &pools, config.dao_config())?;

    // Stop feeding the queue on SIGINT/SIGTERM; what is queued still runs
    let summary = tokio::select! {
        summary = replay(&dao, statements) => Some(summary?),
        () = shutdown_signal() => None,
    };

    tracing::info!(pending = dao.pending(), "Flushing queued statements");
    dao.shutdown().await;
    pools.shutdown_all().await;

    match summary {
        Some(summary) => tracing::info!(
            enqueued = summary.enqueued,
            rejected = summary.rejected,
            "Replay complete"
        ),
        None => tracing::warn!("Replay interrupted"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}
