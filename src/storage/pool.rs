//! Write connection pool for batch execution.
//!
//! Uses r2d2 with r2d2_sqlite for pooled access. Every pooled connection
//! runs in WAL mode with a busy timeout so a locked database cannot stall
//! a worker forever.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// A connection checked out of [`SqlitePool`]. Returned to the pool on drop.
pub type SqliteConnection = PooledConnection<SqliteConnectionManager>;

/// Error type for connection acquisition.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Failed to acquire connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Connection unavailable: {0}")]
    Unavailable(String),
}

/// Source of connections for batch execution.
///
/// Implementations must be thread-safe: workers acquire concurrently.
/// The returned connection is released when dropped, on every exit path.
pub trait ConnectionProvider: Send + Sync + 'static {
    type Connection;

    /// Acquire one connection.
    fn acquire(&self) -> Result<Self::Connection, AcquireError>;
}

/// Tuning for [`SqlitePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlitePoolOptions {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// How long `acquire` waits for a free connection before failing
    pub connection_timeout: Duration,
    /// SQLite busy timeout applied to every connection
    pub busy_timeout: Duration,
}

impl Default for SqlitePoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite connection pool used as the batch layer's connection provider.
#[derive(Clone)]
pub struct SqlitePool {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlitePool {
    /// Open a pool on the database file at `db_path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot establish its first connection.
    pub fn open<P: AsRef<Path>>(db_path: P, options: SqlitePoolOptions) -> Result<Self, AcquireError> {
        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(options.max_size)
            .connection_timeout(options.connection_timeout)
            .connection_customizer(Box::new(WriterConnectionCustomizer {
                busy_timeout: options.busy_timeout,
            }))
            .build(manager)?;

        tracing::debug!(
            max_size = options.max_size,
            connection_timeout_ms = options.connection_timeout.as_millis() as u64,
            "SQLite pool opened"
        );

        Ok(Self { pool })
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }
}

impl ConnectionProvider for SqlitePool {
    type Connection = SqliteConnection;

    fn acquire(&self) -> Result<SqliteConnection, AcquireError> {
        Ok(self.pool.get()?)
    }
}

/// Connection customizer that applies writer pragmas.
#[derive(Debug)]
struct WriterConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for WriterConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_writer_pragmas(conn, self.busy_timeout)
    }
}

/// Pragmas for connections that execute write batches.
fn apply_writer_pragmas(conn: &rusqlite::Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // journal_mode answers with the resulting mode, so it has to be read back
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
    Ok(())
}
