//! Test utilities for sluice-batch integration tests.
//!
//! Provides:
//! - Temporary SQLite database fixtures
//! - Polling helper for asynchronous delivery

#![allow(dead_code)]

use sluice_batch::{BatchDao, DaoConfig, PoolManager, SqlStatement, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use tempfile::TempDir;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    /// Open a pool on the fixture database.
    pub fn pool(&self, options: SqlitePoolOptions) -> SqlitePool {
        SqlitePool::open(&self.db_path, options).expect("failed to open pool")
    }

    /// Open a DAO on the fixture database with a `events` table created.
    pub fn dao(&self, config: DaoConfig) -> BatchDao<SqlitePool, SqlStatement> {
        let dao = BatchDao::new(
            self.pool(SqlitePoolOptions::default()),
            &PoolManager::new(),
            config,
        )
        .expect("failed to create dao");
        dao.synchronous(&[SqlStatement::new(
            "CREATE TABLE IF NOT EXISTS events (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        )]);
        dao
    }

    /// Names in the `events` table, ordered by id.
    pub fn event_names(&self) -> Vec<String> {
        let conn = rusqlite::Connection::open(&self.db_path).expect("failed to open db");
        let mut stmt = conn
            .prepare("SELECT name FROM events ORDER BY id")
            .expect("failed to prepare");
        stmt.query_map([], |row| row.get(0))
            .expect("failed to query")
            .collect::<Result<Vec<String>, _>>()
            .expect("failed to read rows")
    }

    /// Number of rows in the `events` table.
    pub fn event_count(&self) -> usize {
        self.event_names().len()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert statement for the `events` table.
pub fn insert_event(id: i64, name: &str) -> SqlStatement {
    SqlStatement::with_params(
        "INSERT INTO events (id, name) VALUES (?1, ?2)",
        vec![id.into(), name.into()],
    )
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
