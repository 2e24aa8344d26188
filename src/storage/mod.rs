//! Connection provisioning for batch execution.
//!
//! Provides:
//! - The [`ConnectionProvider`] seam the batch executor acquires through
//! - An r2d2-backed SQLite pool implementing it

pub mod pool;

pub use pool::{AcquireError, ConnectionProvider, SqliteConnection, SqlitePool, SqlitePoolOptions};
