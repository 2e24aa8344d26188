//! Statement replay for the command-line tool.
//!
//! Input is line oriented. Each non-blank line is one statement, either
//! plain SQL or a JSON object `{"sql": "...", "params": [...]}`. Lines
//! starting with `--` are comments.

use std::io::BufRead;
use thiserror::Error;

use crate::dao::BatchDao;
use crate::flow::queue::QueueError;
use crate::statement::{SqlStatement, Statement};
use crate::storage::ConnectionProvider;

/// Error type for reading replay input.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid statement on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Counts from one replay run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub enqueued: usize,
    pub rejected: usize,
}

/// Parse every statement from `reader`.
pub fn read_statements<R: BufRead>(reader: R) -> Result<Vec<SqlStatement>, ReplayError> {
    let mut statements = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        let statement = if trimmed.starts_with('{') {
            serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
                line: index + 1,
                source,
            })?
        } else {
            SqlStatement::new(trimmed.trim_end_matches(';').trim_end())
        };
        statements.push(statement);
    }
    Ok(statements)
}

/// Enqueue `statements` in order through the asynchronous path.
///
/// Statements refused because the queue is full are counted and skipped.
/// Stops early if the queue is closed. Execution follows file order only
/// when the queue has a single channel.
pub async fn replay<P>(
    dao: &BatchDao<P, SqlStatement>,
    statements: Vec<SqlStatement>,
) -> Result<ReplaySummary, QueueError>
where
    P: ConnectionProvider,
    SqlStatement: Statement<P::Connection>,
{
    let mut summary = ReplaySummary::default();
    for statement in statements {
        match dao.asynchronous(statement).await {
            Ok(()) => summary.enqueued += 1,
            Err(QueueError::Full { .. }) => summary.rejected += 1,
            Err(e) => return Err(e),
        }
    }
    tracing::debug!(enqueued = summary.enqueued, rejected = summary.rejected, "Replay queued");
    Ok(summary)
}
