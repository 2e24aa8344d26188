//! Executable write statements.
//!
//! A [`Statement`] is an opaque unit of database work applied to an open
//! connection. The batch layer never inspects it; it only calls
//! [`Statement::apply`] and contains whatever error comes back.
//!
//! [`SqlStatement`] is the concrete SQLite implementation: SQL text plus
//! positional parameters carried as JSON values.

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::ops::Deref;
use thiserror::Error;

/// Error raised by a single statement while applying it to a connection.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Statement failed: {0}")]
    Failed(String),
}

/// A unit of write work that can be applied to a connection of type `C`.
pub trait Statement<C>: Send + Sync + 'static {
    /// Apply this statement to an open connection.
    fn apply(&self, conn: &mut C) -> Result<(), ExecutionError>;
}

impl<C, S> Statement<C> for Box<S>
where
    S: Statement<C> + ?Sized,
{
    fn apply(&self, conn: &mut C) -> Result<(), ExecutionError> {
        (**self).apply(conn)
    }
}

/// A prepared SQL write with positional parameters.
///
/// Parameters map onto SQLite values: `null` to NULL, booleans to 0/1,
/// integral numbers to INTEGER, other numbers to REAL, strings to TEXT.
/// Arrays and objects are bound as their JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
}

impl SqlStatement {
    /// A statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A statement with positional parameters (`?1`, `?2`, ...).
    pub fn with_params(sql: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl<C> Statement<C> for SqlStatement
where
    C: Deref<Target = rusqlite::Connection>,
{
    fn apply(&self, conn: &mut C) -> Result<(), ExecutionError> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        stmt.execute(rusqlite::params_from_iter(self.params.iter().map(to_sql_value)))?;
        Ok(())
    }
}

fn to_sql_value(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
