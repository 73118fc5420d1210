//! The database port.
//!
//! The store depends on three abstract capabilities: prepare a parameterized
//! statement, execute it with positional values at a requested consistency,
//! and get rows back. A concrete driver adapter (or the in-memory backend in
//! [`memory`]) supplies them behind the [`Session`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

/// Consistency level attached to a single statement execution.
///
/// Ingest writes use `Any`, rollup reads use `LocalOne`, user-facing range
/// reads use `One`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any,
    One,
    LocalOne,
}

/// A positional statement parameter or result column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Text(String),
    DoubleList(Vec<f64>),
    TextList(Vec<String>),
}

/// One result row from a statement execution.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Vec<Value>,
}

/// Handle to a statement prepared by a session backend.
///
/// Handles are cheap to clone and stay valid for the session's lifetime.
#[derive(Debug, Clone)]
pub struct Prepared {
    id: u64,
    cql: Arc<str>,
}

impl Prepared {
    /// Creates a handle for a backend-assigned statement id.
    pub fn new(id: u64, cql: &str) -> Self {
        Self {
            id,
            cql: Arc::from(cql),
        }
    }

    /// Backend-assigned statement id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The exact statement text this handle was prepared from.
    pub fn cql(&self) -> &str {
        &self.cql
    }
}

/// Errors surfaced by a session backend.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("statement preparation failed: {0}")]
    Prepare(String),

    #[error("statement execution failed: {0}")]
    Execute(String),

    #[error("malformed statement or values: {0}")]
    Malformed(String),
}

/// Asynchronous, thread-safe access to the wide-column store.
///
/// Implementations must tolerate concurrent calls; the ingest worker issues
/// executions without awaiting earlier ones.
#[async_trait]
pub trait Session: Send + Sync {
    /// Prepares a parameterized statement and returns its handle.
    async fn prepare(&self, cql: &str) -> Result<Prepared, SessionError>;

    /// Executes a prepared statement with positional values.
    ///
    /// Reads return the complete result set; paging is the adapter's
    /// concern.
    async fn execute(
        &self,
        stmt: &Prepared,
        values: Vec<Value>,
        consistency: Consistency,
    ) -> Result<Vec<Row>, SessionError>;

    /// Executes a prepared statement once per value row, as a single batch.
    async fn execute_batch(
        &self,
        stmt: &Prepared,
        rows: Vec<Vec<Value>>,
        consistency: Consistency,
    ) -> Result<(), SessionError>;
}
