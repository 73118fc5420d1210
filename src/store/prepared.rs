//! Prepared-statement cache.

use dashmap::DashMap;

use crate::session::{Prepared, Session, SessionError};

/// Maps exact statement text to its prepared handle.
///
/// Preparation is lazy: the first caller for a given text round-trips to the
/// session, later callers get the cached handle. Two tasks racing on the
/// first preparation may both prepare; the last insert wins and either
/// handle stays valid.
#[derive(Default)]
pub struct PreparedCache {
    statements: DashMap<String, Prepared>,
}

impl PreparedCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the prepared handle for `cql`, preparing it on first use.
    pub async fn get_or_prepare(
        &self,
        session: &dyn Session,
        cql: &str,
    ) -> Result<Prepared, SessionError> {
        if let Some(stmt) = self.statements.get(cql) {
            return Ok(stmt.clone());
        }

        let stmt = session.prepare(cql).await?;
        self.statements.insert(cql.to_string(), stmt.clone());
        Ok(stmt)
    }

    /// Number of distinct statements held.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the cache holds no statements.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
