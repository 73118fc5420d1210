//! In-memory session backend.
//!
//! Implements the five statement shapes the store prepares, backed by
//! process-local maps. Serves as a development backend and as the substrate
//! for the integration tests. Row expiry (TTL) is not modeled.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Consistency, Prepared, Row, Session, SessionError, Value};

/// Storage key for one point: (path, rollup, period, time).
type PointKey = (String, i64, i64, i64);

/// What a prepared statement does, recovered from its text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    RawInsert { table: String },
    RollupInsert { table: String },
    RangeFetch { table: String },
    RollupFetch { table: String },
    UseKeyspace,
}

/// Driver-level call counts, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub prepares: u64,
    pub raw_writes: u64,
    pub rollup_writes: u64,
    pub range_reads: u64,
    pub rollup_reads: u64,
}

/// Process-local [`Session`] implementation.
#[derive(Default)]
pub struct MemorySession {
    tables: DashMap<String, BTreeMap<PointKey, Vec<f64>>>,
    statements: DashMap<u64, Statement>,
    next_id: AtomicU64,
    prepares: AtomicU64,
    raw_writes: AtomicU64,
    rollup_writes: AtomicU64,
    range_reads: AtomicU64,
    rollup_reads: AtomicU64,
}

impl MemorySession {
    /// Creates an empty in-memory session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of driver-level call counts.
    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            prepares: self.prepares.load(Ordering::Relaxed),
            raw_writes: self.raw_writes.load(Ordering::Relaxed),
            rollup_writes: self.rollup_writes.load(Ordering::Relaxed),
            range_reads: self.range_reads.load(Ordering::Relaxed),
            rollup_reads: self.rollup_reads.load(Ordering::Relaxed),
        }
    }

    /// Seeds one stored point directly, bypassing the statement path.
    pub fn insert_point(
        &self,
        table: &str,
        path: &str,
        rollup: i64,
        period: i64,
        time: i64,
        data: Vec<f64>,
    ) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert((path.to_string(), rollup, period, time), data);
    }

    /// Reads one stored point directly.
    pub fn point(
        &self,
        table: &str,
        path: &str,
        rollup: i64,
        period: i64,
        time: i64,
    ) -> Option<Vec<f64>> {
        self.tables
            .get(table)?
            .get(&(path.to_string(), rollup, period, time))
            .cloned()
    }

    fn statement(&self, stmt: &Prepared) -> Result<Statement, SessionError> {
        self.statements
            .get(&stmt.id())
            .map(|kind| kind.clone())
            .ok_or_else(|| {
                SessionError::Execute(format!("unknown prepared statement {}", stmt.id()))
            })
    }

    fn append(&self, table: &str, values: &[Value]) -> Result<(), SessionError> {
        let (data, rollup, period, path, time) = bind_point(values)?;
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry((path.to_string(), rollup, period, time))
            .or_default()
            .extend_from_slice(data);
        self.raw_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn replace(&self, table: &str, values: &[Value]) -> Result<(), SessionError> {
        let (data, rollup, period, path, time) = bind_point(values)?;
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert((path.to_string(), rollup, period, time), data.to_vec());
        self.rollup_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn range_fetch(&self, table: &str, values: &[Value]) -> Result<Vec<Row>, SessionError> {
        self.range_reads.fetch_add(1, Ordering::Relaxed);

        let [Value::TextList(paths), Value::Int(rollup), Value::Int(period), Value::Int(from), Value::Int(to)] =
            values
        else {
            return Err(SessionError::Malformed(
                "range fetch expects [paths, rollup, period, from, to]".to_string(),
            ));
        };

        // Impossible bounds match zero rows.
        if from > to {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let Some(points) = self.tables.get(table) else {
            return Ok(rows);
        };

        for path in paths {
            let lo = Bound::Included((path.clone(), *rollup, *period, *from));
            let hi = Bound::Included((path.clone(), *rollup, *period, *to));
            for ((p, _, _, time), data) in points.range((lo, hi)) {
                rows.push(Row {
                    columns: vec![
                        Value::Text(p.clone()),
                        Value::DoubleList(data.clone()),
                        Value::Int(*time),
                    ],
                });
            }
        }

        Ok(rows)
    }

    fn rollup_fetch(&self, table: &str, values: &[Value]) -> Result<Vec<Row>, SessionError> {
        self.rollup_reads.fetch_add(1, Ordering::Relaxed);

        let [Value::Text(path), Value::Int(rollup), Value::Int(period), Value::Int(from), Value::Int(upper)] =
            values
        else {
            return Err(SessionError::Malformed(
                "rollup fetch expects [path, rollup, period, from, upper]".to_string(),
            ));
        };

        // Upper bound is exclusive; an empty or inverted window matches
        // zero rows.
        if from >= upper {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let Some(points) = self.tables.get(table) else {
            return Ok(rows);
        };

        let lo = Bound::Included((path.clone(), *rollup, *period, *from));
        let hi = Bound::Excluded((path.clone(), *rollup, *period, *upper));
        for (_, data) in points.range((lo, hi)) {
            rows.push(Row {
                columns: vec![Value::DoubleList(data.clone())],
            });
        }

        Ok(rows)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn prepare(&self, cql: &str) -> Result<Prepared, SessionError> {
        let kind = parse(cql)?;
        self.prepares.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.statements.insert(id, kind);
        Ok(Prepared::new(id, cql))
    }

    async fn execute(
        &self,
        stmt: &Prepared,
        values: Vec<Value>,
        _consistency: Consistency,
    ) -> Result<Vec<Row>, SessionError> {
        match self.statement(stmt)? {
            Statement::RawInsert { table } => {
                self.append(&table, &values)?;
                Ok(Vec::new())
            }
            Statement::RollupInsert { table } => {
                self.replace(&table, &values)?;
                Ok(Vec::new())
            }
            Statement::RangeFetch { table } => self.range_fetch(&table, &values),
            Statement::RollupFetch { table } => self.rollup_fetch(&table, &values),
            Statement::UseKeyspace => Ok(Vec::new()),
        }
    }

    async fn execute_batch(
        &self,
        stmt: &Prepared,
        rows: Vec<Vec<Value>>,
        _consistency: Consistency,
    ) -> Result<(), SessionError> {
        match self.statement(stmt)? {
            Statement::RawInsert { table } => {
                for values in &rows {
                    self.append(&table, values)?;
                }
                Ok(())
            }
            Statement::RollupInsert { table } => {
                for values in &rows {
                    self.replace(&table, values)?;
                }
                Ok(())
            }
            _ => Err(SessionError::Malformed(
                "batch execution is only valid for inserts".to_string(),
            )),
        }
    }
}

/// Recovers a statement's meaning from its exact text.
fn parse(cql: &str) -> Result<Statement, SessionError> {
    if let Some(rest) = cql.strip_prefix("UPDATE ") {
        let table = first_word(rest)?;
        if cql.contains("SET data = data + ?") {
            return Ok(Statement::RawInsert { table });
        }
        if cql.contains("SET data = ?") {
            return Ok(Statement::RollupInsert { table });
        }
        return Err(SessionError::Malformed(cql.to_string()));
    }

    if let Some(rest) = cql.strip_prefix("SELECT path, data, time FROM ") {
        return Ok(Statement::RangeFetch {
            table: first_word(rest)?,
        });
    }

    if let Some(rest) = cql.strip_prefix("SELECT data FROM ") {
        return Ok(Statement::RollupFetch {
            table: first_word(rest)?,
        });
    }

    if cql.strip_prefix("USE ").is_some() {
        return Ok(Statement::UseKeyspace);
    }

    Err(SessionError::Malformed(cql.to_string()))
}

fn first_word(s: &str) -> Result<String, SessionError> {
    match s.split_whitespace().next() {
        Some(word) if !word.is_empty() => Ok(word.to_string()),
        _ => Err(SessionError::Malformed(s.to_string())),
    }
}

/// Destructures an insert binding: [ttl, data, rollup, period, path, time].
fn bind_point(values: &[Value]) -> Result<(&[f64], i64, i64, &str, i64), SessionError> {
    match values {
        [Value::Int(_ttl), Value::DoubleList(data), Value::Int(rollup), Value::Int(period), Value::Text(path), Value::Int(time)] => {
            Ok((data, *rollup, *period, path, *time))
        }
        _ => Err(SessionError::Malformed(
            "insert expects [ttl, data, rollup, period, path, time]".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::query;

    fn insert_values(metric: f64, path: &str, time: i64) -> Vec<Value> {
        vec![
            Value::Int(86400),
            Value::DoubleList(vec![metric]),
            Value::Int(60),
            Value::Int(1440),
            Value::Text(path.to_string()),
            Value::Int(time),
        ]
    }

    #[test]
    fn test_parse_statement_kinds() {
        assert_eq!(
            parse(&query::raw_insert("metric")).unwrap(),
            Statement::RawInsert {
                table: "metric".to_string()
            }
        );
        assert_eq!(
            parse(&query::rollup_insert("metric_300")).unwrap(),
            Statement::RollupInsert {
                table: "metric_300".to_string()
            }
        );
        assert_eq!(
            parse(&query::range_fetch("metric")).unwrap(),
            Statement::RangeFetch {
                table: "metric".to_string()
            }
        );
        assert_eq!(
            parse(&query::rollup_fetch("metric")).unwrap(),
            Statement::RollupFetch {
                table: "metric".to_string()
            }
        );
        assert_eq!(parse("USE ks").unwrap(), Statement::UseKeyspace);
        assert!(parse("DROP TABLE metric").is_err());
    }

    #[tokio::test]
    async fn test_raw_insert_appends() {
        let session = MemorySession::new();
        let stmt = session.prepare(&query::raw_insert("metric")).await.unwrap();

        session
            .execute(&stmt, insert_values(1.5, "a.b", 60), Consistency::Any)
            .await
            .unwrap();
        session
            .execute(&stmt, insert_values(2.5, "a.b", 60), Consistency::Any)
            .await
            .unwrap();

        assert_eq!(
            session.point("metric", "a.b", 60, 1440, 60),
            Some(vec![1.5, 2.5])
        );
    }

    #[tokio::test]
    async fn test_rollup_insert_replaces() {
        let session = MemorySession::new();
        let stmt = session
            .prepare(&query::rollup_insert("metric"))
            .await
            .unwrap();

        session
            .execute(&stmt, insert_values(1.5, "a.b", 60), Consistency::Any)
            .await
            .unwrap();
        session
            .execute(&stmt, insert_values(9.0, "a.b", 60), Consistency::Any)
            .await
            .unwrap();

        assert_eq!(
            session.point("metric", "a.b", 60, 1440, 60),
            Some(vec![9.0])
        );
    }

    #[tokio::test]
    async fn test_rollup_fetch_upper_bound_is_exclusive() {
        let session = MemorySession::new();
        session.insert_point("metric", "a.b", 60, 1440, 240, vec![1.0]);
        session.insert_point("metric", "a.b", 60, 1440, 300, vec![2.0]);

        let stmt = session
            .prepare(&query::rollup_fetch("metric"))
            .await
            .unwrap();
        let rows = session
            .execute(
                &stmt,
                vec![
                    Value::Text("a.b".to_string()),
                    Value::Int(60),
                    Value::Int(1440),
                    Value::Int(0),
                    Value::Int(300),
                ],
                Consistency::LocalOne,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns, vec![Value::DoubleList(vec![1.0])]);
    }

    #[tokio::test]
    async fn test_range_fetch_bounds_are_inclusive() {
        let session = MemorySession::new();
        session.insert_point("metric", "a.b", 60, 1440, 60, vec![1.0]);
        session.insert_point("metric", "a.b", 60, 1440, 120, vec![2.0]);
        session.insert_point("metric", "a.b", 60, 1440, 180, vec![3.0]);

        let stmt = session.prepare(&query::range_fetch("metric")).await.unwrap();
        let rows = session
            .execute(
                &stmt,
                vec![
                    Value::TextList(vec!["a.b".to_string()]),
                    Value::Int(60),
                    Value::Int(1440),
                    Value::Int(60),
                    Value::Int(120),
                ],
                Consistency::One,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].columns[2], Value::Int(60));
        assert_eq!(rows[1].columns[2], Value::Int(120));
    }

    #[tokio::test]
    async fn test_range_fetch_inverted_bounds_match_zero_rows() {
        let session = MemorySession::new();
        session.insert_point("metric", "a.b", 60, 1440, 60, vec![1.0]);

        let stmt = session.prepare(&query::range_fetch("metric")).await.unwrap();
        let rows = session
            .execute(
                &stmt,
                vec![
                    Value::TextList(vec!["a.b".to_string()]),
                    Value::Int(60),
                    Value::Int(1440),
                    Value::Int(600),
                    Value::Int(60),
                ],
                Consistency::One,
            )
            .await
            .unwrap();

        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rollup_fetch_empty_window_matches_zero_rows() {
        let session = MemorySession::new();
        session.insert_point("metric", "a.b", 60, 1440, 300, vec![1.0]);

        let stmt = session
            .prepare(&query::rollup_fetch("metric"))
            .await
            .unwrap();

        for (from, upper) in [(300, 300), (600, 300)] {
            let rows = session
                .execute(
                    &stmt,
                    vec![
                        Value::Text("a.b".to_string()),
                        Value::Int(60),
                        Value::Int(1440),
                        Value::Int(from),
                        Value::Int(upper),
                    ],
                    Consistency::LocalOne,
                )
                .await
                .unwrap();
            assert!(rows.is_empty());
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_foreign_handle() {
        let session = MemorySession::new();
        let foreign = Prepared::new(99, "USE ks");

        let err = session
            .execute(&foreign, Vec::new(), Consistency::One)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Execute(_)));
    }
}
