//! Range fetch with densification.

use std::collections::HashMap;

use serde::Serialize;

use crate::session::{Consistency, Session, Value};

use super::aggregate::{reduce, Method, Reduced};
use super::prepared::PreparedCache;
use super::{query, StoreError};

/// Result of a range fetch.
///
/// `from` and `to` are grid-aligned and may differ from the caller's inputs;
/// each series holds one entry per grid time, null where the bucket reduced
/// to nothing. Paths that returned no rows are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub from: i64,
    pub to: i64,
    pub step: i64,
    pub series: HashMap<String, Vec<Option<Reduced>>>,
}

impl FetchResult {
    fn empty(from: i64, to: i64, step: i64) -> Self {
        Self {
            from,
            to,
            step,
            series: HashMap::new(),
        }
    }
}

/// Runs the multi-path range query and densifies the result over the
/// `rollup`-aligned time grid.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn fetch(
    session: &dyn Session,
    prepared: &PreparedCache,
    method: Method,
    table: &str,
    paths: &[String],
    rollup: i64,
    period: i64,
    from: i64,
    to: i64,
) -> Result<FetchResult, StoreError> {
    if rollup <= 0 {
        return Err(StoreError::InvalidResolution(rollup));
    }

    if paths.is_empty() {
        return Ok(FetchResult::empty(from, to, rollup));
    }

    let stmt = prepared
        .get_or_prepare(session, &query::range_fetch(table))
        .await?;

    let values = vec![
        Value::TextList(paths.to_vec()),
        Value::Int(rollup),
        Value::Int(period),
        Value::Int(from),
        Value::Int(to),
    ];
    let rows = session.execute(&stmt, values, Consistency::One).await?;

    if rows.is_empty() {
        return Ok(FetchResult::empty(from, to, rollup));
    }

    let min_point = grid_floor(from, rollup);
    let max_point = grid_floor(to, rollup);

    // Group rows by path, then by bucket time. Real rows replace the null
    // scaffold below.
    let mut by_path: HashMap<String, HashMap<i64, Vec<f64>>> = HashMap::new();
    for row in rows {
        let mut columns = row.columns.into_iter();
        match (columns.next(), columns.next(), columns.next()) {
            (
                Some(Value::Text(path)),
                Some(Value::DoubleList(data)),
                Some(Value::Int(time)),
            ) => {
                by_path.entry(path).or_default().insert(time, data);
            }
            _ => {
                tracing::warn!(table, "skipping malformed range fetch row");
            }
        }
    }

    let len = ((max_point - min_point) / rollup + 1) as usize;
    let mut series = HashMap::with_capacity(by_path.len());
    for (path, buckets) in by_path {
        let mut points = Vec::with_capacity(len);
        let mut t = min_point;
        while t <= max_point {
            let data = buckets.get(&t).map(Vec::as_slice).unwrap_or(&[]);
            points.push(reduce(method, data));
            t += rollup;
        }
        series.insert(path, points);
    }

    Ok(FetchResult {
        from: min_point,
        to: max_point,
        step: rollup,
        series,
    })
}

/// Aligns `t` down to the nearest multiple of `step`.
fn grid_floor(t: i64, step: i64) -> i64 {
    t.div_euclid(step) * step
}
