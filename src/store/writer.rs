//! Batching channel and ingest worker.
//!
//! One long-lived task consumes the sample channel, cutting batches on a
//! size or time threshold. Each batch is split by resolution tier: the
//! finest tier is written as raw points, every coarser tier triggers
//! per-path rollups computed from freshly written finest-tier data. DB
//! operations are issued without being awaited; failures are logged and the
//! worker moves on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::session::{Consistency, Session, Value};

use super::prepared::PreparedCache;
use super::query;
use super::rollup::RollupWindows;
use super::sample::{PathRecord, Sample};
use super::StoreError;

/// Maximum wait before a partial batch is flushed.
pub(crate) const BATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared dependencies of the ingest worker.
pub(crate) struct WriterContext {
    pub session: Arc<dyn Session>,
    pub prepared: Arc<PreparedCache>,
    pub windows: Arc<RollupWindows>,
    pub path_sink: Option<mpsc::Sender<PathRecord>>,
    pub batch_size: usize,
}

/// The finest tier present in a batch.
#[derive(Debug, Clone, PartialEq)]
struct LowTier {
    table: String,
    rollup: i64,
    period: i64,
}

/// Samples sharing one resolution tier.
#[derive(Debug)]
struct TierGroup {
    table: String,
    rollup: i64,
    period: i64,
    samples: Vec<Sample>,
}

/// Consumes the sample channel until cancellation or channel close.
pub(crate) async fn run(
    ctx: WriterContext,
    mut rx: mpsc::Receiver<Sample>,
    cancel: CancellationToken,
) {
    let batch_size = ctx.batch_size.max(1);
    let mut batch: Vec<Sample> = Vec::with_capacity(batch_size);
    let mut in_flight = JoinSet::new();
    let mut interval = tokio::time::interval(BATCH_TIMEOUT);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush the current batch, drain buffered samples, then
                // wait out in-flight writes.
                if !batch.is_empty() {
                    let samples = std::mem::take(&mut batch);
                    process_batch(&ctx, &mut in_flight, samples).await;
                }

                while let Ok(sample) = rx.try_recv() {
                    batch.push(sample);
                    if batch.len() >= batch_size {
                        let samples =
                            std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                        process_batch(&ctx, &mut in_flight, samples).await;
                    }
                }

                if !batch.is_empty() {
                    let samples = std::mem::take(&mut batch);
                    process_batch(&ctx, &mut in_flight, samples).await;
                }

                drain_in_flight(&mut in_flight).await;
                return;
            }

            sample = rx.recv() => match sample {
                Some(sample) => {
                    batch.push(sample);

                    // Take whatever else is already buffered, without
                    // blocking.
                    while batch.len() < batch_size {
                        match rx.try_recv() {
                            Ok(sample) => batch.push(sample),
                            Err(_) => break,
                        }
                    }

                    if batch.len() >= batch_size {
                        let samples =
                            std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                        process_batch(&ctx, &mut in_flight, samples).await;
                    }
                }
                None => {
                    if !batch.is_empty() {
                        let samples = std::mem::take(&mut batch);
                        process_batch(&ctx, &mut in_flight, samples).await;
                    }

                    drain_in_flight(&mut in_flight).await;
                    return;
                }
            },

            _ = interval.tick() => {
                if !batch.is_empty() {
                    let samples =
                        std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    process_batch(&ctx, &mut in_flight, samples).await;
                }
            }

            joined = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Some(Err(e)) = joined {
                    tracing::debug!(error = %e, "ingest write task join failed");
                }
            }
        }
    }
}

async fn drain_in_flight(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::debug!(error = %e, "ingest write task join failed");
        }
    }
}

/// Processes one batch; a failing batch is logged and dropped, the worker
/// survives.
async fn process_batch(ctx: &WriterContext, in_flight: &mut JoinSet<()>, samples: Vec<Sample>) {
    let count = samples.len();
    if let Err(e) = write_batch(ctx, in_flight, samples).await {
        tracing::warn!(error = %e, samples = count, "dropping batch after ingest failure");
    }
}

async fn write_batch(
    ctx: &WriterContext,
    in_flight: &mut JoinSet<()>,
    samples: Vec<Sample>,
) -> Result<(), StoreError> {
    if samples.is_empty() {
        return Ok(());
    }

    forward_path_records(ctx, &samples);

    let low = lowest_tier(&samples)?;
    let mut groups = group_by_rollup(samples).into_iter();

    let Some(finest) = groups.next() else {
        return Ok(());
    };
    write_raw(ctx, in_flight, &finest).await?;

    for group in groups {
        roll_up(ctx, in_flight, &low, &group).await;
    }

    Ok(())
}

/// Writes the finest-tier group as one batch of raw-insert executions.
async fn write_raw(
    ctx: &WriterContext,
    in_flight: &mut JoinSet<()>,
    group: &TierGroup,
) -> Result<(), StoreError> {
    let rows = raw_rows(group);

    let dropped = group.samples.len() - rows.len();
    if dropped > 0 {
        tracing::debug!(dropped, table = %group.table, "dropped non-finite samples from batch");
    }
    if rows.is_empty() {
        return Ok(());
    }

    let stmt = ctx
        .prepared
        .get_or_prepare(&*ctx.session, &query::raw_insert(&group.table))
        .await?;

    let session = Arc::clone(&ctx.session);
    let count = rows.len();
    let table = group.table.clone();
    in_flight.spawn(async move {
        match session.execute_batch(&stmt, rows, Consistency::Any).await {
            Ok(()) => tracing::debug!(rows = count, table = %table, "flushed raw points"),
            Err(e) => tracing::warn!(error = %e, table = %table, "raw point batch write failed"),
        }
    });

    Ok(())
}

/// Rolls one coarser tier up from the finest tier, per distinct path.
async fn roll_up(
    ctx: &WriterContext,
    in_flight: &mut JoinSet<()>,
    low: &LowTier,
    group: &TierGroup,
) {
    let Some(first) = group.samples.first() else {
        return;
    };
    // Wall-time for this window, taken from the tier's first row.
    let time = first.time;
    let ttl = first.ttl;

    let fetch_stmt = match ctx
        .prepared
        .get_or_prepare(&*ctx.session, &query::rollup_fetch(&low.table))
        .await
    {
        Ok(stmt) => stmt,
        Err(e) => {
            tracing::warn!(error = %e, table = %low.table, "preparing rollup fetch failed");
            return;
        }
    };
    let insert_stmt = match ctx
        .prepared
        .get_or_prepare(&*ctx.session, &query::rollup_insert(&group.table))
        .await
    {
        Ok(stmt) => stmt,
        Err(e) => {
            tracing::warn!(error = %e, table = %group.table, "preparing rollup insert failed");
            return;
        }
    };

    let mut paths: Vec<String> = group.samples.iter().map(|s| s.path.clone()).collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        if !ctx.windows.should_roll(&path, group.rollup, time) {
            continue;
        }
        ctx.windows.mark_rolled(&path, group.rollup, time);

        let session = Arc::clone(&ctx.session);
        let fetch_stmt = fetch_stmt.clone();
        let insert_stmt = insert_stmt.clone();
        let (low_rollup, low_period) = (low.rollup, low.period);
        let (rollup, period) = (group.rollup, group.period);

        // One path's failure must not affect the others; each rollup runs
        // as its own fire-and-forget task.
        in_flight.spawn(async move {
            let window = vec![
                Value::Text(path.clone()),
                Value::Int(low_rollup),
                Value::Int(low_period),
                Value::Int(time - rollup),
                Value::Int(time),
            ];
            let rows = match session
                .execute(&fetch_stmt, window, Consistency::LocalOne)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path, rollup, "rollup read failed");
                    return;
                }
            };

            let mut data = Vec::new();
            for row in rows {
                if let Some(Value::DoubleList(values)) = row.columns.into_iter().next() {
                    data.extend(values);
                }
            }
            if data.is_empty() {
                return;
            }

            let mean = data.iter().sum::<f64>() / data.len() as f64;
            if !mean.is_finite() {
                return;
            }

            let bind = vec![
                Value::Int(ttl),
                Value::DoubleList(vec![mean]),
                Value::Int(rollup),
                Value::Int(period),
                Value::Text(path.clone()),
                Value::Int(time),
            ];
            if let Err(e) = session.execute(&insert_stmt, bind, Consistency::Any).await {
                tracing::warn!(error = %e, path = %path, rollup, "rollup write failed");
            }
        });
    }
}

/// Forwards one path record per sample to the path-index sink, if any.
fn forward_path_records(ctx: &WriterContext, samples: &[Sample]) {
    let Some(sink) = &ctx.path_sink else {
        return;
    };
    for sample in samples {
        let record = PathRecord {
            path: sample.path.clone(),
            time: sample.time,
        };
        if sink.try_send(record).is_err() {
            tracing::debug!(path = %sample.path, "path sink full, dropping path record");
        }
    }
}

/// Binding rows for the finest group, with non-finite metrics dropped.
fn raw_rows(group: &TierGroup) -> Vec<Vec<Value>> {
    group
        .samples
        .iter()
        .filter(|s| s.metric.is_finite())
        .map(Sample::bind)
        .collect()
}

/// Identifies the minimum-rollup tier, rejecting batches where two tables
/// share the minimum.
fn lowest_tier(samples: &[Sample]) -> Result<LowTier, StoreError> {
    let Some(low) = samples.iter().min_by_key(|s| s.rollup) else {
        return Err(StoreError::InconsistentBatch("empty batch".to_string()));
    };

    for sample in samples {
        if sample.rollup == low.rollup && sample.table != low.table {
            return Err(StoreError::InconsistentBatch(format!(
                "tables {} and {} both claim the finest rollup {}",
                low.table, sample.table, low.rollup
            )));
        }
    }

    Ok(LowTier {
        table: low.table.clone(),
        rollup: low.rollup,
        period: low.period,
    })
}

/// Partitions a batch by rollup, ascending.
fn group_by_rollup(samples: Vec<Sample>) -> Vec<TierGroup> {
    let mut by_rollup: BTreeMap<i64, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        by_rollup.entry(sample.rollup).or_default().push(sample);
    }

    let mut groups = Vec::with_capacity(by_rollup.len());
    for (rollup, samples) in by_rollup {
        let (table, period) = match samples.first() {
            Some(first) => (first.table.clone(), first.period),
            None => continue,
        };
        groups.push(TierGroup {
            table,
            rollup,
            period,
            samples,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::MemorySession;

    fn sample(path: &str, time: i64, metric: f64, rollup: i64, table: &str) -> Sample {
        Sample {
            path: path.to_string(),
            time,
            metric,
            rollup,
            period: 1440,
            ttl: 86400,
            table: table.to_string(),
        }
    }

    #[test]
    fn test_group_by_rollup_ascending() {
        let groups = group_by_rollup(vec![
            sample("a.b", 300, 1.0, 300, "metric_300"),
            sample("a.b", 300, 1.0, 60, "metric"),
            sample("a.c", 300, 2.0, 60, "metric"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].rollup, 60);
        assert_eq!(groups[0].table, "metric");
        assert_eq!(groups[0].samples.len(), 2);
        assert_eq!(groups[1].rollup, 300);
        assert_eq!(groups[1].table, "metric_300");
    }

    #[test]
    fn test_lowest_tier_picks_minimum_rollup() {
        let batch = vec![
            sample("a.b", 300, 1.0, 300, "metric_300"),
            sample("a.b", 300, 1.0, 60, "metric"),
        ];

        let low = lowest_tier(&batch).unwrap();
        assert_eq!(low.rollup, 60);
        assert_eq!(low.table, "metric");
        assert_eq!(low.period, 1440);
    }

    #[test]
    fn test_lowest_tier_rejects_mixed_tables() {
        let batch = vec![
            sample("a.b", 60, 1.0, 60, "metric"),
            sample("a.c", 60, 2.0, 60, "metric_alt"),
        ];

        let err = lowest_tier(&batch).unwrap_err();
        assert!(matches!(err, StoreError::InconsistentBatch(_)));
    }

    #[test]
    fn test_raw_rows_drop_non_finite_metrics() {
        let groups = group_by_rollup(vec![
            sample("a.b", 60, 1.5, 60, "metric"),
            sample("a.b", 120, f64::NAN, 60, "metric"),
            sample("a.b", 180, f64::INFINITY, 60, "metric"),
        ]);

        let rows = raw_rows(&groups[0]);
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_flushes_on_cancel() {
        let session = Arc::new(MemorySession::new());
        let ctx = WriterContext {
            session: session.clone(),
            prepared: Arc::new(PreparedCache::new()),
            windows: Arc::new(RollupWindows::new()),
            path_sink: None,
            batch_size: 500,
        };
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run(ctx, rx, cancel.clone()));

        tx.send(sample("a.b", 60, 1.5, 60, "metric")).await.unwrap();
        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(session.point("metric", "a.b", 60, 1440, 60), Some(vec![1.5]));
    }

    #[tokio::test]
    async fn test_worker_flushes_on_channel_close() {
        let session = Arc::new(MemorySession::new());
        let ctx = WriterContext {
            session: session.clone(),
            prepared: Arc::new(PreparedCache::new()),
            windows: Arc::new(RollupWindows::new()),
            path_sink: None,
            batch_size: 500,
        };
        let (tx, rx) = mpsc::channel(16);
        let worker = tokio::spawn(run(ctx, rx, CancellationToken::new()));

        tx.send(sample("a.b", 60, 2.5, 60, "metric")).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(session.point("metric", "a.b", 60, 1440, 60), Some(vec![2.5]));
    }
}
