//! The metric store: ingest-and-rollup engine plus the range-fetch path.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::session::{Consistency, Session, SessionError};

pub mod aggregate;
pub mod fetch;
pub mod prepared;
pub mod query;
pub mod rollup;
pub mod sample;
mod writer;

pub use aggregate::{reduce, Method, Reduced};
pub use fetch::FetchResult;
pub use sample::{PathRecord, Sample};

use prepared::PreparedCache;
use rollup::RollupWindows;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session rejected a statement or execution.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A batch mixed storage tables at its finest resolution.
    #[error("schema-inconsistent batch: {0}")]
    InconsistentBatch(String),

    /// The requested aggregation method is not recognized.
    #[error("unknown aggregation method: {0}")]
    UnknownMethod(String),

    /// A non-positive resolution cannot define a time grid.
    #[error("invalid rollup resolution: {0}")]
    InvalidResolution(i64),
}

/// The public surface of the storage core.
///
/// Owns the batching channel, the ingest worker, and the process-wide
/// caches (prepared statements, rollup windows), all scoped to this value
/// rather than to globals.
pub struct Store {
    session: Arc<dyn Session>,
    prepared: Arc<PreparedCache>,
    windows: Arc<RollupWindows>,
    keyspace: String,
    batch_size: usize,
    tx: mpsc::Sender<Sample>,
    rx: Option<mpsc::Receiver<Sample>>,
    path_sink: Option<mpsc::Sender<PathRecord>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Store {
    /// Builds a store over an established session.
    pub fn new(cfg: &Config, session: Arc<dyn Session>) -> Self {
        let (tx, rx) = mpsc::channel(cfg.chan_size.max(1));
        Self {
            session,
            prepared: Arc::new(PreparedCache::new()),
            windows: Arc::new(RollupWindows::new()),
            keyspace: cfg.keyspace.clone(),
            batch_size: cfg.batch_size,
            tx,
            rx: Some(rx),
            path_sink: None,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// Attaches a sink receiving one path record per ingested sample, for
    /// the external path index.
    pub fn with_path_sink(mut self, sink: mpsc::Sender<PathRecord>) -> Self {
        self.path_sink = Some(sink);
        self
    }

    /// Selects the keyspace and spawns the ingest worker.
    ///
    /// Idempotent; calls after the first are no-ops.
    pub async fn start(&mut self) -> Result<(), StoreError> {
        let Some(rx) = self.rx.take() else {
            tracing::debug!("ingest worker already started");
            return Ok(());
        };

        let use_stmt = self
            .session
            .prepare(&query::use_keyspace(&self.keyspace))
            .await?;
        self.session
            .execute(&use_stmt, Vec::new(), Consistency::One)
            .await?;

        let ctx = writer::WriterContext {
            session: Arc::clone(&self.session),
            prepared: Arc::clone(&self.prepared),
            windows: Arc::clone(&self.windows),
            path_sink: self.path_sink.clone(),
            batch_size: self.batch_size,
        };
        self.worker = Some(tokio::spawn(writer::run(ctx, rx, self.cancel.clone())));

        tracing::info!(
            keyspace = %self.keyspace,
            batch_size = self.batch_size,
            "metric store started",
        );

        Ok(())
    }

    /// The producer side of the batching channel.
    ///
    /// Every call returns a handle to the same channel; a full channel
    /// blocks producers, which is the only flow control in the ingest path.
    pub fn ingest_channel(&self) -> mpsc::Sender<Sample> {
        self.tx.clone()
    }

    /// Runs an aggregated range query over `paths`.
    ///
    /// `tenant` is accepted for interface compatibility; the schema is
    /// written with an empty tenant throughout.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch(
        &self,
        method: Method,
        table: &str,
        paths: &[String],
        _tenant: &str,
        rollup: i64,
        period: i64,
        from: i64,
        to: i64,
    ) -> Result<FetchResult, StoreError> {
        fetch::fetch(
            &*self.session,
            &self.prepared,
            method,
            table,
            paths,
            rollup,
            period,
            from,
            to,
        )
        .await
    }

    /// Shuts the ingest path down: pending samples are drained and written,
    /// in-flight writes are awaited, the worker exits.
    pub async fn stop(&mut self) -> Result<(), StoreError> {
        self.cancel.cancel();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "ingest worker terminated abnormally");
            }
        }

        tracing::info!("metric store stopped");
        Ok(())
    }
}
