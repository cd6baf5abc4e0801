//! Load session orchestrator.
//!
//! [`BulkLoader`] drives one session through its stages:
//!
//! ```text
//! Idle -> Connected -> Relaxed -> Transferring -> {Completed | Failed}
//!      -> Restored -> Released
//! ```
//!
//! Once a relax has been attempted, durability is restored on every exit
//! path, and the connection is released exactly once. Both are owned by a
//! [`CleanupGuard`] tracking the current stage, so they also happen when
//! the `run` future is dropped mid-flight. A restore whose connection
//! dropped is retried once on a fresh session.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use copyflow_core::clock::Clock;
use copyflow_core::producer::produce_with_clock;
use copyflow_core::throughput::ThroughputReport;
use futures::Stream;
use tokio::runtime::Handle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{LoadConfig, TableName};
use super::durability::DurabilityToggle;
use super::sink::{build_copy_sql, CopySink};
use super::store::{BulkStore, StoreSession};
use crate::error::{AdminError, LoadError, LoadErrorKind, TransferError};
use crate::metrics::LoadMetrics;
use crate::stage::LoadStage;

/// Outcome of a successful load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Target table.
    pub table: TableName,
    /// Record count the caller expected.
    pub expected_records: u64,
    /// Rows the store acknowledged.
    pub rows_copied: u64,
    /// Expected records over the transfer window.
    pub throughput: ThroughputReport,
}

impl LoadReport {
    /// Returns `true` if the store acknowledged the expected row count.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rows_copied == self.expected_records
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.throughput)
    }
}

/// Runs load sessions against a [`BulkStore`].
///
/// Sessions against the same table must not overlap; the durability
/// toggle of one would race the other's restore.
#[derive(Debug)]
pub struct BulkLoader<S> {
    store: S,
    config: LoadConfig,
    metrics: Arc<LoadMetrics>,
}

impl<S: BulkStore> BulkLoader<S> {
    /// Creates a loader.
    #[must_use]
    pub fn new(store: S, config: LoadConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(LoadMetrics::new()),
        }
    }

    /// Shares an existing metrics instance.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LoadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The load configuration.
    #[must_use]
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Session metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<LoadMetrics> {
        &self.metrics
    }

    /// Loads the configured dataset file.
    ///
    /// The file is opened before connecting, so a missing file never
    /// touches the table.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` with kind `SourceNotFound` if the file is
    /// missing, or any error from [`run`](Self::run).
    pub async fn run_file(&self, cancel: &CancellationToken) -> Result<LoadReport, LoadError> {
        let path = self.config.data_file.as_path();
        let file = open_source(path).await?;
        info!(path = %path.display(), "loading dataset file");
        let source = ReaderStream::with_capacity(file, self.config.channel.read_chunk_bytes);
        self.run(source, cancel).await
    }

    /// Loads `expected_records` freshly generated records without an
    /// intermediate file.
    ///
    /// # Errors
    ///
    /// Returns any error from [`run`](Self::run).
    pub async fn run_generated<C>(
        &self,
        clock: C,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, LoadError>
    where
        C: Clock + 'static,
    {
        let source = produce_with_clock(self.config.expected_records, clock)
            .into_byte_stream(self.config.channel.chunk_bytes);
        self.run(source, cancel).await
    }

    /// Runs one session, streaming `source` into the target table.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` carrying the stage of the first failure. A
    /// restore failure after a primary failure is attached as cleanup;
    /// after a successful transfer it is the primary failure.
    pub async fn run<St>(
        &self,
        source: St,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, LoadError>
    where
        St: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let table = &self.config.table;
        if cancel.is_cancelled() {
            return Err(LoadError::new(LoadStage::Idle, LoadErrorKind::Cancelled));
        }

        let session = match self.store.connect().await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                self.metrics.record_error();
                error!(%table, error = %e, "failed to connect");
                return Err(LoadError::new(LoadStage::Idle, LoadErrorKind::Connection(e)));
            }
        };
        info!(%table, stage = %LoadStage::Connected, "session started");

        let toggle = DurabilityToggle::new(
            table.clone(),
            self.config.restore_attempts,
            self.config.restore_backoff,
            Arc::clone(&self.metrics),
        );
        let mut guard = CleanupGuard::new(Arc::clone(&session), toggle.clone());

        // A rejected relax may still have applied.
        guard.enter(LoadStage::Relaxed);
        if let Err(e) = toggle.relax(session.as_ref()).await {
            drop(session);
            let cleanup = self.release(guard).await.err();
            return Err(LoadError::new(LoadStage::Connected, e).with_cleanup(cleanup));
        }
        debug!(%table, stage = %LoadStage::Relaxed, "durability relaxed");

        if cancel.is_cancelled() {
            drop(session);
            let cleanup = self.release(guard).await.err();
            return Err(
                LoadError::new(LoadStage::Relaxed, LoadErrorKind::Cancelled).with_cleanup(cleanup),
            );
        }

        guard.enter(LoadStage::Transferring);
        info!(%table, stage = %LoadStage::Transferring, "COPY started");
        let started = Instant::now();
        let transfer = self.transfer(session.as_ref(), source, cancel).await;
        let finished = Instant::now();
        let stage = if transfer.is_ok() {
            LoadStage::Completed
        } else {
            LoadStage::Failed
        };
        guard.enter(stage);
        debug!(%table, %stage, "transfer ended");

        drop(session);
        let cleanup = self.release(guard).await;

        match (transfer, cleanup) {
            (Ok(rows), Ok(())) => {
                let report = LoadReport {
                    table: table.clone(),
                    expected_records: self.config.expected_records,
                    rows_copied: rows,
                    throughput: ThroughputReport::from_instants(
                        self.config.expected_records,
                        started,
                        finished,
                    ),
                };
                if !report.is_complete() {
                    warn!(
                        %table,
                        expected = report.expected_records,
                        copied = rows,
                        "row count differs from expected record count"
                    );
                }
                info!(
                    %table,
                    rows,
                    elapsed_ms = report.throughput.elapsed_ms(),
                    rate = %report.throughput.rate(),
                    "load completed"
                );
                Ok(report)
            }
            (Ok(_), Err(admin)) => Err(LoadError::new(LoadStage::Completed, admin)),
            (Err(e), cleanup) => {
                let err = LoadError::new(LoadStage::Transferring, e).with_cleanup(cleanup.err());
                error!(%table, error = %err, "load failed");
                Err(err)
            }
        }
    }

    /// Discharges the guard, retrying the restore on a fresh session if the
    /// guarded one lost its connection.
    async fn release(&self, guard: CleanupGuard<S::Session>) -> Result<(), AdminError> {
        let toggle = guard.toggle().clone();
        match guard.finish().await {
            Err(e) if e.is_connection_lost() => {
                warn!(table = %toggle.table(), error = %e, "restoring durability on a fresh session");
                match self.store.connect().await {
                    Ok(fresh) => toggle.restore(&fresh).await,
                    Err(connect) => {
                        error!(table = %toggle.table(), error = %connect, "reconnect for restore failed");
                        Err(e)
                    }
                }
            }
            other => other,
        }
    }

    async fn transfer<St>(
        &self,
        session: &S::Session,
        source: St,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>
    where
        St: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let sql = build_copy_sql(&self.config.table);
        let mut copy = session.copy_in(&sql).await.map_err(|e| {
            self.metrics.record_error();
            TransferError::Start(e)
        })?;
        CopySink::new(self.config.channel, Arc::clone(&self.metrics))
            .transfer(source, &mut copy, cancel)
            .await
    }
}

async fn open_source(path: &Path) -> Result<tokio::fs::File, LoadError> {
    match tokio::fs::File::open(path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LoadError::new(
            LoadStage::Idle,
            LoadErrorKind::SourceNotFound(path.to_path_buf()),
        )),
        Err(e) => Err(LoadError::new(LoadStage::Idle, TransferError::Source(e))),
    }
}

/// Owns the restore and release obligations of a session.
///
/// The loader reports each stage it enters; a restore is owed while the
/// stage says so (see [`LoadStage::owes_restore`]). [`finish`](Self::finish)
/// discharges the obligations in order. If the guard is dropped first,
/// restore and release are spawned on the current runtime.
pub struct CleanupGuard<Sess: StoreSession> {
    session: Option<Arc<Sess>>,
    toggle: DurabilityToggle,
    stage: LoadStage,
}

impl<Sess: StoreSession> CleanupGuard<Sess> {
    /// Takes ownership of a freshly connected session's cleanup.
    #[must_use]
    pub fn new(session: Arc<Sess>, toggle: DurabilityToggle) -> Self {
        Self {
            session: Some(session),
            toggle,
            stage: LoadStage::Connected,
        }
    }

    /// Records that the session moved to `stage`.
    pub fn enter(&mut self, stage: LoadStage) {
        self.stage = stage;
    }

    /// The last stage entered.
    #[must_use]
    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    /// The toggle used for the restore.
    #[must_use]
    pub fn toggle(&self) -> &DurabilityToggle {
        &self.toggle
    }

    /// Restores durability if owed, then releases the session.
    ///
    /// The connection returns to the pool once every other `Arc` of the
    /// session is gone.
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if the restore could not be confirmed.
    pub async fn finish(mut self) -> Result<(), AdminError> {
        let mut result = Ok(());
        if self.stage.owes_restore() {
            if let Some(session) = &self.session {
                result = self.toggle.restore(session.as_ref()).await;
            }
            self.stage = LoadStage::Restored;
        }
        if self.session.take().is_some() {
            self.stage = LoadStage::Released;
            debug!(table = %self.toggle.table(), stage = %self.stage, "session released");
        }
        result
    }
}

impl<Sess: StoreSession> Drop for CleanupGuard<Sess> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if !self.stage.owes_restore() {
            return;
        }
        let toggle = self.toggle.clone();
        if let Ok(handle) = Handle::try_current() {
            warn!(
                table = %toggle.table(),
                stage = %self.stage,
                "load interrupted, restoring durability in background"
            );
            handle.spawn(async move {
                let _ = toggle.restore(session.as_ref()).await;
                drop(session);
            });
        } else {
            error!(
                table = %toggle.table(),
                "no runtime to restore durability; table left relaxed"
            );
        }
    }
}

impl<Sess: StoreSession> fmt::Debug for CleanupGuard<Sess> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("table", self.toggle.table())
            .field("holding_session", &self.session.is_some())
            .field("stage", &self.stage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::postgres::durability::DurabilityMode;
    use crate::testing::{FailurePlan, MockStore};

    fn toggle() -> DurabilityToggle {
        DurabilityToggle::new(
            TableName::default(),
            2,
            Duration::ZERO,
            Arc::new(LoadMetrics::new()),
        )
    }

    async fn wait_for_release(store: &MockStore) {
        for _ in 0..100 {
            if store.journal().releases() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never released");
    }

    #[tokio::test]
    async fn test_guard_finish_without_restore() {
        let store = MockStore::new();
        let session = Arc::new(store.connect().await.unwrap());
        let guard = CleanupGuard::new(session, toggle());

        guard.finish().await.unwrap();
        assert_eq!(store.journal().restore_calls(), 0);
        assert_eq!(store.journal().releases(), 1);
    }

    #[tokio::test]
    async fn test_guard_finish_restores() {
        let store = MockStore::new();
        let session = Arc::new(store.connect().await.unwrap());
        let toggle = toggle();
        toggle.relax(session.as_ref()).await.unwrap();

        let mut guard = CleanupGuard::new(session, toggle);
        guard.enter(LoadStage::Completed);
        guard.finish().await.unwrap();

        assert_eq!(store.journal().mode(), DurabilityMode::Durable);
        assert_eq!(store.journal().restore_calls(), 1);
        assert_eq!(store.journal().releases(), 1);
    }

    #[tokio::test]
    async fn test_guard_drop_spawns_restore() {
        let store = MockStore::new();
        let session = Arc::new(store.connect().await.unwrap());
        let toggle = toggle();
        toggle.relax(session.as_ref()).await.unwrap();

        let mut guard = CleanupGuard::new(session, toggle);
        guard.enter(LoadStage::Transferring);
        drop(guard);

        wait_for_release(&store).await;
        assert_eq!(store.journal().mode(), DurabilityMode::Durable);
        assert_eq!(store.journal().restore_calls(), 1);
    }

    #[tokio::test]
    async fn test_guard_stage_decides_restore() {
        let cases = [
            (LoadStage::Connected, 0),
            (LoadStage::Relaxed, 1),
            (LoadStage::Failed, 1),
            (LoadStage::Restored, 0),
        ];
        for (stage, restores) in cases {
            let store = MockStore::new();
            let session = Arc::new(store.connect().await.unwrap());
            let mut guard = CleanupGuard::new(session, toggle());
            assert_eq!(guard.stage(), LoadStage::Connected);

            guard.enter(stage);
            guard.finish().await.unwrap();
            assert_eq!(store.journal().restore_calls(), restores, "{stage}");
            assert_eq!(store.journal().releases(), 1, "{stage}");
        }
    }

    #[tokio::test]
    async fn test_run_file_missing_source() {
        let store = MockStore::new();
        let mut config = LoadConfig::default();
        config.data_file = "/nonexistent/copyflow/data.tsv".into();
        let loader = BulkLoader::new(store.clone(), config);

        let err = loader.run_file(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err.kind(), LoadErrorKind::SourceNotFound(_)));
        assert_eq!(err.stage(), LoadStage::Idle);
        assert_eq!(store.journal().connects(), 0);
    }

    #[tokio::test]
    async fn test_report_display() {
        let store = MockStore::new();
        let mut config = LoadConfig::default();
        config.expected_records = 3;
        let loader = BulkLoader::new(store, config);

        let report = loader
            .run(
                futures::stream::iter(vec![Ok(Bytes::from_static(b"a\nb\nc\n"))]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(report
            .to_string()
            .starts_with("bulk_test_table: inserted 3 records in "));
    }

    #[tokio::test]
    async fn test_restore_failure_after_success_is_primary() {
        let store = MockStore::with_plan(FailurePlan {
            restore_ignored: true,
            ..Default::default()
        });
        let mut config = LoadConfig::default();
        config.restore_attempts = 1;
        config.restore_backoff = Duration::ZERO;
        let loader = BulkLoader::new(store.clone(), config);

        let err = loader
            .run(
                futures::stream::iter(vec![Ok(Bytes::from_static(b"a\n"))]),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage(), LoadStage::Completed);
        assert!(matches!(
            err.kind(),
            LoadErrorKind::Admin(AdminError::Unconfirmed { .. })
        ));
        assert_eq!(store.journal().committed_rows(), 1);
    }
}
