use std::io;
use std::time::Duration;

use bytes::Bytes;
use copyflow_connectors::postgres::{BulkLoader, DurabilityMode, LoadConfig};
use copyflow_connectors::testing::{FailurePlan, MockStore};
use copyflow_connectors::{AdminError, LoadErrorKind, LoadStage, TransferError};
use copyflow_core::channel::ChannelConfig;
use copyflow_core::clock::FixedClock;
use copyflow_core::record::{CITIES, COUNTRIES, DEPARTMENTS};
use futures::{stream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

fn config(records: u64) -> LoadConfig {
    let mut config = LoadConfig::default();
    config.expected_records = records;
    config.restore_attempts = 2;
    config.restore_backoff = Duration::ZERO;
    config.channel = ChannelConfig::builder().chunk_bytes(256).build();
    config
}

fn rows(n: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::iter((0..n).map(|i| Ok(Bytes::from(format!("row{i}\n")))))
}

fn loader(plan: FailurePlan) -> (MockStore, BulkLoader<MockStore>) {
    let store = MockStore::with_plan(plan);
    (store.clone(), BulkLoader::new(store, config(20)))
}

fn assert_cleaned_up(store: &MockStore, restores: u32) {
    let journal = store.journal();
    assert_eq!(journal.restore_calls(), restores, "restore count");
    assert_eq!(journal.releases(), journal.connects(), "release count");
    assert_eq!(journal.mode(), DurabilityMode::Durable);
}

#[tokio::test]
async fn test_successful_load() {
    let (store, loader) = loader(FailurePlan::default());

    let report = loader.run(rows(20), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.rows_copied, 20);
    assert!(report.is_complete());
    assert_eq!(store.journal().committed_rows(), 20);
    assert_eq!(store.journal().relax_calls(), 1);
    assert_cleaned_up(&store, 1);

    let statements = store.journal().statements();
    assert_eq!(statements[0], "ALTER TABLE bulk_test_table SET UNLOGGED");
    assert!(statements[1].starts_with("COPY bulk_test_table (name, email"));
    assert_eq!(statements[2], "ALTER TABLE bulk_test_table SET LOGGED");
}

#[tokio::test]
async fn test_connect_failure_skips_toggle() {
    let (store, loader) = loader(FailurePlan {
        fail_connect: true,
        ..Default::default()
    });

    let err = loader.run(rows(20), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.stage(), LoadStage::Idle);
    assert!(matches!(err.kind(), LoadErrorKind::Connection(_)));
    assert_eq!(store.journal().relax_calls(), 0);
    assert_cleaned_up(&store, 0);
}

#[tokio::test]
async fn test_relax_failure_still_restores() {
    let (store, loader) = loader(FailurePlan {
        fail_relax: true,
        relax_applies_before_failing: true,
        ..Default::default()
    });

    let err = loader.run(rows(20), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.stage(), LoadStage::Connected);
    assert!(matches!(err.kind(), LoadErrorKind::Admin(_)));
    assert!(err.cleanup().is_none());
    assert_eq!(store.journal().copies_started(), 0);
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_copy_refused() {
    let (store, loader) = loader(FailurePlan {
        fail_copy_in: true,
        ..Default::default()
    });

    let err = loader.run(rows(20), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.stage(), LoadStage::Transferring);
    assert!(matches!(
        err.kind(),
        LoadErrorKind::Transfer(TransferError::Start(_))
    ));
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_mid_stream_failure_commits_nothing() {
    let (store, loader) = loader(FailurePlan {
        fail_send_after: Some(5),
        ..Default::default()
    });

    let err = loader.run(rows(20), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.stage(), LoadStage::Transferring);
    assert!(matches!(
        err.kind(),
        LoadErrorKind::Transfer(TransferError::Send { chunks: 5, .. })
    ));
    assert_eq!(store.journal().committed_rows(), 0);
    assert_eq!(store.journal().copies_aborted(), 1);
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_source_failure_commits_nothing() {
    let (store, loader) = loader(FailurePlan::default());
    let source = rows(3).chain(stream::once(async {
        Err(io::Error::new(io::ErrorKind::InvalidData, "malformed record"))
    }));

    let err = loader.run(source, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err.kind(),
        LoadErrorKind::Transfer(TransferError::Source(_))
    ));
    assert_eq!(store.journal().committed_rows(), 0);
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_finish_rejected() {
    let (store, loader) = loader(FailurePlan {
        fail_finish: true,
        ..Default::default()
    });

    let err = loader.run(rows(20), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err.kind(),
        LoadErrorKind::Transfer(TransferError::Finish(_))
    ));
    assert_eq!(store.journal().committed_rows(), 0);
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_restore_failure_does_not_mask_transfer_error() {
    let (store, loader) = loader(FailurePlan {
        fail_send_after: Some(0),
        restore_failures: 10,
        ..Default::default()
    });

    let err = loader.run(rows(20), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err.kind(), LoadErrorKind::Transfer(_)));
    assert!(matches!(
        err.cleanup(),
        Some(AdminError::Rejected { attempts: 2, .. })
    ));
    assert_eq!(store.journal().restore_calls(), 2);
    assert_eq!(store.journal().releases(), 1);
    assert_eq!(store.journal().mode(), DurabilityMode::Relaxed);
}

#[tokio::test]
async fn test_restore_retried_after_success() {
    let (store, loader) = loader(FailurePlan {
        restore_failures: 1,
        ..Default::default()
    });

    loader.run(rows(20), &CancellationToken::new()).await.unwrap();

    assert_cleaned_up(&store, 2);
    assert_eq!(loader.metrics().snapshot().restore_retries, 1);
}

#[tokio::test]
async fn test_restore_moves_to_fresh_session_when_connection_lost() {
    let (store, loader) = loader(FailurePlan {
        lose_first_session_on_restore: true,
        ..Default::default()
    });

    let report = loader.run(rows(20), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.rows_copied, 20);
    assert_eq!(store.journal().connects(), 2);
    assert_cleaned_up(&store, 2);
    assert_eq!(loader.metrics().snapshot().restore_retries, 0);
}

#[tokio::test]
async fn test_throughput_counts_expected_records() {
    let store = MockStore::new();
    let loader = BulkLoader::new(store.clone(), config(100));

    let report = loader.run(rows(3), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.rows_copied, 3);
    assert!(!report.is_complete());
    assert_eq!(report.throughput.records(), 100);
    assert!(report.to_string().contains("inserted 100 records"));
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let (store, loader) = loader(FailurePlan::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = loader.run(rows(20), &cancel).await.unwrap_err();

    assert!(matches!(err.kind(), LoadErrorKind::Cancelled));
    assert_eq!(store.journal().connects(), 0);
}

#[tokio::test]
async fn test_cancel_mid_transfer() {
    let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(3));
    let store = MockStore::new().with_gate(gate);
    let loader = BulkLoader::new(store.clone(), config(1_000));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = loader.run(rows(1_000), &cancel).await.unwrap_err();

    assert_eq!(err.stage(), LoadStage::Transferring);
    assert!(matches!(err.kind(), LoadErrorKind::Cancelled));
    assert_eq!(store.journal().committed_rows(), 0);
    assert_eq!(store.journal().copies_aborted(), 1);
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_dropped_run_future_still_cleans_up() {
    let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
    let store = MockStore::new().with_gate(gate);
    let loader = BulkLoader::new(store.clone(), config(1_000));

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        loader.run(rows(1_000), &CancellationToken::new()),
    )
    .await;
    assert!(timed_out.is_err());

    for _ in 0..100 {
        if store.journal().releases() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.journal().committed_rows(), 0);
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_generated_records_end_to_end() {
    let store = MockStore::new();
    let loader = BulkLoader::new(store.clone(), config(10));

    let report = loader
        .run_generated(FixedClock::from_unix_millis(0), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rows_copied, 10);

    let lines = store.journal().committed_lines();
    assert_eq!(lines.len(), 10);
    for (i, line) in lines.iter().enumerate() {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 10);
        assert_eq!(fields[0], format!("user_name_{i}"));
        assert_eq!(fields[1], format!("user{i}@example.com"));
        assert_eq!(fields[2], (20 + i % 50).to_string());
        assert_eq!(fields[3], CITIES[i % 5]);
        assert_eq!(fields[4], COUNTRIES[i % 5]);
        assert_eq!(fields[5], format!("{}.00", 30_000 + i % 70_000));
        assert_eq!(fields[6], DEPARTMENTS[i % 5]);
        assert_eq!(
            fields[7],
            format!("{}-{:02}-{:02}", 2020 + i % 4, 1 + i % 12, 1 + i % 28)
        );
        assert_eq!(fields[8], (i % 2 == 0).to_string());
        assert_eq!(fields[9], "1970-01-01T00:00:00.000Z");
    }
    assert_cleaned_up(&store, 1);
}

#[tokio::test]
async fn test_dataset_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.tsv");
    copyflow_core::dataset::write_dataset(&path, 50, FixedClock::from_unix_millis(0), 512)
        .await
        .unwrap();

    let store = MockStore::new();
    let mut config = config(50);
    config.data_file = path;
    config.channel.read_chunk_bytes = 1024;
    let loader = BulkLoader::new(store.clone(), config);

    let report = loader.run_file(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.rows_copied, 50);
    assert_eq!(store.journal().committed_lines()[49].split('\t').next(), Some("user_name_49"));
    assert_cleaned_up(&store, 1);
}
