//! Dataset file writer.
//!
//! Streams producer chunks into a tab-separated file with no header. The
//! file is written under a temporary name and renamed into place, so a
//! crashed generation never leaves a truncated dataset behind for the
//! loader to pick up.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::producer::produce_with_clock;
use crate::Result;

/// Default dataset file name.
pub const DEFAULT_DATASET_FILE: &str = "data.tsv";

/// Default number of generated records.
pub const DEFAULT_RECORD_COUNT: u64 = 100_000;

/// Outcome of a dataset generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    /// Final path of the dataset.
    pub path: PathBuf,
    /// Records written.
    pub records: u64,
    /// Bytes written.
    pub bytes: u64,
    /// Wall time spent generating and writing.
    pub elapsed: Duration,
}

/// Writes `count` records to `path`.
///
/// # Errors
///
/// Returns `Error::Io` if the temporary file cannot be created, written or
/// renamed. The temporary file is removed on a failed write.
pub async fn write_dataset<C: Clock>(
    path: &Path,
    count: u64,
    clock: C,
    chunk_bytes: usize,
) -> Result<DatasetSummary> {
    let start = Instant::now();
    let tmp = temp_path(path);
    info!(path = %path.display(), records = count, "generating dataset");

    let bytes = match write_chunks(&tmp, count, clock, chunk_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
    };
    fs::rename(&tmp, path).await?;

    let summary = DatasetSummary {
        path: path.to_path_buf(),
        records: count,
        bytes,
        elapsed: start.elapsed(),
    };
    info!(
        path = %summary.path.display(),
        records = summary.records,
        bytes = summary.bytes,
        elapsed_ms = summary.elapsed.as_millis(),
        "dataset generation complete"
    );
    Ok(summary)
}

async fn write_chunks<C: Clock>(
    tmp: &Path,
    count: u64,
    clock: C,
    chunk_bytes: usize,
) -> std::io::Result<u64> {
    let file = File::create(tmp).await?;
    let mut writer = BufWriter::new(file);
    let mut bytes = 0_u64;

    for chunk in produce_with_clock(count, clock).chunked(chunk_bytes) {
        writer.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    debug!(path = %tmp.display(), bytes, "dataset flushed");
    Ok(bytes)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn clock() -> FixedClock {
        FixedClock::from_unix_millis(1_704_067_200_000)
    }

    #[tokio::test]
    async fn test_write_dataset_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.tsv");

        let summary = write_dataset(&path, 25, clock(), 128).await.unwrap();
        assert_eq!(summary.records, 25);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.len() as u64, summary.bytes);
        let expected: String = produce_with_clock(25, clock()).lines().collect();
        assert_eq!(contents, expected);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_write_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tsv");

        let summary = write_dataset(&path, 0, clock(), 128).await.unwrap();
        assert_eq!(summary.bytes, 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_write_dataset_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.tsv");
        tokio::fs::write(&path, b"stale\n").await.unwrap();

        write_dataset(&path, 3, clock(), 64).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.starts_with("user_name_0\t"));
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("data.tsv");
        let err = write_dataset(&path, 3, clock(), 64).await.unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/tmp/data.tsv")),
            PathBuf::from("/tmp/data.tsv.tmp")
        );
    }
}
