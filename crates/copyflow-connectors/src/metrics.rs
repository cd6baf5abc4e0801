//! Load session metrics.
//!
//! [`LoadMetrics`] provides lock-free atomic counters shared between the
//! forwarding task, the COPY consumer and the durability toggle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one or more load sessions.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    /// Chunks pulled from the source into the channel.
    pub chunks_forwarded: AtomicU64,

    /// Chunks accepted by the COPY channel.
    pub chunks_sent: AtomicU64,

    /// Bytes accepted by the COPY channel.
    pub bytes_sent: AtomicU64,

    /// Rows the store acknowledged at COPY completion.
    pub rows_copied: AtomicU64,

    /// COPY operations aborted before completion.
    pub copies_aborted: AtomicU64,

    /// Durability restores that completed and were confirmed.
    pub restores: AtomicU64,

    /// Restore attempts beyond the first.
    pub restore_retries: AtomicU64,

    /// Errors of any kind.
    pub errors_total: AtomicU64,
}

impl LoadMetrics {
    /// Creates a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a chunk entering the bounded channel.
    pub fn record_forward(&self) {
        self.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a chunk accepted by the COPY channel.
    pub fn record_send(&self, bytes: u64) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records an acknowledged COPY.
    pub fn record_copy(&self, rows: u64) {
        self.rows_copied.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records an aborted COPY.
    pub fn record_abort(&self) {
        self.copies_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a confirmed restore.
    pub fn record_restore(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a restore retry.
    pub fn record_restore_retry(&self) {
        self.restore_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an error.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        LoadMetricsSnapshot {
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            rows_copied: self.rows_copied.load(Ordering::Relaxed),
            copies_aborted: self.copies_aborted.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
            restore_retries: self.restore_retries.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`LoadMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    /// Chunks pulled from the source.
    pub chunks_forwarded: u64,
    /// Chunks accepted by COPY.
    pub chunks_sent: u64,
    /// Bytes accepted by COPY.
    pub bytes_sent: u64,
    /// Rows acknowledged.
    pub rows_copied: u64,
    /// Aborted COPY operations.
    pub copies_aborted: u64,
    /// Confirmed restores.
    pub restores: u64,
    /// Restore retries.
    pub restore_retries: u64,
    /// Errors.
    pub errors_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_zeros() {
        assert_eq!(LoadMetrics::new().snapshot(), LoadMetricsSnapshot::default());
    }

    #[test]
    fn test_record_send() {
        let m = LoadMetrics::new();
        m.record_send(100);
        m.record_send(250);

        let snap = m.snapshot();
        assert_eq!(snap.chunks_sent, 2);
        assert_eq!(snap.bytes_sent, 350);
    }

    #[test]
    fn test_copy_and_abort() {
        let m = LoadMetrics::new();
        m.record_copy(10);
        m.record_copy(5);
        m.record_abort();

        let snap = m.snapshot();
        assert_eq!(snap.rows_copied, 15);
        assert_eq!(snap.copies_aborted, 1);
    }

    #[test]
    fn test_restore_counters() {
        let m = LoadMetrics::new();
        m.record_restore_retry();
        m.record_restore_retry();
        m.record_restore();
        m.record_error();

        let snap = m.snapshot();
        assert_eq!(snap.restores, 1);
        assert_eq!(snap.restore_retries, 2);
        assert_eq!(snap.errors_total, 1);
    }
}
