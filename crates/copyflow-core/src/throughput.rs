//! Throughput reporting.
//!
//! The record count is known before the load starts, so the report never
//! depends on counting rows while they stream. Reports are descriptive;
//! nothing in the pipeline branches on them.

use std::fmt;
use std::time::{Duration, Instant};

/// Elapsed times below this are too short to yield a meaningful rate.
pub const MIN_MEASURABLE: Duration = Duration::from_micros(1);

/// Records per second, or `Undefined` when the elapsed time is too short.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    /// A finite rate.
    PerSecond(f64),
    /// Elapsed time was zero or below [`MIN_MEASURABLE`].
    Undefined,
}

impl Rate {
    /// Returns the rate if it is defined.
    #[must_use]
    pub fn per_second(self) -> Option<f64> {
        match self {
            Self::PerSecond(r) => Some(r),
            Self::Undefined => None,
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerSecond(r) => write!(f, "~{r:.0} records/second"),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}

/// Timing of one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputReport {
    records: u64,
    elapsed: Duration,
}

impl ThroughputReport {
    /// Creates a report for `records` loaded over `elapsed`.
    #[must_use]
    pub fn new(records: u64, elapsed: Duration) -> Self {
        Self { records, elapsed }
    }

    /// Creates a report from start and end instants.
    ///
    /// An `end` before `start` is treated as zero elapsed time.
    #[must_use]
    pub fn from_instants(records: u64, start: Instant, end: Instant) -> Self {
        Self::new(records, end.saturating_duration_since(start))
    }

    /// Records the rate is computed over.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Elapsed wall time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Elapsed wall time in fractional milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Records per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> Rate {
        if self.elapsed < MIN_MEASURABLE {
            return Rate::Undefined;
        }
        Rate::PerSecond(self.records as f64 / self.elapsed.as_secs_f64())
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted {} records in {:.3} ms, throughput {}",
            self.records,
            self.elapsed_ms(),
            self.rate()
        )
    }
}
