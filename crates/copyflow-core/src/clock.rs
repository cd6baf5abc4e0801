//! Wall-clock source for record generation timestamps.
//!
//! Records carry a `created_at` stamp taken when they are produced. Tests
//! pin it with [`FixedClock`] so produced datasets are byte-identical.

use chrono::{DateTime, Utc};

/// Supplies the `created_at` timestamp for produced records.
pub trait Clock: Send {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Creates a clock pinned at `unix_millis` milliseconds after the epoch.
    ///
    /// Out-of-range inputs pin the clock at the epoch.
    #[must_use]
    pub fn from_unix_millis(unix_millis: i64) -> Self {
        Self(DateTime::from_timestamp_millis(unix_millis).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
