//! Load session lifecycle stages.

use std::fmt;

/// Stage of a load session.
///
/// ```text
/// Idle -> Connected -> Relaxed -> Transferring -> {Completed | Failed}
///      -> Restored -> Released
/// ```
///
/// Restore runs after every stage from `Relaxed` on, including a failed
/// relax. Release runs after every stage from `Connected` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStage {
    /// Nothing acquired yet.
    Idle,
    /// A connection is held exclusively by the session.
    Connected,
    /// The table is in relaxed durability mode.
    Relaxed,
    /// Bytes are streaming into COPY.
    Transferring,
    /// The store acknowledged the COPY.
    Completed,
    /// The transfer failed or was cancelled.
    Failed,
    /// Durable mode was restored (or restore was attempted and reported).
    Restored,
    /// The connection was returned to the pool.
    Released,
}

impl LoadStage {
    /// Returns `true` if a durability restore is owed when leaving this stage.
    #[must_use]
    pub fn owes_restore(self) -> bool {
        matches!(
            self,
            Self::Relaxed | Self::Transferring | Self::Completed | Self::Failed
        )
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connected => write!(f, "connected"),
            Self::Relaxed => write!(f, "relaxed"),
            Self::Transferring => write!(f, "transferring"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Restored => write!(f, "restored"),
            Self::Released => write!(f, "released"),
        }
    }
}
