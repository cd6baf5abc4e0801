//! Load pipeline error types.
//!
//! Provides a unified error hierarchy for a load session:
//! - `StoreError`: Failures reported by the store connection or COPY channel
//! - `TransferError`: Failures while streaming bytes into COPY
//! - `AdminError`: Durability toggle statements that failed or did not stick
//! - `ConfigError`: Invalid environment configuration
//! - `LoadError`: Terminal outcome of a failed session, with the stage it
//!   failed in and any secondary cleanup failure

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::stage::LoadStage;

/// Errors reported by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable, the pool is exhausted or credentials were
    /// rejected.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store rejected a statement.
    #[error("statement rejected: {0}")]
    Rejected(String),

    /// The COPY channel was already finished or aborted.
    #[error("copy channel closed")]
    Closed,
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Rejected(db_message(&e))
        }
    }
}

/// Renders a `tokio-postgres` error with the server message when present.
fn db_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => e.to_string(),
    }
}

/// Errors raised while streaming the source into the COPY channel.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The byte source failed mid-stream.
    #[error("source read failed: {0}")]
    Source(#[from] io::Error),

    /// The store refused to open the COPY.
    #[error("COPY could not start: {0}")]
    Start(#[source] StoreError),

    /// Sending a chunk to the store failed.
    #[error("COPY send failed after {chunks} chunk(s): {source}")]
    Send {
        /// Chunks accepted before the failure.
        chunks: u64,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// The store rejected the COPY at completion.
    #[error("COPY rejected at completion: {0}")]
    Finish(#[source] StoreError),

    /// The forwarding task panicked or was aborted.
    #[error("forwarding task failed: {0}")]
    Forwarder(String),

    /// The caller cancelled the transfer.
    #[error("transfer cancelled")]
    Cancelled,
}

/// Errors from the durability toggle.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The store rejected the statement.
    #[error("`{statement}` rejected after {attempts} attempt(s): {source}")]
    Rejected {
        /// The statement that failed.
        statement: String,
        /// Attempts made.
        attempts: u32,
        /// Last store failure.
        #[source]
        source: StoreError,
    },

    /// The restore statement ran but the table still reports relaxed mode.
    #[error("table {table} still not durable after {attempts} restore attempt(s)")]
    Unconfirmed {
        /// The table.
        table: String,
        /// Attempts made.
        attempts: u32,
    },
}

impl AdminError {
    /// Returns `true` if the session's connection dropped under the
    /// statement, so retrying on it cannot succeed.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                source: StoreError::Connection(_),
                ..
            }
        )
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        /// Environment key.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration is internally inconsistent.
    #[error("{0}")]
    Inconsistent(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Primary cause of a failed load.
#[derive(Debug, Error)]
pub enum LoadErrorKind {
    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(#[source] StoreError),

    /// A durability toggle failed.
    #[error("admin error: {0}")]
    Admin(#[from] AdminError),

    /// The COPY transfer failed; nothing was committed.
    #[error("transfer error: {0}")]
    Transfer(#[source] TransferError),

    /// The store rejected the schema script.
    #[error("schema rejected ({}): {source}", .path.display())]
    Schema {
        /// The schema file.
        path: PathBuf,
        /// Store failure.
        #[source]
        source: StoreError,
    },

    /// The dataset file does not exist.
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Configuration was rejected before anything ran.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The caller cancelled the load.
    #[error("load cancelled")]
    Cancelled,
}

impl From<TransferError> for LoadErrorKind {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => LoadErrorKind::Cancelled,
            other => LoadErrorKind::Transfer(other),
        }
    }
}

/// Terminal outcome of a failed load session.
///
/// `kind` is always the first failure. A restore that also failed is kept
/// in `cleanup` and never replaces it.
#[derive(Debug, Error)]
#[error("load failed while {stage}: {kind}")]
pub struct LoadError {
    stage: LoadStage,
    #[source]
    kind: LoadErrorKind,
    cleanup: Option<AdminError>,
}

impl LoadError {
    /// Creates an error for a failure in `stage`.
    #[must_use]
    pub fn new(stage: LoadStage, kind: impl Into<LoadErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
            cleanup: None,
        }
    }

    /// Attaches a secondary cleanup failure.
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: Option<AdminError>) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Stage the pipeline was in when the primary failure happened.
    #[must_use]
    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    /// Primary cause.
    #[must_use]
    pub fn kind(&self) -> &LoadErrorKind {
        &self.kind
    }

    /// Secondary restore failure, if any.
    #[must_use]
    pub fn cleanup(&self) -> Option<&AdminError> {
        self.cleanup.as_ref()
    }
}
