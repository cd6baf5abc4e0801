//! Table durability toggle.
//!
//! An `UNLOGGED` table skips the write-ahead log, which makes COPY much
//! faster and makes the table unsafe across a crash. The loader relaxes
//! the table before the transfer and restores it afterwards on every exit
//! path. The toggle statements run outside the COPY transaction.
//!
//! Restore is retried and then confirmed by reading
//! `pg_class.relpersistence`, because a table silently left unlogged is a
//! durability regression nobody notices until the next crash.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::config::TableName;
use super::store::StoreSession;
use crate::error::{AdminError, StoreError};
use crate::metrics::LoadMetrics;

/// Durability mode of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Write-ahead logged (`relpersistence = 'p'`).
    Durable,
    /// Unlogged (`relpersistence = 'u'`).
    Relaxed,
}

impl DurabilityMode {
    /// Parses a `pg_class.relpersistence` value.
    #[must_use]
    pub fn from_relpersistence(value: &str) -> Option<Self> {
        match value {
            "p" => Some(Self::Durable),
            "u" => Some(Self::Relaxed),
            _ => None,
        }
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// Builds `ALTER TABLE <t> SET UNLOGGED`.
#[must_use]
pub fn build_relax_sql(table: &TableName) -> String {
    format!("ALTER TABLE {table} SET UNLOGGED")
}

/// Builds `ALTER TABLE <t> SET LOGGED`.
#[must_use]
pub fn build_restore_sql(table: &TableName) -> String {
    format!("ALTER TABLE {table} SET LOGGED")
}

/// Builds the `relpersistence` lookup for the table.
#[must_use]
pub fn build_mode_sql(table: &TableName) -> String {
    format!("SELECT relpersistence FROM pg_class WHERE oid = '{table}'::regclass")
}

/// Relaxes and restores durability of one table.
#[derive(Debug, Clone)]
pub struct DurabilityToggle {
    table: TableName,
    restore_attempts: u32,
    restore_backoff: Duration,
    metrics: Arc<LoadMetrics>,
}

impl DurabilityToggle {
    /// Creates a toggle for `table`.
    #[must_use]
    pub fn new(
        table: TableName,
        restore_attempts: u32,
        restore_backoff: Duration,
        metrics: Arc<LoadMetrics>,
    ) -> Self {
        Self {
            table,
            restore_attempts: restore_attempts.max(1),
            restore_backoff,
            metrics,
        }
    }

    /// The table this toggle acts on.
    #[must_use]
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Switches the table to relaxed mode.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::Rejected` if the table does not exist or the
    /// statement is refused.
    pub async fn relax<S: StoreSession>(&self, session: &S) -> Result<(), AdminError> {
        let sql = build_relax_sql(&self.table);
        session.execute(&sql).await.map_err(|source| {
            self.metrics.record_error();
            AdminError::Rejected {
                statement: sql.clone(),
                attempts: 1,
                source,
            }
        })?;
        info!(table = %self.table, "durability relaxed (UNLOGGED)");
        Ok(())
    }

    /// Switches the table back to durable mode and confirms it.
    ///
    /// Stops early if the session's connection is gone; the caller has to
    /// retry on a fresh session (see [`AdminError::is_connection_lost`]).
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if every attempt failed or the table still
    /// reports relaxed mode afterwards.
    pub async fn restore<S: StoreSession>(&self, session: &S) -> Result<(), AdminError> {
        let sql = build_restore_sql(&self.table);
        let mut last = None;
        let mut attempts = 0;

        for attempt in 1..=self.restore_attempts {
            if attempt > 1 {
                self.metrics.record_restore_retry();
                tokio::time::sleep(self.restore_backoff * (attempt - 1)).await;
            }
            attempts = attempt;
            let outcome = match session.execute(&sql).await {
                Ok(_) => self.mode(session).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(Some(DurabilityMode::Durable)) => {
                    self.metrics.record_restore();
                    info!(table = %self.table, attempt, "durability restored (LOGGED)");
                    return Ok(());
                }
                Ok(mode) => {
                    warn!(table = %self.table, attempt, ?mode, "restore not confirmed");
                    last = None;
                }
                Err(e @ StoreError::Connection(_)) => {
                    warn!(table = %self.table, attempt, error = %e, "connection lost during restore");
                    last = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(table = %self.table, attempt, error = %e, "restore attempt failed");
                    last = Some(e);
                }
            }
        }

        self.metrics.record_error();
        let err = match last {
            Some(source) => AdminError::Rejected {
                statement: sql,
                attempts,
                source,
            },
            None => AdminError::Unconfirmed {
                table: self.table.to_string(),
                attempts,
            },
        };
        error!(table = %self.table, error = %err, "table left in relaxed durability mode");
        Err(err)
    }

    /// Reads the table's current durability mode.
    ///
    /// Returns `None` if the table is missing or reports a persistence
    /// other than permanent or unlogged (such as temporary).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the lookup fails.
    pub async fn mode<S: StoreSession>(
        &self,
        session: &S,
    ) -> Result<Option<DurabilityMode>, StoreError> {
        let value = session.query_scalar(&build_mode_sql(&self.table)).await?;
        let mode = value.as_deref().and_then(DurabilityMode::from_relpersistence);
        debug!(table = %self.table, ?mode, "durability mode");
        Ok(mode)
    }
}
