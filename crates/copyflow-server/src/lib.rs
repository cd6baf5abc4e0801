//! # `copyflow` Server
//!
//! Shared plumbing for the `generate-dataset`, `bulk-load` and
//! `apply-schema` binaries: tracing setup, environment logging, Ctrl-C
//! cancellation and the mapping from errors to process exit codes.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;

use std::process::ExitCode;

use copyflow_connectors::postgres::{LoadConfig, StoreConfig};
use copyflow_connectors::{ConfigError, LoadError, LoadErrorKind};
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for invalid configuration.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code for a missing dataset or schema file.
pub const EXIT_SOURCE_NOT_FOUND: u8 = 3;
/// Exit code for an unreachable store.
pub const EXIT_CONNECTION: u8 = 4;
/// Exit code for a failed durability toggle or a rejected schema.
pub const EXIT_ADMIN: u8 = 5;
/// Exit code for a failed COPY.
pub const EXIT_TRANSFER: u8 = 6;
/// Exit code for a cancelled load.
pub const EXIT_CANCELLED: u8 = 7;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the `copyflow` crates log at `info`
/// and everything else, the binaries included, at `warn`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,copyflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Logs the machine and target before a load.
pub fn log_environment(store: &StoreConfig, load: &LoadConfig) {
    let mut system = System::new();
    system.refresh_cpu_all();
    system.refresh_memory();

    let cpus = system.cpus();
    let cpu_model = cpus.first().map_or("unknown", |cpu| cpu.brand().trim());
    let cores = if cpus.is_empty() {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    } else {
        cpus.len()
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cpu_model,
        cores,
        memory_gb = %memory_gb(system.total_memory()),
        host = %store.host,
        port = store.port,
        database = %store.database,
        table = %load.table,
        "environment"
    );
}

/// Formats a byte count as gibibytes with two decimals.
fn memory_gb(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let gb = bytes as f64 / BYTES_PER_GIB;
    format!("{gb:.2}")
}

/// Returns a token that is cancelled on the first Ctrl-C.
#[must_use]
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling load");
            trigger.cancel();
        }
    });
    cancel
}

/// Maps an error to the process exit code.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    ExitCode::from(exit_status(err))
}

fn exit_status(err: &anyhow::Error) -> u8 {
    if let Some(load) = err.downcast_ref::<LoadError>() {
        return match load.kind() {
            LoadErrorKind::Configuration(_) => EXIT_CONFIG,
            LoadErrorKind::SourceNotFound(_) => EXIT_SOURCE_NOT_FOUND,
            LoadErrorKind::Connection(_) => EXIT_CONNECTION,
            LoadErrorKind::Admin(_) | LoadErrorKind::Schema { .. } => EXIT_ADMIN,
            LoadErrorKind::Transfer(_) => EXIT_TRANSFER,
            LoadErrorKind::Cancelled => EXIT_CANCELLED,
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CONFIG;
    }
    if let Some(copyflow_core::Error::InvalidConfig(_)) =
        err.downcast_ref::<copyflow_core::Error>()
    {
        return EXIT_CONFIG;
    }
    1
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use copyflow_connectors::{AdminError, LoadStage, StoreError, TransferError};

    use super::*;

    fn status(err: impl Into<anyhow::Error>) -> u8 {
        exit_status(&err.into())
    }

    #[test]
    fn test_load_error_exit_codes() {
        let cases = [
            (
                LoadError::new(LoadStage::Idle, LoadErrorKind::Connection(StoreError::Closed)),
                EXIT_CONNECTION,
            ),
            (
                LoadError::new(
                    LoadStage::Idle,
                    LoadErrorKind::SourceNotFound(PathBuf::from("data.tsv")),
                ),
                EXIT_SOURCE_NOT_FOUND,
            ),
            (
                LoadError::new(
                    LoadStage::Completed,
                    AdminError::Unconfirmed {
                        table: "t".into(),
                        attempts: 3,
                    },
                ),
                EXIT_ADMIN,
            ),
            (
                LoadError::new(
                    LoadStage::Connected,
                    LoadErrorKind::Schema {
                        path: PathBuf::from("sql/schema.sql"),
                        source: StoreError::Rejected("syntax error".into()),
                    },
                ),
                EXIT_ADMIN,
            ),
            (
                LoadError::new(
                    LoadStage::Transferring,
                    TransferError::Finish(StoreError::Closed),
                ),
                EXIT_TRANSFER,
            ),
            (
                LoadError::new(LoadStage::Transferring, TransferError::Cancelled),
                EXIT_CANCELLED,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(status(err), expected);
        }
    }

    #[test]
    fn test_config_error_exit_code() {
        assert_eq!(
            status(ConfigError::Inconsistent("DB_POOL_SIZE must be > 0".into())),
            EXIT_CONFIG
        );
        assert_eq!(
            status(copyflow_core::Error::InvalidConfig("capacity".into())),
            EXIT_CONFIG
        );
    }

    #[test]
    fn test_context_preserves_exit_code() {
        let err = anyhow::Error::new(LoadError::new(
            LoadStage::Transferring,
            TransferError::Cancelled,
        ))
        .context("bulk load");
        assert_eq!(exit_status(&err), EXIT_CANCELLED);
    }

    #[test]
    fn test_memory_gb() {
        assert_eq!(memory_gb(0), "0.00");
        assert_eq!(memory_gb(16 * 1024 * 1024 * 1024), "16.00");
        assert_eq!(memory_gb(1536 * 1024 * 1024), "1.50");
    }

    #[test]
    fn test_log_environment_runs() {
        log_environment(&StoreConfig::default(), &LoadConfig::default());
    }

    #[test]
    fn test_other_errors_exit_one() {
        assert_eq!(status(std::io::Error::other("boom")), 1);
    }
}
