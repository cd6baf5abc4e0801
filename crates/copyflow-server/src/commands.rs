//! The three command bodies, each resolving its configuration from the
//! environment.

use anyhow::{Context, Result};
use copyflow_connectors::postgres::{
    apply_schema as apply_schema_file, BulkLoader, LoadConfig, LoadReport, PgStore, StoreConfig,
};
use copyflow_connectors::{LoadError, LoadErrorKind, LoadStage};
use copyflow_core::clock::SystemClock;
use copyflow_core::dataset::{write_dataset, DatasetSummary};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::log_environment;

/// Writes the dataset file.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the file cannot
/// be written.
pub async fn generate_dataset() -> Result<DatasetSummary> {
    let load = LoadConfig::from_env()?;
    let summary = write_dataset(
        &load.data_file,
        load.expected_records,
        SystemClock,
        load.channel.chunk_bytes,
    )
    .await
    .with_context(|| format!("writing {}", load.data_file.display()))?;
    Ok(summary)
}

/// Loads the dataset file into the target table.
///
/// # Errors
///
/// Returns a [`LoadError`] (possibly wrapped in context) describing the
/// failed stage, or a configuration error.
pub async fn bulk_load(cancel: &CancellationToken) -> Result<LoadReport> {
    let store_config = StoreConfig::from_env()?;
    let load = LoadConfig::from_env()?;
    log_environment(&store_config, &load);

    let store = connect(&store_config)?;
    let loader = BulkLoader::new(store.clone(), load);
    let result = loader.run_file(cancel).await;

    debug!(metrics = ?loader.metrics().snapshot(), "load metrics");
    store.close();
    Ok(result?)
}

/// Applies the schema file.
///
/// # Errors
///
/// Returns a [`LoadError`] if the file is missing, the store is
/// unreachable or the script is rejected.
pub async fn apply_schema() -> Result<()> {
    let store_config = StoreConfig::from_env()?;
    let load = LoadConfig::from_env()?;

    let store = connect(&store_config)?;
    let result = apply_schema_file(&store, &load.schema_file).await;
    store.close();
    result?;

    info!(path = %load.schema_file.display(), "setup complete");
    Ok(())
}

fn connect(config: &StoreConfig) -> Result<PgStore, LoadError> {
    PgStore::new(config)
        .map_err(|e| LoadError::new(LoadStage::Idle, LoadErrorKind::Connection(e)))
}
