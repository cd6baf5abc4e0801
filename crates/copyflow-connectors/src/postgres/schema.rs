//! Schema setup for the target table.

use std::io;
use std::path::Path;

use tracing::info;

use super::store::{BulkStore, StoreSession};
use crate::error::{LoadError, LoadErrorKind, TransferError};
use crate::stage::LoadStage;

/// Reads the SQL file at `path` and executes it on one session.
///
/// The file may hold several statements; they run as one batch.
///
/// # Errors
///
/// Returns `LoadError` with kind `SourceNotFound` if the file is missing,
/// `Connection` if no session could be acquired, or `Schema` if the store
/// rejects the script.
pub async fn apply_schema<S: BulkStore>(store: &S, path: &Path) -> Result<(), LoadError> {
    let sql = match tokio::fs::read_to_string(path).await {
        Ok(sql) => sql,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(LoadError::new(
                LoadStage::Idle,
                LoadErrorKind::SourceNotFound(path.to_path_buf()),
            ));
        }
        Err(e) => return Err(LoadError::new(LoadStage::Idle, TransferError::Source(e))),
    };

    let session = store
        .connect()
        .await
        .map_err(|e| LoadError::new(LoadStage::Idle, LoadErrorKind::Connection(e)))?;
    session.batch_execute(&sql).await.map_err(|source| {
        LoadError::new(
            LoadStage::Connected,
            LoadErrorKind::Schema {
                path: path.to_path_buf(),
                source,
            },
        )
    })?;

    info!(path = %path.display(), bytes = sql.len(), "schema applied");
    Ok(())
}
