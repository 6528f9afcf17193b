//! Snapshot of the request log to a timestamped backup file.

use crate::error::StoreError;
use crate::store::{DocumentStore, LOGS};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Write the `logs` collection to `<dir>/backup-logs-<timestamp>.json`.
///
/// Returns `None` without writing anything when the log is empty.
pub async fn backup_logs(
    store: &dyn DocumentStore,
    dir: &Path,
) -> Result<Option<PathBuf>, StoreError> {
    let logs = store.list(LOGS).await?;
    if logs.is_empty() {
        warn!("No logs to back up");
        return Ok(None);
    }

    let io_error = |source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_error)?;

    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let path = dir.join(format!("backup-logs-{stamp}.json"));
    let payload = serde_json::to_vec_pretty(&logs)?;
    tokio::fs::write(&path, payload).await.map_err(io_error)?;

    info!(path = %path.display(), entries = logs.len(), "Log backup written");
    Ok(Some(path))
}
