pub mod database;
pub mod models;
pub mod monitor_db;
pub mod run_status;

pub use models::{
    NodeQuery, NodeRecord, NodeSortKey, NodeStatus, RunStatusUpdate, SnapshotRecord, SortOrder,
    StatusFilter,
};
pub use monitor_db::MonitorDatabase;
pub use run_status::RunStatusRecorder;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The writes a sync run makes.
///
/// Nodes are replaced whole by `pubkey`, snapshots are insert-only, and the
/// run status is a single row merged in place.
pub trait StateStore {
    fn upsert_nodes(&self, records: &[NodeRecord]) -> Result<(), StoreError>;

    fn append_snapshots(&self, records: &[SnapshotRecord]) -> Result<(), StoreError>;

    fn set_run_status(&self, update: &RunStatusUpdate) -> Result<(), StoreError>;

    /// Marks nodes not seen since `cutoff` offline, returning how many changed.
    fn mark_stale_offline(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Ensure the directory holding `db_path` exists
pub fn ensure_data_dir<P: AsRef<Path>>(db_path: P) -> Result<(), StoreError> {
    if let Some(parent) = db_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!("cannot create {}: {err}", parent.display()))
            })?;
        }
    }
    Ok(())
}

/// `now - span`, pinned to the earliest representable instant instead of
/// overflowing.
pub fn saturating_before(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("monitor.db");
        ensure_data_dir(&db_path).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn blocked_data_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, b"").unwrap();

        let err = ensure_data_dir(file.join("monitor.db")).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn huge_spans_stop_at_the_earliest_instant() {
        let now = Utc::now();
        assert_eq!(saturating_before(now, Duration::days(1)), now - Duration::days(1));
        assert_eq!(
            saturating_before(now, Duration::MAX),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
