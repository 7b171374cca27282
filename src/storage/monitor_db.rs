use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Result as SqlResult, Row, params, params_from_iter};
use std::path::Path;

use super::database::Database;
use super::models::{
    NetworkOverview, NodeCounts, NodeQuery, NodeRecord, NodeStatus, RunState, RunStatusUpdate,
    SnapshotRecord, SortOrder, SyncRunStatus, VersionCount,
};
use super::{StateStore, StoreError, saturating_before};

const NODE_COLUMNS: &str = "pubkey, address, version, uptime_seconds, uptime_days, \
     storage_committed_bytes, storage_used_bytes, storage_usage_percent, last_seen_at, \
     is_public, rpc_port, status";

const SNAPSHOT_COLUMNS: &str = "pubkey, timestamp, uptime_seconds, uptime_days, \
     storage_used_bytes, storage_usage_percent, status";

const TOP_VERSIONS: usize = 5;

/// SQLite-backed store for node state, snapshot history and run status.
pub struct MonitorDatabase {
    db: Database,
    retention: Duration,
}

impl MonitorDatabase {
    /// Open (or create) the database at `path`
    pub fn with_path<P: AsRef<Path>>(path: P, retention: Duration) -> SqlResult<Self> {
        Self::init(Database::new(path)?, retention)
    }

    #[cfg(test)]
    pub fn in_memory(retention: Duration) -> SqlResult<Self> {
        Self::init(Database::in_memory()?, retention)
    }

    fn init(db: Database, retention: Duration) -> SqlResult<Self> {
        let monitor_db = Self { db, retention };
        monitor_db.init_schema()?;
        Ok(monitor_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();

        // Current state, one row per node
        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                pubkey TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                version TEXT NOT NULL,
                uptime_seconds INTEGER NOT NULL DEFAULT 0,
                uptime_days INTEGER NOT NULL DEFAULT 0,
                storage_committed_bytes INTEGER NOT NULL DEFAULT 0,
                storage_used_bytes INTEGER NOT NULL DEFAULT 0,
                storage_usage_percent REAL NOT NULL DEFAULT 0,
                last_seen_at INTEGER NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                rpc_port INTEGER NOT NULL DEFAULT 6000,
                status TEXT NOT NULL DEFAULT 'online'
                    CHECK (status IN ('online', 'syncing', 'offline'))
            )",
            [],
        )?;

        // History, insert-only
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pubkey TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                uptime_seconds INTEGER NOT NULL DEFAULT 0,
                uptime_days INTEGER NOT NULL DEFAULT 0,
                storage_used_bytes INTEGER NOT NULL DEFAULT 0,
                storage_usage_percent REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'online'
            )",
            [],
        )?;

        // Run status (single row)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                status TEXT NOT NULL CHECK (status IN ('running', 'success', 'error')),
                last_run_at INTEGER NOT NULL,
                last_run_duration_ms INTEGER NOT NULL DEFAULT 0,
                nodes_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                run_id TEXT
            )",
            [],
        )?;

        // Indexes
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_pubkey_timestamp
             ON snapshots(pubkey, timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON snapshots(timestamp)",
            [],
        )?;

        Ok(())
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_before(now, self.retention)
    }

    /// Drop snapshots that fell out of the retention window
    pub fn purge_expired_snapshots(&self, now: DateTime<Utc>) -> SqlResult<usize> {
        let conn = self.db.connection();
        conn.execute(
            "DELETE FROM snapshots WHERE timestamp < ?1",
            params![to_millis(self.retention_cutoff(now))],
        )
    }

    // ========== Nodes ==========

    pub fn get_node(&self, pubkey: &str) -> SqlResult<Option<NodeRecord>> {
        let conn = self.db.connection();
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE pubkey = ?1"),
            params![pubkey],
            node_from_row,
        )
        .optional()
    }

    /// Nodes matching `query`, sorted and limited
    pub fn list_nodes(&self, query: &NodeQuery) -> SqlResult<Vec<NodeRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(status) = query.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            values.push(format!("%{}%", escape_like(search)));
            let n = values.len();
            clauses.push(format!(
                "(pubkey LIKE ?{n} ESCAPE '\\' OR address LIKE ?{n} ESCAPE '\\')"
            ));
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes {filter}
             ORDER BY {} {order}, pubkey ASC
             LIMIT {}",
            query.sort_by.column(),
            query.limit.min(i64::MAX as usize)
        );

        let conn = self.db.connection();
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_from_iter(values.iter()), node_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(nodes)
    }

    pub fn node_counts(&self) -> SqlResult<NodeCounts> {
        let conn = self.db.connection();
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'online'), 0),
                    COALESCE(SUM(status = 'offline'), 0)
             FROM nodes",
            [],
            |row| {
                Ok(NodeCounts {
                    total: row.get::<_, i64>(0)? as usize,
                    online: row.get::<_, i64>(1)? as usize,
                    offline: row.get::<_, i64>(2)? as usize,
                })
            },
        )
    }

    // ========== Snapshots ==========

    /// History of one node between `since` and `until`, oldest first
    pub fn node_history(
        &self,
        pubkey: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SqlResult<Vec<SnapshotRecord>> {
        let since = since.max(self.retention_cutoff(Utc::now()));
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE pubkey = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC, id ASC"
        ))?;

        let history = stmt
            .query_map(
                params![pubkey, to_millis(since), to_millis(until)],
                snapshot_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(history)
    }

    // ========== Run status ==========

    pub fn run_status(&self) -> SqlResult<Option<SyncRunStatus>> {
        let conn = self.db.connection();
        conn.query_row(
            "SELECT status, last_run_at, last_run_duration_ms, nodes_count, error_message, run_id
             FROM sync_status WHERE id = 1",
            [],
            |row| {
                Ok(SyncRunStatus {
                    status: parse_column::<RunState>(row, 0)?,
                    last_run_at: timestamp_at(row, 1)?,
                    last_run_duration_ms: row.get::<_, i64>(2)?.max(0) as u64,
                    nodes_count: row.get::<_, i64>(3)?.max(0) as usize,
                    error_message: row.get(4)?,
                    run_id: row.get(5)?,
                })
            },
        )
        .optional()
    }

    // ========== Aggregates ==========

    pub fn network_overview(&self) -> SqlResult<NetworkOverview> {
        let conn = self.db.connection();
        let mut overview = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'online'), 0),
                    COALESCE(SUM(status = 'offline'), 0),
                    COALESCE(SUM(storage_committed_bytes), 0),
                    COALESCE(SUM(storage_used_bytes), 0),
                    COALESCE(AVG(storage_usage_percent), 0.0),
                    COALESCE(AVG(uptime_days), 0.0),
                    COALESCE(MAX(uptime_days), 0)
             FROM nodes",
            [],
            |row| {
                let total = row.get::<_, i64>(0)? as usize;
                let online = row.get::<_, i64>(1)? as usize;
                let uptime_percent = if total == 0 {
                    0.0
                } else {
                    (online as f64 / total as f64 * 1000.0).round() / 10.0
                };
                Ok(NetworkOverview {
                    total_nodes: total,
                    online_nodes: online,
                    offline_nodes: row.get::<_, i64>(2)? as usize,
                    uptime_percent,
                    total_storage_committed_bytes: row.get::<_, i64>(3)?.max(0) as u64,
                    total_storage_used_bytes: row.get::<_, i64>(4)?.max(0) as u64,
                    avg_storage_usage_percent: row.get(5)?,
                    avg_uptime_days: row.get(6)?,
                    max_uptime_days: row.get::<_, i64>(7)?.max(0) as u64,
                    versions: Vec::new(),
                    sync: None,
                })
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT version, COUNT(*) AS nodes FROM nodes
             GROUP BY version
             ORDER BY nodes DESC, version ASC
             LIMIT ?1",
        )?;
        overview.versions = stmt
            .query_map(params![TOP_VERSIONS as i64], |row| {
                Ok(VersionCount {
                    version: row.get(0)?,
                    count: row.get::<_, i64>(1)? as usize,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        overview.sync = self.run_status()?;

        Ok(overview)
    }
}

impl StateStore for MonitorDatabase {
    fn upsert_nodes(&self, records: &[NodeRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO nodes ({NODE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ))?;
            for node in records {
                stmt.execute(params![
                    node.pubkey,
                    node.address,
                    node.version,
                    node.uptime_seconds as i64,
                    node.uptime_days as i64,
                    node.storage_committed_bytes as i64,
                    node.storage_used_bytes as i64,
                    node.storage_usage_percent,
                    to_millis(node.last_seen_at),
                    node.is_public,
                    node.rpc_port,
                    node.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn append_snapshots(&self, records: &[SnapshotRecord]) -> Result<(), StoreError> {
        self.purge_expired_snapshots(Utc::now())?;

        let tx = self.db.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO snapshots ({SNAPSHOT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))?;
            for snapshot in records {
                stmt.execute(params![
                    snapshot.pubkey,
                    to_millis(snapshot.timestamp),
                    snapshot.uptime_seconds as i64,
                    snapshot.uptime_days as i64,
                    snapshot.storage_used_bytes as i64,
                    snapshot.storage_usage_percent,
                    snapshot.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn set_run_status(&self, update: &RunStatusUpdate) -> Result<(), StoreError> {
        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO sync_status
                (id, status, last_run_at, last_run_duration_ms, nodes_count, error_message, run_id)
             VALUES (1, ?1, ?2, COALESCE(?3, 0), COALESCE(?4, 0), ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                last_run_at = excluded.last_run_at,
                last_run_duration_ms = COALESCE(?3, sync_status.last_run_duration_ms),
                nodes_count = COALESCE(?4, sync_status.nodes_count),
                error_message = excluded.error_message,
                run_id = COALESCE(?6, sync_status.run_id)",
            params![
                update.status.as_str(),
                to_millis(update.last_run_at),
                update.last_run_duration_ms.map(|ms| ms.min(i64::MAX as u64) as i64),
                update.nodes_count.map(|n| n as i64),
                update.error_message,
                update.run_id,
            ],
        )?;
        Ok(())
    }

    fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.db.connection();
        let changed = conn.execute(
            "UPDATE nodes SET status = 'offline'
             WHERE last_seen_at < ?1 AND status != 'offline'",
            params![to_millis(cutoff)],
        )?;
        Ok(changed)
    }
}

fn node_from_row(row: &Row<'_>) -> SqlResult<NodeRecord> {
    Ok(NodeRecord {
        pubkey: row.get(0)?,
        address: row.get(1)?,
        version: row.get(2)?,
        uptime_seconds: row.get::<_, i64>(3)?.max(0) as u64,
        uptime_days: row.get::<_, i64>(4)?.max(0) as u64,
        storage_committed_bytes: row.get::<_, i64>(5)?.max(0) as u64,
        storage_used_bytes: row.get::<_, i64>(6)?.max(0) as u64,
        storage_usage_percent: row.get(7)?,
        last_seen_at: timestamp_at(row, 8)?,
        is_public: row.get(9)?,
        rpc_port: row.get(10)?,
        status: parse_column::<NodeStatus>(row, 11)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> SqlResult<SnapshotRecord> {
    Ok(SnapshotRecord {
        pubkey: row.get(0)?,
        timestamp: timestamp_at(row, 1)?,
        uptime_seconds: row.get::<_, i64>(2)?.max(0) as u64,
        uptime_days: row.get::<_, i64>(3)?.max(0) as u64,
        storage_used_bytes: row.get::<_, i64>(4)?.max(0) as u64,
        storage_usage_percent: row.get(5)?,
        status: parse_column::<NodeStatus>(row, 6)?,
    })
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> SqlResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
