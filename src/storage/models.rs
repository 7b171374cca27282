use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Syncing,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Syncing => "syncing",
            NodeStatus::Offline => "offline",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(NodeStatus::Online),
            "syncing" => Ok(NodeStatus::Syncing),
            "offline" => Ok(NodeStatus::Offline),
            other => Err(format!("unknown node status `{other}`")),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status to filter by, where `all` means no filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFilter(pub Option<NodeStatus>);

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" => Ok(StatusFilter(None)),
            status => status.parse().map(|status| StatusFilter(Some(status))),
        }
    }
}

/// Current state of one pNode, keyed by `pubkey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub pubkey: String,
    pub address: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub uptime_days: u64,
    pub storage_committed_bytes: u64,
    pub storage_used_bytes: u64,
    pub storage_usage_percent: f64,
    pub last_seen_at: DateTime<Utc>,
    pub is_public: bool,
    pub rpc_port: u16,
    pub status: NodeStatus,
}

/// One immutable history point for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub pubkey: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub uptime_days: u64,
    pub storage_used_bytes: u64,
    pub storage_usage_percent: f64,
    pub status: NodeStatus,
}

impl SnapshotRecord {
    pub fn of(node: &NodeRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            pubkey: node.pubkey.clone(),
            timestamp,
            uptime_seconds: node.uptime_seconds,
            uptime_days: node.uptime_days,
            storage_used_bytes: node.storage_used_bytes,
            storage_usage_percent: node.storage_usage_percent,
            status: node.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Success,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Error => "error",
        }
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunState::Running),
            "success" => Ok(RunState::Success),
            "error" => Ok(RunState::Error),
            other => Err(format!("unknown run state `{other}`")),
        }
    }
}

/// The single most-recent-run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunStatus {
    pub status: RunState,
    pub last_run_at: DateTime<Utc>,
    pub last_run_duration_ms: u64,
    pub nodes_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Partial write merged into the run status row; `None` leaves a field as is.
///
/// `error_message` is the exception: it is always written, so `None` clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatusUpdate {
    pub status: RunState,
    pub last_run_at: DateTime<Utc>,
    pub last_run_duration_ms: Option<u64>,
    pub nodes_count: Option<usize>,
    pub error_message: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeSortKey {
    #[default]
    UptimeDays,
    UptimeSeconds,
    StorageUsedBytes,
    StorageCommittedBytes,
    StorageUsagePercent,
    LastSeenAt,
    Version,
    Pubkey,
}

impl NodeSortKey {
    pub fn column(&self) -> &'static str {
        match self {
            NodeSortKey::UptimeDays => "uptime_days",
            NodeSortKey::UptimeSeconds => "uptime_seconds",
            NodeSortKey::StorageUsedBytes => "storage_used_bytes",
            NodeSortKey::StorageCommittedBytes => "storage_committed_bytes",
            NodeSortKey::StorageUsagePercent => "storage_usage_percent",
            NodeSortKey::LastSeenAt => "last_seen_at",
            NodeSortKey::Version => "version",
            NodeSortKey::Pubkey => "pubkey",
        }
    }
}

impl FromStr for NodeSortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uptimeDays" => Ok(NodeSortKey::UptimeDays),
            "uptimeSeconds" | "uptime" => Ok(NodeSortKey::UptimeSeconds),
            "storageUsedBytes" | "storageUsed" => Ok(NodeSortKey::StorageUsedBytes),
            "storageCommittedBytes" | "storageCommitted" => Ok(NodeSortKey::StorageCommittedBytes),
            "storageUsagePercent" => Ok(NodeSortKey::StorageUsagePercent),
            "lastSeenAt" | "lastSeen" => Ok(NodeSortKey::LastSeenAt),
            "version" => Ok(NodeSortKey::Version),
            "pubkey" => Ok(NodeSortKey::Pubkey),
            other => Err(format!("unknown sort key `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter for the current-state table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    pub status: Option<NodeStatus>,
    pub search: Option<String>,
    pub sort_by: NodeSortKey,
    pub order: SortOrder,
    pub limit: usize,
}

impl Default for NodeQuery {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            sort_by: NodeSortKey::default(),
            order: SortOrder::default(),
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionCount {
    pub version: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkOverview {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub uptime_percent: f64,
    pub total_storage_committed_bytes: u64,
    pub total_storage_used_bytes: u64,
    pub avg_storage_usage_percent: f64,
    pub avg_uptime_days: f64,
    pub max_uptime_days: u64,
    pub versions: Vec<VersionCount>,
    pub sync: Option<SyncRunStatus>,
}
