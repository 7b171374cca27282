//! Turning raw pRPC telemetry into [`NodeRecord`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::common::{PodWithStats, StatsResponse, TelemetryMethod, VersionResponse};
use crate::network::RpcError;
use crate::storage::{NodeRecord, NodeStatus};

pub const UNKNOWN_VERSION: &str = "Unknown";

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageField {
    Committed,
    Used,
    UsagePercent,
}

/// Raw counters that carry durable-storage figures, per telemetry method.
///
/// `get-stats` has no rows: its `ram_*` keys are memory, `packets_*`,
/// `active_streams` and `total_bytes` are throughput, and `file_size`,
/// `current_index` and `total_pages` describe the node's local index.
pub const STORAGE_COUNTERS: &[(TelemetryMethod, &str, StorageField)] = &[
    (
        TelemetryMethod::GetPodsWithStats,
        "storage_committed",
        StorageField::Committed,
    ),
    (
        TelemetryMethod::GetPodsWithStats,
        "storage_used",
        StorageField::Used,
    ),
    (
        TelemetryMethod::GetPodsWithStats,
        "storage_usage_percent",
        StorageField::UsagePercent,
    ),
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageFigures {
    pub committed_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
}

impl StorageFigures {
    pub fn from_counters(method: TelemetryMethod, counters: &BTreeMap<String, Value>) -> Self {
        let mut figures = Self::default();
        let rows = STORAGE_COUNTERS.iter().filter(|(m, _, _)| *m == method);

        for (_, key, field) in rows {
            let Some(value) = counters.get(*key) else {
                continue;
            };
            match field {
                StorageField::Committed => figures.committed_bytes = byte_count(value),
                StorageField::Used => figures.used_bytes = byte_count(value),
                StorageField::UsagePercent => {
                    figures.usage_percent = value.as_f64().filter(|p| p.is_finite()).unwrap_or(0.0)
                }
            }
        }

        figures
    }
}

fn byte_count(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
        .unwrap_or(0)
}

/// What one seed produced this run.
#[derive(Debug, Clone)]
pub enum Reconciled {
    Node(NodeRecord),
    /// The stats call failed; the node is left untouched this run.
    Skipped(RpcError),
}

/// Stable key for peers that do not report one: `10.0.0.1` -> `node-10-0-0-1`.
pub fn derive_pubkey(address: &str) -> String {
    format!("node-{}", address.replace('.', "-"))
}

pub fn uptime_days(uptime_seconds: u64) -> u64 {
    uptime_seconds / SECONDS_PER_DAY
}

pub fn reconcile(
    address: &str,
    rpc_port: u16,
    stats: Result<StatsResponse, RpcError>,
    version: Result<VersionResponse, RpcError>,
    seen_at: DateTime<Utc>,
) -> Reconciled {
    let stats = match stats {
        Ok(stats) => stats,
        Err(err) => return Reconciled::Skipped(err),
    };

    let version = match version {
        Ok(info) => non_blank(&info.version).unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        Err(err) => {
            log::debug!("Version unavailable for {address}: {err}");
            UNKNOWN_VERSION.to_string()
        }
    };

    let pubkey = stats
        .counters
        .get("pubkey")
        .and_then(Value::as_str)
        .and_then(non_blank)
        .unwrap_or_else(|| derive_pubkey(address));
    let storage = StorageFigures::from_counters(TelemetryMethod::GetStats, &stats.counters);

    Reconciled::Node(NodeRecord {
        pubkey,
        address: address.to_string(),
        version,
        uptime_seconds: stats.uptime,
        uptime_days: uptime_days(stats.uptime),
        storage_committed_bytes: storage.committed_bytes,
        storage_used_bytes: storage.used_bytes,
        storage_usage_percent: storage.usage_percent,
        last_seen_at: seen_at,
        is_public: true,
        rpc_port,
        // Answering get-stats is what makes a node online.
        status: NodeStatus::Online,
    })
}

/// Online unless `last_seen` is older than `offline_after`.
pub fn classify(
    last_seen: DateTime<Utc>,
    now: DateTime<Utc>,
    offline_after: Option<Duration>,
) -> NodeStatus {
    match offline_after {
        Some(limit) if now - last_seen > limit => NodeStatus::Offline,
        _ => NodeStatus::Online,
    }
}

/// Record for a peer described by someone else's `get-pods-with-stats`.
pub fn reconcile_pod(
    pod: &PodWithStats,
    now: DateTime<Utc>,
    offline_after: Option<Duration>,
) -> NodeRecord {
    let last_seen_at = match pod.last_seen_timestamp {
        ts if ts > 0 => DateTime::from_timestamp(ts, 0).unwrap_or(now),
        _ => now,
    };
    let storage = StorageFigures::from_counters(TelemetryMethod::GetPodsWithStats, &pod.counters);

    NodeRecord {
        pubkey: non_blank(&pod.pubkey).unwrap_or_else(|| derive_pubkey(&pod.address)),
        address: pod.address.clone(),
        version: non_blank(&pod.version).unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        uptime_seconds: pod.uptime,
        uptime_days: uptime_days(pod.uptime),
        storage_committed_bytes: storage.committed_bytes,
        storage_used_bytes: storage.used_bytes,
        storage_usage_percent: storage.usage_percent,
        last_seen_at,
        is_public: pod.is_public,
        rpc_port: pod.rpc_port,
        status: classify(last_seen_at, now, offline_after),
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::error::RpcErrorKind;
    use serde_json::json;

    fn stats(body: Value) -> Result<StatsResponse, RpcError> {
        Ok(serde_json::from_value(body).unwrap())
    }

    fn version(v: &str) -> Result<VersionResponse, RpcError> {
        Ok(VersionResponse {
            version: v.to_string(),
            release: "stable".to_string(),
        })
    }

    fn refused() -> RpcError {
        RpcError::new(RpcErrorKind::ConnectionRefused, "connection refused")
    }

    fn expect_node(reconciled: Reconciled) -> NodeRecord {
        match reconciled {
            Reconciled::Node(node) => node,
            Reconciled::Skipped(err) => panic!("node was skipped: {err}"),
        }
    }

    #[test]
    fn pubkey_derivation_is_deterministic() {
        assert_eq!(derive_pubkey("173.212.203.145"), "node-173-212-203-145");
        assert_eq!(derive_pubkey("173.212.203.145"), derive_pubkey("173.212.203.145"));
    }

    #[test]
    fn uptime_is_floored_to_days() {
        assert_eq!(uptime_days(259_200), 3);
        assert_eq!(uptime_days(259_199), 2);
        assert_eq!(uptime_days(0), 0);
    }

    #[test]
    fn answered_peer_becomes_online_record() {
        let seen_at = Utc::now();
        let node = expect_node(reconcile(
            "10.0.0.1",
            6000,
            stats(json!({ "uptime": 259200, "ram_used": 2048, "total_bytes": 94633 })),
            version("0.7.3"),
            seen_at,
        ));

        assert_eq!(node.pubkey, "node-10-0-0-1");
        assert_eq!(node.address, "10.0.0.1");
        assert_eq!(node.version, "0.7.3");
        assert_eq!(node.uptime_days, 3);
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.last_seen_at, seen_at);
        assert_eq!(node.rpc_port, 6000);
        assert!(node.is_public);
    }

    #[test]
    fn memory_and_throughput_counters_are_not_storage() {
        let node = expect_node(reconcile(
            "10.0.0.1",
            6000,
            stats(json!({
                "uptime": 10,
                "ram_used": 2048,
                "ram_total": 4096,
                "total_bytes": 94633,
                "file_size": 1_000_000,
            })),
            version("0.7.3"),
            Utc::now(),
        ));

        assert_eq!(node.storage_committed_bytes, 0);
        assert_eq!(node.storage_used_bytes, 0);
        assert_eq!(node.storage_usage_percent, 0.0);
    }

    #[test]
    fn failed_version_falls_back_to_unknown() {
        let node = expect_node(reconcile(
            "10.0.0.1",
            6000,
            stats(json!({ "uptime": 10 })),
            Err(refused()),
            Utc::now(),
        ));
        assert_eq!(node.version, UNKNOWN_VERSION);

        let node = expect_node(reconcile(
            "10.0.0.1",
            6000,
            stats(json!({ "uptime": 10 })),
            version("  "),
            Utc::now(),
        ));
        assert_eq!(node.version, UNKNOWN_VERSION);
    }

    #[test]
    fn failed_stats_skips_the_peer() {
        let reconciled = reconcile("10.0.0.1", 6000, Err(refused()), version("0.7.3"), Utc::now());
        match reconciled {
            Reconciled::Skipped(err) => assert_eq!(err.kind, RpcErrorKind::ConnectionRefused),
            Reconciled::Node(node) => panic!("unexpected node {node:?}"),
        }
    }

    #[test]
    fn reported_pubkey_wins_over_derived() {
        let node = expect_node(reconcile(
            "10.0.0.1",
            6000,
            stats(json!({ "uptime": 10, "pubkey": "9xQeWvG816bUx9EP" })),
            version("0.7.3"),
            Utc::now(),
        ));
        assert_eq!(node.pubkey, "9xQeWvG816bUx9EP");
    }

    #[test]
    fn pods_map_storage_counters() {
        let now = Utc::now();
        let pod: PodWithStats = serde_json::from_value(json!({
            "pubkey": "pk-1",
            "address": "10.0.0.7:9001",
            "is_public": true,
            "last_seen_timestamp": now.timestamp() - 30,
            "rpc_port": 6000,
            "storage_committed": 1_000_000_000u64,
            "storage_used": 250_000_000u64,
            "storage_usage_percent": 25.0,
            "uptime": 172_800,
            "version": "0.7.3",
        }))
        .unwrap();

        let node = reconcile_pod(&pod, now, Some(Duration::minutes(5)));
        assert_eq!(node.pubkey, "pk-1");
        assert_eq!(node.storage_committed_bytes, 1_000_000_000);
        assert_eq!(node.storage_used_bytes, 250_000_000);
        assert_eq!(node.storage_usage_percent, 25.0);
        assert_eq!(node.uptime_days, 2);
        assert_eq!(node.status, NodeStatus::Online);
    }

    #[test]
    fn stale_pods_are_offline() {
        let now = Utc::now();
        let pod: PodWithStats = serde_json::from_value(json!({
            "pubkey": "",
            "address": "10.0.0.8",
            "last_seen_timestamp": now.timestamp() - 3_600,
        }))
        .unwrap();

        let node = reconcile_pod(&pod, now, Some(Duration::minutes(5)));
        assert_eq!(node.pubkey, "node-10-0-0-8");
        assert_eq!(node.version, UNKNOWN_VERSION);
        assert_eq!(node.status, NodeStatus::Offline);

        let node = reconcile_pod(&pod, now, None);
        assert_eq!(node.status, NodeStatus::Online);
    }
}
