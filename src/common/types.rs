use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Telemetry methods a pNode exposes over pRPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelemetryMethod {
    GetStats,
    GetVersion,
    GetPodsWithStats,
}

impl TelemetryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryMethod::GetStats => "get-stats",
            TelemetryMethod::GetVersion => "get-version",
            TelemetryMethod::GetPodsWithStats => "get-pods-with-stats",
        }
    }
}

impl fmt::Display for TelemetryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat counter object returned by `get-stats`.
///
/// Only `uptime` is guaranteed; every other counter is kept verbatim so the
/// reconciler can decide which of them mean anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(deserialize_with = "whole_seconds")]
    pub uptime: u64,
    #[serde(flatten)]
    pub counters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    #[serde(default)]
    pub release: String,
}

/// Peer descriptor from `get-pods-with-stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodWithStats {
    #[serde(default)]
    pub pubkey: String,
    pub address: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub last_seen_timestamp: i64,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default, deserialize_with = "whole_seconds")]
    pub uptime: u64,
    #[serde(default)]
    pub version: String,
    /// Storage counters (`storage_committed`, `storage_used`, ...).
    #[serde(flatten)]
    pub counters: BTreeMap<String, Value>,
}

fn default_rpc_port() -> u16 {
    6000
}

/// Peers report uptime as any JSON number; keep whole seconds, never negative.
fn whole_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if secs.is_finite() && secs > 0.0 {
        Ok(secs.floor() as u64)
    } else {
        Ok(0)
    }
}

/// Some peers wrap the pod list in `{"pods": [...]}`, others return the bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PodsResponse {
    Wrapped { pods: Vec<PodWithStats> },
    Bare(Vec<PodWithStats>),
}

impl PodsResponse {
    pub fn into_pods(self) -> Vec<PodWithStats> {
        match self {
            PodsResponse::Wrapped { pods } => pods,
            PodsResponse::Bare(pods) => pods,
        }
    }
}
