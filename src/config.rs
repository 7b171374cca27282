use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.json";
pub const DEFAULT_RPC_ENDPOINT: &str = "http://127.0.0.1:6000/rpc";

const MAX_RETENTION_DAYS: u64 = 3_650;
const MAX_OFFLINE_AFTER_SECS: u64 = 365 * 86_400;

const DEFAULT_SEED_NODES: &[&str] = &[
    "173.212.203.145",
    "173.212.220.65",
    "161.97.97.41",
    "192.190.136.36",
    "192.190.136.37",
    "192.190.136.38",
    "192.190.136.28",
    "192.190.136.29",
    "207.244.255.1",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid rpc endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("max_in_flight must be at least 1")]
    ZeroConcurrency,
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub seed_nodes: Vec<String>,
    pub rpc_endpoint: String,
    pub peer_rpc_port: u16,
    pub peer_rpc_path: String,
    pub request_timeout_secs: u64,
    pub max_in_flight: usize,
    pub database_path: String,
    pub snapshot_retention_days: u32,
    /// `None` turns the staleness sweep off.
    pub offline_after_secs: Option<u64>,
    pub sync_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            seed_nodes: DEFAULT_SEED_NODES.iter().map(|s| s.to_string()).collect(),
            rpc_endpoint: DEFAULT_RPC_ENDPOINT.to_string(),
            peer_rpc_port: 6000,
            peer_rpc_path: "/rpc".to_string(),
            request_timeout_secs: 10,
            max_in_flight: 8,
            database_path: "data/monitor.db".to_string(),
            snapshot_retention_days: 30,
            offline_after_secs: Some(300),
            sync_interval_secs: 300,
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// `None` when the sweep is off or the value is out of range.
    pub fn offline_after(&self) -> Option<chrono::Duration> {
        self.offline_after_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(i64::from(self.snapshot_retention_days))
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        check_range("request_timeout_secs", self.request_timeout_secs, 1, u64::MAX)?;
        check_range(
            "snapshot_retention_days",
            u64::from(self.snapshot_retention_days),
            1,
            MAX_RETENTION_DAYS,
        )?;
        if let Some(secs) = self.offline_after_secs {
            check_range("offline_after_secs", secs, 1, MAX_OFFLINE_AFTER_SECS)?;
        }
        match reqwest::Url::parse(&self.rpc_endpoint) {
            Ok(url) if url.has_host() => Ok(()),
            _ => Err(ConfigError::InvalidEndpoint(self.rpc_endpoint.clone())),
        }
    }

    /// Trims seeds, drops blanks and keeps the first occurrence of duplicates.
    fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.seed_nodes.len());
        for seed in self.seed_nodes.drain(..) {
            let seed = seed.trim().to_string();
            if !seed.is_empty() && !seen.contains(&seed) {
                seen.push(seed);
            }
        }
        self.seed_nodes = seen;
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = env::var("PRPC_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.rpc_endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(path) = env::var("MONITOR_DATABASE") {
            if !path.trim().is_empty() {
                self.database_path = path.trim().to_string();
            }
        }
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let mut config = read_config_file(Path::new(path));
    config.apply_env_overrides();
    config.normalize();
    config
}

fn read_config_file(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|err| {
            log::warn!("Failed to parse config file {}: {err}", path.display());
            AppConfig::default()
        }),
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

fn parse_config(content: &str) -> serde_json::Result<AppConfig> {
    let mut config: AppConfig = serde_json::from_str(content)?;
    config.normalize();
    Ok(config)
}
