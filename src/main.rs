mod common;
mod config;
mod network;
mod storage;
mod sync;
#[cfg(test)]
mod test_support;

use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::Serialize;
use serde_json::json;
use tokio::signal;
use tokio::time::{MissedTickBehavior, interval};

use config::AppConfig;
use network::{RpcSettings, TelemetryClient};
use storage::{MonitorDatabase, NodeQuery, NodeSortKey, SortOrder, StatusFilter};
use sync::{SyncSettings, SyncWorker, reconcile_pod};

#[derive(Parser)]
#[command(
    name = "pnode-monitor",
    version,
    about = "Polls pNode seeds over pRPC and keeps their telemetry history"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync against the seed list
    Sync,
    /// Sync now, then again every `sync_interval_secs` until Ctrl-C
    Daemon,
    /// List stored nodes
    Nodes {
        /// online, syncing, offline or all
        #[arg(long, default_value = "all")]
        status: StatusFilter,
        /// Case-insensitive match on pubkey or address
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "uptimeDays")]
        sort_by: NodeSortKey,
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Show one node with its recent snapshots
    Node {
        pubkey: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Network overview
    Stats,
    /// Status of the last sync run
    Status,
    /// Ask a peer (or the default endpoint) for its pod list; nothing is stored
    Pods { address: Option<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    app_config.validate()?;

    match cli.command {
        Command::Sync => {
            let worker = build_worker(&app_config)?;
            let outcome = worker.run().await;
            print_json(&outcome)?;
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::Daemon => {
            let worker = build_worker(&app_config)?;
            run_daemon(&worker, app_config.sync_interval()).await;
        }
        Command::Nodes {
            status,
            search,
            sort_by,
            asc,
            limit,
        } => {
            let db = open_database(&app_config)?;
            let nodes = db.list_nodes(&NodeQuery {
                status: status.0,
                search,
                sort_by,
                order: if asc { SortOrder::Asc } else { SortOrder::Desc },
                limit,
            })?;
            let counts = db.node_counts()?;
            print_json(&json!({
                "meta": {
                    "total": counts.total,
                    "online": counts.online,
                    "offline": counts.offline,
                    "returned": nodes.len(),
                },
                "nodes": nodes,
            }))?;
        }
        Command::Node { pubkey, days } => {
            let db = open_database(&app_config)?;
            let node = db
                .get_node(&pubkey)?
                .ok_or_else(|| format!("node {pubkey} not found"))?;
            let now = Utc::now();
            let window = chrono::Duration::try_days(i64::from(days)).unwrap_or(chrono::Duration::MAX);
            let history = db.node_history(&pubkey, storage::saturating_before(now, window), now)?;
            print_json(&json!({ "node": node, "history": history }))?;
        }
        Command::Stats => {
            let db = open_database(&app_config)?;
            print_json(&db.network_overview()?)?;
        }
        Command::Status => {
            let db = open_database(&app_config)?;
            match db.run_status()? {
                Some(status) => print_json(&status)?,
                None => print_json(&json!({ "status": "unknown" }))?,
            }
        }
        Command::Pods { address } => {
            let client = build_client(&app_config)?;
            let pods = client.get_pods_with_stats(address.as_deref()).await?;
            let now = Utc::now();
            let nodes: Vec<_> = pods
                .iter()
                .map(|pod| reconcile_pod(pod, now, app_config.offline_after()))
                .collect();
            print_json(&json!({ "count": nodes.len(), "pods": nodes }))?;
        }
    }

    Ok(())
}

fn build_client(app_config: &AppConfig) -> Result<TelemetryClient, Box<dyn Error>> {
    let settings = RpcSettings::from_config(app_config)?;
    Ok(TelemetryClient::new(settings)?)
}

fn build_worker(app_config: &AppConfig) -> Result<SyncWorker<MonitorDatabase>, Box<dyn Error>> {
    let client = build_client(app_config)?;
    let db = open_database(app_config)?;
    Ok(SyncWorker::new(
        client,
        db,
        SyncSettings::from_config(app_config),
    ))
}

fn open_database(app_config: &AppConfig) -> Result<MonitorDatabase, Box<dyn Error>> {
    storage::ensure_data_dir(&app_config.database_path)?;
    let db = MonitorDatabase::with_path(&app_config.database_path, app_config.retention())?;
    log::debug!("Opened database at {}", app_config.database_path);
    Ok(db)
}

async fn run_daemon(worker: &SyncWorker<MonitorDatabase>, every: Duration) {
    log::info!("Sync daemon started, running every {}s", every.as_secs());

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = worker.run().await;
                match outcome.error {
                    Some(err) => log::error!("Scheduled sync failed: {err}"),
                    None => log::info!("Scheduled sync stored {} nodes", outcome.nodes_count),
                }
            }
            _ = &mut shutdown => {
                log::info!("Received shutdown signal, stopping sync daemon...");
                break;
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
