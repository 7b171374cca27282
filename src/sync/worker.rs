use std::collections::HashMap;
use std::time::Instant;

use chrono::{Duration, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::network::TelemetryClient;
use crate::storage::{
    NodeRecord, RunStatusRecorder, SnapshotRecord, StateStore, StoreError, saturating_before,
};

use super::reconcile::{Reconciled, reconcile};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub seeds: Vec<String>,
    pub max_in_flight: usize,
    pub offline_after: Option<Duration>,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            seeds: config.seed_nodes.clone(),
            max_in_flight: config.max_in_flight,
            offline_after: config.offline_after(),
        }
    }
}

/// Result of one sync run, as reported to whoever triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub nodes_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    fn succeeded(nodes_count: usize) -> Self {
        Self {
            success: true,
            nodes_count,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            nodes_count: 0,
            error: Some(message),
        }
    }
}

/// What a single seed produced during a crawl.
#[derive(Debug, Clone)]
pub struct PeerContact {
    pub address: String,
    pub outcome: Reconciled,
}

/// Crawls the seed list and persists what it finds.
pub struct SyncWorker<S> {
    client: TelemetryClient,
    store: S,
    settings: SyncSettings,
}

impl<S: StateStore> SyncWorker<S> {
    pub fn new(client: TelemetryClient, store: S, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one sync. Never fails: errors end up in the outcome and in the
    /// persisted run status.
    pub async fn run(&self) -> SyncOutcome {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let recorder = RunStatusRecorder::new(&self.store, run_id.as_str());

        match self.execute(&recorder, &run_id, started).await {
            Ok(nodes_count) => {
                log::info!(
                    "Sync run {run_id} finished in {} ms with {nodes_count} nodes",
                    elapsed_ms(started)
                );
                SyncOutcome::succeeded(nodes_count)
            }
            Err(err) => {
                let message = err.to_string();
                log::error!("Sync run {run_id} failed: {message}");
                if let Err(status_err) = recorder.failed(Utc::now(), elapsed_ms(started), &message) {
                    log::error!("Could not record failure of run {run_id}: {status_err}");
                }
                SyncOutcome::failed(message)
            }
        }
    }

    async fn execute(
        &self,
        recorder: &RunStatusRecorder<'_, S>,
        run_id: &str,
        started: Instant,
    ) -> Result<usize, StoreError> {
        recorder.running(Utc::now())?;
        log::info!(
            "Starting crawl of {} seed nodes (run {run_id})",
            self.settings.seeds.len()
        );

        let mut nodes = Vec::new();
        for contact in self.crawl().await {
            match contact.outcome {
                Reconciled::Node(node) => {
                    log::info!("Scraped {} successfully", contact.address);
                    nodes.push(node);
                }
                Reconciled::Skipped(err) => {
                    log::warn!("Failed to scrape {}: {err}", contact.address);
                }
            }
        }
        let nodes = dedupe_by_pubkey(nodes);
        log::info!("Found {} active nodes", nodes.len());

        self.store.upsert_nodes(&nodes)?;

        if let Some(limit) = self.settings.offline_after {
            let marked = self
                .store
                .mark_stale_offline(saturating_before(Utc::now(), limit))?;
            if marked > 0 {
                log::info!("Marked {marked} stale nodes offline");
            }
        }

        let finished_at = Utc::now();
        let snapshots: Vec<SnapshotRecord> = nodes
            .iter()
            .map(|node| SnapshotRecord::of(node, finished_at))
            .collect();
        if !snapshots.is_empty() {
            self.store.append_snapshots(&snapshots)?;
        }

        recorder.succeeded(Utc::now(), elapsed_ms(started), nodes.len())?;
        Ok(nodes.len())
    }

    /// Contacts every seed, at most `max_in_flight` at a time, in seed order.
    pub async fn crawl(&self) -> Vec<PeerContact> {
        stream::iter(self.settings.seeds.iter())
            .map(|address| self.contact(address))
            .buffered(self.settings.max_in_flight.max(1))
            .collect()
            .await
    }

    async fn contact(&self, address: &str) -> PeerContact {
        let (stats, version) = tokio::join!(
            self.client.get_stats(Some(address)),
            self.client.get_version(Some(address))
        );

        PeerContact {
            address: address.to_string(),
            outcome: reconcile(
                address,
                self.client.peer_port(address),
                stats,
                version,
                Utc::now(),
            ),
        }
    }
}

/// Keeps one record per pubkey (the last one), in first-seen order.
fn dedupe_by_pubkey(nodes: Vec<NodeRecord>) -> Vec<NodeRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<NodeRecord> = Vec::with_capacity(nodes.len());

    for node in nodes {
        match index.get(&node.pubkey) {
            Some(&pos) => unique[pos] = node,
            None => {
                index.insert(node.pubkey.clone(), unique.len());
                unique.push(node);
            }
        }
    }

    unique
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
