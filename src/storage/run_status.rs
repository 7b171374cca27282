use chrono::{DateTime, Utc};

use super::models::{RunState, RunStatusUpdate};
use super::{StateStore, StoreError};

/// Writes the run-status transitions of one sync run.
///
/// The row itself is capped at one by the store (`CHECK (id = 1)`), so the
/// recorder only has to pick which fields each transition touches.
pub struct RunStatusRecorder<'a, S: StateStore + ?Sized> {
    store: &'a S,
    run_id: String,
}

impl<'a, S: StateStore + ?Sized> RunStatusRecorder<'a, S> {
    pub fn new(store: &'a S, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    pub fn running(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.set_run_status(&RunStatusUpdate {
            status: RunState::Running,
            last_run_at: at,
            last_run_duration_ms: None,
            nodes_count: None,
            error_message: None,
            run_id: Some(self.run_id.clone()),
        })
    }

    pub fn succeeded(
        &self,
        at: DateTime<Utc>,
        duration_ms: u64,
        nodes_count: usize,
    ) -> Result<(), StoreError> {
        self.store.set_run_status(&RunStatusUpdate {
            status: RunState::Success,
            last_run_at: at,
            last_run_duration_ms: Some(duration_ms),
            nodes_count: Some(nodes_count),
            error_message: None,
            run_id: Some(self.run_id.clone()),
        })
    }

    pub fn failed(
        &self,
        at: DateTime<Utc>,
        duration_ms: u64,
        message: &str,
    ) -> Result<(), StoreError> {
        self.store.set_run_status(&RunStatusUpdate {
            status: RunState::Error,
            last_run_at: at,
            last_run_duration_ms: Some(duration_ms),
            nodes_count: None,
            error_message: Some(message.to_string()),
            run_id: Some(self.run_id.clone()),
        })
    }
}
