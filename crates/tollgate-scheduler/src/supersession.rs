//! Run supersession by concurrency group.
//!
//! Each run registers under a group (by default its branch). When a newer
//! run starts in the same group and `cancel_in_progress` is set, the older
//! run's cancellation handle fires.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tollgate_core::ids::RunId;
use tollgate_core::ports::{CancelHandle, CancelSignal, cancel_pair};
use tracing::info;

#[derive(Default)]
pub struct SupersessionRegistry {
    active: RwLock<HashMap<String, (RunId, CancelHandle)>>,
}

impl SupersessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run in `group`.
    pub async fn begin(&self, group: &str, cancel_in_progress: bool) -> (RunId, CancelSignal) {
        let run_id = RunId::new();
        let (handle, signal) = cancel_pair();

        let mut active = self.active.write().await;
        if let Some((previous, previous_handle)) = active.remove(group) {
            if cancel_in_progress {
                info!(group = %group, superseded = %previous, by = %run_id, "Cancelling superseded run");
                previous_handle.cancel();
            }
        }
        active.insert(group.to_string(), (run_id, handle));

        (run_id, signal)
    }

    /// Unregister a run once it has finished. A newer run in the same group
    /// is left untouched.
    pub async fn finish(&self, group: &str, run_id: RunId) {
        let mut active = self.active.write().await;
        if active.get(group).is_some_and(|(id, _)| *id == run_id) {
            active.remove(group);
        }
    }

    /// Cancel the in-flight run of a group, if any.
    pub async fn cancel(&self, group: &str) -> bool {
        match self.active.read().await.get(group) {
            Some((run_id, handle)) => {
                info!(group = %group, run = %run_id, "Cancelling run");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn in_flight(&self, group: &str) -> Option<RunId> {
        self.active.read().await.get(group).map(|(id, _)| *id)
    }
}
