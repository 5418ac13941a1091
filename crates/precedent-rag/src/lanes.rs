//! Per-session execution lanes.
//!
//! Runs for the same session id queue behind one another; runs for different
//! ids never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct SessionLanes {
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `session_id`'s lane. Released on drop.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lane = self
            .lanes
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone();
        lane.lock_owned().await
    }

    /// Drop lanes nobody holds or waits on.
    pub fn prune(&self) {
        self.lanes.retain(|_, lane| Arc::strong_count(lane) > 1);
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}
