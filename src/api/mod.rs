//! HTTP + WebSocket control surface.

pub mod routes;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cadence::{BatchHandle, CadenceController, StopSignal};

pub use routes::api_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<CadenceController>,
    /// Stop flags of batches that are still running.
    pub active: Arc<RwLock<HashMap<Uuid, StopSignal>>>,
}

impl AppState {
    pub fn new(controller: Arc<CadenceController>) -> Self {
        Self {
            controller,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Track a spawned batch until its task ends.
    pub async fn track(&self, batch: BatchHandle) -> Uuid {
        let batch_id = batch.batch_id;
        self.active.write().await.insert(batch_id, batch.stop);

        let active = Arc::clone(&self.active);
        let handle = batch.handle;
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                debug!(batch_id = %batch_id, error = %e, "Batch task ended abnormally");
            }
            active.write().await.remove(&batch_id);
        });
        batch_id
    }

    /// Raise the stop flag of one batch, or of every running batch.
    pub async fn stop(&self, batch_id: Option<Uuid>) -> Vec<Uuid> {
        let active = self.active.read().await;
        let stopped: Vec<Uuid> = active
            .iter()
            .filter(|(id, _)| batch_id.is_none_or(|wanted| wanted == **id))
            .map(|(id, stop)| {
                stop.stop();
                *id
            })
            .collect();
        if !stopped.is_empty() {
            info!(batches = ?stopped, "Stop requested");
        }
        stopped
    }

    pub async fn active_batches(&self) -> Vec<Uuid> {
        self.active.read().await.keys().copied().collect()
    }
}
