//! Debounced artifact saves.
//!
//! At most one pending save per artifact id. Scheduling again before the
//! timer fires replaces the pending one, so only the latest content is ever
//! sent. Saves for different ids are independent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use analyst_protocol::{ArtifactSyncStatus, ClientMessage};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::artifacts::ArtifactStore;
use crate::socket::SocketClient;

pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Where fired saves go
pub trait Outbound: Send + Sync + 'static {
    /// Returns false when the message could not be handed off
    fn send(&self, message: &ClientMessage) -> bool;
}

impl Outbound for SocketClient {
    fn send(&self, message: &ClientMessage) -> bool {
        SocketClient::send(self, message)
    }
}

struct PendingSave {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

pub struct SavePipeline {
    outbound: Arc<dyn Outbound>,
    debounce: Duration,
    pending: Arc<DashMap<String, PendingSave>>,
    next_generation: AtomicU64,
}

impl SavePipeline {
    pub fn new(outbound: Arc<dyn Outbound>, debounce: Duration) -> Self {
        Self {
            outbound,
            debounce,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Mark the artifact `saving` now and send `content` once the debounce
    /// window passes without another save for the same id.
    pub fn schedule_save(&self, artifacts: &mut ArtifactStore, id: &str, content: String) {
        artifacts.set_sync_status(id, ArtifactSyncStatus::Saving, None);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.pending.insert(
            id.to_string(),
            PendingSave {
                generation,
                handle: None,
            },
        );
        let coalesced = previous.is_some();
        if let Some(handle) = previous.and_then(|p| p.handle) {
            handle.abort();
        }

        debug!(
            component = "saves",
            event = "save.scheduled",
            artifact_id = %id,
            generation = generation,
            coalesced = coalesced,
            "Artifact save scheduled"
        );

        let pending = Arc::clone(&self.pending);
        let outbound = Arc::clone(&self.outbound);
        let debounce = self.debounce;
        let artifact_id = id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // A newer save for this id owns the slot
            if pending
                .remove_if(&artifact_id, |_, entry| entry.generation == generation)
                .is_none()
            {
                return;
            }
            let bytes = content.len();
            let sent = outbound.send(&ClientMessage::ArtifactEdit {
                id: artifact_id.clone(),
                content,
            });
            info!(
                component = "saves",
                event = "save.fired",
                artifact_id = %artifact_id,
                bytes = bytes,
                sent = sent,
                "Artifact save sent"
            );
        });

        match self.pending.get_mut(id) {
            Some(mut entry) if entry.generation == generation => entry.handle = Some(handle),
            // Already fired or replaced; the handle is not needed
            _ => {}
        }
    }

    /// Drop the pending save for one artifact. Returns whether one existed.
    pub fn cancel(&self, id: &str) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                if let Some(handle) = entry.handle {
                    handle.abort();
                }
                debug!(
                    component = "saves",
                    event = "save.cancelled",
                    artifact_id = %id,
                    "Pending save cancelled"
                );
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for SavePipeline {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
