use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::tracking::TrackingSnapshot;

/// Newest tracking snapshot per order. Responses can arrive out of order,
/// so a snapshot older than the one on the board is dropped.
pub struct SnapshotBoard {
    latest: DashMap<u64, TrackingSnapshot>,
    events_tx: broadcast::Sender<TrackingSnapshot>,
}

impl SnapshotBoard {
    pub fn new(buffer: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self {
            latest: DashMap::new(),
            events_tx,
        }
    }

    /// Returns whether the snapshot was accepted.
    pub fn publish(&self, snapshot: TrackingSnapshot) -> bool {
        match self.latest.entry(snapshot.order_id) {
            Entry::Occupied(mut current) => {
                if current.get().captured_at > snapshot.captured_at {
                    debug!(order_id = snapshot.order_id, "discarding stale tracking snapshot");
                    return false;
                }
                current.insert(snapshot.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot.clone());
            }
        }

        let _ = self.events_tx.send(snapshot);
        true
    }

    pub fn latest(&self, order_id: u64) -> Option<TrackingSnapshot> {
        self.latest.get(&order_id).map(|entry| entry.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingSnapshot> {
        self.events_tx.subscribe()
    }
}
