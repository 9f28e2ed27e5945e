//! Customer-facing tracking for shipped orders.
//!
//! One task per order polls on an interval and stops as soon as an order
//! event reports a terminal status.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::models::order::{OrderEvent, OrderStatus};
use crate::models::tracking::TrackingSnapshot;
use crate::state::AppState;
use crate::tracking::routing::RouteRequest;

/// Aborts the poller when dropped.
pub struct TrackingHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl TrackingHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Published,
    Failed,
    Finished,
}

/// Starts polling for the order unless a poller is already running.
pub fn start_tracking(state: &Arc<AppState>, order_id: u64) {
    match state.trackers.entry(order_id) {
        Entry::Occupied(current) if !current.get().is_finished() => {
            debug!(order_id, "tracking already running");
        }
        entry => {
            // Subscribe before spawning so a terminal event cannot slip past.
            let events = state.order_events_tx.subscribe();
            let generation = state.next_id();
            let task = tokio::spawn(run(state.clone(), order_id, generation, events));
            let handle = TrackingHandle { generation, task };

            match entry {
                Entry::Occupied(mut current) => {
                    current.insert(handle);
                }
                Entry::Vacant(slot) => {
                    slot.insert(handle);
                }
            }
            info!(order_id, "tracking started");
        }
    }
}

async fn run(
    state: Arc<AppState>,
    order_id: u64,
    generation: u64,
    mut events: broadcast::Receiver<OrderEvent>,
) {
    let mut ticker = interval(state.config.tracking_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.order_id == order_id && event.to.is_terminal() => {
                    debug!(order_id, status = %event.to, "order closed; stopping tracking");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(order_id, skipped, "tracking lagged behind order events");
                    if !is_shipped(&state, order_id) {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                if poll_once(&state, order_id).await == PollOutcome::Finished {
                    break;
                }
            }
        }
    }

    publish_final(&state, order_id);
    state
        .trackers
        .remove_if(&order_id, |_, handle| handle.generation == generation);
    info!(order_id, "tracking stopped");
}

fn is_shipped(state: &AppState, order_id: u64) -> bool {
    state
        .orders
        .get(&order_id)
        .is_some_and(|order| order.status == OrderStatus::Shipped)
}

async fn poll_once(state: &AppState, order_id: u64) -> PollOutcome {
    // Stamped at issuance so a slow response cannot overwrite a newer one.
    let captured_at = Utc::now();

    let Some((status, rider_id, address_id)) = state
        .orders
        .get(&order_id)
        .map(|order| (order.status, order.assigned_rider_id, order.customer_address_id))
    else {
        return PollOutcome::Finished;
    };
    if status != OrderStatus::Shipped {
        return PollOutcome::Finished;
    }

    let rider_position = rider_id
        .and_then(|rider_id| state.riders.get(&rider_id).and_then(|rider| rider.location));
    let destination = state
        .addresses
        .get(&address_id)
        .and_then(|address| address.coordinates().ok());

    let (eta_seconds, distance_km) = match rider_position.zip(destination) {
        Some((from, to)) => {
            let request = RouteRequest::direct(from, to);
            match timeout(state.config.external_call_timeout, state.routing.route(&request)).await {
                Ok(Ok(route)) => (
                    Some(route.total_duration_seconds()),
                    Some(route.total_distance_km()),
                ),
                Ok(Err(err)) => {
                    warn!(order_id, error = %err, "tracking poll failed; keeping previous snapshot");
                    record_poll(state, "error");
                    return PollOutcome::Failed;
                }
                Err(_) => {
                    warn!(order_id, "tracking poll timed out; keeping previous snapshot");
                    record_poll(state, "timeout");
                    return PollOutcome::Failed;
                }
            }
        }
        None => (None, None),
    };

    if !is_shipped(state, order_id) {
        return PollOutcome::Finished;
    }

    let accepted = state.snapshots.publish(TrackingSnapshot {
        order_id,
        rider_position,
        status,
        eta_seconds,
        distance_km,
        captured_at,
    });
    record_poll(state, if accepted { "success" } else { "stale" });
    PollOutcome::Published
}

fn publish_final(state: &AppState, order_id: u64) {
    let Some((status, rider_id)) = state
        .orders
        .get(&order_id)
        .map(|order| (order.status, order.assigned_rider_id))
    else {
        return;
    };
    if !status.is_terminal() {
        return;
    }

    let rider_position = rider_id
        .and_then(|rider_id| state.riders.get(&rider_id).and_then(|rider| rider.location));
    let arrived = (status == OrderStatus::Delivered).then_some(0.0);

    state.snapshots.publish(TrackingSnapshot {
        order_id,
        rider_position,
        status,
        eta_seconds: arrived,
        distance_km: arrived,
        captured_at: Utc::now(),
    });
}

fn record_poll(state: &AppState, outcome: &str) {
    state
        .metrics
        .tracking_polls_total
        .with_label_values(&[outcome])
        .inc();
}
