use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::engine::queue::enqueue_order;
use crate::engine::scoring::{best_candidate, is_eligible, Candidate};
use crate::error::AppError;
use crate::models::rider::Rider;
use crate::session;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Assigned { rider_id: u64 },
    /// Cancelled, already assigned, or gone by the time it was dequeued.
    Skipped,
}

pub async fn run_assignment_engine(state: Arc<AppState>, mut order_rx: mpsc::Receiver<u64>) {
    info!("assignment engine started");

    while let Some(order_id) = order_rx.recv().await {
        state.metrics.orders_awaiting_rider.dec();

        let start = Instant::now();
        let outcome = match process_order(&state, order_id).await {
            Ok(Processed::Assigned { .. }) => "success",
            Ok(Processed::Skipped) => "skipped",
            Err(AppError::NoAvailableRiders) => {
                warn!(order_id, "no eligible riders; re-queueing order");
                schedule_retry(&state, order_id);
                "retry"
            }
            Err(err) => {
                error!(order_id, error = %err, "failed to assign order");
                "error"
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        state
            .metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed);
        state
            .metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();
    }

    warn!("assignment engine stopped: queue channel closed");
}

/// Re-queues off the engine task so one stuck order does not stall the rest.
fn schedule_retry(state: &Arc<AppState>, order_id: u64) {
    let state = state.clone();
    tokio::spawn(async move {
        sleep(state.config.assignment_retry).await;
        if let Err(err) = enqueue_order(&state, order_id).await {
            error!(order_id, error = %err, "failed to re-queue order");
        }
    });
}

pub async fn process_order(state: &Arc<AppState>, order_id: u64) -> Result<Processed, AppError> {
    let Some(order) = state.orders.get(&order_id).map(|entry| entry.clone()) else {
        return Ok(Processed::Skipped);
    };
    if order.status.is_terminal() || order.assigned_rider_id.is_some() {
        return Ok(Processed::Skipped);
    }

    let shop_point = state
        .shops
        .get(&order.shop_id)
        .and_then(|shop| shop.location.point());

    let riders: Vec<Rider> = state
        .riders
        .iter()
        .filter(|entry| is_eligible(entry.value(), order.shop_id))
        .map(|entry| entry.value().clone())
        .collect();

    let candidates: Vec<Candidate> = riders
        .iter()
        .map(|rider| Candidate::from_rider(rider, state.active_order_count(rider.id), shop_point.as_ref()))
        .collect();

    let winner = best_candidate(&candidates).ok_or(AppError::NoAvailableRiders)?;

    match session::assign_order(state, winner.rider_id, order_id).await {
        Ok(assignment) => {
            info!(
                order_id,
                rider_id = assignment.rider_id,
                active_orders = assignment.active_orders,
                rating = assignment.rating,
                "rider selected"
            );
            Ok(Processed::Assigned {
                rider_id: assignment.rider_id,
            })
        }
        // Assigned manually or cancelled while we were choosing.
        Err(AppError::Conflict(_)) => Ok(Processed::Skipped),
        Err(AppError::Precondition(msg)) if state.orders.get(&order_id).is_some_and(|o| o.status.is_terminal()) => {
            info!(order_id, reason = %msg, "order closed before assignment");
            Ok(Processed::Skipped)
        }
        Err(err) => Err(err),
    }
}
