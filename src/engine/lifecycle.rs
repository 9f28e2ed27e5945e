use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::engine::queue::enqueue_order;
use crate::engine::state_machine::{self, OrderCommand, Outcome, TransitionError};
use crate::error::AppError;
use crate::models::order::{Order, OrderEvent, OrderStatus};
use crate::session;
use crate::state::AppState;
use crate::tracking::poller;

/// Applies a command to a stored order and runs the follow-up work for the
/// state it entered. This is the only writer of `Order::status`.
pub async fn transition(
    state: &Arc<AppState>,
    order_id: u64,
    command: OrderCommand,
) -> Result<(Order, Outcome), AppError> {
    let action = command.action();

    let (order, outcome) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        match state_machine::apply(&mut order, &command, Utc::now()) {
            Ok(outcome) => (order.clone(), outcome),
            Err(err) => {
                if matches!(err, TransitionError::NoRiderAssigned { .. }) {
                    order.ready_requested = true;
                }
                state
                    .metrics
                    .order_transitions_total
                    .with_label_values(&[action, "rejected"])
                    .inc();
                warn!(order_id, action, error = %err, "order transition rejected");
                return Err(err.into());
            }
        }
    };

    let Outcome::Applied { from, to } = outcome else {
        state
            .metrics
            .order_transitions_total
            .with_label_values(&[action, "unchanged"])
            .inc();
        return Ok((order, outcome));
    };

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[action, "applied"])
        .inc();
    info!(order_id, %from, %to, rider_id = ?order.assigned_rider_id, "order transitioned");

    let _ = state.order_events_tx.send(OrderEvent {
        order_id,
        from,
        to,
        rider_id: order.assigned_rider_id,
        at: order.updated_at,
    });

    match to {
        OrderStatus::Preparing if order.assigned_rider_id.is_none() => {
            enqueue_order(state, order_id).await?;
        }
        OrderStatus::Shipped => poller::start_tracking(state, order_id),
        OrderStatus::Cancelled => {
            if let Some(rider_id) = order.assigned_rider_id {
                session::detach_order(state, rider_id, order_id);
            }
        }
        _ => {}
    }

    Ok((order, outcome))
}
