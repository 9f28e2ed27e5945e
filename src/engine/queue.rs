use crate::error::AppError;
use crate::state::AppState;

/// Hands an order to the assignment engine.
pub async fn enqueue_order(state: &AppState, order_id: u64) -> Result<(), AppError> {
    state
        .assignment_tx
        .send(order_id)
        .await
        .map_err(|err| AppError::Internal(format!("assignment queue send failed: {err}")))?;

    state.metrics.orders_awaiting_rider.inc();
    Ok(())
}
