use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::engine::eligibility;
use crate::engine::lifecycle;
use crate::engine::state_machine::OrderCommand;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{CancelledBy, Order, OrderStatus, PaymentMethod};
use crate::models::tracking::TrackingSnapshot;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/confirm", post(confirm_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/ready", post(mark_ready))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/tracking", get(get_tracking))
        .route("/assignments", get(list_assignments))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub shop_id: u64,
    pub customer_address_id: u64,
    pub total_amount: f64,
    pub total_products: u32,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Doorstep code issued by checkout, when codes are checked in process.
    #[serde(default)]
    pub delivery_code: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub by: CancelledBy,
    pub reason: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.total_products == 0 {
        return Err(AppError::BadRequest("total_products must be > 0".to_string()));
    }
    if !payload.total_amount.is_finite() || payload.total_amount < 0.0 {
        return Err(AppError::BadRequest("total_amount must be >= 0".to_string()));
    }

    let shop = state
        .shops
        .get(&payload.shop_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("shop {} not found", payload.shop_id)))?;
    let address = state
        .addresses
        .get(&payload.customer_address_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| {
            AppError::NotFound(format!("address {} not found", payload.customer_address_id))
        })?;

    let check = eligibility::evaluate(&address, &shop);
    if !check.eligible {
        return Err(AppError::BadRequest(check.reason.unwrap_or_else(|| {
            "address is outside the delivery area".to_string()
        })));
    }

    let now = Utc::now();
    let order = Order {
        id: state.next_id(),
        shop_id: shop.id,
        customer_address_id: address.id,
        status: OrderStatus::Pending,
        total_amount: payload.total_amount,
        total_products: payload.total_products,
        assigned_rider_id: None,
        payment_method: payload.payment_method,
        cancel_by: None,
        cancel_reason: None,
        ready_requested: false,
        created_at: now,
        updated_at: now,
    };

    if let Some(code) = payload.delivery_code.as_deref() {
        state.otp.record_issued_code(order.id, code)?;
    }

    state.orders.insert(order.id, order.clone());
    tracing::info!(order_id = order.id, shop_id = order.shop_id, "order placed");

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order.value().clone()))
}

async fn run(state: &Arc<AppState>, id: u64, command: OrderCommand) -> Result<Json<Order>, AppError> {
    let (order, _) = lifecycle::transition(state, id, command).await?;
    Ok(Json(order))
}

async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    run(&state, id, OrderCommand::Confirm).await
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    run(&state, id, OrderCommand::Accept).await
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Option<Json<RejectRequest>>,
) -> Result<Json<Order>, AppError> {
    let reason = payload.and_then(|Json(payload)| payload.reason);
    run(&state, id, OrderCommand::Reject { reason }).await
}

async fn mark_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    run(&state, id, OrderCommand::MarkReady).await
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    run(
        &state,
        id,
        OrderCommand::Cancel {
            by: payload.by,
            reason: payload.reason,
        },
    )
    .await
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    if !state.orders.contains_key(&id) {
        return Err(AppError::NotFound(format!("order {} not found", id)));
    }

    state
        .snapshots
        .latest(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no tracking data for order {} yet", id)))
}

async fn list_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<Assignment>> {
    let mut assignments: Vec<Assignment> = state
        .assignments
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    assignments.sort_by_key(|assignment| assignment.assigned_at);

    Json(assignments)
}
