use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::eligibility::{evaluate_cart, CartEligibility, CartLine};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/checkout/eligibility", post(check_eligibility))
}

#[derive(Deserialize)]
pub struct EligibilityRequest {
    pub address_id: u64,
    pub items: Vec<CartLine>,
}

async fn check_eligibility(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EligibilityRequest>,
) -> Result<Json<CartEligibility>, AppError> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest("cart has no items".to_string()));
    }

    let address = state
        .addresses
        .get(&payload.address_id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("address {} not found", payload.address_id)))?;

    let result = evaluate_cart(&address, &payload.items, |shop_id| {
        state.shops.get(&shop_id).map(|entry| entry.clone())
    });

    Ok(Json(result))
}
