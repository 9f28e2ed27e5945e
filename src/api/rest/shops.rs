use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::address::Address;
use crate::models::shop::{DeliveryRateTier, Shop, ShopLocation};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shops", post(create_shop))
        .route("/shops/:id", get(get_shop))
        .route("/addresses", post(create_address))
        .route("/addresses/:id", get(get_address))
}

/// Shop record as stored upstream: coordinates may arrive as a `"lat,lng"`
/// string, as discrete fields, or not at all.
#[derive(Deserialize)]
pub struct CreateShopRequest {
    pub name: String,
    #[serde(default)]
    pub geo_location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub delivery_rates: Vec<DeliveryRateTier>,
}

#[derive(Deserialize)]
pub struct CreateAddressRequest {
    pub name: String,
    pub phone: String,
    pub line1: String,
    #[serde(default)]
    pub street: Option<String>,
    pub city: String,
    pub pin_code: String,
    #[serde(default)]
    pub geo_location: Option<String>,
}

async fn create_shop(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateShopRequest>,
) -> Result<Json<Shop>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if let Some(tier) = payload
        .delivery_rates
        .iter()
        .find(|tier| !(tier.km.is_finite() && tier.km >= 0.0 && tier.price.is_finite() && tier.price >= 0.0))
    {
        return Err(AppError::BadRequest(format!(
            "invalid delivery tier: {} km at {}",
            tier.km, tier.price
        )));
    }

    let location = ShopLocation::resolve(
        payload.geo_location.as_deref(),
        payload.latitude,
        payload.longitude,
    );

    let shop = Shop {
        id: state.next_id(),
        name: payload.name,
        location,
        delivery_rates: payload.delivery_rates,
    };

    if shop.location == ShopLocation::Unavailable {
        warn!(shop_id = shop.id, "shop saved without a usable location");
    }
    state.shops.insert(shop.id, shop.clone());
    info!(shop_id = shop.id, tiers = shop.delivery_rates.len(), "shop registered");

    Ok(Json(shop))
}

async fn get_shop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Shop>, AppError> {
    let shop = state
        .shops
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("shop {} not found", id)))?;

    Ok(Json(shop.value().clone()))
}

async fn create_address(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAddressRequest>,
) -> Result<Json<Address>, AppError> {
    for (field, value) in [
        ("name", &payload.name),
        ("phone", &payload.phone),
        ("line1", &payload.line1),
        ("city", &payload.city),
        ("pin_code", &payload.pin_code),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::BadRequest(format!("{field} cannot be empty")));
        }
    }

    // Saved even without geo; eligibility reports it later.
    let address = Address {
        id: state.next_id(),
        name: payload.name,
        phone: payload.phone,
        line1: payload.line1,
        street: payload.street,
        city: payload.city,
        pin_code: payload.pin_code,
        geo_location: payload.geo_location,
    };

    state.addresses.insert(address.id, address.clone());
    Ok(Json(address))
}

async fn get_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Address>, AppError> {
    let address = state
        .addresses
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("address {} not found", id)))?;

    Ok(Json(address.value().clone()))
}
