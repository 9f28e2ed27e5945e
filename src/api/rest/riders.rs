use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::assignment::Assignment;
use crate::models::order::Order;
use crate::models::rider::{Rider, RiderView};
use crate::models::tracking::RoutePlan;
use crate::session::{self, Completion, RiderSession};
use crate::state::AppState;
use crate::tracking::location_sync::{self, LocationSync, StateLocationSink};
use crate::tracking::planner;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/riders", post(create_rider).get(list_riders))
        .route("/riders/:id/online", patch(toggle_online))
        .route("/riders/:id/verification", patch(update_verification))
        .route("/riders/:id/location", patch(update_location))
        .route("/riders/:id/location/ws", get(location_stream))
        .route("/riders/:id/assign", post(assign_order))
        .route("/riders/:id/session", get(get_session))
        .route("/riders/:id/session/start", post(start_session))
        .route("/riders/:id/session/complete", post(complete_order))
        .route("/riders/:id/orders/:order_id/pickup", post(pick_up_order))
        .route("/riders/:id/orders/:order_id/cancel", post(cancel_order))
        .route("/riders/:id/route", get(get_route))
}

#[derive(Deserialize)]
pub struct CreateRiderRequest {
    pub shop_id: u64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default = "default_rating")]
    pub rating: f64,
}

fn default_rating() -> f64 {
    5.0
}

#[derive(Deserialize)]
pub struct UpdateVerificationRequest {
    pub is_verified: bool,
}

#[derive(Deserialize)]
pub struct AssignOrderRequest {
    pub order_id: u64,
}

#[derive(Deserialize)]
pub struct CompleteOrderRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

async fn create_rider(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRiderRequest>,
) -> Result<Json<Rider>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::BadRequest("phone cannot be empty".to_string()));
    }
    if !state.shops.contains_key(&payload.shop_id) {
        return Err(AppError::NotFound(format!("shop {} not found", payload.shop_id)));
    }
    let location = payload
        .location
        .map(|point| GeoPoint::new(point.lat, point.lng))
        .transpose()?;

    let now = Utc::now();
    let rider = Rider {
        id: state.next_id(),
        shop_id: payload.shop_id,
        name: payload.name,
        phone: payload.phone,
        is_available: false,
        is_verified: payload.is_verified,
        location,
        location_updated_at: location.map(|_| now),
        total_deliveries: 0,
        rating: payload.rating.clamp(0.0, 5.0),
        updated_at: now,
    };

    state.riders.insert(rider.id, rider.clone());
    info!(rider_id = rider.id, shop_id = rider.shop_id, "rider registered");
    Ok(Json(rider))
}

async fn list_riders(State(state): State<Arc<AppState>>) -> Json<Vec<RiderView>> {
    let riders: Vec<Rider> = state
        .riders
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    let mut views: Vec<RiderView> = riders
        .into_iter()
        .map(|rider| RiderView {
            active_orders: state.active_order_count(rider.id),
            rider,
        })
        .collect();
    views.sort_by_key(|view| view.rider.id);

    Json(views)
}

async fn toggle_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<RiderSession>, AppError> {
    Ok(Json(session::toggle_online(&state, id)?))
}

async fn update_verification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<UpdateVerificationRequest>,
) -> Result<Json<Rider>, AppError> {
    let mut rider = state
        .riders
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("rider {} not found", id)))?;

    rider.is_verified = payload.is_verified;
    rider.updated_at = Utc::now();

    Ok(Json(rider.clone()))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<GeoPoint>,
) -> Result<Json<Rider>, AppError> {
    session::record_location(&state, id, payload)?;

    let rider = state
        .riders
        .get(&id)
        .map(|entry| entry.clone())
        .ok_or_else(|| AppError::NotFound(format!("rider {} not found", id)))?;
    Ok(Json(rider))
}

/// Device position feed: each text frame is `{"lat":..,"lng":..}`, or
/// `null` when the device has no fix. Samples are synced on the configured
/// interval while the socket stays open and the rider stays online.
async fn location_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let online = state
        .riders
        .get(&id)
        .map(|rider| rider.is_available)
        .ok_or_else(|| AppError::NotFound(format!("rider {} not found", id)))?;
    if !online {
        return Err(AppError::Precondition(format!(
            "rider {} must be online to share location",
            id
        )));
    }

    Ok(ws.on_upgrade(move |socket| sync_locations(socket, state, id)))
}

async fn sync_locations(socket: WebSocket, state: Arc<AppState>, rider_id: u64) {
    let (_sender, receiver) = socket.split();

    let samples = receiver
        .take_while(|message| futures::future::ready(message.is_ok()))
        .filter_map(|message| {
            futures::future::ready(match message {
                Ok(Message::Text(text)) => Some(parse_sample(&text)),
                _ => None,
            })
        })
        .boxed();

    info!(rider_id, "rider location feed connected");

    let mut handle = LocationSync::new(
        rider_id,
        Arc::new(StateLocationSink::new(state.clone())),
        state.config.location_sync_interval,
    )
    .with_failure_counter(state.metrics.location_sync_failures_total.clone())
    .spawn(samples);
    let generation = location_sync::register(&state, rider_id, &handle);

    handle.wait().await;
    location_sync::unregister(&state, rider_id, generation);
    info!(rider_id, "rider location feed disconnected");
}

fn parse_sample(text: &str) -> Option<GeoPoint> {
    match serde_json::from_str::<Option<GeoPoint>>(text) {
        Ok(sample) => sample,
        Err(err) => {
            debug!(error = %err, "ignoring malformed location frame");
            None
        }
    }
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<AssignOrderRequest>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(session::assign_order(&state, id, payload.order_id).await?))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<RiderSession>, AppError> {
    Ok(Json(session::snapshot(&state, id)?))
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<RiderSession>, AppError> {
    Ok(Json(session::start_session(&state, id)?))
}

async fn complete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<CompleteOrderRequest>,
) -> Result<Json<Completion>, AppError> {
    Ok(Json(
        session::complete_current_order(&state, id, payload.code.trim()).await?,
    ))
}

async fn pick_up_order(
    State(state): State<Arc<AppState>>,
    Path((id, order_id)): Path<(u64, u64)>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(session::mark_picked_up(&state, id, order_id).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path((id, order_id)): Path<(u64, u64)>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        session::cancel_order(&state, id, order_id, &payload.reason).await?,
    ))
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<RoutePlan>, AppError> {
    planner::refresh_route(&state, id, false)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("rider {} has no route to show", id)))
}
