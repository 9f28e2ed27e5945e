//! Multi-stop routes for a rider's queue.
//!
//! One stop is routed directly. With several, every stop but the last is a
//! waypoint the provider may reorder and the last is the destination. A
//! cached plan is reused until the rider moves past the threshold or the
//! queue changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::tracking::{RoutePlan, RouteStop, Viewport};
use crate::session;
use crate::state::AppState;
use crate::tracking::routing::{RouteRequest, RoutingProvider};

/// Smallest half-extent of a viewport, in degrees (roughly 100 m).
const MIN_VIEWPORT_PADDING_DEG: f64 = 0.001;
const VIEWPORT_PADDING_RATIO: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct CachedRoute {
    pub plan: RoutePlan,
    /// Queue the plan was computed for, in queue order.
    pub route_orders: Vec<u64>,
}

pub fn build_route_request(origin: GeoPoint, stops: &[RouteStop]) -> Option<RouteRequest> {
    let (last, waypoints) = stops.split_last()?;

    Some(RouteRequest {
        origin,
        waypoints: waypoints.iter().map(|stop| stop.point).collect(),
        destination: last.point,
        optimize: !waypoints.is_empty(),
    })
}

pub fn fit_viewport(rider: GeoPoint, destination: GeoPoint) -> Viewport {
    let lat_pad = ((rider.lat - destination.lat).abs() * VIEWPORT_PADDING_RATIO)
        .max(MIN_VIEWPORT_PADDING_DEG);
    let lng_pad = ((rider.lng - destination.lng).abs() * VIEWPORT_PADDING_RATIO)
        .max(MIN_VIEWPORT_PADDING_DEG);

    Viewport {
        south_west: GeoPoint {
            lat: (rider.lat.min(destination.lat) - lat_pad).max(-90.0),
            lng: (rider.lng.min(destination.lng) - lng_pad).max(-180.0),
        },
        north_east: GeoPoint {
            lat: (rider.lat.max(destination.lat) + lat_pad).min(90.0),
            lng: (rider.lng.max(destination.lng) + lng_pad).min(180.0),
        },
    }
}

pub fn needs_recompute(
    cached: Option<&CachedRoute>,
    origin: &GeoPoint,
    route_orders: &[u64],
    threshold_m: f64,
) -> bool {
    let Some(cached) = cached else {
        return true;
    };

    cached.route_orders != route_orders
        || haversine_km(&cached.plan.origin, origin) * 1000.0 > threshold_m
}

/// Delivery points for the given orders; orders whose address has no usable
/// geo location are left out.
pub fn order_stops(state: &AppState, order_ids: &[u64]) -> Vec<RouteStop> {
    order_ids
        .iter()
        .filter_map(|&order_id| {
            let address_id = state.orders.get(&order_id)?.customer_address_id;
            let point = state.addresses.get(&address_id)?.coordinates();
            match point {
                Ok(point) => Some(RouteStop { order_id, point }),
                Err(err) => {
                    warn!(order_id, error = %err, "order left out of route");
                    None
                }
            }
        })
        .collect()
}

pub async fn plan_route(
    provider: &dyn RoutingProvider,
    rider_id: u64,
    origin: GeoPoint,
    stops: &[RouteStop],
    active_order: Option<u64>,
    timeout: Duration,
) -> Result<RoutePlan, AppError> {
    let computed_at = Utc::now();
    let request = build_route_request(origin, stops)
        .ok_or_else(|| AppError::BadRequest("a route needs at least one stop".to_string()))?;

    let route = tokio::time::timeout(timeout, provider.route(&request))
        .await
        .map_err(|_| AppError::Timeout(format!("route computation for rider {rider_id} timed out")))??;

    let Some((last, waypoints)) = stops.split_last() else {
        return Err(AppError::BadRequest("a route needs at least one stop".to_string()));
    };

    let mut ordered: Vec<RouteStop> = route
        .waypoint_order
        .iter()
        .filter_map(|&index| waypoints.get(index).cloned())
        .collect();
    if ordered.len() != waypoints.len() {
        warn!(rider_id, "routing provider returned an inconsistent waypoint order; keeping queue order");
        ordered = waypoints.to_vec();
    }
    ordered.push(last.clone());

    let active_point = stops
        .iter()
        .find(|stop| Some(stop.order_id) == active_order)
        .unwrap_or(&ordered[0])
        .point;

    Ok(RoutePlan {
        rider_id,
        origin,
        stops: ordered,
        total_distance_km: route.total_distance_km(),
        total_duration_seconds: route.total_duration_seconds(),
        legs: route.legs,
        polyline: route.polyline,
        viewport: fit_viewport(origin, active_point),
        computed_at,
    })
}

/// Returns the rider's current plan, recomputing it when stale.
pub async fn refresh_route(
    state: &Arc<AppState>,
    rider_id: u64,
    force: bool,
) -> Result<Option<RoutePlan>, AppError> {
    let session = session::snapshot(state, rider_id)?;
    let route_orders = session.route_orders().to_vec();

    if route_orders.is_empty() {
        state.routes.remove(&rider_id);
        return Ok(None);
    }

    let Some(origin) = state.riders.get(&rider_id).and_then(|rider| rider.location) else {
        debug!(rider_id, "rider position unknown; route not computed");
        return Ok(state.routes.get(&rider_id).map(|cached| cached.plan.clone()));
    };

    let cached = state.routes.get(&rider_id).map(|entry| entry.clone());
    if !force
        && !needs_recompute(
            cached.as_ref(),
            &origin,
            &route_orders,
            state.config.route_recompute_threshold_m,
        )
    {
        return Ok(cached.map(|cached| cached.plan));
    }

    let stops = order_stops(state, &route_orders);
    if stops.is_empty() {
        return Ok(None);
    }

    let result = plan_route(
        state.routing.as_ref(),
        rider_id,
        origin,
        &stops,
        session.active_order(),
        state.config.external_call_timeout,
    )
    .await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .route_computations_total
        .with_label_values(&[outcome])
        .inc();

    let plan = result?;
    let newer = state
        .routes
        .get(&rider_id)
        .is_none_or(|current| current.plan.computed_at <= plan.computed_at);
    if newer {
        state.routes.insert(
            rider_id,
            CachedRoute {
                plan: plan.clone(),
                route_orders,
            },
        );
    }

    Ok(Some(plan))
}

/// Recomputes in the background; failures keep the previous plan.
pub fn schedule_refresh(state: &Arc<AppState>, rider_id: u64) {
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = refresh_route(&state, rider_id, false).await {
            warn!(rider_id, error = %err, "route recomputation failed");
        }
    });
}
