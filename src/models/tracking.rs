use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::models::order::OrderStatus;

/// Point-in-time projection of a delivery for the customer view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub order_id: u64,
    pub rider_position: Option<GeoPoint>,
    pub status: OrderStatus,
    pub eta_seconds: Option<f64>,
    pub distance_km: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_seconds: f64,
}

/// Axis-aligned box that contains the rider and the active destination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub order_id: u64,
    pub point: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePlan {
    pub rider_id: u64,
    pub origin: GeoPoint,
    /// Stops in travel order, after any provider reordering.
    pub stops: Vec<RouteStop>,
    pub legs: Vec<RouteLeg>,
    pub total_distance_km: f64,
    pub total_duration_seconds: f64,
    pub polyline: Option<String>,
    pub viewport: Viewport,
    pub computed_at: DateTime<Utc>,
}
