//! Driving routes from an external provider.
//!
//! The core only decides origin, waypoints and destination. Ordering the
//! waypoints is left to the provider when `optimize` is set.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::tracking::RouteLeg;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub origin: GeoPoint,
    pub waypoints: Vec<GeoPoint>,
    pub destination: GeoPoint,
    pub optimize: bool,
}

impl RouteRequest {
    pub fn direct(origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            origin,
            waypoints: Vec::new(),
            destination,
            optimize: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderRoute {
    pub legs: Vec<RouteLeg>,
    pub polyline: Option<String>,
    /// Visiting order of `RouteRequest::waypoints`, by index.
    pub waypoint_order: Vec<usize>,
}

impl ProviderRoute {
    pub fn total_distance_km(&self) -> f64 {
        self.legs.iter().map(|leg| leg.distance_km).sum()
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.legs.iter().map(|leg| leg.duration_seconds).sum()
    }
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(&self, request: &RouteRequest) -> Result<ProviderRoute, AppError>;
}

/// Great-circle legs at an assumed average speed. Used when no routing
/// service is configured.
#[derive(Debug, Clone)]
pub struct StraightLineRoutingProvider {
    speed_kmh: f64,
}

impl StraightLineRoutingProvider {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    fn leg(&self, from: &GeoPoint, to: &GeoPoint) -> RouteLeg {
        let distance_km = haversine_km(from, to);
        RouteLeg {
            distance_km,
            duration_seconds: distance_km / self.speed_kmh * 3600.0,
        }
    }
}

#[async_trait]
impl RoutingProvider for StraightLineRoutingProvider {
    async fn route(&self, request: &RouteRequest) -> Result<ProviderRoute, AppError> {
        let points: Vec<&GeoPoint> = std::iter::once(&request.origin)
            .chain(request.waypoints.iter())
            .chain(std::iter::once(&request.destination))
            .collect();

        let legs = points
            .windows(2)
            .map(|pair| self.leg(pair[0], pair[1]))
            .collect();

        Ok(ProviderRoute {
            legs,
            polyline: None,
            waypoint_order: (0..request.waypoints.len()).collect(),
        })
    }
}

/// OSRM HTTP API: `route` for fixed order, `trip` when waypoints may be
/// reordered.
pub struct OsrmRoutingProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    legs: Vec<OsrmLeg>,
    geometry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmTripWaypoint {
    waypoint_index: usize,
}

#[derive(Debug, Deserialize)]
struct OsrmTripResponse {
    code: String,
    #[serde(default)]
    trips: Vec<OsrmRoute>,
    #[serde(default)]
    waypoints: Vec<OsrmTripWaypoint>,
    message: Option<String>,
}

impl OsrmRoutingProvider {
    pub fn new(base_url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn coordinates(request: &RouteRequest) -> String {
        std::iter::once(&request.origin)
            .chain(request.waypoints.iter())
            .chain(std::iter::once(&request.destination))
            .map(|point| format!("{},{}", point.lng, point.lat))
            .collect::<Vec<_>>()
            .join(";")
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("routing request failed: {err}")))?
            .error_for_status()
            .map_err(|err| AppError::Upstream(format!("routing service error: {err}")))?
            .json::<T>()
            .await
            .map_err(|err| AppError::Upstream(format!("invalid routing response: {err}")))
    }

    async fn fixed_order(&self, request: &RouteRequest) -> Result<ProviderRoute, AppError> {
        let url = format!(
            "{}/route/v1/driving/{}?overview=full&geometries=polyline",
            self.base_url,
            Self::coordinates(request)
        );
        let body: OsrmRouteResponse = self.get(&url).await?;
        if body.code != "Ok" {
            return Err(AppError::Upstream(format!(
                "routing failed with {}: {}",
                body.code,
                body.message.unwrap_or_default()
            )));
        }

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Upstream("routing returned no routes".to_string()))?;

        Ok(ProviderRoute {
            legs: convert_legs(route.legs),
            polyline: route.geometry,
            waypoint_order: (0..request.waypoints.len()).collect(),
        })
    }

    async fn optimized(&self, request: &RouteRequest) -> Result<ProviderRoute, AppError> {
        let url = format!(
            "{}/trip/v1/driving/{}?source=first&destination=last&roundtrip=false&overview=full&geometries=polyline",
            self.base_url,
            Self::coordinates(request)
        );
        let body: OsrmTripResponse = self.get(&url).await?;
        if body.code != "Ok" {
            return Err(AppError::Upstream(format!(
                "trip planning failed with {}: {}",
                body.code,
                body.message.unwrap_or_default()
            )));
        }

        let trip = body
            .trips
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Upstream("trip planning returned no trips".to_string()))?;

        Ok(ProviderRoute {
            legs: convert_legs(trip.legs),
            polyline: trip.geometry,
            waypoint_order: waypoint_order(&body.waypoints, request.waypoints.len())?,
        })
    }
}

#[async_trait]
impl RoutingProvider for OsrmRoutingProvider {
    async fn route(&self, request: &RouteRequest) -> Result<ProviderRoute, AppError> {
        if request.optimize && request.waypoints.len() > 1 {
            self.optimized(request).await
        } else {
            self.fixed_order(request).await
        }
    }
}

fn convert_legs(legs: Vec<OsrmLeg>) -> Vec<RouteLeg> {
    legs.into_iter()
        .map(|leg| RouteLeg {
            distance_km: leg.distance / 1000.0,
            duration_seconds: leg.duration,
        })
        .collect()
}

/// Input coordinate `i` sits at trip position `waypoints[i].waypoint_index`;
/// origin is input 0, so waypoint `j` is input `j + 1`.
fn waypoint_order(trip_waypoints: &[OsrmTripWaypoint], count: usize) -> Result<Vec<usize>, AppError> {
    if trip_waypoints.len() != count + 2 {
        return Err(AppError::Upstream(format!(
            "trip returned {} waypoints for {} coordinates",
            trip_waypoints.len(),
            count + 2
        )));
    }

    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|j| trip_waypoints[j + 1].waypoint_index);
    Ok(order)
}
