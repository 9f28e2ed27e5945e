use serde::{Deserialize, Serialize};

use crate::error::AppError;

const EARTH_RADIUS_KM: f64 = 6_371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, AppError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(AppError::BadRequest(
                "coordinates must be finite numbers".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::BadRequest(format!(
                "coordinates out of range: {lat},{lng}"
            )));
        }

        Ok(Self { lat, lng })
    }
}

/// Great-circle distance in kilometers. Callers validate finiteness first.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Parses the `"lat,lng"` form stored on addresses.
pub fn parse_geo_location(raw: &str) -> Result<GeoPoint, AppError> {
    let mut parts = raw.split(',');
    let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::BadRequest(format!(
            "geo location must look like \"lat,lng\", got {raw:?}"
        )));
    };

    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|err| AppError::BadRequest(format!("invalid latitude {lat:?}: {err}")))?;
    let lng = lng
        .trim()
        .parse::<f64>()
        .map_err(|err| AppError::BadRequest(format!("invalid longitude {lng:?}: {err}")))?;

    GeoPoint::new(lat, lng)
}
