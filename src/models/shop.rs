use serde::{Deserialize, Serialize};

use crate::geo::{parse_geo_location, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRateTier {
    pub km: f64,
    pub price: f64,
}

/// Shop coordinates, resolved once when the record enters the service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShopLocation {
    Resolved { point: GeoPoint },
    Unavailable,
}

impl ShopLocation {
    /// Prefers the `"lat,lng"` string and falls back to discrete fields.
    pub fn resolve(geo_location: Option<&str>, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        if let Some(point) = geo_location.and_then(|raw| parse_geo_location(raw).ok()) {
            return ShopLocation::Resolved { point };
        }

        match (latitude, longitude) {
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng)
                .map(|point| ShopLocation::Resolved { point })
                .unwrap_or(ShopLocation::Unavailable),
            _ => ShopLocation::Unavailable,
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        match self {
            ShopLocation::Resolved { point } => Some(*point),
            ShopLocation::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: u64,
    pub name: String,
    pub location: ShopLocation,
    pub delivery_rates: Vec<DeliveryRateTier>,
}

#[cfg(test)]
mod tests {
    use super::ShopLocation;

    #[test]
    fn geo_string_wins_over_discrete_fields() {
        let location = ShopLocation::resolve(Some("12.5,77.5"), Some(1.0), Some(2.0));
        let point = location.point().unwrap();
        assert_eq!((point.lat, point.lng), (12.5, 77.5));
    }

    #[test]
    fn falls_back_to_discrete_fields_when_string_is_bad() {
        let location = ShopLocation::resolve(Some("not-a-point"), Some(1.0), Some(2.0));
        let point = location.point().unwrap();
        assert_eq!((point.lat, point.lng), (1.0, 2.0));
    }

    #[test]
    fn unavailable_without_any_source() {
        assert_eq!(ShopLocation::resolve(None, Some(1.0), None), ShopLocation::Unavailable);
        assert_eq!(ShopLocation::resolve(None, None, None), ShopLocation::Unavailable);
    }
}
