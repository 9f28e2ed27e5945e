use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rider {
    pub id: u64,
    pub shop_id: u64,
    pub name: String,
    pub phone: String,
    /// Mirrors the rider's online flag.
    pub is_available: bool,
    pub is_verified: bool,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub total_deliveries: u32,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

/// Rider plus fields derived from the order store.
#[derive(Debug, Clone, Serialize)]
pub struct RiderView {
    #[serde(flatten)]
    pub rider: Rider,
    pub active_orders: usize,
}
