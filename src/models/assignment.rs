use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: u64,
    pub rider_id: u64,
    /// Rider's non-terminal order count at the time of selection.
    pub active_orders: usize,
    pub rating: f64,
    pub distance_km: Option<f64>,
    pub assigned_at: DateTime<Utc>,
}
