use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::{parse_geo_location, GeoPoint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: u64,
    pub name: String,
    pub phone: String,
    pub line1: String,
    #[serde(default)]
    pub street: Option<String>,
    pub city: String,
    pub pin_code: String,
    /// `"lat,lng"`; an address may be saved without it.
    #[serde(default)]
    pub geo_location: Option<String>,
}

impl Address {
    pub fn coordinates(&self) -> Result<GeoPoint, AppError> {
        match self.geo_location.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_geo_location(raw),
            _ => Err(AppError::BadRequest(format!(
                "address {} has no geo location",
                self.id
            ))),
        }
    }
}
