use std::cmp::Ordering;

use crate::geo::{haversine_km, GeoPoint};
use crate::models::rider::Rider;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub rider_id: u64,
    pub active_orders: usize,
    pub rating: f64,
    /// Rider to shop, when both positions are known.
    pub distance_km: Option<f64>,
}

impl Candidate {
    pub fn from_rider(rider: &Rider, active_orders: usize, shop: Option<&GeoPoint>) -> Self {
        Self {
            rider_id: rider.id,
            active_orders,
            rating: rider.rating,
            distance_km: rider
                .location
                .as_ref()
                .zip(shop)
                .map(|(rider_point, shop_point)| haversine_km(rider_point, shop_point)),
        }
    }
}

/// Only available, verified riders of the shop may take its orders.
pub fn is_eligible(rider: &Rider, shop_id: u64) -> bool {
    rider.shop_id == shop_id && rider.is_available && rider.is_verified
}

/// Fewest active orders first, then highest rating, then nearest to the
/// shop, then lowest id so the choice is deterministic.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.active_orders
        .cmp(&b.active_orders)
        .then_with(|| b.rating.total_cmp(&a.rating))
        .then_with(|| match (a.distance_km, b.distance_km) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.rider_id.cmp(&b.rider_id))
}

pub fn best_candidate(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().min_by(|a, b| compare(a, b))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{best_candidate, is_eligible, Candidate};
    use crate::geo::GeoPoint;
    use crate::models::rider::Rider;

    fn candidate(rider_id: u64, active_orders: usize, rating: f64, distance_km: Option<f64>) -> Candidate {
        Candidate {
            rider_id,
            active_orders,
            rating,
            distance_km,
        }
    }

    fn rider(id: u64, available: bool, verified: bool) -> Rider {
        Rider {
            id,
            shop_id: 3,
            name: "test-rider".to_string(),
            phone: "9000000001".to_string(),
            is_available: available,
            is_verified: verified,
            location: Some(GeoPoint { lat: 18.52, lng: 73.85 }),
            location_updated_at: None,
            total_deliveries: 0,
            rating: 4.5,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fewer_active_orders_wins_over_rating() {
        let candidates = vec![
            candidate(1, 2, 5.0, Some(0.1)),
            candidate(2, 0, 3.0, Some(9.0)),
        ];
        assert_eq!(best_candidate(&candidates).unwrap().rider_id, 2);
    }

    #[test]
    fn rating_breaks_load_ties() {
        let candidates = vec![
            candidate(1, 1, 4.1, Some(0.1)),
            candidate(2, 1, 4.9, Some(5.0)),
        ];
        assert_eq!(best_candidate(&candidates).unwrap().rider_id, 2);
    }

    #[test]
    fn distance_then_id_break_remaining_ties() {
        let candidates = vec![
            candidate(4, 1, 4.5, None),
            candidate(3, 1, 4.5, Some(2.0)),
            candidate(2, 1, 4.5, Some(2.0)),
        ];
        assert_eq!(best_candidate(&candidates).unwrap().rider_id, 2);
    }

    #[test]
    fn no_candidates_no_choice() {
        assert!(best_candidate(&[]).is_none());
    }

    #[test]
    fn eligibility_needs_available_verified_and_same_shop() {
        assert!(is_eligible(&rider(1, true, true), 3));
        assert!(!is_eligible(&rider(1, false, true), 3));
        assert!(!is_eligible(&rider(1, true, false), 3));
        assert!(!is_eligible(&rider(1, true, true), 4));
    }

    #[test]
    fn candidate_distance_uses_rider_and_shop_positions() {
        let shop = GeoPoint { lat: 18.52, lng: 73.85 };
        let with_shop = Candidate::from_rider(&rider(1, true, true), 0, Some(&shop));
        assert!(with_shop.distance_km.unwrap() < 1e-9);

        let without_shop = Candidate::from_rider(&rider(1, true, true), 0, None);
        assert!(without_shop.distance_km.is_none());
    }
}
