//! Decides whether a shop can deliver to an address, and at which rate.
//!
//! Ineligibility is an ordinary result, not an error: checkout shows the
//! reason next to the offending line item.

use serde::{Deserialize, Serialize};

use crate::geo::haversine_km;
use crate::models::address::Address;
use crate::models::shop::{DeliveryRateTier, Shop};

pub const MISSING_GEO_REASON: &str = "missing/invalid geo location";
pub const SHOP_LOCATION_REASON: &str = "shop location not available";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<String>,
    pub distance_km: Option<f64>,
    pub matched_tier: Option<DeliveryRateTier>,
}

impl Eligibility {
    fn rejected(reason: impl Into<String>, distance_km: Option<f64>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
            distance_km,
            matched_tier: None,
        }
    }

    /// Delivery fee implied by the matched tier; free when the shop has no tiers.
    pub fn delivery_fee(&self) -> Option<f64> {
        if !self.eligible {
            return None;
        }
        Some(self.matched_tier.map(|tier| tier.price).unwrap_or(0.0))
    }
}

pub fn evaluate(destination: &Address, shop: &Shop) -> Eligibility {
    let Ok(target) = destination.coordinates() else {
        return Eligibility::rejected(MISSING_GEO_REASON, None);
    };

    let Some(origin) = shop.location.point() else {
        return Eligibility::rejected(SHOP_LOCATION_REASON, None);
    };

    let distance_km = haversine_km(&origin, &target);

    if shop.delivery_rates.is_empty() {
        return Eligibility {
            eligible: true,
            reason: None,
            distance_km: Some(distance_km),
            matched_tier: None,
        };
    }

    let mut tiers = shop.delivery_rates.clone();
    tiers.sort_by(|a, b| a.km.total_cmp(&b.km));

    match tiers.iter().find(|tier| tier.km >= distance_km) {
        Some(tier) => Eligibility {
            eligible: true,
            reason: None,
            distance_km: Some(distance_km),
            matched_tier: Some(*tier),
        },
        None => {
            let max_km = tiers.last().map(|tier| tier.km).unwrap_or_default();
            Eligibility::rejected(
                format!(
                    "address is {distance_km:.2} km away; {} delivers within {max_km:.2} km",
                    shop.name
                ),
                Some(distance_km),
            )
        }
    }
}

/// One cart line as checkout sees it.
#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    pub product_name: String,
    pub shop_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineEligibility {
    pub product_name: String,
    pub shop_id: u64,
    pub shop_name: Option<String>,
    #[serde(flatten)]
    pub result: Eligibility,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartEligibility {
    pub eligible: bool,
    pub items: Vec<LineEligibility>,
}

impl CartEligibility {
    pub fn blocked_items(&self) -> impl Iterator<Item = &LineEligibility> {
        self.items.iter().filter(|item| !item.result.eligible)
    }
}

/// Evaluates every line separately; the cart is eligible only if all lines are.
/// `lookup_shop` returns `None` for unknown shops, which blocks that line.
pub fn evaluate_cart<F>(destination: &Address, lines: &[CartLine], lookup_shop: F) -> CartEligibility
where
    F: Fn(u64) -> Option<Shop>,
{
    let items: Vec<LineEligibility> = lines
        .iter()
        .map(|line| match lookup_shop(line.shop_id) {
            Some(shop) => LineEligibility {
                product_name: line.product_name.clone(),
                shop_id: line.shop_id,
                shop_name: Some(shop.name.clone()),
                result: evaluate(destination, &shop),
            },
            None => LineEligibility {
                product_name: line.product_name.clone(),
                shop_id: line.shop_id,
                shop_name: None,
                result: Eligibility::rejected(format!("shop {} not found", line.shop_id), None),
            },
        })
        .collect();

    CartEligibility {
        eligible: !items.is_empty() && items.iter().all(|item| item.result.eligible),
        items,
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::{evaluate, evaluate_cart, CartLine, MISSING_GEO_REASON, SHOP_LOCATION_REASON};
    use crate::geo::GeoPoint;
    use crate::models::address::Address;
    use crate::models::shop::{DeliveryRateTier, Shop, ShopLocation};

    const KM_PER_DEGREE: f64 = 6_371.0 * PI / 180.0;

    fn address_km_north(km: f64) -> Address {
        Address {
            id: 1,
            name: "Asha".to_string(),
            phone: "9000000000".to_string(),
            line1: "12 Market Road".to_string(),
            street: None,
            city: "Pune".to_string(),
            pin_code: "411001".to_string(),
            geo_location: Some(format!("{},0", km / KM_PER_DEGREE)),
        }
    }

    fn shop(tiers: Vec<DeliveryRateTier>) -> Shop {
        Shop {
            id: 7,
            name: "Green Basket".to_string(),
            location: ShopLocation::Resolved {
                point: GeoPoint { lat: 0.0, lng: 0.0 },
            },
            delivery_rates: tiers,
        }
    }

    fn standard_tiers() -> Vec<DeliveryRateTier> {
        // deliberately unsorted
        vec![
            DeliveryRateTier { km: 10.0, price: 20.0 },
            DeliveryRateTier { km: 5.0, price: 0.0 },
        ]
    }

    #[test]
    fn near_destination_matches_first_tier() {
        let result = evaluate(&address_km_north(3.0), &shop(standard_tiers()));

        assert!(result.eligible);
        assert_eq!(result.matched_tier.unwrap().km, 5.0);
        assert!((result.distance_km.unwrap() - 3.0).abs() < 1e-6);
        assert_eq!(result.delivery_fee(), Some(0.0));
    }

    #[test]
    fn destination_beyond_largest_tier_is_rejected_with_distances() {
        let result = evaluate(&address_km_north(12.0), &shop(standard_tiers()));

        assert!(!result.eligible);
        let reason = result.reason.unwrap();
        assert!(reason.contains("12"), "{reason}");
        assert!(reason.contains("10"), "{reason}");
        assert!(result.matched_tier.is_none());
    }

    #[test]
    fn distance_on_tier_boundary_is_eligible() {
        let result = evaluate(&address_km_north(4.999_999), &shop(standard_tiers()));
        assert_eq!(result.matched_tier.unwrap().km, 5.0);
    }

    #[test]
    fn missing_geo_is_rejected_regardless_of_shop() {
        let mut address = address_km_north(1.0);
        address.geo_location = None;

        for candidate in [shop(vec![]), shop(standard_tiers())] {
            let result = evaluate(&address, &candidate);
            assert!(!result.eligible);
            assert_eq!(result.reason.as_deref(), Some(MISSING_GEO_REASON));
        }

        address.geo_location = Some("north of the river".to_string());
        let result = evaluate(&address, &shop(vec![]));
        assert_eq!(result.reason.as_deref(), Some(MISSING_GEO_REASON));
    }

    #[test]
    fn shop_without_location_is_rejected() {
        let mut unlocated = shop(standard_tiers());
        unlocated.location = ShopLocation::Unavailable;

        let result = evaluate(&address_km_north(1.0), &unlocated);
        assert!(!result.eligible);
        assert_eq!(result.reason.as_deref(), Some(SHOP_LOCATION_REASON));
    }

    #[test]
    fn no_tiers_means_open_delivery() {
        for km in [0.0, 3.0, 250.0, 4_000.0] {
            let result = evaluate(&address_km_north(km), &shop(vec![]));
            assert!(result.eligible);
            assert!(result.matched_tier.is_none());
        }
    }

    #[test]
    fn price_never_decreases_with_distance() {
        let tiers = vec![
            DeliveryRateTier { km: 2.0, price: 0.0 },
            DeliveryRateTier { km: 6.0, price: 15.0 },
            DeliveryRateTier { km: 9.0, price: 30.0 },
        ];
        let candidate = shop(tiers);

        let prices: Vec<f64> = (0..=18)
            .map(|step| step as f64 * 0.5)
            .map(|km| evaluate(&address_km_north(km), &candidate))
            .filter(|result| result.eligible)
            .map(|result| result.matched_tier.unwrap().price)
            .collect();

        assert!(!prices.is_empty());
        assert!(prices.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn cart_reports_each_blocked_line() {
        let near = shop(standard_tiers());
        let mut tiny = shop(vec![DeliveryRateTier { km: 1.0, price: 5.0 }]);
        tiny.id = 8;
        tiny.name = "Corner Dairy".to_string();

        let lines = vec![
            CartLine { product_name: "Rice 5kg".to_string(), shop_id: 7 },
            CartLine { product_name: "Milk 1L".to_string(), shop_id: 8 },
            CartLine { product_name: "Eggs".to_string(), shop_id: 99 },
        ];

        let result = evaluate_cart(&address_km_north(3.0), &lines, |id| match id {
            7 => Some(near.clone()),
            8 => Some(tiny.clone()),
            _ => None,
        });

        assert!(!result.eligible);
        let blocked: Vec<_> = result.blocked_items().collect();
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked[0].product_name, "Milk 1L");
        assert_eq!(blocked[0].shop_name.as_deref(), Some("Corner Dairy"));
        assert!(blocked[0].result.reason.is_some());
        assert_eq!(blocked[1].product_name, "Eggs");
        assert!(blocked[1].result.reason.as_deref().unwrap().contains("99"));
    }

    #[test]
    fn cart_is_eligible_when_every_line_is() {
        let near = shop(standard_tiers());
        let lines = vec![
            CartLine { product_name: "Rice 5kg".to_string(), shop_id: 7 },
            CartLine { product_name: "Dal 1kg".to_string(), shop_id: 7 },
        ];

        let result = evaluate_cart(&address_km_north(3.0), &lines, |_| Some(near.clone()));
        assert!(result.eligible);
        assert_eq!(result.blocked_items().count(), 0);
    }
}
