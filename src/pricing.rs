// src/pricing.rs
//
// Single source of truth for credit tiers, purchasable products and feature durations.
// Tier keys double as the ledger counter names.

use chrono::Duration;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{FeatureType, ListingKind};

/// Smallest charge either gateway accepts, in minor units.
pub const MIN_CHARGE: i64 = 50;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Tier {
    pub key: &'static str,
    pub kind: ListingKind,
    pub feature_type: FeatureType,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Product {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: ListingKind,
    /// Unit price in minor units of the configured currency.
    pub price: i64,
    pub tier_key: &'static str,
    /// Credits granted per unit bought.
    pub credits: i64,
    pub max_quantity: i32,
}

impl FeatureType {
    pub fn duration(&self) -> Duration {
        match self {
            FeatureType::Standard => Duration::days(30),
            FeatureType::Featured => Duration::days(365),
        }
    }
}

const fn tier_row(key: &'static str, kind: ListingKind, feature_type: FeatureType) -> Tier {
    Tier { key, kind, feature_type }
}

const CARS_BASIC: Tier = tier_row("cars_basicListing", ListingKind::Car, FeatureType::Standard);
const CARS_PREMIUM: Tier = tier_row("cars_premiumListing", ListingKind::Car, FeatureType::Featured);
const EVENTS_STANDARD: Tier = tier_row("events_standardListing", ListingKind::Event, FeatureType::Standard);
const EVENTS_FEATURED: Tier = tier_row("events_featuredListing", ListingKind::Event, FeatureType::Featured);
const AUCTIONS_STANDARD: Tier = tier_row("auctions_standardListing", ListingKind::Auction, FeatureType::Standard);
const AUCTIONS_FEATURED: Tier = tier_row("auctions_featuredListing", ListingKind::Auction, FeatureType::Featured);
const HOTELS_STANDARD: Tier = tier_row("hotels_standardListing", ListingKind::Hotel, FeatureType::Standard);
const HOTELS_FEATURED: Tier = tier_row("hotels_featuredListing", ListingKind::Hotel, FeatureType::Featured);
const CLUBS_STANDARD: Tier = tier_row("clubs_standardListing", ListingKind::Club, FeatureType::Standard);
const CLUBS_FEATURED: Tier = tier_row("clubs_featuredListing", ListingKind::Club, FeatureType::Featured);
const SERVICES_STANDARD: Tier = tier_row("standardListingRemaining", ListingKind::Service, FeatureType::Standard);
const SERVICES_FEATURED: Tier = tier_row("featuredListingRemaining", ListingKind::Service, FeatureType::Featured);

pub const TIERS: &[Tier] = &[
    CARS_BASIC,
    CARS_PREMIUM,
    EVENTS_STANDARD,
    EVENTS_FEATURED,
    AUCTIONS_STANDARD,
    AUCTIONS_FEATURED,
    HOTELS_STANDARD,
    HOTELS_FEATURED,
    CLUBS_STANDARD,
    CLUBS_FEATURED,
    SERVICES_STANDARD,
    SERVICES_FEATURED,
];

pub const PRODUCTS: &[Product] = &[
    Product { key: "cars_basicListing", name: "Car basic listing", kind: ListingKind::Car, price: 999, tier_key: "cars_basicListing", credits: 1, max_quantity: 20 },
    Product { key: "cars_premiumListing", name: "Car premium listing", kind: ListingKind::Car, price: 4999, tier_key: "cars_premiumListing", credits: 1, max_quantity: 10 },
    Product { key: "goldPackage", name: "Gold car package", kind: ListingKind::Car, price: 19999, tier_key: "cars_premiumListing", credits: 5, max_quantity: 1 },
    Product { key: "events_standardListing", name: "Event standard listing", kind: ListingKind::Event, price: 1499, tier_key: "events_standardListing", credits: 1, max_quantity: 20 },
    Product { key: "events_featuredListing", name: "Event featured listing", kind: ListingKind::Event, price: 5999, tier_key: "events_featuredListing", credits: 1, max_quantity: 10 },
    Product { key: "auctions_standardListing", name: "Auction standard listing", kind: ListingKind::Auction, price: 1499, tier_key: "auctions_standardListing", credits: 1, max_quantity: 20 },
    Product { key: "auctions_featuredListing", name: "Auction featured listing", kind: ListingKind::Auction, price: 5999, tier_key: "auctions_featuredListing", credits: 1, max_quantity: 10 },
    Product { key: "hotels_standardListing", name: "Hotel standard listing", kind: ListingKind::Hotel, price: 2499, tier_key: "hotels_standardListing", credits: 1, max_quantity: 20 },
    Product { key: "hotels_featuredListing", name: "Hotel featured listing", kind: ListingKind::Hotel, price: 8999, tier_key: "hotels_featuredListing", credits: 1, max_quantity: 10 },
    Product { key: "clubs_standardListing", name: "Club standard listing", kind: ListingKind::Club, price: 1499, tier_key: "clubs_standardListing", credits: 1, max_quantity: 20 },
    Product { key: "clubs_featuredListing", name: "Club featured listing", kind: ListingKind::Club, price: 5999, tier_key: "clubs_featuredListing", credits: 1, max_quantity: 10 },
    Product { key: "standardListingRemaining", name: "Service standard listing", kind: ListingKind::Service, price: 999, tier_key: "standardListingRemaining", credits: 1, max_quantity: 20 },
    Product { key: "featuredListingRemaining", name: "Service featured listing", kind: ListingKind::Service, price: 3999, tier_key: "featuredListingRemaining", credits: 1, max_quantity: 10 },
];

pub fn tier(key: &str) -> Option<&'static Tier> {
    TIERS.iter().find(|t| t.key == key)
}

pub fn tier_for(kind: ListingKind, feature_type: FeatureType) -> &'static Tier {
    use FeatureType::{Featured, Standard};
    match (kind, feature_type) {
        (ListingKind::Car, Standard) => &CARS_BASIC,
        (ListingKind::Car, Featured) => &CARS_PREMIUM,
        (ListingKind::Event, Standard) => &EVENTS_STANDARD,
        (ListingKind::Event, Featured) => &EVENTS_FEATURED,
        (ListingKind::Auction, Standard) => &AUCTIONS_STANDARD,
        (ListingKind::Auction, Featured) => &AUCTIONS_FEATURED,
        (ListingKind::Hotel, Standard) => &HOTELS_STANDARD,
        (ListingKind::Hotel, Featured) => &HOTELS_FEATURED,
        (ListingKind::Club, Standard) => &CLUBS_STANDARD,
        (ListingKind::Club, Featured) => &CLUBS_FEATURED,
        (ListingKind::Service, Standard) => &SERVICES_STANDARD,
        (ListingKind::Service, Featured) => &SERVICES_FEATURED,
    }
}

pub fn product(key: &str) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.key == key)
}

impl Product {
    pub fn base_amount(&self, quantity: i32) -> AppResult<i64> {
        if quantity < 1 || quantity > self.max_quantity {
            return Err(AppError::Validation(format!(
                "quantity must be between 1 and {}",
                self.max_quantity
            )));
        }
        Ok(self.price * i64::from(quantity))
    }

    pub fn credits_for(&self, quantity: i32) -> i64 {
        self.credits * i64::from(quantity)
    }
}

/// Renders minor units as a decimal string ("12.34").
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_and_feature_type_has_a_tier() {
        for kind in ListingKind::ALL {
            for feature_type in FeatureType::ALL {
                let found = TIERS
                    .iter()
                    .filter(|t| t.kind == *kind && t.feature_type == *feature_type)
                    .count();
                assert_eq!(found, 1, "{kind}/{feature_type}");
                let t = tier_for(*kind, *feature_type);
                assert_eq!(t.kind, *kind);
                assert_eq!(t.feature_type, *feature_type);
            }
        }
    }

    #[test]
    fn tier_for_matches_the_published_keys() {
        assert_eq!(tier_for(ListingKind::Car, FeatureType::Featured).key, "cars_premiumListing");
        assert_eq!(tier_for(ListingKind::Service, FeatureType::Standard).key, "standardListingRemaining");
        assert_eq!(tier_for(ListingKind::Hotel, FeatureType::Featured).key, "hotels_featuredListing");
        for t in TIERS {
            assert_eq!(tier_for(t.kind, t.feature_type).key, t.key);
        }
    }

    #[test]
    fn products_grant_known_tiers_for_their_kind() {
        for p in PRODUCTS {
            let t = tier(p.tier_key).unwrap_or_else(|| panic!("unknown tier {}", p.tier_key));
            assert_eq!(t.kind, p.kind, "{}", p.key);
            assert!(p.price >= MIN_CHARGE);
        }
    }

    #[test]
    fn standard_lasts_a_month_featured_a_year() {
        assert_eq!(FeatureType::Standard.duration(), Duration::days(30));
        assert_eq!(FeatureType::Featured.duration(), Duration::days(365));
    }

    #[test]
    fn base_amount_checks_quantity_bounds() {
        let p = product("cars_basicListing").unwrap();
        assert_eq!(p.base_amount(3).unwrap(), 2997);
        assert!(p.base_amount(0).is_err());
        assert!(p.base_amount(p.max_quantity + 1).is_err());

        let gold = product("goldPackage").unwrap();
        assert_eq!(gold.credits_for(1), 5);
    }

    #[test]
    fn amounts_render_with_two_decimals() {
        assert_eq!(format_amount(1999), "19.99");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(100), "1.00");
    }
}
