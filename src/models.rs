// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Text-backed enum: the same literal is used in the TEXT column and over JSON.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} `{}`", stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(ListingKind {
    Car => "car",
    Event => "event",
    Auction => "auction",
    Hotel => "hotel",
    Club => "club",
    Service => "service",
});

text_enum!(ListingStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(FeatureType {
    Standard => "standard",
    Featured => "featured",
});

text_enum!(Provider {
    Stripe => "stripe",
    PayPal => "paypal",
});

text_enum!(PurchaseStatus {
    Pending => "pending",
    Captured => "captured",
    Failed => "failed",
    Expired => "expired",
});

text_enum!(Role {
    User => "user",
    Admin => "admin",
});

impl ListingKind {
    /// Category name used by coupons and object-storage prefixes.
    pub fn category(&self) -> &'static str {
        match self {
            ListingKind::Car => "cars",
            ListingKind::Event => "events",
            ListingKind::Auction => "auctions",
            ListingKind::Hotel => "hotels",
            ListingKind::Club => "clubs",
            ListingKind::Service => "others",
        }
    }
}

/// Decodes a text column into one of the enums above.
pub(crate) fn get_enum<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

pub(crate) fn get_opt_enum<T>(row: &PgRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|r| r.parse())
        .transpose()
        .map_err(|e: String| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: e.into(),
        })
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Listing {
    pub id: i32,
    pub owner_id: i32,
    pub kind: ListingKind,
    pub title: String,
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub status: ListingStatus,
    pub featured: bool,
    pub feature_type: Option<FeatureType>,
    pub feature_start: Option<DateTime<Utc>>,
    pub feature_end: Option<DateTime<Utc>>,
    pub moderated_by: Option<i32>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub(crate) const LISTING_COLUMNS: &str = "id, owner_id, kind, title, description, details, status, \
     featured, feature_type, feature_start, feature_end, moderated_by, moderated_at, \
     rejection_reason, created_at";

impl Listing {
    pub(crate) fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            owner_id: r.try_get("owner_id")?,
            kind: get_enum(r, "kind")?,
            title: r.try_get("title")?,
            description: r.try_get("description")?,
            details: r.try_get("details")?,
            status: get_enum(r, "status")?,
            featured: r.try_get("featured")?,
            feature_type: get_opt_enum(r, "feature_type")?,
            feature_start: r.try_get("feature_start")?,
            feature_end: r.try_get("feature_end")?,
            moderated_by: r.try_get("moderated_by")?,
            moderated_at: r.try_get("moderated_at")?,
            rejection_reason: r.try_get("rejection_reason")?,
            created_at: r.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: i32,
    pub product_key: String,
    pub quantity: i32,
    pub provider: Provider,
    pub provider_ref: Option<String>,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub amount: i64,
    pub currency: String,
    pub coupon_code: Option<String>,
    pub status: PurchaseStatus,
    pub capture_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
}

pub(crate) const PURCHASE_COLUMNS: &str = "id, user_id, product_key, quantity, provider, provider_ref, \
     base_amount, discount_amount, amount, currency, coupon_code, status, capture_id, \
     created_at, captured_at";

impl Purchase {
    pub(crate) fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            user_id: r.try_get("user_id")?,
            product_key: r.try_get("product_key")?,
            quantity: r.try_get("quantity")?,
            provider: get_enum(r, "provider")?,
            provider_ref: r.try_get("provider_ref")?,
            base_amount: r.try_get("base_amount")?,
            discount_amount: r.try_get("discount_amount")?,
            amount: r.try_get("amount")?,
            currency: r.try_get("currency")?,
            coupon_code: r.try_get("coupon_code")?,
            status: get_enum(r, "status")?,
            capture_id: r.try_get("capture_id")?,
            created_at: r.try_get("created_at")?,
            captured_at: r.try_get("captured_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreditBalance {
    pub tier_key: String,
    pub remaining: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreditEntry {
    pub id: i64,
    pub tier_key: String,
    pub delta: i64,
    pub balance_after: Option<i64>,
    pub reason: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}
