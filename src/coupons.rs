// src/coupons.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};
use utoipa::ToSchema;

#[derive(Debug, Clone)]
pub struct Coupon {
    pub code: String,
    /// `None` applies to every category.
    pub category: Option<String>,
    pub percent_off: Option<i32>,
    pub amount_off: Option<i64>,
    pub active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_redemptions: Option<i32>,
    pub redemptions: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CouponValidation {
    pub valid: bool,
    /// Minor units to subtract from the base amount.
    pub discount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CouponValidation {
    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            discount: 0,
            reason: Some(reason.to_string()),
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Decides whether `coupon` applies to `amount` in `category` at `now`.
pub fn evaluate(coupon: &Coupon, category: &str, amount: i64, now: DateTime<Utc>) -> CouponValidation {
    if !coupon.active {
        return CouponValidation::rejected("coupon is inactive");
    }
    if coupon.starts_at.is_some_and(|s| now < s) {
        return CouponValidation::rejected("coupon is not active yet");
    }
    if coupon.expires_at.is_some_and(|e| now >= e) {
        return CouponValidation::rejected("coupon has expired");
    }
    if coupon
        .max_redemptions
        .is_some_and(|max| coupon.redemptions >= max)
    {
        return CouponValidation::rejected("coupon has been fully redeemed");
    }
    if let Some(c) = coupon.category.as_deref() {
        if !c.eq_ignore_ascii_case(category) {
            return CouponValidation::rejected("coupon does not apply to this category");
        }
    }
    if amount <= 0 {
        return CouponValidation::rejected("amount must be positive");
    }

    let raw = match (coupon.percent_off, coupon.amount_off) {
        (Some(pct), _) => amount * i64::from(pct.clamp(0, 100)) / 100,
        (None, Some(off)) => off,
        (None, None) => 0,
    };

    CouponValidation {
        valid: true,
        discount: raw.clamp(0, amount),
        reason: None,
    }
}

pub async fn find(pool: &PgPool, code: &str) -> Result<Option<Coupon>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT code, category, percent_off, amount_off, active, starts_at, expires_at,
                  max_redemptions, redemptions
           FROM coupons
           WHERE code = $1"#,
    )
    .bind(normalize_code(code))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Coupon {
        code: r.get("code"),
        category: r.get("category"),
        percent_off: r.get("percent_off"),
        amount_off: r.get("amount_off"),
        active: r.get("active"),
        starts_at: r.get("starts_at"),
        expires_at: r.get("expires_at"),
        max_redemptions: r.get("max_redemptions"),
        redemptions: r.get("redemptions"),
    }))
}

pub async fn validate(
    pool: &PgPool,
    code: &str,
    category: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<CouponValidation, sqlx::Error> {
    Ok(match find(pool, code).await? {
        Some(coupon) => evaluate(&coupon, category, amount, now),
        None => CouponValidation::rejected("unknown coupon code"),
    })
}

/// Holds one use for a pending purchase. Returns false once the cap is reached,
/// counting uses already held by other pending purchases.
pub async fn reserve(conn: &mut PgConnection, code: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE coupons
           SET redemptions = redemptions + 1
           WHERE code = $1
             AND active
             AND (max_redemptions IS NULL OR redemptions < max_redemptions)
           RETURNING redemptions"#,
    )
    .bind(normalize_code(code))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

/// Counts a use without checking the cap. Only for purchases whose hold was
/// released before the provider confirmed payment.
pub async fn record_redemption(conn: &mut PgConnection, code: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE coupons SET redemptions = redemptions + 1 WHERE code = $1")
        .bind(normalize_code(code))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon() -> Coupon {
        Coupon {
            code: "SPRING".into(),
            category: Some("cars".into()),
            percent_off: Some(25),
            amount_off: None,
            active: true,
            starts_at: None,
            expires_at: None,
            max_redemptions: None,
            redemptions: 0,
        }
    }

    #[test]
    fn percent_discount_rounds_down() {
        let v = evaluate(&coupon(), "cars", 999, Utc::now());
        assert!(v.valid);
        assert_eq!(v.discount, 249);
    }

    #[test]
    fn fixed_discount_never_exceeds_amount() {
        let c = Coupon {
            percent_off: None,
            amount_off: Some(5_000),
            ..coupon()
        };
        let v = evaluate(&c, "cars", 999, Utc::now());
        assert_eq!(v.discount, 999);
    }

    #[test]
    fn category_must_match() {
        let v = evaluate(&coupon(), "events", 999, Utc::now());
        assert!(!v.valid);
        assert_eq!(v.discount, 0);

        let any = Coupon {
            category: None,
            ..coupon()
        };
        assert!(evaluate(&any, "events", 999, Utc::now()).valid);
        assert!(evaluate(&coupon(), "CARS", 999, Utc::now()).valid);
    }

    #[test]
    fn validity_window_and_usage_cap_apply() {
        let now = Utc::now();
        let expired = Coupon {
            expires_at: Some(now - Duration::hours(1)),
            ..coupon()
        };
        assert_eq!(
            evaluate(&expired, "cars", 999, now).reason.as_deref(),
            Some("coupon has expired")
        );

        let future = Coupon {
            starts_at: Some(now + Duration::hours(1)),
            ..coupon()
        };
        assert!(!evaluate(&future, "cars", 999, now).valid);

        let exhausted = Coupon {
            max_redemptions: Some(3),
            redemptions: 3,
            ..coupon()
        };
        assert!(!evaluate(&exhausted, "cars", 999, now).valid);

        let inactive = Coupon {
            active: false,
            ..coupon()
        };
        assert!(!evaluate(&inactive, "cars", 999, now).valid);
    }

    #[test]
    fn codes_are_case_insensitive() {
        assert_eq!(normalize_code("  spring "), "SPRING");
    }
}
