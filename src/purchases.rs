// src/purchases.rs
//
// Purchase intents are persisted before any gateway call and settled exactly once:
// the status transition and the credit grant share one transaction, and the grant
// is keyed by the purchase id.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::coupons;
use crate::error::{AppError, AppResult};
use crate::ledger;
use crate::models::{PURCHASE_COLUMNS, Provider, Purchase, PurchaseStatus};
use crate::pricing::{self, MIN_CHARGE, Product};

#[derive(Debug, Clone)]
pub struct Quote {
    pub product: &'static Product,
    pub quantity: i32,
    pub base_amount: i64,
    pub discount: i64,
    pub amount: i64,
    pub currency: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Settlement {
    Settled { purchase: Purchase, remaining: i64 },
    AlreadySettled { purchase: Purchase },
}

impl Settlement {
    pub fn purchase(&self) -> &Purchase {
        match self {
            Settlement::Settled { purchase, .. } | Settlement::AlreadySettled { purchase } => {
                purchase
            }
        }
    }
}

/// Prices a checkout from the policy table. `client_amount`, when sent, must match.
pub async fn quote(
    pool: &PgPool,
    product_key: &str,
    quantity: i32,
    coupon_code: Option<&str>,
    client_amount: Option<i64>,
    currency: &str,
    now: DateTime<Utc>,
) -> AppResult<Quote> {
    let product = pricing::product(product_key)
        .ok_or_else(|| AppError::Validation(format!("unknown product `{product_key}`")))?;
    let base_amount = product.base_amount(quantity)?;

    let coupon_code = coupon_code
        .map(coupons::normalize_code)
        .filter(|c| !c.is_empty());

    let discount = match coupon_code.as_deref() {
        Some(code) => {
            let v = coupons::validate(pool, code, product.kind.category(), base_amount, now).await?;
            if !v.valid {
                return Err(AppError::Validation(
                    v.reason.unwrap_or_else(|| "invalid coupon".to_string()),
                ));
            }
            v.discount
        }
        None => 0,
    };

    let amount = base_amount - discount;
    if amount < MIN_CHARGE {
        return Err(AppError::Validation(format!(
            "total {} is below the minimum charge of {}",
            pricing::format_amount(amount),
            pricing::format_amount(MIN_CHARGE)
        )));
    }

    if let Some(sent) = client_amount {
        if sent != amount {
            log::warn!(
                "client amount mismatch product={} sent={} quoted={}",
                product.key,
                sent,
                amount
            );
            return Err(AppError::Validation(
                "amount does not match the server quote".to_string(),
            ));
        }
    }

    Ok(Quote {
        product,
        quantity,
        base_amount,
        discount,
        amount,
        currency: currency.to_string(),
        coupon_code,
    })
}

/// Persists a pending purchase. A coupon use is held from here until the purchase
/// fails or expires.
pub async fn create(pool: &PgPool, user_id: i32, quote: &Quote, provider: Provider) -> AppResult<Purchase> {
    let mut tx = pool.begin().await?;

    if let Some(code) = quote.coupon_code.as_deref() {
        if !coupons::reserve(&mut *tx, code).await? {
            tx.rollback().await?;
            return Err(AppError::Validation(
                "coupon has been fully redeemed".to_string(),
            ));
        }
    }

    let row = sqlx::query(&format!(
        r#"INSERT INTO purchases
           (id, user_id, product_key, quantity, provider, base_amount, discount_amount, amount,
            currency, coupon_code, status)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending')
           RETURNING {PURCHASE_COLUMNS}"#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(quote.product.key)
    .bind(quote.quantity)
    .bind(provider.as_str())
    .bind(quote.base_amount)
    .bind(quote.discount)
    .bind(quote.amount)
    .bind(&quote.currency)
    .bind(quote.coupon_code.as_deref())
    .fetch_one(&mut *tx)
    .await?;
    let purchase = Purchase::from_row(&row)?;

    tx.commit().await?;
    Ok(purchase)
}

pub async fn attach_provider_ref(pool: &PgPool, id: Uuid, provider_ref: &str) -> AppResult<()> {
    sqlx::query("UPDATE purchases SET provider_ref = $1 WHERE id = $2")
        .bind(provider_ref)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fails a pending purchase and gives its coupon use back.
pub async fn mark_failed(pool: &PgPool, id: Uuid) -> AppResult<()> {
    sqlx::query(
        r#"WITH failed AS (
               UPDATE purchases SET status = 'failed'
               WHERE id = $1 AND status = 'pending'
               RETURNING coupon_code
           )
           UPDATE coupons
           SET redemptions = GREATEST(redemptions - 1, 0)
           WHERE code = (SELECT coupon_code FROM failed)"#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &PgPool, id: Uuid) -> AppResult<Option<Purchase>> {
    let row = sqlx::query(&format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Purchase::from_row).transpose()?)
}

pub async fn get_for_user(pool: &PgPool, id: Uuid, user_id: i32) -> AppResult<Purchase> {
    match get(pool, id).await? {
        Some(p) if p.user_id == user_id => Ok(p),
        _ => Err(AppError::NotFound("purchase")),
    }
}

pub async fn find_by_provider_ref(
    pool: &PgPool,
    provider: Provider,
    provider_ref: &str,
) -> AppResult<Option<Purchase>> {
    let row = sqlx::query(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE provider = $1 AND provider_ref = $2"
    ))
    .bind(provider.as_str())
    .bind(provider_ref)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(Purchase::from_row).transpose()?)
}

/// Marks a verified capture and grants the purchased credits, once.
pub async fn settle(pool: &PgPool, id: Uuid, capture_id: &str) -> AppResult<Settlement> {
    let mut tx = pool.begin().await?;

    let previous: Option<String> = sqlx::query("SELECT status FROM purchases WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| r.get("status"));

    // Any non-captured state settles: money that reached us is always credited.
    let row = sqlx::query(&format!(
        r#"UPDATE purchases
           SET status = 'captured', capture_id = $2, captured_at = NOW()
           WHERE id = $1 AND status <> 'captured'
           RETURNING {PURCHASE_COLUMNS}"#
    ))
    .bind(id)
    .bind(capture_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return match get(pool, id).await? {
            Some(purchase) if purchase.status == PurchaseStatus::Captured => {
                log::info!("purchase {id} already settled");
                Ok(Settlement::AlreadySettled { purchase })
            }
            Some(_) => Err(AppError::Conflict(format!("purchase {id} cannot be settled"))),
            None => Err(AppError::NotFound("purchase")),
        };
    };
    let purchase = Purchase::from_row(&row)?;

    let product = pricing::product(&purchase.product_key).ok_or_else(|| {
        AppError::Internal(format!("purchase {id} references unknown product {}", purchase.product_key))
    })?;

    let key = format!("purchase:{id}");
    let outcome = ledger::grant(
        &mut *tx,
        purchase.user_id,
        product.tier_key,
        product.credits_for(purchase.quantity),
        &key,
        &key,
    )
    .await?;

    // a pending purchase still holds its coupon use; failed or expired ones gave it back
    let held = previous.as_deref() == Some(PurchaseStatus::Pending.as_str());
    if let Some(code) = purchase.coupon_code.as_deref().filter(|_| !held) {
        coupons::record_redemption(&mut *tx, code).await?;
    }

    tx.commit().await?;

    log::info!(
        "purchase settled id={} user_id={} product={} qty={} amount={} capture={}",
        id,
        purchase.user_id,
        purchase.product_key,
        purchase.quantity,
        purchase.amount,
        capture_id
    );

    Ok(Settlement::Settled {
        remaining: outcome.remaining(),
        purchase,
    })
}

/// Pending purchases older than `ttl` are abandoned checkouts; their coupon uses
/// are given back.
pub async fn expire_stale(pool: &PgPool, ttl: Duration, now: DateTime<Utc>) -> AppResult<u64> {
    let row = sqlx::query(
        r#"WITH expired AS (
               UPDATE purchases SET status = 'expired'
               WHERE status = 'pending' AND created_at < $1
               RETURNING coupon_code
           ),
           released AS (
               UPDATE coupons c
               SET redemptions = GREATEST(c.redemptions - e.uses, 0)
               FROM (
                   SELECT coupon_code, COUNT(*)::int AS uses
                   FROM expired
                   WHERE coupon_code IS NOT NULL
                   GROUP BY coupon_code
               ) e
               WHERE c.code = e.coupon_code
           )
           SELECT COUNT(*) AS n FROM expired"#,
    )
    .bind(now - ttl)
    .fetch_one(pool)
    .await?;
    let expired: i64 = row.get("n");
    Ok(expired as u64)
}
