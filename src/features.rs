// src/features.rs
//
// Feature windows on approved listings. Paid activation and the admin override
// both go through `FeatureWindow`; reads always compare `feature_end` with now.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::ledger::{self, LedgerOutcome};
use crate::models::{FeatureType, LISTING_COLUMNS, Listing, ListingKind, ListingStatus};
use crate::pricing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct FeatureWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FeatureWindow {
    /// A still-running window is extended from its end; otherwise a new one starts now.
    pub fn for_activation(now: DateTime<Utc>, current: Option<FeatureWindow>, duration: Duration) -> Self {
        match current {
            Some(w) if w.is_active(now) => Self {
                start: w.start,
                end: w.end + duration,
            },
            _ => Self {
                start: now,
                end: now + duration,
            },
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    fn of(listing: &Listing) -> Option<Self> {
        match (listing.featured, listing.feature_start, listing.feature_end) {
            (true, Some(start), Some(end)) => Some(Self { start, end }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Activation {
    pub listing_id: i32,
    pub feature_type: FeatureType,
    pub window: FeatureWindow,
    pub tier_key: String,
    pub remaining: i64,
    /// True when this request repeated an earlier idempotency key.
    pub replayed: bool,
}

/// Spends one credit of the listing's tier and opens (or extends) its feature window.
pub async fn activate(
    pool: &PgPool,
    user_id: i32,
    listing_id: i32,
    feature_type: FeatureType,
    idempotency_key: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<Activation> {
    // stored timestamps have microsecond precision
    let now = now.trunc_subsecs(6);
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1 FOR UPDATE"
    ))
    .bind(listing_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("listing"))?;
    let listing = Listing::from_row(&row)?;

    if listing.owner_id != user_id {
        return Err(AppError::Forbidden);
    }
    if listing.status != ListingStatus::Approved {
        return Err(AppError::Conflict(
            "only approved listings can be featured".to_string(),
        ));
    }

    let tier = pricing::tier_for(listing.kind, feature_type);
    let key = idempotency_key.map(|k| format!("feature:{user_id}:{k}"));
    let outcome = ledger::redeem(
        &mut *tx,
        user_id,
        tier.key,
        1,
        &format!("listing:{listing_id}"),
        key.as_deref(),
    )
    .await?;

    let current = FeatureWindow::of(&listing);

    if let LedgerOutcome::Duplicate { remaining } = outcome {
        let reference = format!("listing:{listing_id}");
        let claimed = match key.as_deref() {
            Some(k) => ledger::entry_by_key(&mut *tx, k).await?,
            None => None,
        };
        tx.rollback().await?;

        let same_request = claimed.is_some_and(|e| {
            e.tier_key == tier.key && e.reference.as_deref() == Some(reference.as_str())
        });
        let window = current.filter(|_| same_request).ok_or_else(|| {
            AppError::Conflict("idempotency key was used for another request".to_string())
        })?;
        return Ok(Activation {
            listing_id,
            feature_type: listing.feature_type.unwrap_or(feature_type),
            window,
            tier_key: tier.key.to_string(),
            remaining,
            replayed: true,
        });
    }

    let window = FeatureWindow::for_activation(now, current, feature_type.duration());
    write_window(&mut *tx, listing_id, feature_type, window).await?;
    tx.commit().await?;

    log::info!(
        "listing {} featured type={} until={} user_id={}",
        listing_id,
        feature_type,
        window.end,
        user_id
    );

    Ok(Activation {
        listing_id,
        feature_type,
        window,
        tier_key: tier.key.to_string(),
        remaining: outcome.remaining(),
        replayed: false,
    })
}

/// Admin override with an explicit end; no credit is consumed.
pub async fn set_window(
    pool: &PgPool,
    listing_id: i32,
    feature_type: FeatureType,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<FeatureWindow> {
    if end <= now {
        return Err(AppError::Validation("feature end must be in the future".to_string()));
    }
    let (now, end) = (now.trunc_subsecs(6), end.trunc_subsecs(6));

    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1 FOR UPDATE"
    ))
    .bind(listing_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("listing"))?;
    let listing = Listing::from_row(&row)?;

    if listing.status != ListingStatus::Approved {
        return Err(AppError::Conflict(
            "only approved listings can be featured".to_string(),
        ));
    }

    let start = FeatureWindow::of(&listing)
        .filter(|w| w.is_active(now))
        .map(|w| w.start)
        .unwrap_or(now);
    let window = FeatureWindow { start, end };
    write_window(&mut *tx, listing_id, feature_type, window).await?;
    tx.commit().await?;

    log::info!("listing {} feature window set by admin until={}", listing_id, end);
    Ok(window)
}

async fn write_window(
    conn: &mut sqlx::PgConnection,
    listing_id: i32,
    feature_type: FeatureType,
    window: FeatureWindow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE listings
           SET featured = true, feature_type = $2, feature_start = $3, feature_end = $4
           WHERE id = $1"#,
    )
    .bind(listing_id)
    .bind(feature_type.as_str())
    .bind(window.start)
    .bind(window.end)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Approved listings whose window covers `now`, regardless of whether the
/// `featured` flag has been swept yet.
pub async fn featured(pool: &PgPool, kind: Option<ListingKind>, now: DateTime<Utc>) -> AppResult<Vec<Listing>> {
    let rows = sqlx::query(&format!(
        r#"SELECT {LISTING_COLUMNS}
           FROM listings
           WHERE status = 'approved'
             AND featured = true
             AND feature_start <= $1
             AND feature_end > $1
             AND ($2::text IS NULL OR kind = $2)
           ORDER BY (feature_type = 'featured') DESC, feature_end DESC"#
    ))
    .bind(now)
    .bind(kind.map(|k| k.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(Listing::from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

/// Clears the flag on elapsed windows.
pub async fn sweep_expired(pool: &PgPool, now: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query(
        r#"UPDATE listings
           SET featured = false
           WHERE featured = true AND feature_end <= $1"#,
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn fresh_activation_starts_now() {
        let w = FeatureWindow::for_activation(at(1), None, Duration::days(30));
        assert_eq!(w.start, at(1));
        assert_eq!(w.end, at(1) + Duration::days(30));
    }

    #[test]
    fn active_window_is_extended_from_its_end() {
        let current = FeatureWindow {
            start: at(1),
            end: at(11),
        };
        let w = FeatureWindow::for_activation(at(5), Some(current), Duration::days(30));
        assert_eq!(w.start, at(1));
        assert_eq!(w.end, at(11) + Duration::days(30));
    }

    #[test]
    fn elapsed_window_is_replaced() {
        let current = FeatureWindow {
            start: at(1),
            end: at(3),
        };
        let w = FeatureWindow::for_activation(at(5), Some(current), Duration::days(365));
        assert_eq!(w.start, at(5));
        assert_eq!(w.end, at(5) + Duration::days(365));
    }

    #[test]
    fn window_end_is_exclusive() {
        let w = FeatureWindow {
            start: at(1),
            end: at(2),
        };
        assert!(w.is_active(at(1)));
        assert!(!w.is_active(at(2)));
    }
}
