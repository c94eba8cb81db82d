// src/moderation.rs
//
// Listing lifecycle: pending -> approved | rejected. Each decision is one
// conditional status update plus its outbox notification, committed together.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Row};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::models::{LISTING_COLUMNS, Listing, ListingKind, ListingStatus};
use crate::notify::{self, ApprovalEmail, Notification};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewListing {
    pub kind: ListingKind,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn target(&self) -> ListingStatus {
        match self {
            Decision::Approve => ListingStatus::Approved,
            Decision::Reject => ListingStatus::Rejected,
        }
    }
}

pub async fn submit(pool: &PgPool, owner_id: i32, new: &NewListing) -> AppResult<Listing> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if title.chars().count() > 200 {
        return Err(AppError::Validation("title is too long".to_string()));
    }
    let details = if new.details.is_null() {
        serde_json::json!({})
    } else {
        new.details.clone()
    };

    let row = sqlx::query(&format!(
        r#"INSERT INTO listings (owner_id, kind, title, description, details, status)
           VALUES ($1, $2, $3, $4, $5, 'pending')
           RETURNING {LISTING_COLUMNS}"#
    ))
    .bind(owner_id)
    .bind(new.kind.as_str())
    .bind(title)
    .bind(new.description.as_deref())
    .bind(details)
    .fetch_one(pool)
    .await?;

    let listing = Listing::from_row(&row)?;
    log::info!("listing {} submitted kind={} owner={}", listing.id, listing.kind, owner_id);
    Ok(listing)
}

pub async fn get(pool: &PgPool, listing_id: i32) -> AppResult<Listing> {
    let row = sqlx::query(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
        .bind(listing_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("listing"))?;
    Ok(Listing::from_row(&row)?)
}

pub async fn approve(pool: &PgPool, listing_id: i32, moderator_id: i32) -> AppResult<Listing> {
    decide(pool, listing_id, moderator_id, Decision::Approve, None).await
}

pub async fn reject(
    pool: &PgPool,
    listing_id: i32,
    moderator_id: i32,
    reason: Option<&str>,
) -> AppResult<Listing> {
    decide(pool, listing_id, moderator_id, Decision::Reject, reason).await
}

async fn decide(
    pool: &PgPool,
    listing_id: i32,
    moderator_id: i32,
    decision: Decision,
    reason: Option<&str>,
) -> AppResult<Listing> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        r#"UPDATE listings
           SET status = $2, moderated_by = $3, moderated_at = NOW(), rejection_reason = $4
           WHERE id = $1 AND status = 'pending'
           RETURNING {LISTING_COLUMNS}"#
    ))
    .bind(listing_id)
    .bind(decision.target().as_str())
    .bind(moderator_id)
    .bind(reason)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        let current = get(pool, listing_id).await?;
        return Err(AppError::Conflict(format!(
            "listing {listing_id} is already {}",
            current.status
        )));
    };
    let listing = Listing::from_row(&row)?;

    let owner_email: String = sqlx::query("SELECT email FROM users WHERE id = $1")
        .bind(listing.owner_id)
        .fetch_one(&mut *tx)
        .await?
        .get("email");

    notify::enqueue(
        &mut *tx,
        &Notification::Approval(ApprovalEmail {
            to: owner_email,
            listing_type: listing.kind.to_string(),
            action: listing.status.to_string(),
            listing_name: listing.title.clone(),
        }),
    )
    .await?;

    tx.commit().await?;

    log::info!(
        "listing {} {} by moderator {}",
        listing_id,
        listing.status,
        moderator_id
    );
    Ok(listing)
}

pub async fn pending(pool: &PgPool, kind: Option<ListingKind>) -> AppResult<Vec<Listing>> {
    let rows = sqlx::query(&format!(
        r#"SELECT {LISTING_COLUMNS}
           FROM listings
           WHERE status = 'pending' AND ($1::text IS NULL OR kind = $1)
           ORDER BY created_at ASC"#
    ))
    .bind(kind.map(|k| k.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(Listing::from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

/// Drops the image rows of a listing and returns their object keys for deletion.
pub async fn detach_images(pool: &PgPool, listing_id: i32) -> AppResult<Vec<String>> {
    let rows = sqlx::query("DELETE FROM listing_images WHERE listing_id = $1 RETURNING s3_key")
        .bind(listing_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.get("s3_key")).collect())
}

pub async fn add_image(pool: &PgPool, listing_id: i32, s3_key: &str, url: &str) -> AppResult<i32> {
    let row = sqlx::query(
        "INSERT INTO listing_images (listing_id, s3_key, url) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(listing_id)
    .bind(s3_key)
    .bind(url)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Hard-deletes rejected listings older than `retention`; returns their image keys
/// so the caller can remove the objects.
pub async fn purge_rejected(
    pool: &PgPool,
    retention: Duration,
    now: DateTime<Utc>,
) -> AppResult<Vec<String>> {
    let mut tx = pool.begin().await?;

    let keys: Vec<String> = sqlx::query(
        r#"SELECT i.s3_key
           FROM listing_images i
           JOIN listings l ON l.id = i.listing_id
           WHERE l.status = 'rejected' AND l.moderated_at < $1"#,
    )
    .bind(now - retention)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|r| r.get("s3_key"))
    .collect();

    let deleted = sqlx::query("DELETE FROM listings WHERE status = 'rejected' AND moderated_at < $1")
        .bind(now - retention)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    if deleted > 0 {
        log::info!("purged {} rejected listings", deleted);
    }
    Ok(keys)
}
