// src/events.rs

use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::models::{LISTING_COLUMNS, Listing, ListingKind, ListingStatus};
use crate::notify::{self, EventRegistrationEmail, Notification};

/// Registers `attendee_email` for an approved event and notifies its owner.
pub async fn register(
    pool: &PgPool,
    listing_id: i32,
    user_id: i32,
    attendee_email: &str,
) -> AppResult<i32> {
    let attendee_email = attendee_email.trim().to_lowercase();
    if !attendee_email.contains('@') || !attendee_email.contains('.') {
        return Err(AppError::Validation("invalid attendee email".to_string()));
    }

    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
        .bind(listing_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("event"))?;
    let listing = Listing::from_row(&row)?;
    if listing.kind != ListingKind::Event || listing.status != ListingStatus::Approved {
        return Err(AppError::NotFound("event"));
    }

    let registration = sqlx::query(
        r#"INSERT INTO event_registrations (listing_id, user_id, attendee_email)
           VALUES ($1, $2, $3)
           ON CONFLICT (listing_id, attendee_email) DO NOTHING
           RETURNING id"#,
    )
    .bind(listing_id)
    .bind(user_id)
    .bind(&attendee_email)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(registration) = registration else {
        return Err(AppError::Conflict("already registered for this event".to_string()));
    };
    let registration_id: i32 = registration.get("id");

    let owner_email: String = sqlx::query("SELECT email FROM users WHERE id = $1")
        .bind(listing.owner_id)
        .fetch_one(&mut *tx)
        .await?
        .get("email");

    notify::enqueue(
        &mut *tx,
        &Notification::EventRegistration(EventRegistrationEmail {
            to: owner_email,
            event_name: listing.title.clone(),
            attendee_email: attendee_email.clone(),
        }),
    )
    .await?;

    tx.commit().await?;

    log::info!("event {} registration {} by user {}", listing_id, registration_id, user_id);
    Ok(registration_id)
}
