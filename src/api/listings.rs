// src/api/listings.rs

use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, get, post, web};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use utoipa::{IntoParams, ToSchema};

use crate::AppState;
use crate::api::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::features;
use crate::models::{FeatureType, Listing, ListingKind, Role};
use crate::moderation::{self, NewListing};
use crate::{events, storage};

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadedImage {
    pub id: i32,
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub images: Vec<UploadedImage>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequest {
    pub feature_type: FeatureType,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeaturedQuery {
    pub kind: Option<ListingKind>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeaturedResponse {
    pub listings: Vec<Listing>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventRegistrationRequest {
    /// Defaults to the caller's account email.
    pub attendee_email: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/listings",
    tag = "listings",
    request_body = NewListing,
    responses(
        (status = 201, description = "Submitted for moderation", body = Listing),
        (status = 400, description = "Invalid listing")
    ),
    security(("bearer_auth" = []))
)]
#[post("/listings")]
pub async fn create_listing(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<NewListing>,
) -> AppResult<HttpResponse> {
    let listing = moderation::submit(&state.pool, user.id, &payload).await?;
    Ok(HttpResponse::Created().json(listing))
}

/// Stores every `image/*` part under `<category>/<listingId>_<filename>`.
#[utoipa::path(
    post,
    path = "/api/listings/{id}/images",
    tag = "listings",
    params(("id" = i32, Path, description = "Listing id")),
    request_body(content = String, description = "Image files", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Images stored", body = UploadResponse),
        (status = 400, description = "No image in the request"),
        (status = 403, description = "Not the owner")
    ),
    security(("bearer_auth" = []))
)]
#[post("/listings/{id}/images")]
pub async fn upload_images(
    mut payload: Multipart,
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
) -> AppResult<HttpResponse> {
    let listing = moderation::get(&state.pool, path.into_inner()).await?;
    if listing.owner_id != user.id && user.role != Role::Admin {
        return Err(AppError::Forbidden);
    }

    let mut images = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::Validation(format!("multipart: {e}")))?;

        let content_type = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        if !content_type.starts_with("image/") {
            continue;
        }
        let filename = field
            .content_disposition()
            .get_filename()
            .unwrap_or("image")
            .to_string();

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| AppError::Validation(format!("multipart: {e}")))?;
            if bytes.len() + data.len() > MAX_IMAGE_BYTES {
                return Err(AppError::Validation(format!("{filename} exceeds 10 MB")));
            }
            bytes.extend_from_slice(&data);
        }
        if bytes.is_empty() {
            continue;
        }

        // millis prefix keeps repeated uploads of one filename apart
        let name = format!("{}_{}", Utc::now().timestamp_millis(), filename);
        let key = storage::object_key(listing.kind.category(), listing.id, &name);
        let url = state.storage.upload(&key, bytes, &content_type).await?;
        let id = moderation::add_image(&state.pool, listing.id, &key, &url).await?;
        images.push(UploadedImage { id, url });
    }

    if images.is_empty() {
        return Err(AppError::Validation("no image uploaded".to_string()));
    }

    log::info!(
        "listing {} received {} image(s) from user {}",
        listing.id,
        images.len(),
        user.id
    );
    Ok(HttpResponse::Ok().json(UploadResponse { images }))
}

/// Spends one credit of the listing's tier. Repeating a request with the same
/// `Idempotency-Key` returns the first result without spending again.
#[utoipa::path(
    post,
    path = "/api/listings/{id}/feature",
    tag = "listings",
    params(
        ("id" = i32, Path, description = "Listing id"),
        ("Idempotency-Key" = Option<String>, Header, description = "Client retry key")
    ),
    request_body = FeatureRequest,
    responses(
        (status = 200, description = "Feature window open", body = features::Activation),
        (status = 402, description = "Insufficient credit"),
        (status = 403, description = "Not the owner"),
        (status = 409, description = "Listing not approved")
    ),
    security(("bearer_auth" = []))
)]
#[post("/listings/{id}/feature")]
pub async fn feature_listing(
    req: HttpRequest,
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<FeatureRequest>,
) -> AppResult<HttpResponse> {
    let idempotency_key = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());
    if idempotency_key.is_some_and(|k| k.len() > 200) {
        return Err(AppError::Validation("Idempotency-Key is too long".to_string()));
    }

    let activation = features::activate(
        &state.pool,
        user.id,
        path.into_inner(),
        payload.feature_type,
        idempotency_key,
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(activation))
}

#[utoipa::path(
    get,
    path = "/api/listings/featured",
    tag = "listings",
    params(FeaturedQuery),
    responses((status = 200, description = "Listings with a running feature window", body = FeaturedResponse))
)]
#[get("/api/listings/featured")]
pub async fn featured_listings(
    state: web::Data<AppState>,
    query: web::Query<FeaturedQuery>,
) -> AppResult<HttpResponse> {
    let listings = features::featured(&state.pool, query.kind, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(FeaturedResponse { listings }))
}

#[utoipa::path(
    post,
    path = "/api/events/{id}/register",
    tag = "listings",
    params(("id" = i32, Path, description = "Event listing id")),
    request_body = EventRegistrationRequest,
    responses(
        (status = 201, description = "Registered"),
        (status = 404, description = "No approved event with that id"),
        (status = 409, description = "Already registered")
    ),
    security(("bearer_auth" = []))
)]
#[post("/events/{id}/register")]
pub async fn register_for_event(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: Option<web::Json<EventRegistrationRequest>>,
) -> AppResult<HttpResponse> {
    let payload = payload.map(|p| p.into_inner()).unwrap_or_default();
    let attendee_email = match payload.attendee_email {
        Some(email) => email,
        None => sqlx::query("SELECT email FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AppError::NotFound("user"))?
            .get("email"),
    };

    let listing_id = path.into_inner();
    let registration_id = events::register(&state.pool, listing_id, user.id, &attendee_email).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({
        "registrationId": registration_id,
        "listingId": listing_id,
    })))
}
