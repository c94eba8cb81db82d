// src/api/admin.rs
//
// Moderator endpoints. Every handler checks the `admin` role itself.

use actix_web::{HttpResponse, get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::AppState;
use crate::api::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::features::{self, FeatureWindow};
use crate::models::{FeatureType, Listing, ListingKind};
use crate::{ledger, moderation, pricing};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PendingQuery {
    pub kind: Option<ListingKind>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingResponse {
    pub listings: Vec<Listing>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWindowRequest {
    pub feature_type: FeatureType,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWindowResponse {
    pub listing_id: i32,
    pub window: FeatureWindow,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustCreditsRequest {
    pub user_id: i32,
    pub tier_key: String,
    /// Signed; the balance cannot go below zero.
    pub delta: i64,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustCreditsResponse {
    pub user_id: i32,
    pub tier_key: String,
    pub remaining: i64,
}

#[utoipa::path(
    get,
    path = "/api/admin/listings/pending",
    tag = "admin",
    params(PendingQuery),
    responses(
        (status = 200, description = "Oldest first", body = PendingResponse),
        (status = 403, description = "Not an admin")
    ),
    security(("bearer_auth" = []))
)]
#[get("/listings/pending")]
pub async fn pending_listings(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<PendingQuery>,
) -> AppResult<HttpResponse> {
    user.require_admin()?;
    let listings = moderation::pending(&state.pool, query.kind).await?;
    Ok(HttpResponse::Ok().json(PendingResponse { listings }))
}

#[utoipa::path(
    post,
    path = "/api/admin/listings/{id}/approve",
    tag = "admin",
    params(("id" = i32, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Approved", body = Listing),
        (status = 409, description = "Listing already moderated")
    ),
    security(("bearer_auth" = []))
)]
#[post("/listings/{id}/approve")]
pub async fn approve_listing(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
) -> AppResult<HttpResponse> {
    user.require_admin()?;
    let listing = moderation::approve(&state.pool, path.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    post,
    path = "/api/admin/listings/{id}/reject",
    tag = "admin",
    params(("id" = i32, Path, description = "Listing id")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Rejected", body = Listing),
        (status = 409, description = "Listing already moderated")
    ),
    security(("bearer_auth" = []))
)]
#[post("/listings/{id}/reject")]
pub async fn reject_listing(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: Option<web::Json<RejectRequest>>,
) -> AppResult<HttpResponse> {
    user.require_admin()?;
    let listing_id = path.into_inner();
    let reason = payload.and_then(|p| p.into_inner().reason);

    let listing = moderation::reject(&state.pool, listing_id, user.id, reason.as_deref()).await?;

    // the listing row stays until the retention purge; its images go now
    let keys = moderation::detach_images(&state.pool, listing_id).await?;
    state.storage.delete_best_effort(&keys).await;

    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    post,
    path = "/api/admin/listings/{id}/feature-window",
    tag = "admin",
    params(("id" = i32, Path, description = "Listing id")),
    request_body = FeatureWindowRequest,
    responses(
        (status = 200, description = "Window set, no credit spent", body = FeatureWindowResponse),
        (status = 400, description = "End is not in the future"),
        (status = 409, description = "Listing not approved")
    ),
    security(("bearer_auth" = []))
)]
#[post("/listings/{id}/feature-window")]
pub async fn set_feature_window(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<i32>,
    payload: web::Json<FeatureWindowRequest>,
) -> AppResult<HttpResponse> {
    user.require_admin()?;
    let listing_id = path.into_inner();
    let window = features::set_window(
        &state.pool,
        listing_id,
        payload.feature_type,
        payload.end,
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(FeatureWindowResponse { listing_id, window }))
}

#[utoipa::path(
    post,
    path = "/api/admin/credits/adjust",
    tag = "admin",
    request_body = AdjustCreditsRequest,
    responses(
        (status = 200, description = "New balance", body = AdjustCreditsResponse),
        (status = 400, description = "Unknown tier or zero delta"),
        (status = 402, description = "Adjustment would go below zero")
    ),
    security(("bearer_auth" = []))
)]
#[post("/credits/adjust")]
pub async fn adjust_credits(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<AdjustCreditsRequest>,
) -> AppResult<HttpResponse> {
    user.require_admin()?;
    let tier = pricing::tier(&payload.tier_key)
        .ok_or_else(|| AppError::Validation(format!("unknown tier `{}`", payload.tier_key)))?;
    if payload.delta == 0 {
        return Err(AppError::Validation("delta must be non-zero".to_string()));
    }
    let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(payload.user_id)
        .fetch_optional(&state.pool)
        .await?
        .is_some();
    if !exists {
        return Err(AppError::NotFound("user"));
    }

    let reference = match payload.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("admin:{}:{}", user.id, note),
        None => format!("admin:{}", user.id),
    };
    let remaining =
        ledger::adjust(&state.pool, payload.user_id, tier.key, payload.delta, &reference).await?;

    log::info!(
        "admin {} adjusted user {} tier {} by {} -> {}",
        user.id,
        payload.user_id,
        tier.key,
        payload.delta,
        remaining
    );
    Ok(HttpResponse::Ok().json(AdjustCreditsResponse {
        user_id: payload.user_id,
        tier_key: tier.key.to_string(),
        remaining,
    }))
}
