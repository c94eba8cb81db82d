// src/api/credits.rs

use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::AppState;
use crate::api::auth::AuthUser;
use crate::coupons;
use crate::error::AppResult;
use crate::ledger;
use crate::models::{CreditBalance, CreditEntry};

#[derive(Debug, Serialize, ToSchema)]
pub struct BalancesResponse {
    pub balances: Vec<CreditBalance>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Defaults to 50, capped at 200.
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub entries: Vec<CreditEntry>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateCouponRequest {
    pub code: String,
    /// `cars`, `events`, `auctions`, `hotels`, `clubs` or `others`.
    pub category: String,
    /// Base amount in minor units.
    pub amount: i64,
}

#[utoipa::path(
    get,
    path = "/api/credits",
    tag = "credits",
    responses((status = 200, description = "Remaining credits per tier", body = BalancesResponse)),
    security(("bearer_auth" = []))
)]
#[get("/credits")]
pub async fn balances(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
) -> AppResult<HttpResponse> {
    let balances = ledger::balances(&state.pool, user.id).await?;
    Ok(HttpResponse::Ok().json(BalancesResponse { balances }))
}

#[utoipa::path(
    get,
    path = "/api/credits/history",
    tag = "credits",
    params(HistoryQuery),
    responses((status = 200, description = "Newest journal entries first", body = HistoryResponse)),
    security(("bearer_auth" = []))
)]
#[get("/credits/history")]
pub async fn history(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    query: web::Query<HistoryQuery>,
) -> AppResult<HttpResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let entries = ledger::history(&state.pool, user.id, limit).await?;
    Ok(HttpResponse::Ok().json(HistoryResponse { entries }))
}

/// Preview only. The discount is recomputed when the charge is created.
#[utoipa::path(
    post,
    path = "/api/coupons/validate",
    tag = "credits",
    request_body = ValidateCouponRequest,
    responses((status = 200, description = "Validation result", body = coupons::CouponValidation)),
    security(("bearer_auth" = []))
)]
#[post("/coupons/validate")]
pub async fn validate_coupon(
    state: web::Data<AppState>,
    payload: web::Json<ValidateCouponRequest>,
) -> AppResult<HttpResponse> {
    let result = coupons::validate(
        &state.pool,
        &payload.code,
        &payload.category,
        payload.amount,
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(result))
}
