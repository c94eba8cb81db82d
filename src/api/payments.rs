// src/api/payments.rs

use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppState;
use crate::api::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::gateway::{CaptureOutcome, ChargeHandle, ChargeRequest};
use crate::models::{Provider, Purchase, PurchaseStatus};
use crate::purchases::{self, Settlement};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Product key from the price list, e.g. `cars_premiumListing`.
    pub product: String,
    pub quantity: Option<i32>,
    pub coupon_code: Option<String>,
    /// Optional client-side total in minor units; must equal the server quote.
    pub amount: Option<i64>,
    /// Card checkout only: where the hosted page sends the payer back.
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub url: String,
    pub purchase_id: Uuid,
    pub amount: i64,
    pub discount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayPalOrderResponse {
    pub order_id: String,
    pub purchase_id: Uuid,
    pub approve_url: Option<String>,
    pub amount: i64,
    pub discount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub order_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub success: bool,
    pub purchase_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn payer_email(state: &AppState, user_id: i32) -> AppResult<String> {
    let email: String = sqlx::query("SELECT email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("user"))?
        .get("email");
    Ok(email)
}

/// Quotes, persists the pending purchase, then opens the charge with the provider.
async fn start_checkout(
    state: &AppState,
    user_id: i32,
    req: &CheckoutRequest,
    provider: Provider,
) -> AppResult<(Purchase, ChargeHandle)> {
    let quote = purchases::quote(
        &state.pool,
        &req.product,
        req.quantity.unwrap_or(1),
        req.coupon_code.as_deref(),
        req.amount,
        &state.config.currency,
        Utc::now(),
    )
    .await?;

    let email = payer_email(state, user_id).await?;
    let purchase = purchases::create(&state.pool, user_id, &quote, provider).await?;

    let charge = ChargeRequest {
        purchase_id: purchase.id,
        amount: quote.amount,
        currency: quote.currency.clone(),
        description: format!("{} x{}", quote.product.name, quote.quantity),
        payer_email: email,
        return_url: req.return_url.clone(),
    };

    let handle = match state.gateways.create_charge(provider, &charge).await {
        Ok(h) => h,
        Err(e) => {
            log::error!(
                "{} charge failed purchase={} user_id={}: {}",
                provider,
                purchase.id,
                user_id,
                e
            );
            purchases::mark_failed(&state.pool, purchase.id).await?;
            return Err(e.into());
        }
    };

    purchases::attach_provider_ref(&state.pool, purchase.id, handle.provider_ref()).await?;

    log::info!(
        "{} checkout created purchase={} user_id={} product={} qty={} amount={} discount={}",
        provider,
        purchase.id,
        user_id,
        quote.product.key,
        quote.quantity,
        quote.amount,
        quote.discount
    );
    Ok((purchase, handle))
}

#[utoipa::path(
    post,
    path = "/api/payment/stripe-checkout-session",
    tag = "payments",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Hosted checkout created", body = CheckoutSessionResponse),
        (status = 400, description = "Unknown product, bad quantity, invalid coupon or amount mismatch"),
        (status = 502, description = "Card provider unavailable")
    ),
    security(("bearer_auth" = []))
)]
#[post("/payment/stripe-checkout-session")]
pub async fn stripe_checkout_session(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CheckoutRequest>,
) -> AppResult<HttpResponse> {
    let return_url = payload.return_url.as_deref().unwrap_or_default();
    if !(return_url.starts_with("https://") || return_url.starts_with("http://")) {
        return Err(AppError::Validation("returnUrl must be an absolute URL".to_string()));
    }

    let (purchase, handle) = start_checkout(&state, user.id, &payload, Provider::Stripe).await?;
    let ChargeHandle::Redirect { url, .. } = handle else {
        return Err(AppError::Internal("card provider returned a non-redirect charge".to_string()));
    };

    Ok(HttpResponse::Ok().json(CheckoutSessionResponse {
        url,
        purchase_id: purchase.id,
        amount: purchase.amount,
        discount: purchase.discount_amount,
    }))
}

#[utoipa::path(
    post,
    path = "/api/payment/paypal-order",
    tag = "payments",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Wallet order created", body = PayPalOrderResponse),
        (status = 400, description = "Unknown product, bad quantity, invalid coupon or amount mismatch"),
        (status = 502, description = "Wallet provider unavailable")
    ),
    security(("bearer_auth" = []))
)]
#[post("/payment/paypal-order")]
pub async fn paypal_order(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CheckoutRequest>,
) -> AppResult<HttpResponse> {
    let (purchase, handle) = start_checkout(&state, user.id, &payload, Provider::PayPal).await?;
    let ChargeHandle::Order {
        order_id,
        approve_url,
    } = handle
    else {
        return Err(AppError::Internal("wallet provider returned a non-order charge".to_string()));
    };

    Ok(HttpResponse::Ok().json(PayPalOrderResponse {
        order_id,
        purchase_id: purchase.id,
        approve_url,
        amount: purchase.amount,
        discount: purchase.discount_amount,
    }))
}

#[utoipa::path(
    post,
    path = "/api/payment/paypal-capture",
    tag = "payments",
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Captured (or already captured)", body = CaptureResponse),
        (status = 202, description = "Capture pending at the provider", body = CaptureResponse),
        (status = 402, description = "Capture declined", body = CaptureResponse),
        (status = 404, description = "Unknown order")
    ),
    security(("bearer_auth" = []))
)]
#[post("/payment/paypal-capture")]
pub async fn paypal_capture(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    payload: web::Json<CaptureRequest>,
) -> AppResult<HttpResponse> {
    let order_id = payload.order_id.trim();
    let purchase = purchases::find_by_provider_ref(&state.pool, Provider::PayPal, order_id)
        .await?
        .filter(|p| p.user_id == user.id)
        .ok_or(AppError::NotFound("order"))?;

    // Retried capture: credits were granted on the first call.
    if purchase.status == PurchaseStatus::Captured {
        return Ok(HttpResponse::Ok().json(CaptureResponse {
            success: true,
            purchase_id: purchase.id,
            remaining: None,
            error: None,
        }));
    }

    let request_id = format!("capture-{}", purchase.id);
    let outcome = state
        .gateways
        .paypal
        .capture_order(order_id, &request_id)
        .await?;

    match outcome {
        CaptureOutcome::Completed { capture_id } => {
            let settlement = purchases::settle(&state.pool, purchase.id, &capture_id).await?;
            let remaining = match settlement {
                Settlement::Settled { remaining, .. } => Some(remaining),
                Settlement::AlreadySettled { .. } => None,
            };
            Ok(HttpResponse::Ok().json(CaptureResponse {
                success: true,
                purchase_id: purchase.id,
                remaining,
                error: None,
            }))
        }
        CaptureOutcome::Pending => {
            log::info!("paypal capture pending purchase={} order={}", purchase.id, order_id);
            Ok(HttpResponse::Accepted().json(CaptureResponse {
                success: false,
                purchase_id: purchase.id,
                remaining: None,
                error: Some("payment is pending".to_string()),
            }))
        }
        CaptureOutcome::Declined { reason } => {
            log::warn!(
                "paypal capture declined purchase={} order={} reason={}",
                purchase.id,
                order_id,
                reason
            );
            purchases::mark_failed(&state.pool, purchase.id).await?;
            Ok(HttpResponse::PaymentRequired().json(CaptureResponse {
                success: false,
                purchase_id: purchase.id,
                remaining: None,
                error: Some(reason),
            }))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/payment/purchases/{id}",
    tag = "payments",
    params(("id" = Uuid, Path, description = "Purchase id")),
    responses(
        (status = 200, description = "Purchase status", body = Purchase),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
#[get("/payment/purchases/{id}")]
pub async fn purchase_status(
    state: web::Data<AppState>,
    user: web::ReqData<AuthUser>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let purchase = purchases::get_for_user(&state.pool, path.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(purchase))
}
