// src/api/webhooks.rs

use actix_web::{HttpRequest, HttpResponse, post, web};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::gateway::GatewayError;
use crate::gateway::stripe::CheckoutSession;
use crate::models::{Provider, Purchase};
use crate::purchases::{self, Settlement};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// What a verified event asks us to do with its purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    Settle,
    Fail,
    Ignore,
}

pub fn action_for(event_type: &str, session: &CheckoutSession) -> WebhookAction {
    match event_type {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded"
            if session.is_paid() =>
        {
            WebhookAction::Settle
        }
        "checkout.session.async_payment_failed" | "checkout.session.expired" => WebhookAction::Fail,
        _ => WebhookAction::Ignore,
    }
}

async fn find_purchase(state: &AppState, session: &CheckoutSession) -> AppResult<Option<Purchase>> {
    if let Some(id) = session
        .client_reference_id
        .as_deref()
        .and_then(|r| Uuid::parse_str(r).ok())
    {
        if let Some(p) = purchases::get(&state.pool, id).await? {
            return Ok(Some(p));
        }
    }
    purchases::find_by_provider_ref(&state.pool, Provider::Stripe, &session.id).await
}

/// Card payments are only credited here, after the signature checks out.
#[utoipa::path(
    post,
    path = "/api/payment/stripe-webhook",
    tag = "webhooks",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex>")),
    responses(
        (status = 200, description = "Event processed or ignored"),
        (status = 400, description = "Missing or invalid signature")
    )
)]
#[post("/api/payment/stripe-webhook")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let Some(signature) = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
    else {
        log::warn!("stripe webhook without signature header");
        return Ok(HttpResponse::BadRequest().json(json!({"error": "missing signature"})));
    };

    let event = match state
        .gateways
        .stripe
        .parse_webhook(&body, signature, Utc::now().timestamp())
    {
        Ok(e) => e,
        Err(GatewayError::Signature(reason)) => {
            log::warn!("stripe webhook rejected: {reason}");
            return Ok(HttpResponse::BadRequest().json(json!({"error": "invalid signature"})));
        }
        Err(e) => {
            log::warn!("stripe webhook unreadable: {e}");
            return Ok(HttpResponse::BadRequest().json(json!({"error": "invalid payload"})));
        }
    };

    let session = &event.data.object;
    let action = action_for(&event.event_type, session);
    if action == WebhookAction::Ignore {
        return Ok(HttpResponse::Ok().json(json!({"received": true, "ignored": true})));
    }

    let Some(purchase) = find_purchase(&state, session).await? else {
        // acknowledge so the provider stops retrying
        log::warn!(
            "stripe event {} for unknown session {}",
            event.id,
            session.id
        );
        return Ok(HttpResponse::Ok().json(json!({"received": true, "ignored": true})));
    };

    match action {
        WebhookAction::Settle => {
            let capture_id = session.payment_intent.as_deref().unwrap_or(&session.id);
            let settlement = purchases::settle(&state.pool, purchase.id, capture_id).await?;
            let duplicate = matches!(settlement, Settlement::AlreadySettled { .. });
            log::info!(
                "stripe event {} purchase={} settled duplicate={}",
                event.id,
                purchase.id,
                duplicate
            );
            Ok(HttpResponse::Ok().json(json!({
                "received": true,
                "purchaseId": purchase.id,
                "duplicate": duplicate,
            })))
        }
        WebhookAction::Fail => {
            purchases::mark_failed(&state.pool, purchase.id).await?;
            log::info!("stripe event {} purchase={} failed", event.id, purchase.id);
            Ok(HttpResponse::Ok().json(json!({"received": true, "purchaseId": purchase.id})))
        }
        WebhookAction::Ignore => Ok(HttpResponse::Ok().json(json!({"received": true, "ignored": true}))),
    }
}
