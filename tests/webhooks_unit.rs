use actix_web::test::TestRequest;
use actix_web::{App, web};
use chrono::Utc;
use serde_json::{Value, json};

use listings_credits::api;
use listings_credits::api::webhooks::{WebhookAction, action_for};
use listings_credits::config::StripeConfig;
use listings_credits::gateway::stripe::{CheckoutSession, StripeClient, sign_payload};
use listings_credits::models::Role;

mod support;

fn session(payment_status: &str) -> CheckoutSession {
    serde_json::from_value(json!({
        "id": "cs_1",
        "client_reference_id": "8a3c1e4e-7d4b-4a43-9c55-1b1f5f0f3e10",
        "payment_status": payment_status
    }))
    .expect("session")
}

#[test]
fn only_paid_sessions_settle() {
    assert_eq!(
        action_for("checkout.session.completed", &session("paid")),
        WebhookAction::Settle
    );
    assert_eq!(
        action_for("checkout.session.completed", &session("unpaid")),
        WebhookAction::Ignore
    );
    assert_eq!(
        action_for("checkout.session.async_payment_succeeded", &session("paid")),
        WebhookAction::Settle
    );
    assert_eq!(
        action_for("checkout.session.async_payment_failed", &session("unpaid")),
        WebhookAction::Fail
    );
    assert_eq!(
        action_for("checkout.session.expired", &session("unpaid")),
        WebhookAction::Fail
    );
    assert_eq!(
        action_for("payment_intent.created", &session("paid")),
        WebhookAction::Ignore
    );
}

#[test]
fn parse_webhook_reads_the_session_object() {
    let client = StripeClient::new(
        reqwest::Client::new(),
        &StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: support::WEBHOOK_SECRET.to_string(),
            api_base: "http://127.0.0.1:1".to_string(),
        },
    );
    let body = json!({
        "id": "evt_9",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_9",
            "object": "checkout.session",
            "client_reference_id": "abc",
            "payment_status": "paid",
            "payment_intent": "pi_9",
            "amount_total": 4999
        }}
    })
    .to_string();
    let now = Utc::now().timestamp();
    let header = sign_payload(support::WEBHOOK_SECRET, body.as_bytes(), now).expect("sign");

    let event = client.parse_webhook(body.as_bytes(), &header, now).expect("event");
    assert_eq!(event.id, "evt_9");
    assert_eq!(event.data.object.id, "cs_9");
    assert_eq!(event.data.object.payment_intent.as_deref(), Some("pi_9"));
    assert!(event.data.object.is_paid());

    let wrong_secret = sign_payload("whsec_other", body.as_bytes(), now).expect("sign");
    assert!(client.parse_webhook(body.as_bytes(), &wrong_secret, now).is_err());
}

#[actix_web::test]
async fn webhook_without_valid_signature_is_rejected() {
    let state = web::Data::new(support::lazy_state("http://127.0.0.1:1"));
    let app = actix_web::test::init_service(
        App::new().app_data(state.clone()).configure(api::configure),
    )
    .await;

    let body = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1","payment_status":"paid"}}}"#;

    let req = TestRequest::post()
        .uri("/api/payment/stripe-webhook")
        .set_payload(body)
        .to_request();
    let resp = actix_web::test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let forged = sign_payload("whsec_attacker", body.as_bytes(), Utc::now().timestamp()).expect("sign");
    let req = TestRequest::post()
        .uri("/api/payment/stripe-webhook")
        .insert_header(("Stripe-Signature", forged))
        .set_payload(body)
        .to_request();
    let resp = actix_web::test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let json: Value = actix_web::test::read_body_json(resp).await;
    assert_eq!(json["error"], "invalid signature");

    let stale = sign_payload(support::WEBHOOK_SECRET, body.as_bytes(), Utc::now().timestamp() - 3600)
        .expect("sign");
    let req = TestRequest::post()
        .uri("/api/payment/stripe-webhook")
        .insert_header(("Stripe-Signature", stale))
        .set_payload(body)
        .to_request();
    let resp = actix_web::test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn protected_routes_require_a_valid_token() {
    let state = web::Data::new(support::lazy_state("http://127.0.0.1:1"));
    let app = actix_web::test::init_service(
        App::new().app_data(state.clone()).configure(api::configure),
    )
    .await;

    let req = TestRequest::get().uri("/api/credits").to_request();
    let resp = actix_web::test::try_call_service(&app, req).await;
    let status = match resp {
        Ok(r) => r.status(),
        Err(e) => e.as_response_error().status_code(),
    };
    assert_eq!(status.as_u16(), 401);

    let req = TestRequest::get()
        .uri("/api/credits")
        .insert_header(("Authorization", "Bearer not-a-jwt"))
        .to_request();
    let status = match actix_web::test::try_call_service(&app, req).await {
        Ok(r) => r.status(),
        Err(e) => e.as_response_error().status_code(),
    };
    assert_eq!(status.as_u16(), 401);
}

#[actix_web::test]
async fn card_checkout_requires_an_absolute_return_url() {
    let state = web::Data::new(support::lazy_state("http://127.0.0.1:1"));
    let app = actix_web::test::init_service(
        App::new().app_data(state.clone()).configure(api::configure),
    )
    .await;

    let req = TestRequest::post()
        .uri("/api/payment/stripe-checkout-session")
        .insert_header(support::bearer(1, Role::User))
        .set_json(json!({"product": "cars_basicListing", "returnUrl": "/relative"}))
        .to_request();
    let resp = actix_web::test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let json: Value = actix_web::test::read_body_json(resp).await;
    assert_eq!(json["code"], "validation");
}
