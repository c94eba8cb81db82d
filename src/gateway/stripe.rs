// src/gateway/stripe.rs
//
// Card checkout: hosted Checkout Sessions plus signed webhook events.
// Auth: `Authorization: Bearer <secret key>`, bodies are form-encoded.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{ChargeHandle, ChargeRequest, GatewayError};
use crate::config::StripeConfig;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: CheckoutSession,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

impl StripeClient {
    pub fn new(http: reqwest::Client, config: &StripeConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        req: &ChargeRequest,
    ) -> Result<ChargeHandle, GatewayError> {
        let return_url = req
            .return_url
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidResponse("return url is required".into()))?;
        let separator = if return_url.contains('?') { '&' } else { '?' };

        let form: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("client_reference_id", req.purchase_id.to_string()),
            ("customer_email", req.payer_email.clone()),
            (
                "success_url",
                format!("{return_url}{separator}purchase={}&status=success", req.purchase_id),
            ),
            (
                "cancel_url",
                format!("{return_url}{separator}purchase={}&status=cancel", req.purchase_id),
            ),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", req.currency.clone()),
            ("line_items[0][price_data][unit_amount]", req.amount.to_string()),
            ("line_items[0][price_data][product_data][name]", req.description.clone()),
            ("metadata[purchase_id]", req.purchase_id.to_string()),
        ];
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| GatewayError::InvalidResponse(format!("form encode: {e}")))?;

        let resp = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", req.purchase_id.to_string())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let session: CheckoutSessionResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::InvalidResponse(format!("missing url; body={body}")))?;

        Ok(ChargeHandle::Redirect {
            session_id: session.id,
            url,
        })
    }

    /// Verifies `Stripe-Signature` and parses the event body.
    pub fn parse_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_unix: i64,
    ) -> Result<WebhookEvent, GatewayError> {
        verify_signature(&self.webhook_secret, payload, signature_header, now_unix)?;
        serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidResponse(format!("webhook body: {e}")))
    }
}

/// Checks `t=<unix>,v1=<hex>[,v1=<hex>...]` against HMAC-SHA256(secret, "{t}.{payload}").
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now_unix: i64,
) -> Result<(), GatewayError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| GatewayError::Signature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(GatewayError::Signature("missing v1 signature".into()));
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(GatewayError::Signature("timestamp outside tolerance".into()));
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mac = signed_payload_mac(secret, timestamp, payload)?;
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(GatewayError::Signature("no matching signature".into()))
}

/// Produces a header value for `payload`; used by tests and local tooling.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, GatewayError> {
    let mac = signed_payload_mac(secret, timestamp, payload)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn signed_payload_mac(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<Hmac<Sha256>, GatewayError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Signature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn accepts_freshly_signed_payload() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(SECRET, body, 1_700_000_000).unwrap();
        assert!(verify_signature(SECRET, body, &header, 1_700_000_010).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload(SECRET, b"original", 1_700_000_000).unwrap();
        let err = verify_signature(SECRET, b"tampered", &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, GatewayError::Signature(_)));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_payload(SECRET, b"x", 1_700_000_000).unwrap();
        let later = 1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1;
        assert!(verify_signature(SECRET, b"x", &header, later).is_err());
    }

    #[test]
    fn accepts_any_of_several_v1_values() {
        let good = sign_payload(SECRET, b"x", 1_700_000_000).unwrap();
        let v1 = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1=deadbeef,v1={v1},v0=ignored");
        assert!(verify_signature(SECRET, b"x", &header, 1_700_000_000).is_ok());
    }

    #[test]
    fn rejects_header_without_signature() {
        assert!(verify_signature(SECRET, b"x", "t=1700000000", 1_700_000_000).is_err());
        assert!(verify_signature(SECRET, b"x", "v1=abcd", 1_700_000_000).is_err());
    }
}
