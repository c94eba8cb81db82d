// src/gateway/paypal.rs
//
// Wallet checkout: Orders v2 (create → payer approval → capture).
// Auth: OAuth2 client-credentials token per call.

use serde::Deserialize;
use serde_json::json;

use super::{CaptureOutcome, ChargeHandle, ChargeRequest, GatewayError};
use crate::config::PayPalConfig;
use crate::pricing::format_amount;

#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    issue: String,
}

impl OrderResponse {
    fn first_capture(&self) -> Option<&Capture> {
        self.purchase_units
            .iter()
            .filter_map(|u| u.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next()
    }

    fn outcome(&self) -> CaptureOutcome {
        match (self.status.as_str(), self.first_capture()) {
            ("COMPLETED", Some(c)) if c.status == "COMPLETED" => CaptureOutcome::Completed {
                capture_id: c.id.clone(),
            },
            ("COMPLETED", Some(c)) if c.status == "PENDING" => CaptureOutcome::Pending,
            ("COMPLETED", Some(c)) => CaptureOutcome::Declined {
                reason: format!("capture status {}", c.status),
            },
            ("APPROVED" | "CREATED" | "SAVED" | "PAYER_ACTION_REQUIRED", _) => {
                CaptureOutcome::Pending
            }
            (other, _) => CaptureOutcome::Declined {
                reason: format!("order status {other}"),
            },
        }
    }
}

impl PayPalClient {
    pub fn new(http: reqwest::Client, config: &PayPalConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let resp = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
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

        serde_json::from_str::<TokenResponse>(&body)
            .map(|t| t.access_token)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))
    }

    pub async fn create_order(&self, req: &ChargeRequest) -> Result<ChargeHandle, GatewayError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": req.purchase_id.to_string(),
                "custom_id": req.purchase_id.to_string(),
                "description": req.description,
                "amount": {
                    "currency_code": req.currency.to_uppercase(),
                    "value": format_amount(req.amount),
                }
            }]
        });

        let resp = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", req.purchase_id.to_string())
            .json(&body)
            .send()
            .await?;

        let order = read_order(resp).await?;
        let approve_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone());

        Ok(ChargeHandle::Order {
            order_id: order.id,
            approve_url,
        })
    }

    /// Captures an approved order. `request_id` makes provider-side retries idempotent.
    pub async fn capture_order(
        &self,
        order_id: &str,
        request_id: &str,
    ) -> Result<CaptureOutcome, GatewayError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{order_id}/capture",
                self.api_base
            ))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", request_id)
            .header("Content-Type", "application/json")
            .body("{}")
            .send()
            .await?;

        match read_order(resp).await {
            Ok(order) => Ok(order.outcome()),
            Err(GatewayError::Api { status: 422, body }) if is_already_captured(&body) => {
                log::info!("paypal order {order_id} already captured, reading order");
                self.get_order(order_id, &token).await.map(|o| o.outcome())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_order(&self, order_id: &str, token: &str) -> Result<OrderResponse, GatewayError> {
        let resp = self
            .http
            .get(format!("{}/v2/checkout/orders/{order_id}", self.api_base))
            .bearer_auth(token)
            .send()
            .await?;
        read_order(resp).await
    }
}

async fn read_order(resp: reqwest::Response) -> Result<OrderResponse, GatewayError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str::<OrderResponse>(&body)
        .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))
}

fn is_already_captured(body: &str) -> bool {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.details.iter().any(|d| d.issue == "ORDER_ALREADY_CAPTURED"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(raw: serde_json::Value) -> OrderResponse {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn completed_capture_yields_capture_id() {
        let o = order(json!({
            "id": "ORDER-1",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": { "captures": [{ "id": "CAP-1", "status": "COMPLETED" }] }
            }]
        }));
        assert_eq!(
            o.outcome(),
            CaptureOutcome::Completed {
                capture_id: "CAP-1".into()
            }
        );
    }

    #[test]
    fn unapproved_order_is_pending() {
        let o = order(json!({ "id": "ORDER-1", "status": "CREATED" }));
        assert_eq!(o.outcome(), CaptureOutcome::Pending);
    }

    #[test]
    fn declined_capture_is_reported() {
        let o = order(json!({
            "id": "ORDER-1",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": { "captures": [{ "id": "CAP-1", "status": "DECLINED" }] }
            }]
        }));
        assert!(matches!(o.outcome(), CaptureOutcome::Declined { .. }));
    }

    #[test]
    fn detects_already_captured_error() {
        let body = r#"{"name":"UNPROCESSABLE_ENTITY","details":[{"issue":"ORDER_ALREADY_CAPTURED"}]}"#;
        assert!(is_already_captured(body));
        assert!(!is_already_captured(r#"{"details":[{"issue":"INSTRUMENT_DECLINED"}]}"#));
        assert!(!is_already_captured("not json"));
    }
}
