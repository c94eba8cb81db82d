// src/gateway/mod.rs
//
// Payment gateway adapters. Both providers expose the same two steps:
// create a charge for a persisted purchase, then confirm it. Card checkout is
// confirmed by a signed webhook, wallet orders by an explicit capture call.

pub mod paypal;
pub mod stripe;

use uuid::Uuid;

use crate::models::Provider;

pub use paypal::PayPalClient;
pub use stripe::StripeClient;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("signature verification failed: {0}")]
    Signature(String),
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub purchase_id: Uuid,
    /// Minor units, already discounted server-side.
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub payer_email: String,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeHandle {
    /// Hosted checkout; the payer is sent to `url`.
    Redirect { session_id: String, url: String },
    /// Wallet order awaiting payer approval and a capture call.
    Order {
        order_id: String,
        approve_url: Option<String>,
    },
}

impl ChargeHandle {
    pub fn provider_ref(&self) -> &str {
        match self {
            ChargeHandle::Redirect { session_id, .. } => session_id,
            ChargeHandle::Order { order_id, .. } => order_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Completed { capture_id: String },
    Pending,
    Declined { reason: String },
}

#[derive(Clone)]
pub struct Gateways {
    pub stripe: StripeClient,
    pub paypal: PayPalClient,
}

impl Gateways {
    pub async fn create_charge(
        &self,
        provider: Provider,
        req: &ChargeRequest,
    ) -> Result<ChargeHandle, GatewayError> {
        match provider {
            Provider::Stripe => self.stripe.create_checkout_session(req).await,
            Provider::PayPal => self.paypal.create_order(req).await,
        }
    }
}
