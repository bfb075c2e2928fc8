//! Payment gateway clients.
//!
//! Each gateway is called once per customer action through a trait, so the
//! lead service owns the surrounding flow (validation, persistence, retry)
//! in a single place:
//!
//! - [`CheckoutGateway`] - Stripe hosted checkout and payment intents
//! - [`OrderGateway`] - PayPal orders
//! - [`webhook`] - Stripe webhook signature verification and event parsing

pub mod paypal;
pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;

use zero_cost_core::{FormId, Money, Plan};

pub use paypal::PayPalClient;
pub use stripe::StripeClient;

/// Errors returned by gateway clients.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Gateway rate limit hit. Value is the suggested wait in seconds.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Credentials were rejected.
    #[error("Unauthorized: invalid or expired credentials")]
    Unauthorized,

    /// Response body did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Could not obtain an OAuth access token.
    #[error("Token error: {0}")]
    Token(String),

    /// The order was captured before.
    #[error("Order already captured")]
    AlreadyCaptured,
}

/// A validated request to charge a lead for a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub plan: Plan,
    pub amount: Money,
    /// Lead the payment belongs to. Travels as gateway metadata.
    pub form_id: Option<FormId>,
    /// Sent as `Idempotency-Key` / `PayPal-Request-Id`.
    pub idempotency_key: String,
}

/// A Stripe hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// A Stripe payment intent for on-page card collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// A created PayPal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayPalOrder {
    pub id: String,
    pub status: String,
    /// Link the buyer follows to approve the order.
    pub approve_url: Option<String>,
}

/// Result of capturing a PayPal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayPalCapture {
    pub order_id: String,
    /// Order status, `COMPLETED` when the money moved.
    pub status: String,
    pub capture_id: Option<String>,
    pub amount: Option<Money>,
    /// The form id we attached when creating the order.
    pub custom_id: Option<String>,
}

impl PayPalCapture {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

/// Stripe-style gateway: hosted checkout sessions and payment intents.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn create_payment_intent(
        &self,
        request: &CheckoutRequest,
    ) -> Result<PaymentIntent, PaymentError>;
}

/// PayPal-style gateway: create an order, capture it after buyer approval.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(&self, request: &CheckoutRequest) -> Result<PayPalOrder, PaymentError>;

    async fn capture_order(&self, order_id: &str) -> Result<PayPalCapture, PaymentError>;
}

/// Pull a human-readable message out of a gateway error body.
///
/// Stripe nests it under `error.message`, PayPal puts it at `message`.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error_description"))
                .and_then(|m| m.as_str().map(str::to_owned))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Map a non-success response to a [`PaymentError`].
pub(crate) async fn error_from_response(response: reqwest::Response) -> PaymentError {
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return PaymentError::RateLimited(retry_after);
    }
    if status.as_u16() == 401 {
        return PaymentError::Unauthorized;
    }

    let body = response.text().await.unwrap_or_default();
    PaymentError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    }
}
