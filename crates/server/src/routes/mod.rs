//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                               - Liveness
//! GET  /api/supabase-check                   - Database connectivity
//!
//! # Leads
//! POST /api/store-form-data                  - Save the lead form (staging row)
//! GET  /api/payment-status?formId=           - Poll a lead's payment status
//!
//! # Stripe
//! GET  /api/checkout-redirect                - 303 to a hosted checkout session
//! POST /api/checkout                         - Create a hosted checkout session
//! POST /api/create-payment-intent            - Create a payment intent
//! POST /api/webhook                          - Signed Stripe events
//!
//! # PayPal
//! POST /api/paypal/orders                    - Create an order
//! POST /api/paypal/orders/{order_id}/capture - Capture an approved order
//! ```
//!
//! Write endpoints are split out so the binary can rate limit them without
//! touching the webhook or health checks.

pub mod checkout;
pub mod forms;
pub mod paypal;
pub mod status;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Endpoints that create leads or gateway objects.
pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/api/store-form-data", post(forms::store_form_data))
        .route("/api/checkout-redirect", get(checkout::checkout_redirect))
        .route("/api/checkout", post(checkout::create_checkout))
        .route(
            "/api/create-payment-intent",
            post(checkout::create_payment_intent),
        )
        .route("/api/paypal/orders", post(paypal::create_order))
        .route(
            "/api/paypal/orders/{order_id}/capture",
            post(paypal::capture_order),
        )
}

/// Health checks, status polling and the webhook.
pub fn open_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(status::health))
        .route("/api/supabase-check", get(status::database_check))
        .route("/api/payment-status", get(status::payment_status))
        .route("/api/webhook", post(webhook::stripe_webhook))
}

/// Create all routes.
pub fn routes() -> Router<AppState> {
    Router::new().merge(open_routes()).merge(write_routes())
}
