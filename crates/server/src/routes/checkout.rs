//! Stripe checkout entry points.
//!
//! Three ways into the same flow: a browser redirect for plain links, and
//! JSON endpoints for hosted checkout and on-page card collection. The
//! amount is checked against the plan price before Stripe is called.

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Redirect,
};
use serde::Serialize;
use tracing::instrument;

use zero_cost_core::PaymentProvider;

use crate::error::Result;
use crate::services::CheckoutParams;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
}

/// Redirect the browser to a new hosted checkout session.
///
/// GET /api/checkout-redirect?amount=9900&currency=brl&plan=monthly&formId=...
#[instrument(skip(state, query))]
pub async fn checkout_redirect(
    State(state): State<AppState>,
    query: std::result::Result<Query<CheckoutParams>, QueryRejection>,
) -> Result<Redirect> {
    let Query(params) = query?;
    let request = state
        .leads()
        .prepare_checkout(params, PaymentProvider::Stripe)
        .await?;
    let session = state.leads().start_checkout_session(&request).await?;

    Ok(Redirect::to(&session.url))
}

/// Create a hosted checkout session.
///
/// POST /api/checkout
#[instrument(skip(state, payload))]
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CheckoutParams>, JsonRejection>,
) -> Result<Json<CheckoutResponse>> {
    let Json(params) = payload?;
    let request = state
        .leads()
        .prepare_checkout(params, PaymentProvider::Stripe)
        .await?;
    let session = state.leads().start_checkout_session(&request).await?;

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Create a payment intent for Stripe Elements.
///
/// POST /api/create-payment-intent
#[instrument(skip(state, payload))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CheckoutParams>, JsonRejection>,
) -> Result<Json<PaymentIntentResponse>> {
    let Json(params) = payload?;
    let request = state
        .leads()
        .prepare_checkout(params, PaymentProvider::Stripe)
        .await?;
    let intent = state.leads().start_payment_intent(&request).await?;

    Ok(Json(PaymentIntentResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{StatusCode, header::LOCATION};

    use zero_cost_core::Plan;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn test_checkout_redirect_sees_other_to_stripe() {
        let app = TestApp::new();
        let form_id = app.store_lead("ana@example.com", "monthly").await;

        let response = app
            .get(&format!(
                "/api/checkout-redirect?amount=9900&currency=brl&plan=monthly&formId={form_id}"
            ))
            .await;

        assert_eq!(response.status, StatusCode::SEE_OTHER);
        let location = response.headers[LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://checkout.stripe.com/"), "{location}");

        let sent = app.stripe.last_request().unwrap();
        assert_eq!(sent.form_id.unwrap().as_str(), form_id);
        assert_eq!(sent.amount, Plan::Monthly.price());
    }

    #[tokio::test]
    async fn test_checkout_redirect_with_unstaged_form_id() {
        let app = TestApp::new();
        let response = app
            .get("/api/checkout-redirect?amount=9900&currency=brl&plan=monthly&formId=abc")
            .await;

        assert_eq!(response.status, StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_checkout_redirect_rejects_bad_input() {
        let app = TestApp::new();
        for uri in [
            "/api/checkout-redirect?amount=9900&currency=brl",
            "/api/checkout-redirect?amount=9900&plan=weekly",
            "/api/checkout-redirect?plan=monthly",
            "/api/checkout-redirect?amount=abc&plan=monthly",
            "/api/checkout-redirect?amount=-5&plan=monthly",
            "/api/checkout-redirect?amount=100&plan=monthly",
            "/api/checkout-redirect?amount=9900&plan=monthly&currency=xyz",
        ] {
            let response = app.get(uri).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(
                !response.json["error"].as_str().unwrap().is_empty(),
                "{uri}"
            );
        }
        assert_eq!(app.stripe.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_post_checkout_returns_session() {
        let app = TestApp::new();
        let response = app
            .post_json(
                "/api/checkout",
                &serde_json::json!({"amount": 99000, "currency": "brl", "plan": "annual"}),
            )
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json["sessionId"], "cs_test_1");
        assert!(
            response.json["url"]
                .as_str()
                .unwrap()
                .starts_with("https://checkout.stripe.com/")
        );
    }

    #[tokio::test]
    async fn test_gateway_error_is_generic_bad_gateway() {
        let app = TestApp::new();
        app.stripe.fail_with_api_error();

        let response = app
            .post_json(
                "/api/checkout",
                &serde_json::json!({"amount": 9900, "plan": "monthly"}),
            )
            .await;

        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        let message = response.json["error"].as_str().unwrap();
        assert!(!message.contains("price_internal_123"));
    }

    #[tokio::test]
    async fn test_untrusted_session_url_is_not_followed() {
        let app = TestApp::new();
        app.stripe.set_session_url("https://phish.example/pay");

        let response = app
            .get("/api/checkout-redirect?amount=9900&plan=monthly")
            .await;

        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert!(!response.headers.contains_key(LOCATION));
    }

    #[tokio::test]
    async fn test_create_payment_intent() {
        let app = TestApp::new();
        let form_id = app.store_lead("ana@example.com", "monthly").await;

        let response = app
            .post_json(
                "/api/create-payment-intent",
                &serde_json::json!({"amount": "9900", "currency": "brl", "plan": "monthly", "formId": form_id}),
            )
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json["paymentIntentId"], "pi_test_1");
        assert_eq!(response.json["clientSecret"], "pi_test_1_secret_abc");
    }

    #[tokio::test]
    async fn test_paid_form_cannot_check_out_again() {
        let app = TestApp::new();
        let form_id = app.store_lead("ana@example.com", "annual").await;
        app.post_json(
            &format!("/api/paypal/orders/ORDER1/capture?formId={form_id}"),
            &serde_json::json!({}),
        )
        .await;

        let response = app
            .post_json(
                "/api/checkout",
                &serde_json::json!({"amount": 99000, "plan": "annual", "formId": form_id}),
            )
            .await;

        assert_eq!(response.status, StatusCode::CONFLICT);
    }
}
