//! Stripe webhook endpoint.
//!
//! The raw body is verified against `Stripe-Signature` before it is parsed.
//! Without a configured signing secret the endpoint refuses every event.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::payments::webhook::{DEFAULT_TOLERANCE_SECS, StripeEvent, verify_signature};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub duplicate: bool,
}

/// Receive a Stripe event.
///
/// POST /api/webhook
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let Some(secret) = state.config().stripe.webhook_secret.as_ref() else {
        tracing::error!("Stripe webhook received but STRIPE_WEBHOOK_SECRET is not set");
        return Err(AppError::Unavailable(
            "webhook signing secret is not configured".to_string(),
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing signature".to_string()))?;

    verify_signature(
        &body,
        signature,
        secret.expose_secret(),
        chrono::Utc::now().timestamp(),
        DEFAULT_TOLERANCE_SECS,
    )?;

    let event = StripeEvent::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid event payload: {e}")))?;
    let outcome = state.leads().handle_stripe_event(&event).await?;

    Ok(Json(WebhookResponse {
        received: true,
        duplicate: outcome.duplicate,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;

    use crate::config::ServerConfig;
    use crate::test_support::{TestApp, signed_webhook};

    const SECRET: &str = "whsec_test_9fK2mQ7xL1pZ4vB8";

    fn intent_succeeded(event_id: &str, form_id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": event_id,
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_live_1",
                "amount": 9900,
                "amount_received": 9900,
                "currency": "brl",
                "metadata": {"formId": form_id, "plan": "monthly"}
            }}
        })
    }

    #[tokio::test]
    async fn test_duplicate_delivery_creates_one_payment() {
        let app = TestApp::new();
        let form_id = app.store_lead("ana@example.com", "monthly").await;
        let event = intent_succeeded("evt_1", &form_id);

        let first = app.send(signed_webhook(&event, SECRET)).await;
        let second = app.send(signed_webhook(&event, SECRET)).await;

        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(first.json, serde_json::json!({"received": true, "duplicate": false}));
        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(second.json["duplicate"], true);
        assert_eq!(app.store.payment_count(), 1);
        assert_eq!(app.store.submission_count(), 1);

        let status = app
            .get(&format!("/api/payment-status?formId={form_id}"))
            .await;
        assert_eq!(status.json["paymentStatus"], "paid");
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let app = TestApp::new();
        let event = intent_succeeded("evt_1", "abc");

        let response = app.send(signed_webhook(&event, "whsec_wrong")).await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.json["error"], "invalid signature");
    }

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let app = TestApp::new();
        let response = app
            .send(
                Request::post("/api/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(intent_succeeded("evt_1", "abc").to_string()))
                    .unwrap(),
            )
            .await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_secret_is_service_unavailable() {
        let mut config = ServerConfig::for_tests();
        config.stripe.webhook_secret = None;
        let app = TestApp::with_config(config, true);

        let response = app
            .send(signed_webhook(&intent_succeeded("evt_1", "abc"), SECRET))
            .await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.json["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_ignored_event_is_acknowledged() {
        let mut config = ServerConfig::for_tests();
        config.stripe.webhook_secret = Some(SecretString::from(SECRET));
        let app = TestApp::with_config(config, false);
        let event = serde_json::json!({
            "id": "evt_9",
            "type": "checkout.session.expired",
            "data": {"object": {"id": "cs_9"}}
        });

        let response = app.send(signed_webhook(&event, SECRET)).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json["received"], true);
    }

    #[tokio::test]
    async fn test_signed_garbage_is_bad_request() {
        let app = TestApp::new();
        let response = app
            .send(signed_webhook(&serde_json::json!({"hello": "world"}), SECRET))
            .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
    }
}
