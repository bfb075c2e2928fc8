//! Zero Cost Website server library.
//!
//! Lead capture, Stripe and PayPal checkout, and payment webhooks for the
//! Zero Cost Website marketing site. The binary in `main.rs` wires
//! configuration, logging and the database around [`app`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

use axum::Router;
use axum::http::Request;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the router with the full middleware stack, minus Sentry.
///
/// Write endpoints are rate limited per client IP; the webhook, health
/// checks and status polling are not.
pub fn app(state: AppState) -> Router {
    let cors = middleware::cors_layer(&state.config().allowed_origins);

    Router::new()
        .merge(routes::open_routes())
        .merge(routes::write_routes().layer(middleware::write_rate_limiter()))
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            // Path only: query strings carry lead ids
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServerConfig;
    use crate::db::memory::MemoryLeadStore;
    use crate::middleware::request_id::REQUEST_ID_HEADER;
    use crate::services::LeadService;
    use crate::test_support::FakeStripe;

    fn full_app() -> Router {
        let config = ServerConfig::for_tests();
        let leads = LeadService::new(
            Arc::new(MemoryLeadStore::new()),
            Arc::new(FakeStripe::default()),
            config.stripe.checkout_host.clone(),
        );
        app(AppState::new(config, leads))
    }

    #[tokio::test]
    async fn test_middleware_stack_applies_headers() {
        let response = full_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_write_routes_are_rate_limited() {
        let app = full_app();
        let request = || {
            Request::get("/api/checkout-redirect?amount=9900&plan=monthly")
                .header("x-forwarded-for", "203.0.113.50")
                .body(Body::empty())
                .unwrap()
        };

        let mut statuses = Vec::new();
        for _ in 0..12 {
            statuses.push(app.clone().oneshot(request()).await.unwrap().status());
        }

        assert_eq!(statuses[0], StatusCode::SEE_OTHER);
        assert_eq!(statuses[11], StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_webhook_is_not_rate_limited() {
        let app = full_app();
        for _ in 0..15 {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/api/webhook")
                        .header("x-forwarded-for", "203.0.113.51")
                        .body(Body::from("{}"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
