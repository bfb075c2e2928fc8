//! Integration tests for the Zero Cost Website lead service.
//!
//! These run against a live server and database, so every test is ignored
//! by default:
//!
//! ```bash
//! cargo run -p zero-cost-cli -- migrate
//! cargo run -p zero-cost-server &
//! cargo test -p zero-cost-integration-tests -- --ignored
//! ```
//!
//! # Environment Variables
//!
//! - `ZC_TEST_BASE_URL` - server under test (default `http://localhost:3000`)
//! - `STRIPE_WEBHOOK_SECRET` - same secret the server verifies webhooks with

use reqwest::Client;
use reqwest::redirect::Policy;

/// Base URL of the server under test.
#[must_use]
pub fn base_url() -> String {
    std::env::var("ZC_TEST_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// HTTP client that reports redirects instead of following them.
///
/// # Panics
///
/// Panics if the client cannot be built.
#[must_use]
#[allow(clippy::expect_used)]
pub fn client() -> Client {
    Client::builder()
        .redirect(Policy::none())
        .build()
        .expect("Failed to create HTTP client")
}

/// A unique lead email so repeated runs never collide.
#[must_use]
pub fn unique_email() -> String {
    format!("it-{}@example.com", uuid::Uuid::new_v4().simple())
}
