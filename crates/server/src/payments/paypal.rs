//! PayPal Orders v2 client.
//!
//! OAuth2 client-credentials tokens are cached with `moka` for 30 minutes,
//! well inside PayPal's token lifetime, so most calls skip the token round
//! trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use zero_cost_core::{CurrencyCode, Money};

use super::{
    CheckoutRequest, OrderGateway, PayPalCapture, PayPalOrder, PaymentError, error_from_response,
};
use crate::config::PayPalConfig;

const TOKEN_KEY: &str = "access_token";

/// Client for the PayPal Orders API.
#[derive(Clone)]
pub struct PayPalClient {
    inner: Arc<PayPalClientInner>,
}

struct PayPalClientInner {
    client: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: SecretString,
    site_url: String,
    token_cache: Cache<&'static str, String>,
}

impl std::fmt::Debug for PayPalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalClient")
            .field("api_base", &self.inner.api_base)
            .field("client_id", &self.inner.client_id)
            .finish_non_exhaustive()
    }
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
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
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
    amount: Option<Amount>,
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    currency_code: String,
    value: String,
}

impl Amount {
    fn to_money(&self) -> Option<Money> {
        let currency: CurrencyCode = self.currency_code.parse().ok()?;
        Money::from_decimal_str(&self.value, currency).ok()
    }
}

impl PayPalClient {
    /// Create a new PayPal client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &PayPalConfig, site_url: &str) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        let token_cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(30 * 60))
            .build();

        Ok(Self {
            inner: Arc::new(PayPalClientInner {
                client,
                api_base: config.api_base.trim_end_matches('/').to_owned(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                site_url: site_url.trim_end_matches('/').to_owned(),
                token_cache,
            }),
        })
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        self.inner
            .token_cache
            .try_get_with(TOKEN_KEY, self.fetch_token())
            .await
            .map_err(|e| PaymentError::Token(e.to_string()))
    }

    async fn fetch_token(&self) -> Result<String, PaymentError> {
        debug!("Requesting PayPal access token");
        let url = format!("{}/v1/oauth2/token", self.inner.api_base);
        let response = self
            .inner
            .client
            .post(&url)
            .basic_auth(
                &self.inner.client_id,
                Some(self.inner.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;
        Ok(token.access_token)
    }

    fn order_body(&self, request: &CheckoutRequest) -> serde_json::Value {
        let mut success_url = format!("{}/success?provider=paypal", self.inner.site_url);
        if let Some(form_id) = &request.form_id {
            success_url.push_str("&formId=");
            success_url.push_str(form_id.as_str());
        }

        serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.plan.as_str(),
                "custom_id": request.form_id.as_ref().map(|id| id.as_str()),
                "description": request.plan.display_name(),
                "amount": {
                    "currency_code": request.amount.currency.as_upper(),
                    "value": format!("{:.2}", request.amount.to_decimal()),
                }
            }],
            "application_context": {
                "brand_name": "Zero Cost Website",
                "user_action": "PAY_NOW",
                "return_url": success_url,
                "cancel_url": format!("{}/pricing?canceled=true", self.inner.site_url),
            }
        })
    }
}

#[async_trait]
impl OrderGateway for PayPalClient {
    #[instrument(skip(self, request), fields(plan = %request.plan))]
    async fn create_order(&self, request: &CheckoutRequest) -> Result<PayPalOrder, PaymentError> {
        let token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders", self.inner.api_base);

        let response = self
            .inner
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("PayPal-Request-Id", &request.idempotency_key)
            .json(&self.order_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        tracing::info!(order_id = %order.id, "Created PayPal order");
        let approve_url = order
            .links
            .into_iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href);

        Ok(PayPalOrder {
            id: order.id,
            status: order.status,
            approve_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture_order(&self, order_id: &str) -> Result<PayPalCapture, PaymentError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v2/checkout/orders/{order_id}/capture",
            self.inner.api_base
        );

        let response = self
            .inner
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 422 {
            let body = response.text().await.unwrap_or_default();
            if body.contains("ORDER_ALREADY_CAPTURED") {
                return Err(PaymentError::AlreadyCaptured);
            }
            return Err(PaymentError::Api {
                status: 422,
                message: super::error_message(&body),
            });
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let captured: CaptureResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))?;

        let capture = captured
            .purchase_units
            .into_iter()
            .filter_map(|unit| unit.payments)
            .flat_map(|payments| payments.captures)
            .next();

        Ok(PayPalCapture {
            order_id: captured.id,
            status: captured.status,
            capture_id: capture.as_ref().map(|c| c.id.clone()),
            amount: capture
                .as_ref()
                .and_then(|c| c.amount.as_ref())
                .and_then(Amount::to_money),
            custom_id: capture.and_then(|c| c.custom_id),
        })
    }
}
