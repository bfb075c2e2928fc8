//! Stripe REST client.
//!
//! Talks to the two endpoints the checkout flow needs, form-encoded as the
//! Stripe API expects. Every create call carries an `Idempotency-Key`, so a
//! double-clicked button or a retried request returns the same session.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;

use super::{
    CheckoutGateway, CheckoutRequest, CheckoutSession, PaymentError, PaymentIntent,
    error_from_response,
};
use crate::config::StripeConfig;

#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    /// Public site URL used for success and cancel redirects.
    site_url: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("site_url", &self.site_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns error if the secret key is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &StripeConfig, site_url: &str) -> Result<Self, PaymentError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.secret_key.expose_secret());
        let mut auth = HeaderValue::from_str(&auth_value)
            .map_err(|e| PaymentError::Parse(format!("Invalid API key format: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            site_url: site_url.trim_end_matches('/').to_owned(),
        })
    }

    fn success_url(&self, request: &CheckoutRequest) -> String {
        let mut url = format!("{}/success?session_id={{CHECKOUT_SESSION_ID}}", self.site_url);
        if let Some(form_id) = &request.form_id {
            url.push_str("&formId=");
            url.push_str(form_id.as_str());
        }
        url
    }

    fn cancel_url(&self) -> String {
        format!("{}/pricing?canceled=true", self.site_url)
    }

    /// Metadata pairs shared by sessions and intents, under `prefix`.
    fn metadata(prefix: &str, request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut params = vec![(
            format!("{prefix}[plan]"),
            request.plan.as_str().to_owned(),
        )];
        if let Some(form_id) = &request.form_id {
            params.push((format!("{prefix}[formId]"), form_id.as_str().to_owned()));
        }
        params
    }

    fn session_params(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.success_url(request)),
            ("cancel_url".into(), self.cancel_url()),
            (
                "line_items[0][price_data][currency]".into(),
                request.amount.currency.as_str().into(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                request.amount.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                request.plan.display_name().into(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
        ];
        params.extend(Self::metadata("metadata", request));
        params.extend(Self::metadata("payment_intent_data[metadata]", request));
        if let Some(form_id) = &request.form_id {
            params.push(("client_reference_id".into(), form_id.as_str().into()));
        }
        params
    }

    fn intent_params(request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("amount".into(), request.amount.amount_minor.to_string()),
            ("currency".into(), request.amount.currency.as_str().into()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
            ("description".into(), request.plan.display_name().into()),
        ];
        params.extend(Self::metadata("metadata", request));
        params
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        idempotency_key: &str,
        params: &[(String, String)],
    ) -> Result<T, PaymentError> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("Idempotency-Key", idempotency_key)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CheckoutGateway for StripeClient {
    #[instrument(skip(self, request), fields(plan = %request.plan))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        // Sessions and intents get distinct keys; Stripe rejects a key reused
        // with different parameters.
        let key = format!("{}-session", request.idempotency_key);
        let session: SessionResponse = self
            .post_form("/v1/checkout/sessions", &key, &self.session_params(request))
            .await?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::Parse("checkout session has no url".to_owned()))?;

        tracing::info!(session_id = %session.id, "Created Stripe checkout session");
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    #[instrument(skip(self, request), fields(plan = %request.plan))]
    async fn create_payment_intent(
        &self,
        request: &CheckoutRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        let key = format!("{}-intent", request.idempotency_key);
        let intent: IntentResponse = self
            .post_form("/v1/payment_intents", &key, &Self::intent_params(request))
            .await?;

        let client_secret = intent
            .client_secret
            .ok_or_else(|| PaymentError::Parse("payment intent has no client_secret".to_owned()))?;

        tracing::info!(payment_intent_id = %intent.id, "Created Stripe payment intent");
        Ok(PaymentIntent {
            id: intent.id,
            client_secret,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use zero_cost_core::{FormId, Plan};

    use super::*;
    use crate::config::ServerConfig;

    fn request(form_id: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            plan: Plan::Monthly,
            amount: Plan::Monthly.price(),
            form_id: form_id.map(|id| FormId::parse(id).unwrap()),
            idempotency_key: "checkout-abc-monthly-9900".to_owned(),
        }
    }

    fn client(server: &MockServer) -> StripeClient {
        let mut config = ServerConfig::for_tests().stripe;
        config.api_base = server.uri();
        StripeClient::new(&config, "https://zerocost.test/").unwrap()
    }

    #[tokio::test]
    async fn test_create_checkout_session_sends_plan_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("Idempotency-Key", "checkout-abc-monthly-9900-session"))
            .and(body_string_contains("mode=payment"))
            .and(body_string_contains("unit_amount%5D=9900"))
            .and(body_string_contains("metadata%5BformId%5D=abc"))
            .and(body_string_contains("client_reference_id=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_123",
                "url": "https://checkout.stripe.com/c/pay/cs_test_123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server)
            .create_checkout_session(&request(Some("abc")))
            .await
            .unwrap();

        assert_eq!(session.id, "cs_test_123");
        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_123");
    }

    #[test]
    fn test_success_url_carries_form_id() {
        let config = ServerConfig::for_tests().stripe;
        let client = StripeClient::new(&config, "https://zerocost.test/").unwrap();

        assert_eq!(
            client.success_url(&request(Some("abc"))),
            "https://zerocost.test/success?session_id={CHECKOUT_SESSION_ID}&formId=abc"
        );
        assert_eq!(
            client.success_url(&request(None)),
            "https://zerocost.test/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(client.cancel_url(), "https://zerocost.test/pricing?canceled=true");
    }

    #[tokio::test]
    async fn test_create_payment_intent_returns_client_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("Idempotency-Key", "checkout-abc-monthly-9900-intent"))
            .and(body_string_contains("automatic_payment_methods%5Benabled%5D=true"))
            .and(body_string_contains("currency=brl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_123",
                "client_secret": "pi_123_secret_456"
            })))
            .mount(&server)
            .await;

        let intent = client(&server)
            .create_payment_intent(&request(Some("abc")))
            .await
            .unwrap();

        assert_eq!(intent.id, "pi_123");
        assert_eq!(intent.client_secret, "pi_123_secret_456");
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "Invalid currency: xyz"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_checkout_session(&request(None))
            .await
            .unwrap_err();

        match err {
            PaymentError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid currency: xyz");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_and_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.create_checkout_session(&request(None)).await,
            Err(PaymentError::Unauthorized)
        ));
        assert!(matches!(
            client.create_payment_intent(&request(None)).await,
            Err(PaymentError::RateLimited(7))
        ));
    }

    #[test]
    fn test_debug_hides_credentials() {
        let config = ServerConfig::for_tests().stripe;
        let client = StripeClient::new(&config, "https://zerocost.test").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk_test"));
    }
}
