//! Fakes and helpers shared by service and router tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use tower::ServiceExt;

use zero_cost_core::{Money, Plan};

use crate::config::ServerConfig;
use crate::db::memory::MemoryLeadStore;
use crate::payments::webhook::compute_signature;
use crate::payments::{
    CheckoutGateway, CheckoutRequest, CheckoutSession, OrderGateway, PayPalCapture, PayPalOrder,
    PaymentError, PaymentIntent,
};
use crate::routes;
use crate::services::{LeadForm, LeadService, RetryPolicy};
use crate::state::AppState;

pub fn lead_form(email: &str, plan: &str) -> LeadForm {
    LeadForm {
        name: "Ana Souza".to_owned(),
        email: email.to_owned(),
        phone: "+55 11 98765-4321".to_owned(),
        business_name: "Padaria da Ana".to_owned(),
        business_type: Some("bakery".to_owned()),
        business_description: None,
        plan: plan.to_owned(),
    }
}

// =============================================================================
// Stripe
// =============================================================================

#[derive(Debug, Default)]
pub struct FakeStripe {
    session_url: Mutex<Option<String>>,
    sessions: AtomicUsize,
    intents: AtomicUsize,
    fail: AtomicBool,
    last_request: Mutex<Option<CheckoutRequest>>,
}

impl FakeStripe {
    pub fn set_session_url(&self, url: &str) {
        *self.session_url.lock().unwrap() = Some(url.to_owned());
    }

    /// Make every call fail with an API error.
    pub fn fail_with_api_error(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn check(&self, request: &CheckoutRequest) -> Result<(), PaymentError> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Api {
                status: 400,
                message: "No such price: price_internal_123".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CheckoutGateway for FakeStripe {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.check(request)?;
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        let url = self
            .session_url
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("https://checkout.stripe.com/c/pay/{id}"));
        Ok(CheckoutSession { id, url })
    }

    async fn create_payment_intent(
        &self,
        request: &CheckoutRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        self.check(request)?;
        let n = self.intents.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent {
            id: format!("pi_test_{n}"),
            client_secret: format!("pi_test_{n}_secret_abc"),
        })
    }
}

// =============================================================================
// PayPal
// =============================================================================

#[derive(Debug, Default)]
pub struct FakeOrders {
    custom_id: Mutex<Option<String>>,
    amount: Mutex<Option<Money>>,
    already_captured: AtomicBool,
    orders: AtomicUsize,
}

impl FakeOrders {
    pub fn set_custom_id(&self, id: Option<&str>) {
        *self.custom_id.lock().unwrap() = id.map(str::to_owned);
    }

    /// Amount the next capture reports, until an order is created.
    pub fn set_amount(&self, amount: Money) {
        *self.amount.lock().unwrap() = Some(amount);
    }

    pub fn set_already_captured(&self, value: bool) {
        self.already_captured.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderGateway for FakeOrders {
    async fn create_order(&self, request: &CheckoutRequest) -> Result<PayPalOrder, PaymentError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        *self.custom_id.lock().unwrap() = request.form_id.as_ref().map(|id| id.as_str().to_owned());
        *self.amount.lock().unwrap() = Some(request.amount);
        Ok(PayPalOrder {
            id: format!("ORDER{n}"),
            status: "CREATED".to_owned(),
            approve_url: Some(format!(
                "https://www.sandbox.paypal.com/checkoutnow?token=ORDER{n}"
            )),
        })
    }

    async fn capture_order(&self, order_id: &str) -> Result<PayPalCapture, PaymentError> {
        if self.already_captured.load(Ordering::SeqCst) {
            return Err(PaymentError::AlreadyCaptured);
        }
        Ok(PayPalCapture {
            order_id: order_id.to_owned(),
            status: "COMPLETED".to_owned(),
            capture_id: Some(format!("CAP-{order_id}")),
            amount: Some(
                self.amount
                    .lock()
                    .unwrap()
                    .unwrap_or_else(|| Plan::Annual.price()),
            ),
            custom_id: self.custom_id.lock().unwrap().clone(),
        })
    }
}

// =============================================================================
// Router harness
// =============================================================================

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryLeadStore>,
    pub stripe: Arc<FakeStripe>,
    pub paypal: Arc<FakeOrders>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: serde_json::Value,
}

impl TestApp {
    /// Router over the in-memory store with PayPal enabled.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::for_tests(), true)
    }

    pub fn with_config(config: ServerConfig, paypal_enabled: bool) -> Self {
        let store = Arc::new(MemoryLeadStore::new());
        let stripe = Arc::new(FakeStripe::default());
        let paypal = Arc::new(FakeOrders::default());

        let mut leads = LeadService::new(
            store.clone(),
            stripe.clone(),
            config.stripe.checkout_host.clone(),
        )
        .with_retry(RetryPolicy::immediate(3));
        if paypal_enabled {
            leads = leads.with_paypal(paypal.clone());
        }

        let router = routes::routes().with_state(AppState::new(config, leads));
        Self {
            router,
            store,
            stripe,
            paypal,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        TestResponse {
            status,
            headers,
            json,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &serde_json::Value) -> TestResponse {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Store a lead through the API and return its form id.
    pub async fn store_lead(&self, email: &str, plan: &str) -> String {
        let response = self
            .post_json(
                "/api/store-form-data",
                &serde_json::json!({
                    "name": "Ana Souza",
                    "email": email,
                    "phone": "11987654321",
                    "businessName": "Padaria da Ana",
                    "plan": plan,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json);
        response.json["formId"].as_str().unwrap().to_owned()
    }
}

/// A webhook request signed now with `secret`.
pub fn signed_webhook(payload: &serde_json::Value, secret: &str) -> Request<Body> {
    let body = payload.to_string();
    let ts = chrono::Utc::now().timestamp().to_string();
    let sig = compute_signature(&ts, body.as_bytes(), secret).unwrap();
    Request::post("/api/webhook")
        .header("content-type", "application/json")
        .header("stripe-signature", format!("t={ts},v1={sig}"))
        .body(Body::from(body))
        .unwrap()
}
