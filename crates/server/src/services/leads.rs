//! Lead capture and payment confirmation.
//!
//! Every gateway goes through the same three steps: validate the request
//! against the server-side plan price, call the gateway once, persist the
//! result with retry. Webhooks and PayPal captures converge on
//! [`LeadService::confirm_payment`], which promotes the staging row in a
//! single transaction and is safe to call any number of times.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use zero_cost_core::{
    CurrencyCode, Email, FormId, Money, PaymentProvider, PaymentStatus, Plan,
};

use super::retry::{RetryPolicy, with_backoff};
use crate::db::{LeadStore, RepositoryError};
use crate::models::{AbandonedForm, ConfirmOutcome, LeadDetails, PaymentConfirmation};
use crate::payments::webhook::{EventAction, StripeEvent};
use crate::payments::{
    CheckoutGateway, CheckoutRequest, CheckoutSession, OrderGateway, PayPalOrder, PaymentError,
    PaymentIntent,
};

const MAX_NAME_LEN: usize = 200;
const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input failed validation; the message is safe to show.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The lead has already paid.
    #[error("payment already completed")]
    AlreadyPaid,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// An optional integration is not configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The gateway answered with a redirect we will not follow.
    #[error("untrusted checkout url: {0}")]
    UntrustedRedirect(String),

    /// A captured amount differs from the price of the lead's plan.
    #[error("captured {received} but the plan costs {expected}")]
    AmountMismatch { expected: Money, received: Money },
}

type Result<T> = std::result::Result<T, ServiceError>;

// =============================================================================
// Inputs
// =============================================================================

/// Lead form as posted by the browser. Fields are validated by
/// [`LeadService::store_form`], so missing ones deserialize to empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub business_name: String,
    pub business_type: Option<String>,
    pub business_description: Option<String>,
    pub plan: String,
}

/// Amounts arrive as JSON numbers or query strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Minor(i64),
    Text(String),
}

/// Checkout parameters shared by every gateway.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckoutParams {
    pub amount: Option<AmountInput>,
    pub currency: Option<String>,
    pub plan: Option<String>,
    pub form_id: Option<String>,
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    /// The event, or the payment it reports, was already processed.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    /// PayPal order status.
    pub status: String,
    pub form_id: Option<FormId>,
    pub payment_status: PaymentStatus,
    /// Whether the payment is recorded against a known lead.
    pub recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub form_id: FormId,
    pub payment_status: PaymentStatus,
    pub plan: Plan,
}

// =============================================================================
// LeadService
// =============================================================================

#[derive(Clone)]
pub struct LeadService {
    store: Arc<dyn LeadStore>,
    stripe: Arc<dyn CheckoutGateway>,
    paypal: Option<Arc<dyn OrderGateway>>,
    retry: RetryPolicy,
    checkout_host: String,
}

impl std::fmt::Debug for LeadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadService")
            .field("paypal", &self.paypal.is_some())
            .field("retry", &self.retry)
            .field("checkout_host", &self.checkout_host)
            .finish_non_exhaustive()
    }
}

impl LeadService {
    /// `checkout_host` is the only host hosted-checkout redirects may point to.
    pub fn new(
        store: Arc<dyn LeadStore>,
        stripe: Arc<dyn CheckoutGateway>,
        checkout_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            stripe,
            paypal: None,
            retry: RetryPolicy::default(),
            checkout_host: checkout_host.into(),
        }
    }

    #[must_use]
    pub fn with_paypal(mut self, paypal: Arc<dyn OrderGateway>) -> Self {
        self.paypal = Some(paypal);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn paypal_enabled(&self) -> bool {
        self.paypal.is_some()
    }

    /// Database connectivity check.
    ///
    /// # Errors
    ///
    /// Returns the store error when the database is unreachable.
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await.map_err(Into::into)
    }

    /// Validate a lead and save it as a staging row.
    ///
    /// Re-submitting with the same email and plan refreshes the existing
    /// row and returns its id.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for bad input, otherwise the store error
    /// after retries.
    #[instrument(skip(self, form), fields(plan = %form.plan))]
    pub async fn store_form(&self, form: LeadForm) -> Result<AbandonedForm> {
        let details = validate_lead(form)?;
        let store = &self.store;
        let details = &details;

        let saved = with_backoff(&self.retry, "save_abandoned", move || {
            store.save_abandoned(details)
        })
        .await?;

        tracing::info!(
            form_id = %saved.id,
            email = %saved.details.email.redacted(),
            "Stored lead form"
        );
        Ok(saved)
    }

    /// Turn raw checkout parameters into a gateway request.
    ///
    /// The amount must equal the plan's server-side price. A form id that
    /// has no staging row does not block checkout: it travels as metadata
    /// and confirmation later reports it as unknown.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for bad input, [`ServiceError::AlreadyPaid`]
    /// when the form has a paid submission.
    pub async fn prepare_checkout(
        &self,
        params: CheckoutParams,
        provider: PaymentProvider,
    ) -> Result<CheckoutRequest> {
        let plan = match params.plan.as_deref().map(str::trim) {
            None | Some("") => return Err(validation("plan is required")),
            Some(raw) => Plan::parse(raw).map_err(|e| validation(format!("invalid plan: {e}")))?,
        };

        let currency = match params.currency.as_deref().map(str::trim) {
            None | Some("") => CurrencyCode::default(),
            Some(raw) => raw
                .parse::<CurrencyCode>()
                .map_err(|e| validation(format!("invalid currency: {e}")))?,
        };

        let amount = match params.amount {
            None => return Err(validation("amount is required")),
            Some(AmountInput::Minor(minor)) => Money::checked(minor, currency),
            Some(AmountInput::Text(text)) => Money::parse_minor(&text, currency),
        }
        .map_err(|e| validation(format!("invalid amount: {e}")))?;

        let price = plan.price();
        if amount != price {
            return Err(validation(format!(
                "amount {amount} does not match the {plan} plan price {price}"
            )));
        }

        let form_id = match params.form_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                Some(FormId::parse(raw).map_err(|e| validation(format!("invalid formId: {e}")))?)
            }
        };

        if let Some(id) = &form_id
            && let Some(submission) = self.store.find_submission(id).await?
            && submission.payment_status == PaymentStatus::Paid
        {
            return Err(ServiceError::AlreadyPaid);
        }

        // Same lead + plan + amount reuses the gateway object; anonymous
        // checkouts never share one.
        let idempotency_key = match &form_id {
            Some(id) => format!("{provider}-{id}-{plan}-{}", amount.amount_minor),
            None => format!("{provider}-{}", uuid::Uuid::new_v4()),
        };

        Ok(CheckoutRequest {
            plan,
            amount,
            form_id,
            idempotency_key,
        })
    }

    /// Create a hosted checkout session and check where it redirects.
    ///
    /// # Errors
    ///
    /// Gateway errors, or [`ServiceError::UntrustedRedirect`] when the
    /// session URL is not `https` on the configured checkout host.
    #[instrument(skip(self, request), fields(plan = %request.plan))]
    pub async fn start_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let session = self.stripe.create_checkout_session(request).await?;
        self.ensure_trusted_redirect(&session.url)?;
        self.remember_reference(request.form_id.as_ref(), &session.id)
            .await;
        Ok(session)
    }

    /// Create a payment intent for on-page card collection.
    ///
    /// # Errors
    ///
    /// Gateway errors.
    #[instrument(skip(self, request), fields(plan = %request.plan))]
    pub async fn start_payment_intent(&self, request: &CheckoutRequest) -> Result<PaymentIntent> {
        let intent = self.stripe.create_payment_intent(request).await?;
        self.remember_reference(request.form_id.as_ref(), &intent.id)
            .await;
        Ok(intent)
    }

    /// Create a PayPal order.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotConfigured`] without PayPal credentials, otherwise
    /// gateway errors.
    #[instrument(skip(self, request), fields(plan = %request.plan))]
    pub async fn start_paypal_order(&self, request: &CheckoutRequest) -> Result<PayPalOrder> {
        let paypal = self.paypal.as_ref().ok_or(ServiceError::NotConfigured("PayPal"))?;
        let order = paypal.create_order(request).await?;
        self.remember_reference(request.form_id.as_ref(), &order.id)
            .await;
        Ok(order)
    }

    /// Promote a lead to a paid submission.
    ///
    /// # Errors
    ///
    /// The store error after retries.
    #[instrument(skip(self, confirmation), fields(
        form_id = %confirmation.form_id,
        provider = %confirmation.provider,
        transaction_id = %confirmation.transaction_id,
    ))]
    pub async fn confirm_payment(&self, confirmation: &PaymentConfirmation) -> Result<ConfirmOutcome> {
        let store = &self.store;
        let outcome = with_backoff(&self.retry, "confirm_payment", move || {
            store.confirm_payment(confirmation)
        })
        .await?;

        match &outcome {
            ConfirmOutcome::Promoted(_) => {
                tracing::info!(amount = %confirmation.amount, "Payment confirmed, lead promoted");
            }
            ConfirmOutcome::AlreadyPaid(_) => tracing::info!("Payment already recorded"),
            ConfirmOutcome::UnknownForm => {
                tracing::warn!("Payment confirmed for a form with no staging row");
            }
        }
        Ok(outcome)
    }

    /// Apply a verified Stripe event.
    ///
    /// The event id is recorded only after it was handled, so a delivery
    /// that fails here is retried by Stripe and a repeated delivery of a
    /// handled event is reported as a duplicate.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for events of a handled type whose
    /// payload does not parse, otherwise store errors.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_stripe_event(&self, event: &StripeEvent) -> Result<WebhookOutcome> {
        if self.store.webhook_event_processed(&event.id).await? {
            tracing::info!("Webhook event already processed");
            return Ok(WebhookOutcome { duplicate: true });
        }

        let action = event
            .action()
            .map_err(|e| validation(format!("malformed {} event: {e}", event.event_type)))?;

        let mut duplicate = false;
        match action {
            EventAction::Paid {
                form_id,
                transaction_id,
                amount_minor,
                currency,
            } => {
                if let Some(form_id) = parse_metadata_form_id(form_id.as_deref()) {
                    let amount = event_amount(amount_minor, currency.as_deref())?;
                    let confirmation = PaymentConfirmation {
                        form_id,
                        provider: PaymentProvider::Stripe,
                        transaction_id,
                        amount,
                    };
                    let outcome = self.confirm_payment(&confirmation).await?;
                    duplicate = matches!(outcome, ConfirmOutcome::AlreadyPaid(_));
                }
            }
            EventAction::Failed {
                form_id,
                transaction_id,
                reason,
            } => {
                if let Some(form_id) = parse_metadata_form_id(form_id.as_deref()) {
                    let store = &self.store;
                    let (id, why) = (&form_id, reason.as_str());
                    let changed = with_backoff(&self.retry, "mark_failed", move || {
                        store.mark_failed(id, why)
                    })
                    .await?;
                    tracing::info!(
                        form_id = %form_id,
                        transaction_id = %transaction_id,
                        changed,
                        "Payment failed"
                    );
                }
            }
            EventAction::Ignore => tracing::debug!("Ignoring webhook event"),
        }

        let store = &self.store;
        let (id, kind) = (event.id.as_str(), event.event_type.as_str());
        with_backoff(&self.retry, "record_webhook_event", move || {
            store.record_webhook_event(id, kind)
        })
        .await?;

        Ok(WebhookOutcome { duplicate })
    }

    /// Capture an approved PayPal order and confirm the lead.
    ///
    /// The form id attached to the order when it was created wins over the
    /// one supplied by the client.
    ///
    /// # Errors
    ///
    /// Validation, configuration, gateway and store errors.
    #[instrument(skip(self))]
    pub async fn capture_paypal_order(
        &self,
        order_id: &str,
        form_id: Option<&str>,
    ) -> Result<CaptureOutcome> {
        validate_order_id(order_id)?;
        let client_form_id = match form_id.map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                Some(FormId::parse(raw).map_err(|e| validation(format!("invalid formId: {e}")))?)
            }
        };
        let paypal = self.paypal.as_ref().ok_or(ServiceError::NotConfigured("PayPal"))?;

        let capture = match paypal.capture_order(order_id).await {
            Ok(capture) => capture,
            Err(PaymentError::AlreadyCaptured) => {
                return self.already_captured(client_form_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        let form_id = match (parse_metadata_form_id(capture.custom_id.as_deref()), client_form_id) {
            (Some(ours), Some(theirs)) if ours != theirs => {
                tracing::warn!(order_form_id = %ours, client_form_id = %theirs, "Form id mismatch on capture");
                Some(ours)
            }
            (ours, theirs) => ours.or(theirs),
        };

        if !capture.is_completed() {
            return Ok(CaptureOutcome {
                status: capture.status,
                form_id,
                payment_status: PaymentStatus::Pending,
                recorded: false,
            });
        }

        let Some(form_id) = form_id else {
            tracing::warn!(order_id, "Captured PayPal order without a form id");
            return Ok(CaptureOutcome {
                status: capture.status,
                form_id: None,
                payment_status: PaymentStatus::Paid,
                recorded: false,
            });
        };

        let amount = capture
            .amount
            .ok_or_else(|| PaymentError::Parse("capture has no amount".to_owned()))?;
        if let Some(expected) = self.plan_price(&form_id).await?
            && amount != expected
        {
            tracing::error!(
                form_id = %form_id,
                order_id,
                received = %amount,
                expected = %expected,
                "PayPal capture amount does not match plan price"
            );
            return Err(ServiceError::AmountMismatch {
                expected,
                received: amount,
            });
        }

        let confirmation = PaymentConfirmation {
            form_id: form_id.clone(),
            provider: PaymentProvider::Paypal,
            transaction_id: capture.capture_id.unwrap_or_else(|| capture.order_id.clone()),
            amount,
        };
        let outcome = self.confirm_payment(&confirmation).await?;
        let (payment_status, recorded) = match outcome.submission() {
            Some(submission) => (submission.payment_status, true),
            None => (PaymentStatus::Paid, false),
        };

        Ok(CaptureOutcome {
            status: capture.status,
            form_id: Some(form_id),
            payment_status,
            recorded,
        })
    }

    /// Price of the plan the lead chose, from whichever table holds it.
    async fn plan_price(&self, form_id: &FormId) -> Result<Option<Money>> {
        if let Some(submission) = self.store.find_submission(form_id).await? {
            return Ok(Some(submission.details.plan.price()));
        }
        Ok(self
            .store
            .get_abandoned(form_id)
            .await?
            .map(|staged| staged.details.plan.price()))
    }

    async fn already_captured(&self, form_id: Option<FormId>) -> Result<CaptureOutcome> {
        if let Some(id) = form_id
            && let Some(submission) = self.store.find_submission(&id).await?
            && submission.payment_status == PaymentStatus::Paid
        {
            return Ok(CaptureOutcome {
                status: "COMPLETED".to_owned(),
                form_id: Some(id),
                payment_status: PaymentStatus::Paid,
                recorded: true,
            });
        }
        Err(ServiceError::AlreadyPaid)
    }

    /// Current payment status of a lead, for polling after a redirect.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] when neither table knows the id.
    pub async fn payment_status(&self, form_id: &FormId) -> Result<PaymentStatusView> {
        if let Some(submission) = self.store.find_submission(form_id).await? {
            return Ok(PaymentStatusView {
                form_id: submission.id,
                payment_status: submission.payment_status,
                plan: submission.details.plan,
            });
        }
        if let Some(staged) = self.store.get_abandoned(form_id).await? {
            return Ok(PaymentStatusView {
                form_id: staged.id,
                payment_status: staged.payment_status,
                plan: staged.details.plan,
            });
        }
        Err(ServiceError::NotFound("form".to_owned()))
    }

    fn ensure_trusted_redirect(&self, raw: &str) -> Result<()> {
        let url = url::Url::parse(raw).map_err(|_| ServiceError::UntrustedRedirect(raw.to_owned()))?;
        if url.scheme() == "https" && url.host_str() == Some(self.checkout_host.as_str()) {
            Ok(())
        } else {
            Err(ServiceError::UntrustedRedirect(raw.to_owned()))
        }
    }

    /// Store the gateway reference on the staging row. The reference is
    /// informational, so a failure is logged and the checkout continues.
    async fn remember_reference(&self, form_id: Option<&FormId>, reference: &str) {
        let Some(form_id) = form_id else {
            return;
        };
        let store = &self.store;
        let result = with_backoff(&self.retry, "set_checkout_reference", move || {
            store.set_checkout_reference(form_id, reference)
        })
        .await;

        match result {
            Ok(true) => {}
            Ok(false) => tracing::debug!(form_id = %form_id, "No staging row for checkout reference"),
            Err(e) => tracing::warn!(form_id = %form_id, error = %e, "Failed to store checkout reference"),
        }
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

fn validation(message: impl Into<String>) -> ServiceError {
    ServiceError::Validation(message.into())
}

fn required(value: &str, field: &str, max: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(validation(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(validation(format!("{field} is too long")));
    }
    Ok(value.to_owned())
}

fn optional(value: Option<String>, field: &str) -> Result<Option<String>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > MAX_TEXT_LEN => {
            Err(validation(format!("{field} is too long")))
        }
        Some(v) => Ok(Some(v.to_owned())),
    }
}

/// Keep digits and a leading `+`; accept 8 to 15 digits (E.164 upper bound).
fn normalize_phone(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(validation("phone is required"));
    }

    let mut normalized = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => normalized.push(c),
            '+' if i == 0 => normalized.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return Err(validation("phone must contain only digits")),
        }
    }

    let digits = normalized.trim_start_matches('+').len();
    if !(8..=15).contains(&digits) {
        return Err(validation("phone must have between 8 and 15 digits"));
    }
    Ok(normalized)
}

fn validate_lead(form: LeadForm) -> Result<LeadDetails> {
    let name = required(&form.name, "name", MAX_NAME_LEN)?;
    if form.email.trim().is_empty() {
        return Err(validation("email is required"));
    }
    let email = Email::parse(&form.email).map_err(|e| validation(format!("invalid email: {e}")))?;
    let phone = normalize_phone(&form.phone)?;
    let business_name = required(&form.business_name, "businessName", MAX_NAME_LEN)?;
    let plan = Plan::parse(&form.plan).map_err(|e| validation(format!("invalid plan: {e}")))?;

    Ok(LeadDetails {
        name,
        email,
        phone,
        business_name,
        business_type: optional(form.business_type, "businessType")?,
        business_description: optional(form.business_description, "businessDescription")?,
        plan,
    })
}

fn validate_order_id(order_id: &str) -> Result<()> {
    let ok = !order_id.is_empty()
        && order_id.len() <= 64
        && order_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(validation("invalid order id"))
    }
}

/// Form ids come back from gateway metadata; a missing or garbled one is
/// logged and the event acknowledged, since redelivery cannot fix it.
fn parse_metadata_form_id(raw: Option<&str>) -> Option<FormId> {
    let raw = raw?;
    match FormId::parse(raw) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(form_id = raw, error = %e, "Ignoring invalid form id in gateway metadata");
            None
        }
    }
}

fn event_amount(amount_minor: Option<i64>, currency: Option<&str>) -> Result<Money> {
    let minor = amount_minor.ok_or_else(|| validation("event has no amount"))?;
    let currency = match currency {
        Some(c) => c
            .parse::<CurrencyCode>()
            .map_err(|e| validation(format!("invalid event currency: {e}")))?,
        None => CurrencyCode::default(),
    };
    Money::checked(minor, currency).map_err(|e| validation(format!("invalid event amount: {e}")))
}
