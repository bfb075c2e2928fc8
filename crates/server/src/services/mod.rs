//! Business logic for the lead and payment flow.
//!
//! # Services
//!
//! - [`LeadService`] - capture leads, start checkouts on any gateway, and
//!   confirm payments from webhooks or captures
//! - [`retry`] - bounded backoff applied to every database write

pub mod leads;
pub mod retry;

pub use leads::{
    AmountInput, CaptureOutcome, CheckoutParams, LeadForm, LeadService, PaymentStatusView,
    ServiceError, WebhookOutcome,
};
pub use retry::RetryPolicy;
