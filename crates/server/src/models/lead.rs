//! Lead domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use zero_cost_core::{Email, FormId, Money, PaymentProvider, PaymentStatus, Plan};

/// Contact and business details captured by the multi-step form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDetails {
    pub name: String,
    pub email: Email,
    /// Digits only, with an optional leading `+`.
    pub phone: String,
    pub business_name: String,
    pub business_type: Option<String>,
    pub business_description: Option<String>,
    pub plan: Plan,
}

/// A lead that has not completed payment (staging row).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonedForm {
    pub id: FormId,
    #[serde(flatten)]
    pub details: LeadDetails,
    /// `pending` or `failed`; paid leads live in [`FormSubmission`].
    pub payment_status: PaymentStatus,
    pub failure_reason: Option<String>,
    /// Last checkout session, payment intent or order created for this lead.
    pub checkout_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A confirmed, paying lead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    pub id: FormId,
    #[serde(flatten)]
    pub details: LeadDetails,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub payment_provider: Option<PaymentProvider>,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A gateway's word that a lead has paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub form_id: FormId,
    pub provider: PaymentProvider,
    /// Gateway transaction id (payment intent id, PayPal capture id).
    pub transaction_id: String,
    pub amount: Money,
}

/// Result of promoting a staging row after payment.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// The lead was promoted and the payment recorded.
    Promoted(FormSubmission),
    /// The lead was already paid; nothing was written.
    AlreadyPaid(FormSubmission),
    /// No staging row or submission exists for the form id.
    UnknownForm,
}

impl ConfirmOutcome {
    /// The submission involved, if any.
    #[must_use]
    pub const fn submission(&self) -> Option<&FormSubmission> {
        match self {
            Self::Promoted(s) | Self::AlreadyPaid(s) => Some(s),
            Self::UnknownForm => None,
        }
    }
}
