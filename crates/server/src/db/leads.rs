//! `PostgreSQL` implementation of [`LeadStore`].
//!
//! Queries are checked at runtime (`query_as` + `FromRow`) so the crate
//! builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use zero_cost_core::{Email, FormId, PaymentId, PaymentProvider, PaymentStatus, Plan};

use super::{LeadStore, RepositoryError};
use crate::models::{
    AbandonedForm, ConfirmOutcome, FormSubmission, LeadDetails, PaymentConfirmation,
};

macro_rules! abandoned_columns {
    () => {
        "id, name, email, phone, business_name, business_type, business_description, plan, \
         payment_status, failure_reason, checkout_reference, created_at, updated_at"
    };
}

macro_rules! submission_columns {
    () => {
        "id, name, email, phone, business_name, business_type, business_description, plan, \
         payment_status, payment_id, payment_provider, payment_date, created_at, updated_at"
    };
}

#[derive(Debug, sqlx::FromRow)]
struct AbandonedRow {
    id: String,
    name: String,
    email: String,
    phone: String,
    business_name: String,
    business_type: Option<String>,
    business_description: Option<String>,
    plan: String,
    payment_status: String,
    failure_reason: Option<String>,
    checkout_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SubmissionRow {
    id: String,
    name: String,
    email: String,
    phone: String,
    business_name: String,
    business_type: Option<String>,
    business_description: Option<String>,
    plan: String,
    payment_status: String,
    payment_id: Option<String>,
    payment_provider: Option<String>,
    payment_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::DataCorruption(format!("invalid {what} in database: {err}"))
}

#[allow(clippy::too_many_arguments)]
fn lead_details(
    name: String,
    email: &str,
    phone: String,
    business_name: String,
    business_type: Option<String>,
    business_description: Option<String>,
    plan: &str,
) -> Result<LeadDetails, RepositoryError> {
    Ok(LeadDetails {
        name,
        email: Email::parse(email).map_err(|e| corrupt("email", e))?,
        phone,
        business_name,
        business_type,
        business_description,
        plan: Plan::parse(plan).map_err(|e| corrupt("plan", e))?,
    })
}

impl TryFrom<AbandonedRow> for AbandonedForm {
    type Error = RepositoryError;

    fn try_from(r: AbandonedRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: FormId::parse(&r.id).map_err(|e| corrupt("form id", e))?,
            details: lead_details(
                r.name,
                &r.email,
                r.phone,
                r.business_name,
                r.business_type,
                r.business_description,
                &r.plan,
            )?,
            payment_status: r
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt("payment status", e))?,
            failure_reason: r.failure_reason,
            checkout_reference: r.checkout_reference,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

impl TryFrom<SubmissionRow> for FormSubmission {
    type Error = RepositoryError;

    fn try_from(r: SubmissionRow) -> Result<Self, Self::Error> {
        let payment_provider = r
            .payment_provider
            .as_deref()
            .map(str::parse::<PaymentProvider>)
            .transpose()
            .map_err(|e| corrupt("payment provider", e))?;

        Ok(Self {
            id: FormId::parse(&r.id).map_err(|e| corrupt("form id", e))?,
            details: lead_details(
                r.name,
                &r.email,
                r.phone,
                r.business_name,
                r.business_type,
                r.business_description,
                &r.plan,
            )?,
            payment_status: r
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt("payment status", e))?,
            payment_id: r.payment_id,
            payment_provider,
            payment_date: r.payment_date,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Lead repository backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    /// Create a new lead store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn save_abandoned(&self, details: &LeadDetails) -> Result<AbandonedForm, RepositoryError> {
        let row: AbandonedRow = sqlx::query_as(concat!(
            "INSERT INTO abandoned_forms \
                 (id, name, email, phone, business_name, business_type, business_description, plan) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (email, plan) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 phone = EXCLUDED.phone, \
                 business_name = EXCLUDED.business_name, \
                 business_type = EXCLUDED.business_type, \
                 business_description = EXCLUDED.business_description, \
                 payment_status = 'pending', \
                 failure_reason = NULL, \
                 updated_at = now() \
             RETURNING ",
            abandoned_columns!()
        ))
        .bind(FormId::generate().as_str())
        .bind(&details.name)
        .bind(details.email.as_str())
        .bind(&details.phone)
        .bind(&details.business_name)
        .bind(details.business_type.as_deref())
        .bind(details.business_description.as_deref())
        .bind(details.plan.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "lead"))?;

        row.try_into()
    }

    async fn get_abandoned(&self, id: &FormId) -> Result<Option<AbandonedForm>, RepositoryError> {
        let row: Option<AbandonedRow> = sqlx::query_as(concat!(
            "SELECT ",
            abandoned_columns!(),
            " FROM abandoned_forms WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn set_checkout_reference(
        &self,
        id: &FormId,
        reference: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE abandoned_forms SET checkout_reference = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(reference)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_submission(&self, id: &FormId) -> Result<Option<FormSubmission>, RepositoryError> {
        let row: Option<SubmissionRow> = sqlx::query_as(concat!(
            "SELECT ",
            submission_columns!(),
            " FROM form_submissions WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Lock the staging row first. A concurrent confirmation for the same
        // form waits here and then sees the row gone and the submission paid.
        let staged: Option<AbandonedRow> = sqlx::query_as(concat!(
            "SELECT ",
            abandoned_columns!(),
            " FROM abandoned_forms WHERE id = $1 FOR UPDATE"
        ))
        .bind(confirmation.form_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let existing: Option<SubmissionRow> = sqlx::query_as(concat!(
            "SELECT ",
            submission_columns!(),
            " FROM form_submissions WHERE id = $1 FOR UPDATE"
        ))
        .bind(confirmation.form_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let existing: Option<FormSubmission> = existing.map(TryInto::try_into).transpose()?;
        if let Some(submission) = existing.as_ref()
            && submission.payment_status == PaymentStatus::Paid
        {
            if submission.payment_id.as_deref() != Some(confirmation.transaction_id.as_str()) {
                tracing::warn!(
                    form_id = %confirmation.form_id,
                    recorded = ?submission.payment_id,
                    incoming = %confirmation.transaction_id,
                    "Second payment reported for an already paid lead"
                );
            }
            return Ok(ConfirmOutcome::AlreadyPaid(submission.clone()));
        }

        let recorded_for: Option<String> = sqlx::query_scalar(
            "SELECT form_submission_id FROM payments WHERE transaction_id = $1",
        )
        .bind(&confirmation.transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(other_form) = recorded_for {
            let row: SubmissionRow = sqlx::query_as(concat!(
                "SELECT ",
                submission_columns!(),
                " FROM form_submissions WHERE id = $1"
            ))
            .bind(&other_form)
            .fetch_one(&mut *tx)
            .await?;
            return Ok(ConfirmOutcome::AlreadyPaid(row.try_into()?));
        }

        let (details, created_at) = match (staged, existing) {
            (Some(row), _) => {
                let form = AbandonedForm::try_from(row)?;
                (form.details, form.created_at)
            }
            (None, Some(submission)) => (submission.details, submission.created_at),
            (None, None) => return Ok(ConfirmOutcome::UnknownForm),
        };

        let row: SubmissionRow = sqlx::query_as(concat!(
            "INSERT INTO form_submissions \
                 (id, name, email, phone, business_name, business_type, business_description, plan, \
                  payment_status, payment_id, payment_provider, payment_date, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'paid', $9, $10, now(), $11) \
             ON CONFLICT (id) DO UPDATE SET \
                 payment_status = 'paid', \
                 payment_id = EXCLUDED.payment_id, \
                 payment_provider = EXCLUDED.payment_provider, \
                 payment_date = EXCLUDED.payment_date, \
                 updated_at = now() \
             RETURNING ",
            submission_columns!()
        ))
        .bind(confirmation.form_id.as_str())
        .bind(&details.name)
        .bind(details.email.as_str())
        .bind(&details.phone)
        .bind(&details.business_name)
        .bind(details.business_type.as_deref())
        .bind(details.business_description.as_deref())
        .bind(details.plan.as_str())
        .bind(&confirmation.transaction_id)
        .bind(confirmation.provider.as_str())
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_write(e, "submission payment"))?;

        sqlx::query(
            "INSERT INTO payments \
                 (id, form_submission_id, provider, transaction_id, amount_minor, currency, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'paid')",
        )
        .bind(PaymentId::new_v4())
        .bind(confirmation.form_id.as_str())
        .bind(confirmation.provider.as_str())
        .bind(&confirmation.transaction_id)
        .bind(confirmation.amount.amount_minor)
        .bind(confirmation.amount.currency.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_write(e, "payment"))?;

        sqlx::query("DELETE FROM abandoned_forms WHERE id = $1")
            .bind(confirmation.form_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ConfirmOutcome::Promoted(row.try_into()?))
    }

    async fn mark_failed(&self, id: &FormId, reason: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE abandoned_forms \
             SET payment_status = 'failed', failure_reason = $2, updated_at = now() \
             WHERE id = $1 AND payment_status = 'pending'",
        )
        .bind(id.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn webhook_event_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM webhook_events WHERE event_id = $1)")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn record_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (event_id, event_type) VALUES ($1, $2) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM abandoned_forms WHERE updated_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
