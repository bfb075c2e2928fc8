//! In-memory [`LeadStore`] used by service and router tests.
//!
//! Mirrors the constraints of the SQL schema: one staging row per email and
//! plan, unique transaction ids, promotion moves the row between tables.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use zero_cost_core::{FormId, PaymentStatus};

use super::{LeadStore, RepositoryError};
use crate::models::{
    AbandonedForm, ConfirmOutcome, FormSubmission, LeadDetails, PaymentConfirmation,
};

#[derive(Debug, Default)]
struct Tables {
    abandoned: HashMap<FormId, AbandonedForm>,
    submissions: HashMap<FormId, FormSubmission>,
    /// transaction id -> form id
    payments: HashMap<String, FormId>,
    events: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryLeadStore {
    tables: Mutex<Tables>,
    /// Number of upcoming calls that fail with a transient error.
    transient_failures: AtomicU32,
    /// Same, for `confirm_payment` only.
    confirm_failures: AtomicU32,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with a pool timeout.
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `confirm_payment` calls fail with a pool timeout.
    pub fn fail_confirmations(&self, n: u32) {
        self.confirm_failures.store(n, Ordering::SeqCst);
    }

    pub fn payment_count(&self) -> usize {
        self.lock().payments.len()
    }

    pub fn abandoned_count(&self) -> usize {
        self.lock().abandoned.len()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    /// Seed a staging row with a known id (clients may hold ids minted elsewhere).
    pub fn insert_abandoned(&self, id: FormId, details: LeadDetails) -> AbandonedForm {
        let now = Utc::now();
        let form = AbandonedForm {
            id: id.clone(),
            details,
            payment_status: PaymentStatus::Pending,
            failure_reason: None,
            checkout_reference: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().abandoned.insert(id, form.clone());
        form
    }

    /// Seed a submission that never completed payment, as older rows may be.
    pub fn insert_unpaid_submission(&self, id: FormId, details: LeadDetails) {
        let now = Utc::now();
        let submission = FormSubmission {
            id: id.clone(),
            details,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            payment_provider: None,
            payment_date: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().submissions.insert(id, submission);
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    fn maybe_fail(&self) -> Result<(), RepositoryError> {
        Self::take_failure(&self.transient_failures)
    }

    fn take_failure(counter: &AtomicU32) -> Result<(), RepositoryError> {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn save_abandoned(&self, details: &LeadDetails) -> Result<AbandonedForm, RepositoryError> {
        self.maybe_fail()?;
        let mut tables = self.lock();
        let now = Utc::now();

        if let Some(existing) = tables
            .abandoned
            .values_mut()
            .find(|f| f.details.email == details.email && f.details.plan == details.plan)
        {
            existing.details = details.clone();
            existing.payment_status = PaymentStatus::Pending;
            existing.failure_reason = None;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let form = AbandonedForm {
            id: FormId::generate(),
            details: details.clone(),
            payment_status: PaymentStatus::Pending,
            failure_reason: None,
            checkout_reference: None,
            created_at: now,
            updated_at: now,
        };
        tables.abandoned.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    async fn get_abandoned(&self, id: &FormId) -> Result<Option<AbandonedForm>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.lock().abandoned.get(id).cloned())
    }

    async fn set_checkout_reference(
        &self,
        id: &FormId,
        reference: &str,
    ) -> Result<bool, RepositoryError> {
        self.maybe_fail()?;
        let mut tables = self.lock();
        let Some(form) = tables.abandoned.get_mut(id) else {
            return Ok(false);
        };
        form.checkout_reference = Some(reference.to_owned());
        form.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_submission(&self, id: &FormId) -> Result<Option<FormSubmission>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.lock().submissions.get(id).cloned())
    }

    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmOutcome, RepositoryError> {
        self.maybe_fail()?;
        Self::take_failure(&self.confirm_failures)?;
        let mut tables = self.lock();

        if let Some(submission) = tables.submissions.get(&confirmation.form_id)
            && submission.payment_status == PaymentStatus::Paid
        {
            return Ok(ConfirmOutcome::AlreadyPaid(submission.clone()));
        }
        if let Some(other) = tables.payments.get(&confirmation.transaction_id) {
            let other = other.clone();
            return tables
                .submissions
                .get(&other)
                .cloned()
                .map(ConfirmOutcome::AlreadyPaid)
                .ok_or_else(|| RepositoryError::DataCorruption("orphan payment".to_owned()));
        }

        // A staging row wins; an unpaid submission is promoted in place.
        let staged = tables.abandoned.remove(&confirmation.form_id);
        let (details, created_at) = match (staged, tables.submissions.get(&confirmation.form_id)) {
            (Some(staged), _) => (staged.details, staged.created_at),
            (None, Some(existing)) => (existing.details.clone(), existing.created_at),
            (None, None) => return Ok(ConfirmOutcome::UnknownForm),
        };

        let now = Utc::now();
        let id = confirmation.form_id.clone();
        let submission = FormSubmission {
            id: id.clone(),
            details,
            payment_status: PaymentStatus::Paid,
            payment_id: Some(confirmation.transaction_id.clone()),
            payment_provider: Some(confirmation.provider),
            payment_date: Some(now),
            created_at,
            updated_at: now,
        };
        tables
            .payments
            .insert(confirmation.transaction_id.clone(), id.clone());
        tables.submissions.insert(id, submission.clone());
        Ok(ConfirmOutcome::Promoted(submission))
    }

    async fn mark_failed(&self, id: &FormId, reason: &str) -> Result<bool, RepositoryError> {
        self.maybe_fail()?;
        let mut tables = self.lock();
        match tables.abandoned.get_mut(id) {
            Some(form) if form.payment_status == PaymentStatus::Pending => {
                form.payment_status = PaymentStatus::Failed;
                form.failure_reason = Some(reason.to_owned());
                form.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn webhook_event_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.lock().events.contains(event_id))
    }

    async fn record_webhook_event(
        &self,
        event_id: &str,
        _event_type: &str,
    ) -> Result<bool, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.lock().events.insert(event_id.to_owned()))
    }

    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.maybe_fail()?;
        let mut tables = self.lock();
        let before = tables.abandoned.len();
        tables.abandoned.retain(|_, f| f.updated_at >= older_than);
        Ok((before - tables.abandoned.len()) as u64)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.maybe_fail()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use zero_cost_core::{Email, PaymentProvider, Plan};

    use super::*;

    fn details() -> LeadDetails {
        LeadDetails {
            name: "Ana Souza".to_owned(),
            email: Email::parse("ana@example.com").unwrap(),
            phone: "+5511987654321".to_owned(),
            business_name: "Padaria da Ana".to_owned(),
            business_type: None,
            business_description: None,
            plan: Plan::Monthly,
        }
    }

    fn confirmation(id: &FormId, tx: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            form_id: id.clone(),
            provider: PaymentProvider::Stripe,
            transaction_id: tx.to_owned(),
            amount: Plan::Monthly.price(),
        }
    }

    #[tokio::test]
    async fn test_unpaid_submission_is_promoted_in_place() {
        let store = MemoryLeadStore::new();
        let id = FormId::parse("legacy-form").unwrap();
        store.insert_unpaid_submission(id.clone(), details());

        let outcome = store.confirm_payment(&confirmation(&id, "pi_1")).await.unwrap();

        let ConfirmOutcome::Promoted(submission) = outcome else {
            panic!("expected promotion");
        };
        assert_eq!(submission.payment_status, PaymentStatus::Paid);
        assert_eq!(submission.payment_id.as_deref(), Some("pi_1"));
        assert_eq!(store.submission_count(), 1);
        assert_eq!(store.payment_count(), 1);
    }

    #[tokio::test]
    async fn test_confirm_without_any_row_is_unknown() {
        let store = MemoryLeadStore::new();
        let id = FormId::parse("nobody").unwrap();

        let outcome = store.confirm_payment(&confirmation(&id, "pi_1")).await.unwrap();

        assert!(matches!(outcome, ConfirmOutcome::UnknownForm));
        assert_eq!(store.payment_count(), 0);
    }
}
