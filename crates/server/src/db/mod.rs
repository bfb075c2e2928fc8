//! Lead persistence in `PostgreSQL`.
//!
//! The database is the only source of truth for leads. Hosted Postgres
//! providers expose a plain connection string, so the service talks to it
//! with sqlx rather than through a vendor REST client.
//!
//! ## Tables
//!
//! - `abandoned_forms` - Leads that have not paid yet (one per email + plan)
//! - `form_submissions` - Paid leads, promoted from `abandoned_forms`
//! - `payments` - One row per gateway transaction
//! - `webhook_events` - Processed gateway event ids
//! - `website_projects` - Downstream project tracking (not written here)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p zero-cost-cli -- migrate
//! ```

pub mod leads;
#[cfg(test)]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use zero_cost_core::FormId;

use crate::models::{AbandonedForm, ConfirmOutcome, FormSubmission, LeadDetails, PaymentConfirmation};

pub use leads::PgLeadStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a transaction id recorded twice).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether retrying the same operation can reasonably succeed.
    ///
    /// Covers connection trouble, pool exhaustion, serialization failures
    /// (`40001`) and deadlocks (`40P01`).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            Self::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("40001" | "40P01"))
            }
            _ => false,
        }
    }

    /// Map a write error, turning unique violations into [`Self::Conflict`].
    pub(crate) fn from_write(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(err)
    }
}

/// Storage operations the lead service needs.
///
/// Every write is idempotent or guarded so that a retried call, or a
/// gateway event delivered twice, leaves the same state as a single call.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Insert a staging row, or refresh the one for the same email and plan.
    async fn save_abandoned(&self, details: &LeadDetails) -> Result<AbandonedForm, RepositoryError>;

    async fn get_abandoned(&self, id: &FormId) -> Result<Option<AbandonedForm>, RepositoryError>;

    /// Remember the checkout session, intent or order created for a lead.
    /// Returns `false` when no staging row exists.
    async fn set_checkout_reference(
        &self,
        id: &FormId,
        reference: &str,
    ) -> Result<bool, RepositoryError>;

    async fn find_submission(&self, id: &FormId) -> Result<Option<FormSubmission>, RepositoryError>;

    /// Promote a staging row to a paid submission in one transaction:
    /// upsert the submission, insert the payment, delete the staging row.
    async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmOutcome, RepositoryError>;

    /// Move a pending staging row to `failed`. Returns `false` if the lead is
    /// unknown, already failed or already paid.
    async fn mark_failed(&self, id: &FormId, reason: &str) -> Result<bool, RepositoryError>;

    async fn webhook_event_processed(&self, event_id: &str) -> Result<bool, RepositoryError>;

    /// Record a processed event. Returns `false` if it was already recorded.
    async fn record_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> Result<bool, RepositoryError>;

    /// Delete staging rows not touched since `older_than`.
    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
