//! Abandoned form maintenance.
//!
//! Staging rows are only useful for follow-up while they are fresh; paid
//! leads live in `form_submissions` and are never touched here.

use chrono::{Duration, Utc};
use zero_cost_server::db::{LeadStore, PgLeadStore, create_pool};

use super::{CommandError, database_url};

/// Delete abandoned forms not updated in the last `older_than_days` days.
///
/// Returns the number of deleted rows.
pub async fn purge(older_than_days: u32) -> Result<u64, CommandError> {
    let url = database_url()?;
    let pool = create_pool(&url).await?;
    let store = PgLeadStore::new(pool);

    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
    tracing::info!(%cutoff, "Purging abandoned forms");

    Ok(store.purge_abandoned(cutoff).await?)
}
