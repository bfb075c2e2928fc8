//! Database migration command.
//!
//! ```bash
//! zc-cli migrate
//! ```
//!
//! Applies `crates/server/migrations/` to the database named by
//! `ZC_DATABASE_URL` (or `DATABASE_URL`).

use zero_cost_server::db::create_pool;

use super::{CommandError, database_url};

/// Run all pending migrations.
pub async fn run() -> Result<(), CommandError> {
    let url = database_url()?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&url).await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Migrations complete");
    Ok(())
}
