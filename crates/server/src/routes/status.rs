//! Health checks and payment status polling.

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use zero_cost_core::FormId;

use crate::error::{AppError, Result};
use crate::services::PaymentStatusView;
use crate::state::AppState;

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct DatabaseCheck {
    pub status: &'static str,
}

/// Database connectivity check.
///
/// GET /api/supabase-check
///
/// Returns 503 when the database cannot be reached.
pub async fn database_check(State(state): State<AppState>) -> Result<Json<DatabaseCheck>> {
    match state.leads().ping().await {
        Ok(()) => Ok(Json(DatabaseCheck { status: "ok" })),
        Err(e) => {
            tracing::warn!(error = %e, "Database check failed");
            Err(AppError::Unavailable("database unavailable".to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub form_id: Option<String>,
}

/// Payment status of a lead, polled by the success page.
///
/// GET /api/payment-status?formId=...
#[instrument(skip(state, query))]
pub async fn payment_status(
    State(state): State<AppState>,
    query: std::result::Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<PaymentStatusView>> {
    let Query(query) = query?;
    let raw = query
        .form_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("formId is required".to_string()))?;
    let form_id = FormId::parse(raw.trim())
        .map_err(|e| AppError::BadRequest(format!("invalid formId: {e}")))?;

    Ok(Json(state.leads().payment_status(&form_id).await?))
}
