//! Lead form capture.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;
use tracing::instrument;

use zero_cost_core::{FormId, PaymentStatus};

use crate::error::Result;
use crate::services::LeadForm;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFormResponse {
    pub success: bool,
    pub form_id: FormId,
    pub payment_status: PaymentStatus,
}

/// Save the lead form before checkout.
///
/// POST /api/store-form-data
///
/// Returns 201 with the form id the client passes to checkout. Submitting
/// the same email and plan again returns the same id.
#[instrument(skip(state, payload))]
pub async fn store_form_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LeadForm>, JsonRejection>,
) -> Result<(StatusCode, Json<StoreFormResponse>)> {
    let Json(form) = payload?;
    let saved = state.leads().store_form(form).await?;

    Ok((
        StatusCode::CREATED,
        Json(StoreFormResponse {
            success: true,
            form_id: saved.id,
            payment_status: saved.payment_status,
        }),
    ))
}
