//! PayPal order endpoints.
//!
//! Answer 503 when PayPal credentials are not configured.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use zero_cost_core::PaymentProvider;

use crate::error::Result;
use crate::services::{CaptureOutcome, CheckoutParams};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub status: String,
    pub approve_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureQuery {
    #[serde(default)]
    pub form_id: Option<String>,
}

/// Create a PayPal order for a plan.
///
/// POST /api/paypal/orders
#[instrument(skip(state, payload))]
pub async fn create_order(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CheckoutParams>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>)> {
    let Json(params) = payload?;
    let request = state
        .leads()
        .prepare_checkout(params, PaymentProvider::Paypal)
        .await?;
    let order = state.leads().start_paypal_order(&request).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            order_id: order.id,
            status: order.status,
            approve_url: order.approve_url,
        }),
    ))
}

/// Capture an order the buyer approved and confirm the lead.
///
/// POST /api/paypal/orders/{order_id}/capture?formId=...
#[instrument(skip(state, query))]
pub async fn capture_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    query: std::result::Result<Query<CaptureQuery>, QueryRejection>,
) -> Result<Json<CaptureOutcome>> {
    let Query(query) = query?;
    let outcome = state
        .leads()
        .capture_paypal_order(&order_id, query.form_id.as_deref())
        .await?;

    Ok(Json(outcome))
}
