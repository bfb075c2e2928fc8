//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Errors render as
//! `{"error": "<message>"}`; server-side failures are captured to Sentry and
//! their details stay in the logs.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payments::PaymentError;
use crate::payments::webhook::SignatureError;
use crate::services::ServiceError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Payment gateway call failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] PaymentError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Webhook signature did not verify.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request conflicts with the current state of the lead.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A required integration is not configured.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Message safe to return to the client.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Gateway(_) => "Payment provider error, please try again".to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Unauthorized(msg)
            | Self::BadRequest(msg)
            | Self::Conflict(msg)
            | Self::Unavailable(msg) => msg.clone(),
            Self::RateLimited => "Too many requests".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Database(_) | Self::Internal(_) | Self::Gateway(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = self.status();
        let body = ErrorBody {
            error: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => Self::BadRequest(msg),
            ServiceError::NotFound(what) => Self::NotFound(what),
            ServiceError::AlreadyPaid => Self::Conflict("payment already completed".to_string()),
            ServiceError::Repository(e) => Self::Database(e),
            ServiceError::Payment(e) => Self::Gateway(e),
            ServiceError::NotConfigured(what) => Self::Unavailable(format!("{what} is not configured")),
            ServiceError::AmountMismatch { .. } => {
                Self::Conflict("payment amount does not match the plan price".to_string())
            }
            ServiceError::UntrustedRedirect(url) => {
                Self::Gateway(PaymentError::Parse(format!("untrusted checkout url: {url}")))
            }
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        tracing::warn!(error = %err, "Rejected webhook signature");
        Self::Unauthorized("invalid signature".to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
