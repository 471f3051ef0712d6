//! Error taxonomy shared by the pipeline and the transport layer.
//!
//! Every failure class maps to one HTTP status and one envelope shape:
//! - `Validation` → 400 with a `field: message` details list
//! - `Conflict` → 409 (duplicate email)
//! - `Upstream` → 500 with a generic body; the cause is logged server-side
//!   and never sent to the client
//!
//! Discord notification failures are not part of the taxonomy: they are
//! swallowed and logged inside the adapter.

use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::pipeline::HandlerResult;
use crate::schema::FieldError;

/// Typed pipeline failure.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or missing input, all offending fields at once
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Duplicate email
    #[error("{0}")]
    Conflict(String),

    /// A vendor call (Sheets, Turnstile) failed
    #[error("Upstream service failure")]
    Upstream(#[from] anyhow::Error),
}

impl ApiError {
    /// Render the error as the uniform response envelope.
    pub fn envelope(&self) -> HandlerResult {
        match self {
            ApiError::Validation(errors) => {
                HandlerResult::validation(errors.iter().map(ToString::to_string).collect())
            }
            ApiError::Conflict(message) => HandlerResult::conflict(message.clone()),
            ApiError::Upstream(_) => HandlerResult::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream(cause) = &self {
            error!(error = %cause, "request_failed_upstream");
        }
        self.envelope().into_response()
    }
}
