//! Signup pipeline: validate → verify token → check duplicate → append → notify.
//!
//! Every operation returns the same [`HandlerResult`] envelope; the transport
//! layer only maps it onto an HTTP response. Each step short-circuits:
//! validation failure 400, failed token 400, duplicate 409, append failure
//! 500. Notifications are spawned as detached tasks; the returned
//! [`PipelineOutput`] carries the join handle so tests can await delivery
//! before asserting on side effects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discord;
use crate::error::ApiError;
use crate::metrics;
use crate::schema::{
    self, BulkSignupPayload, ExtendedSignupPayload, FieldError, SignupPayload, SignupRecord,
};
use crate::sheets::SheetsClient;
use crate::turnstile;

// =============================================================================
// Envelope
// =============================================================================

/// Uniform response envelope: the sole contract between pipeline and
/// transport.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResult {
    pub success: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HandlerResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            status_code: 200,
            message: Some(message.into()),
            error: None,
            details: None,
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(message)
        }
    }

    pub fn validation(details: Vec<String>) -> Self {
        Self {
            success: false,
            status_code: 400,
            message: None,
            error: Some("Validation failed".to_string()),
            details: Some(details),
            data: None,
        }
    }

    pub fn conflict(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: 409,
            message: None,
            error: Some(error.into()),
            details: None,
            data: None,
        }
    }

    /// Generic 500. Never carries vendor error text.
    pub fn internal() -> Self {
        Self {
            success: false,
            status_code: 500,
            message: None,
            error: Some("Internal server error".to_string()),
            details: None,
            data: None,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: 404,
            message: None,
            error: Some(error.into()),
            details: None,
            data: None,
        }
    }
}

impl IntoResponse for HandlerResult {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Pipeline result plus the detached notification task, if one was spawned.
pub struct PipelineOutput {
    pub result: HandlerResult,
    pub notification: Option<JoinHandle<()>>,
}

impl PipelineOutput {
    fn done(result: HandlerResult) -> Self {
        Self {
            result,
            notification: None,
        }
    }
}

/// Per-batch counters for bulk signups.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub success: u32,
    pub failed: u32,
    pub duplicates: u32,
    pub errors: Vec<String>,
}

// =============================================================================
// Operations
// =============================================================================

/// Handle `POST /signup`.
pub async fn process_signup(
    config: &Config,
    sheets: &SheetsClient,
    http: &reqwest::Client,
    payload: SignupPayload,
) -> PipelineOutput {
    let token = payload.turnstile_token.clone();
    match schema::validate_signup(&payload, &config.default_sheet_tab) {
        Ok(record) => submit_single(config, sheets, http, record, token).await,
        Err(errors) => PipelineOutput::done(reject(errors)),
    }
}

/// Handle `POST /signup/extended`.
pub async fn process_extended(
    config: &Config,
    sheets: &SheetsClient,
    http: &reqwest::Client,
    payload: ExtendedSignupPayload,
) -> PipelineOutput {
    let token = payload.turnstile_token.clone();
    match schema::validate_extended(&payload, &config.default_sheet_tab) {
        Ok(record) => submit_single(config, sheets, http, record, token).await,
        Err(errors) => PipelineOutput::done(reject(errors)),
    }
}

/// Handle `POST /signup/bulk`.
///
/// The envelope is validated once; items are then processed sequentially
/// and per-item failures are counted, never propagated. The call returns
/// 200 unless the envelope itself was invalid. Token verification does not
/// apply to bulk items (the endpoint is meant for trusted imports).
pub async fn process_bulk(
    config: &Config,
    sheets: &SheetsClient,
    http: &reqwest::Client,
    payload: BulkSignupPayload,
) -> PipelineOutput {
    let items = match schema::validate_bulk_envelope(&payload) {
        Ok(items) => items,
        Err(errors) => return PipelineOutput::done(reject(errors)),
    };

    info!(count = items.len(), "bulk_signup_start");

    let mut outcome = BulkOutcome::default();

    for (idx, item) in items.iter().enumerate() {
        let record = match schema::validate_extended(item, &config.default_sheet_tab) {
            Ok(record) => record,
            Err(errors) => {
                outcome.failed += 1;
                outcome.errors.push(format!("item {idx}: {}", errors[0]));
                continue;
            }
        };

        if sheets
            .email_exists(&record.email, Some(&record.sheet_tab))
            .await
        {
            outcome.duplicates += 1;
            continue;
        }

        match sheets.append_signup(&record).await {
            Ok(()) => outcome.success += 1,
            Err(e) => {
                warn!(error = %e, email = %record.email, "bulk_item_append_failed");
                outcome.failed += 1;
                outcome
                    .errors
                    .push(format!("item {idx}: Failed to store signup"));
            }
        }
    }

    info!(
        accepted = outcome.success,
        duplicates = outcome.duplicates,
        failed = outcome.failed,
        "bulk_signup_complete"
    );
    metrics::record_bulk(
        outcome.success as u64,
        outcome.duplicates as u64,
        outcome.failed as u64,
    );

    let notification = tokio::spawn(discord::notify_bulk(
        http.clone(),
        config.discord_webhook_url.clone(),
        outcome.success,
        outcome.duplicates,
        outcome.failed,
    ));

    let data = serde_json::to_value(&outcome).unwrap_or(Value::Null);
    PipelineOutput {
        result: HandlerResult::ok_with_data("Bulk signup processed", data),
        notification: Some(notification),
    }
}

// =============================================================================
// Shared single-signup path
// =============================================================================

async fn submit_single(
    config: &Config,
    sheets: &SheetsClient,
    http: &reqwest::Client,
    record: SignupRecord,
    token: Option<String>,
) -> PipelineOutput {
    if let Err(err) = run_checks(config, sheets, http, &record, token).await {
        let notification = match &err {
            ApiError::Upstream(cause) => {
                error!(error = %cause, email = %record.email, "signup_append_failed");
                metrics::record_signup("failed");
                Some(tokio::spawn(discord::notify_failure(
                    http.clone(),
                    config.discord_webhook_url.clone(),
                    "Signup append failed".to_string(),
                    record.email.clone(),
                )))
            }
            ApiError::Conflict(_) => {
                info!(email = %record.email, tab = %record.sheet_tab, "signup_duplicate");
                metrics::record_signup("duplicate");
                None
            }
            ApiError::Validation(_) => {
                metrics::record_signup("rejected");
                None
            }
        };
        return PipelineOutput {
            result: err.envelope(),
            notification,
        };
    }

    info!(email = %record.email, tab = %record.sheet_tab, "signup_accepted");
    metrics::record_signup("accepted");

    let data = json!({ "email": record.email, "sheetTab": record.sheet_tab });
    let notification = tokio::spawn(discord::notify_signup(
        http.clone(),
        config.discord_webhook_url.clone(),
        record,
    ));

    PipelineOutput {
        result: HandlerResult::ok_with_data("Signup successful", data),
        notification: Some(notification),
    }
}

/// The short-circuiting steps of a single signup, expressed in the error
/// taxonomy. Validation of the payload shape happened before this point.
async fn run_checks(
    config: &Config,
    sheets: &SheetsClient,
    http: &reqwest::Client,
    record: &SignupRecord,
    token: Option<String>,
) -> Result<(), ApiError> {
    if let Some(secret) = &config.turnstile_secret_key {
        let token = match token.filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => {
                return Err(ApiError::Validation(vec![FieldError::new(
                    "turnstileToken",
                    "Token is required",
                )]))
            }
        };

        let outcome = turnstile::verify(http, &config.turnstile_verify_url, secret, &token).await;
        if !outcome.success {
            let detail = outcome
                .error
                .unwrap_or_else(|| "Verification failed".to_string());
            return Err(ApiError::Validation(vec![FieldError::new(
                "turnstileToken",
                detail,
            )]));
        }
    }

    // The existence check and the append are not atomic: two concurrent
    // requests for the same email can both pass the check and produce
    // duplicate rows. The backing store has no unique constraint to lean
    // on, so this race is tolerated.
    if sheets
        .email_exists(&record.email, Some(&record.sheet_tab))
        .await
    {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    sheets.append_signup(record).await.map_err(ApiError::from)?;

    Ok(())
}

fn reject(errors: Vec<FieldError>) -> HandlerResult {
    metrics::record_signup("rejected");
    HandlerResult::validation(errors.iter().map(ToString::to_string).collect())
}
