//! SheetDrop - Email signup API backed by Google Sheets.
//!
//! This library provides the modules for the `sheetdrop-server` binary:
//! - `schema`: payload validation and normalization
//! - `sheets`: Google Sheets adapter (duplicate check, append, stats)
//! - `discord`: fire-and-forget webhook notifications
//! - `turnstile`: Cloudflare Turnstile token verification
//! - `pipeline`: signup orchestration returning a uniform envelope
//! - `web`: axum transport layer
//!
//! ## Request flow
//!
//! ```text
//! HTTP → validate → (verify token) → check duplicate → append row → notify
//! ```

pub mod config;
pub mod discord;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod sheets;
pub mod turnstile;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::ApiError;
pub use pipeline::{BulkOutcome, HandlerResult, PipelineOutput};
pub use schema::SignupRecord;
pub use sheets::SheetsClient;
pub use web::AppState;
