//! Transport layer: axum routes over the signup pipeline.
//!
//! Each route maps to one pipeline call plus a status-code/body mapping.
//! Framework-level body rejections are reshaped into the same envelope the
//! pipeline produces, so consumers see one error shape regardless of which
//! layer rejected the request.

pub mod handlers;

pub use handlers::{router, AppState};
