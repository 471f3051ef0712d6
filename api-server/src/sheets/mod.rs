//! Google Sheets adapter.
//!
//! The spreadsheet is the only persistent store in the system:
//! - `email_exists` powers the duplicate check (fails OPEN on read errors)
//! - `append_signup` persists one accepted signup (fails CLOSED)
//! - `get_stats` backs the /stats endpoint (fails CLOSED)
//!
//! Authentication is a service-account JWT exchanged for an OAuth access
//! token, lazily fetched and cached behind a shared handle.

pub mod auth;
pub mod client;

pub use auth::TokenProvider;
pub use client::{SheetStats, SheetsClient};
