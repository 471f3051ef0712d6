//! Prometheus metrics recorder and counter helpers.
//!
//! Counter names follow Prometheus conventions (`_total` suffix) with
//! bounded label cardinality: `outcome` is one of accepted / duplicate /
//! rejected / failed, `result` is delivered / failed.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return the handle used to
/// serve `/metrics`.
///
/// Must be called at most once per process, before any metrics are recorded.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Count a signup request by outcome.
pub fn record_signup(outcome: &'static str) {
    counter!("sheetdrop_signups_total", "outcome" => outcome).increment(1);
}

/// Count a processed bulk request.
pub fn record_bulk(accepted: u64, duplicates: u64, failed: u64) {
    counter!("sheetdrop_bulk_items_total", "outcome" => "accepted").increment(accepted);
    counter!("sheetdrop_bulk_items_total", "outcome" => "duplicate").increment(duplicates);
    counter!("sheetdrop_bulk_items_total", "outcome" => "failed").increment(failed);
}

/// Count a Discord notification attempt.
pub fn record_notification(delivered: bool) {
    let result = if delivered { "delivered" } else { "failed" };
    counter!("sheetdrop_notifications_total", "result" => result).increment(1);
}
