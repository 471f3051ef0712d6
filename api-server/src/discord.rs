//! Fire-and-forget Discord webhook notifications.
//!
//! Notifications are best-effort: when no webhook URL is configured they are
//! skipped, and every failure (network, non-2xx) is logged and swallowed.
//! Callers spawn these functions as detached tasks; the HTTP response to the
//! signup client never waits for delivery.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::schema::SignupRecord;

const COLOR_GREEN: u32 = 0x2ecc71;
const COLOR_RED: u32 = 0xe74c3c;
const COLOR_BLUE: u32 = 0x3498db;

/// Announce an accepted signup.
pub async fn notify_signup(
    http: reqwest::Client,
    webhook_url: Option<String>,
    record: SignupRecord,
) {
    let mut fields = vec![
        embed_field("Email", &record.email),
        embed_field("Tab", &record.sheet_tab),
        embed_field("Source", &record.source),
    ];
    if let Some(name) = &record.name {
        fields.push(embed_field("Name", name));
    }
    if !record.tags.is_empty() {
        fields.push(embed_field("Tags", &record.tags.join(", ")));
    }

    post_embed(&http, webhook_url, "New signup", COLOR_GREEN, fields).await;
}

/// Announce a bulk batch summary.
pub async fn notify_bulk(
    http: reqwest::Client,
    webhook_url: Option<String>,
    accepted: u32,
    duplicates: u32,
    failed: u32,
) {
    let fields = vec![
        embed_field("Accepted", &accepted.to_string()),
        embed_field("Duplicates", &duplicates.to_string()),
        embed_field("Failed", &failed.to_string()),
    ];

    post_embed(&http, webhook_url, "Bulk signup processed", COLOR_BLUE, fields).await;
}

/// Announce a failed append so an operator can follow up.
pub async fn notify_failure(
    http: reqwest::Client,
    webhook_url: Option<String>,
    context: String,
    detail: String,
) {
    let fields = vec![embed_field("Detail", &detail)];
    post_embed(&http, webhook_url, &context, COLOR_RED, fields).await;
}

fn embed_field(name: &str, value: &str) -> Value {
    json!({ "name": name, "value": value, "inline": true })
}

/// POST one embed to the webhook. Never returns an error.
async fn post_embed(
    http: &reqwest::Client,
    webhook_url: Option<String>,
    title: &str,
    color: u32,
    fields: Vec<Value>,
) {
    let url = match webhook_url {
        Some(u) if !u.is_empty() => u,
        _ => {
            debug!(title = title, "discord_skipped_no_webhook");
            return;
        }
    };

    let body = json!({
        "embeds": [{
            "title": title,
            "color": color,
            "fields": fields,
        }]
    });

    match http.post(&url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!(title = title, "discord_notified");
            metrics::record_notification(true);
        }
        Ok(resp) => {
            warn!(title = title, status = %resp.status(), "discord_rejected");
            metrics::record_notification(false);
        }
        Err(e) => {
            warn!(title = title, error = %e, "discord_request_failed");
            metrics::record_notification(false);
        }
    }
}
