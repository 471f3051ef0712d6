//! Sheets API client: duplicate check, append, stats.
//!
//! One client is shared process-wide. Reads used by the duplicate check
//! fail OPEN (a transient read error must not block signups); writes and
//! stats fail CLOSED and propagate to the caller.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::schema::{SignupRecord, HEADER_ROW};
use crate::sheets::auth::TokenProvider;

/// Column range read by the duplicate check (email column).
const EMAIL_RANGE: &str = "A:A";

/// Column range appended to (one row across all header columns).
const APPEND_RANGE: &str = "A:F";

/// Shared Sheets adapter.
#[derive(Clone)]
pub struct SheetsClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    auth: TokenProvider,
}

/// Signup statistics for the /stats endpoint.
#[derive(Debug, Clone)]
pub struct SheetStats {
    /// Data rows (header rows excluded) in the requested scope
    pub total: usize,
    /// All tab titles in the spreadsheet
    pub tabs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsClient {
    /// Build the client from configuration. Fails when credentials are
    /// missing rather than at first use.
    pub fn new(http: reqwest::Client, config: &Config) -> Result<Self> {
        if !config.sheets_configured() {
            anyhow::bail!(
                "Sheets credentials are not configured \
                 (GOOGLE_SPREADSHEET_ID, GOOGLE_SERVICE_ACCOUNT_EMAIL, GOOGLE_PRIVATE_KEY)"
            );
        }

        let auth = TokenProvider::service_account(
            http.clone(),
            config.token_url.clone(),
            config
                .service_account_email
                .clone()
                .unwrap_or_default(),
            config
                .service_account_private_key
                .clone()
                .unwrap_or_default(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.sheets_base_url.trim_end_matches('/').to_string(),
                spreadsheet_id: config.spreadsheet_id.clone(),
                auth,
            }),
        })
    }

    /// Client with a fixed token, pointed at a mock server.
    #[cfg(test)]
    pub(crate) fn for_tests(
        http: reqwest::Client,
        base_url: &str,
        spreadsheet_id: &str,
        token: &str,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                spreadsheet_id: spreadsheet_id.to_string(),
                auth: TokenProvider::fixed(token),
            }),
        }
    }

    /// Case-insensitive duplicate check over the given tab, or over every
    /// tab when none is given.
    ///
    /// Fails OPEN: any read error is logged and reported as "not found" so
    /// a transient vendor problem never blocks a signup.
    pub async fn email_exists(&self, email: &str, tab: Option<&str>) -> bool {
        match self.try_email_exists(email, tab).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, email = email, "sheets_exists_check_failed_open");
                false
            }
        }
    }

    async fn try_email_exists(&self, email: &str, tab: Option<&str>) -> Result<bool> {
        let needle = email.trim().to_lowercase();
        let known = self.list_tabs().await?;

        let targets: Vec<String> = match tab {
            Some(t) => {
                if !known.iter().any(|k| k == t) {
                    // Tab does not exist yet, so the email cannot either
                    return Ok(false);
                }
                vec![t.to_string()]
            }
            None => known,
        };

        for target in targets {
            let rows = self.read_column(&target, EMAIL_RANGE).await?;
            // Skip the header row
            let found = rows
                .iter()
                .skip(1)
                .any(|cell| cell.trim().to_lowercase() == needle);
            if found {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Append one signup row, creating the target tab (with a header row)
    /// when it does not exist yet.
    pub async fn append_signup(&self, record: &SignupRecord) -> Result<()> {
        self.ensure_tab(&record.sheet_tab).await?;
        self.append_row(&record.sheet_tab, record.to_row()).await?;

        info!(
            email = %record.email,
            tab = %record.sheet_tab,
            "sheets_append_ok"
        );

        Ok(())
    }

    /// Row counts for the /stats endpoint. Header rows are not counted.
    pub async fn get_stats(&self, tab: Option<&str>) -> Result<SheetStats> {
        let tabs = self.list_tabs().await?;

        let targets: Vec<&String> = match tab {
            Some(t) => tabs.iter().filter(|k| k.as_str() == t).collect(),
            None => tabs.iter().collect(),
        };

        let mut total = 0usize;
        for target in targets {
            let rows = self.read_column(target, EMAIL_RANGE).await?;
            total += rows.len().saturating_sub(1);
        }

        Ok(SheetStats { total, tabs })
    }

    /// All tab titles in the spreadsheet.
    pub async fn list_tabs(&self) -> Result<Vec<String>> {
        let url = format!(
            "{}/v4/spreadsheets/{}",
            self.inner.base_url, self.inner.spreadsheet_id
        );

        let token = self.inner.auth.access_token().await?;
        let response = self
            .inner
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await
            .context("Spreadsheet metadata request failed")?;

        let meta: SpreadsheetMeta = check(response, "Spreadsheet metadata read")
            .await?
            .json()
            .await
            .context("Invalid spreadsheet metadata response")?;

        Ok(meta
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }

    async fn ensure_tab(&self, tab: &str) -> Result<()> {
        let known = self.list_tabs().await?;
        if known.iter().any(|k| k == tab) {
            return Ok(());
        }

        let url = format!(
            "{}/v4/spreadsheets/{}:batchUpdate",
            self.inner.base_url, self.inner.spreadsheet_id
        );

        let token = self.inner.auth.access_token().await?;
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({
                "requests": [{ "addSheet": { "properties": { "title": tab } } }]
            }))
            .send()
            .await
            .context("Tab creation request failed")?;

        check(response, "Tab creation").await?;

        let header: Vec<String> = HEADER_ROW.iter().map(|s| s.to_string()).collect();
        self.append_row(tab, header).await?;

        info!(tab = tab, "sheets_tab_created");

        Ok(())
    }

    async fn append_row(&self, tab: &str, row: Vec<String>) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}!{}:append",
            self.inner.base_url, self.inner.spreadsheet_id, tab, APPEND_RANGE
        );

        let token = self.inner.auth.access_token().await?;
        let response = self
            .inner
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .context("Append request failed")?;

        check(response, "Append").await?;

        Ok(())
    }

    async fn read_column(&self, tab: &str, range: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}!{}",
            self.inner.base_url, self.inner.spreadsheet_id, tab, range
        );

        let token = self.inner.auth.access_token().await?;
        let response = self
            .inner
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("Values read request failed")?;

        let values: ValueRange = check(response, "Values read")
            .await?
            .json()
            .await
            .context("Invalid values response")?;

        Ok(values
            .values
            .into_iter()
            .filter_map(|mut row| (!row.is_empty()).then(|| row.remove(0)))
            .collect())
    }
}

/// Turn a non-2xx response into an error carrying status and body. The body
/// stays server-side; clients only ever see the generic envelope.
async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{what} failed with status {status}: {body}");
    }
    Ok(response)
}
