//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables once at startup.
//! Secrets (service-account key, Turnstile secret, webhook URL) never
//! leave this struct except through the adapters that need them.

use std::env;

use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host for the web server to bind to
    pub host: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Google spreadsheet ID that signups are appended to
    pub spreadsheet_id: String,

    /// Service-account email used for the Sheets API JWT grant
    pub service_account_email: Option<String>,

    /// Service-account RSA private key (PEM). `\n` escapes are unfolded
    /// so the key can be passed through a single-line env var.
    pub service_account_private_key: Option<String>,

    /// Default sheet tab signups land in when the payload names none
    pub default_sheet_tab: String,

    /// Turnstile site key, exposed to widgets via /config
    pub turnstile_site_key: Option<String>,

    /// Turnstile secret key; token verification runs only when set
    pub turnstile_secret_key: Option<String>,

    /// Discord webhook URL; notifications are skipped when unset
    pub discord_webhook_url: Option<String>,

    /// Allowed CORS origins, `*` meaning any
    pub cors_origins: Vec<String>,

    /// Whether the /metrics endpoint is served
    pub metrics_enabled: bool,

    /// Rate-limit settings surfaced via /config (max requests per window)
    pub rate_limit_max: u32,

    /// Rate-limit window in seconds
    pub rate_limit_window_secs: u64,

    /// HTTP request timeout for vendor calls in milliseconds
    pub request_timeout_ms: u64,

    /// Directory the embeddable widget assets are served from
    pub static_dir: String,

    // =========================================================================
    // Vendor endpoints (overridable so test suites can point at a mock)
    // =========================================================================

    /// Google Sheets API base URL
    pub sheets_base_url: String,

    /// Google OAuth token endpoint
    pub token_url: String,

    /// Cloudflare Turnstile verification endpoint
    pub turnstile_verify_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            spreadsheet_id: env::var("GOOGLE_SPREADSHEET_ID").unwrap_or_default(),

            service_account_email: env::var("GOOGLE_SERVICE_ACCOUNT_EMAIL").ok(),

            service_account_private_key: env::var("GOOGLE_PRIVATE_KEY")
                .ok()
                .map(|k| k.replace("\\n", "\n")),

            default_sheet_tab: env::var("DEFAULT_SHEET_TAB")
                .unwrap_or_else(|_| "Signups".to_string()),

            turnstile_site_key: env::var("TURNSTILE_SITE_KEY").ok(),

            turnstile_secret_key: env::var("TURNSTILE_SECRET_KEY").ok(),

            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").ok(),

            cors_origins: parse_csv("CORS_ORIGINS")
                .unwrap_or_else(|| vec!["*".to_string()]),

            metrics_enabled: parse_bool("METRICS_ENABLED", true),

            rate_limit_max: env::var("RATE_LIMIT_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),

            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()),

            sheets_base_url: env::var("SHEETS_BASE_URL")
                .unwrap_or_else(|_| "https://sheets.googleapis.com".to_string()),

            token_url: env::var("GOOGLE_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),

            turnstile_verify_url: env::var("TURNSTILE_VERIFY_URL").unwrap_or_else(|_| {
                "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
            }),
        }
    }

    /// Turnstile verification runs only when a secret key is configured.
    pub fn turnstile_enabled(&self) -> bool {
        self.turnstile_secret_key.is_some()
    }

    /// Whether Sheets credentials are fully configured.
    pub fn sheets_configured(&self) -> bool {
        !self.spreadsheet_id.is_empty()
            && self.service_account_email.is_some()
            && self.service_account_private_key.is_some()
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Parse a boolean env var, accepting true/false/1/0 in any case.
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}
