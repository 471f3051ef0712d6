//! Signup payload validation and normalization.
//!
//! Accepted shapes for the three signup endpoints, plus the normalization
//! into a [`SignupRecord`] ready to be appended to the spreadsheet.
//!
//! Validation failure is not an exception: every rule violation is collected
//! into a list of `field: message` pairs so a 400 response can report all
//! problems at once.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum accepted email length (RFC 5321 limit).
pub const MAX_EMAIL_LEN: usize = 254;

/// Bulk payloads must carry between 1 and this many signups.
pub const MAX_BULK_SIGNUPS: usize = 100;

/// Simple `local@domain.tld` shape check. Deliverability is not our problem;
/// this only rejects obvious garbage.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

// =============================================================================
// Inbound payloads
// =============================================================================

/// Body of `POST /signup`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupPayload {
    #[serde(default)]
    pub email: Option<String>,
    /// Target sheet tab; falls back to the configured default
    #[serde(default, rename = "sheetTab")]
    pub sheet_tab: Option<String>,
    /// Arbitrary JSON, serialized to a string before storage
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, rename = "turnstileToken")]
    pub turnstile_token: Option<String>,
}

/// Body of `POST /signup/extended` and of each bulk item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedSignupPayload {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "sheetTab")]
    pub sheet_tab: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, rename = "turnstileToken")]
    pub turnstile_token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Body of `POST /signup/bulk`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkSignupPayload {
    #[serde(default)]
    pub signups: Option<Vec<ExtendedSignupPayload>>,
}

// =============================================================================
// Validation output
// =============================================================================

/// A single field-path + message validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A normalized, accepted signup ready to be persisted as a spreadsheet row.
#[derive(Debug, Clone, Serialize)]
pub struct SignupRecord {
    /// Lower-cased, trimmed email
    pub email: String,
    /// ISO-8601 creation timestamp
    pub timestamp: String,
    /// Target sheet tab
    pub sheet_tab: String,
    pub name: Option<String>,
    pub source: String,
    pub tags: Vec<String>,
    /// Metadata serialized to a JSON string
    pub metadata: Option<String>,
}

impl SignupRecord {
    /// Render the record as one spreadsheet row, column order matching
    /// [`HEADER_ROW`].
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.email.clone(),
            self.timestamp.clone(),
            self.name.clone().unwrap_or_default(),
            self.source.clone(),
            self.tags.join(", "),
            self.metadata.clone().unwrap_or_default(),
        ]
    }
}

/// Header row written when a tab is auto-created.
pub const HEADER_ROW: [&str; 6] = ["Email", "Timestamp", "Name", "Source", "Tags", "Metadata"];

// =============================================================================
// Validators
// =============================================================================

/// Validate and normalize a plain signup payload.
pub fn validate_signup(
    payload: &SignupPayload,
    default_tab: &str,
) -> Result<SignupRecord, Vec<FieldError>> {
    let extended = ExtendedSignupPayload {
        email: payload.email.clone(),
        sheet_tab: payload.sheet_tab.clone(),
        metadata: payload.metadata.clone(),
        turnstile_token: payload.turnstile_token.clone(),
        name: None,
        source: None,
        tags: None,
    };
    validate_extended(&extended, default_tab)
}

/// Validate and normalize an extended signup payload.
pub fn validate_extended(
    payload: &ExtendedSignupPayload,
    default_tab: &str,
) -> Result<SignupRecord, Vec<FieldError>> {
    let mut errors = Vec::new();

    let email = match &payload.email {
        None => {
            errors.push(FieldError::new("email", "Email is required"));
            String::new()
        }
        Some(raw) => {
            let normalized = raw.trim().to_lowercase();
            if normalized.is_empty() {
                errors.push(FieldError::new("email", "Email is required"));
            } else if normalized.len() > MAX_EMAIL_LEN {
                errors.push(FieldError::new("email", "Email is too long"));
            } else if !EMAIL_RE.is_match(&normalized) {
                errors.push(FieldError::new("email", "Invalid email format"));
            }
            normalized
        }
    };

    let name = match &payload.name {
        Some(n) => {
            let trimmed = n.trim();
            if trimmed.is_empty() {
                errors.push(FieldError::new("name", "Name must not be empty"));
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        None => None,
    };

    let sheet_tab = payload
        .sheet_tab
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(default_tab)
        .to_string();

    let metadata = match &payload.metadata {
        Some(value) => match serde_json::to_string(value) {
            Ok(s) => Some(s),
            Err(_) => {
                errors.push(FieldError::new("metadata", "Metadata is not serializable"));
                None
            }
        },
        None => None,
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(SignupRecord {
        email,
        timestamp: Utc::now().to_rfc3339(),
        sheet_tab,
        name,
        source: payload
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("api")
            .to_string(),
        tags: payload.tags.clone().unwrap_or_default(),
        metadata,
    })
}

/// Validate the bulk envelope, returning the items for per-item processing.
///
/// Only the envelope is checked here; item-level validation happens inside
/// the bulk loop so one bad item cannot reject the whole batch.
pub fn validate_bulk_envelope(
    payload: &BulkSignupPayload,
) -> Result<&[ExtendedSignupPayload], Vec<FieldError>> {
    match &payload.signups {
        None => Err(vec![FieldError::new("signups", "Signups array is required")]),
        Some(items) if items.is_empty() => {
            Err(vec![FieldError::new("signups", "At least 1 signup is required")])
        }
        Some(items) if items.len() > MAX_BULK_SIGNUPS => Err(vec![FieldError::new(
            "signups",
            format!("At most {} signups are allowed", MAX_BULK_SIGNUPS),
        )]),
        Some(items) => Ok(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(email: &str) -> SignupPayload {
        SignupPayload {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_email_is_normalized() {
        let record = validate_signup(&payload("  User@Example.COM "), "Signups").unwrap();
        assert_eq!(record.email, "user@example.com");
        assert_eq!(record.sheet_tab, "Signups");
        assert_eq!(record.source, "api");
        assert!(record.tags.is_empty());
    }

    #[test]
    fn test_missing_email_is_rejected() {
        let errors = validate_signup(&SignupPayload::default(), "Signups").unwrap_err();
        assert_eq!(errors[0].to_string(), "email: Email is required");
    }

    #[test]
    fn test_malformed_emails_are_rejected() {
        for bad in ["plainaddress", "no@tld", "two@@example.com", "sp ace@example.com"] {
            let errors = validate_signup(&payload(bad), "Signups").unwrap_err();
            assert_eq!(errors[0].field, "email", "{bad} should be rejected");
        }
    }

    #[test]
    fn test_email_length_boundary() {
        // local part padded so the whole address is exactly MAX_EMAIL_LEN
        let local = "a".repeat(MAX_EMAIL_LEN - "@example.com".len());
        let at_limit = format!("{local}@example.com");
        assert_eq!(at_limit.len(), MAX_EMAIL_LEN);
        assert!(validate_signup(&payload(&at_limit), "Signups").is_ok());

        let over_limit = format!("a{at_limit}");
        let errors = validate_signup(&payload(&over_limit), "Signups").unwrap_err();
        assert_eq!(errors[0].to_string(), "email: Email is too long");
    }

    #[test]
    fn test_sheet_tab_defaults_and_overrides() {
        let record = validate_signup(&payload("a@example.com"), "Waitlist").unwrap();
        assert_eq!(record.sheet_tab, "Waitlist");

        let mut with_tab = payload("a@example.com");
        with_tab.sheet_tab = Some("Campaign".to_string());
        let record = validate_signup(&with_tab, "Waitlist").unwrap();
        assert_eq!(record.sheet_tab, "Campaign");
    }

    #[test]
    fn test_metadata_is_serialized() {
        let mut p = payload("a@example.com");
        p.metadata = Some(serde_json::json!({"ref": "landing-page"}));
        let record = validate_signup(&p, "Signups").unwrap();
        assert_eq!(record.metadata.as_deref(), Some(r#"{"ref":"landing-page"}"#));
    }

    #[test]
    fn test_extended_empty_name_is_rejected() {
        let p = ExtendedSignupPayload {
            email: Some("a@example.com".to_string()),
            name: Some("   ".to_string()),
            ..Default::default()
        };
        let errors = validate_extended(&p, "Signups").unwrap_err();
        assert_eq!(errors[0].to_string(), "name: Name must not be empty");
    }

    #[test]
    fn test_extended_defaults() {
        let p = ExtendedSignupPayload {
            email: Some("a@example.com".to_string()),
            name: Some("Ada".to_string()),
            source: Some("newsletter".to_string()),
            tags: Some(vec!["beta".to_string(), "eu".to_string()]),
            ..Default::default()
        };
        let record = validate_extended(&p, "Signups").unwrap();
        assert_eq!(record.name.as_deref(), Some("Ada"));
        assert_eq!(record.source, "newsletter");
        assert_eq!(record.to_row()[4], "beta, eu");
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let p = ExtendedSignupPayload {
            email: Some("not-an-email".to_string()),
            name: Some("".to_string()),
            ..Default::default()
        };
        let errors = validate_extended(&p, "Signups").unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_bulk_envelope_bounds() {
        let item = ExtendedSignupPayload {
            email: Some("a@example.com".to_string()),
            ..Default::default()
        };

        assert!(validate_bulk_envelope(&BulkSignupPayload { signups: None }).is_err());
        assert!(validate_bulk_envelope(&BulkSignupPayload {
            signups: Some(vec![])
        })
        .is_err());
        assert!(validate_bulk_envelope(&BulkSignupPayload {
            signups: Some(vec![item.clone(); 1])
        })
        .is_ok());
        assert!(validate_bulk_envelope(&BulkSignupPayload {
            signups: Some(vec![item.clone(); MAX_BULK_SIGNUPS])
        })
        .is_ok());
        assert!(validate_bulk_envelope(&BulkSignupPayload {
            signups: Some(vec![item; MAX_BULK_SIGNUPS + 1])
        })
        .is_err());
    }

    #[test]
    fn test_to_row_column_order() {
        let record = SignupRecord {
            email: "a@example.com".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            sheet_tab: "Signups".to_string(),
            name: None,
            source: "api".to_string(),
            tags: vec![],
            metadata: None,
        };
        let row = record.to_row();
        assert_eq!(row.len(), HEADER_ROW.len());
        assert_eq!(row[0], "a@example.com");
        assert_eq!(row[1], "2026-01-01T00:00:00Z");
    }
}
