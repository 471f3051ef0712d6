//! Cloudflare Turnstile token verification.
//!
//! The widget produces a token client-side; we POST it with the shared
//! secret to the siteverify endpoint and interpret the `success` flag and
//! `error-codes` array. Transport and parse failures map to a failure
//! outcome carrying the underlying error text - the caller decides what to
//! surface.

use serde::Deserialize;
use tracing::{info, warn};

/// Result of a verification attempt.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub success: bool,
    /// Hostname the challenge was solved on, when the vendor reports it
    pub hostname: Option<String>,
    /// Vendor error codes or transport error text on failure
    pub error: Option<String>,
}

/// Vendor response shape.
#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verify a Turnstile token against the vendor endpoint.
pub async fn verify(
    http: &reqwest::Client,
    verify_url: &str,
    secret_key: &str,
    token: &str,
) -> VerifyOutcome {
    let response = http
        .post(verify_url)
        .form(&[("secret", secret_key), ("response", token)])
        .send()
        .await;

    let parsed: SiteverifyResponse = match response {
        Ok(resp) => match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "turnstile_response_parse_failed");
                return VerifyOutcome {
                    success: false,
                    hostname: None,
                    error: Some(e.to_string()),
                };
            }
        },
        Err(e) => {
            warn!(error = %e, "turnstile_request_failed");
            return VerifyOutcome {
                success: false,
                hostname: None,
                error: Some(e.to_string()),
            };
        }
    };

    if parsed.success {
        info!(hostname = ?parsed.hostname, "turnstile_verified");
        VerifyOutcome {
            success: true,
            hostname: parsed.hostname,
            error: None,
        }
    } else {
        let codes = parsed.error_codes.join(", ");
        warn!(error_codes = %codes, "turnstile_rejected");
        VerifyOutcome {
            success: false,
            hostname: parsed.hostname,
            error: if codes.is_empty() { None } else { Some(codes) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_verify_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .and(body_string_contains("secret=shh"))
            .and(body_string_contains("response=tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "hostname": "example.com"
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/siteverify", server.uri());
        let outcome = verify(&http, &url, "shh", "tok").await;

        assert!(outcome.success);
        assert_eq!(outcome.hostname.as_deref(), Some("example.com"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_verify_rejected_carries_error_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error-codes": ["invalid-input-response", "timeout-or-duplicate"]
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/siteverify", server.uri());
        let outcome = verify(&http, &url, "shh", "tok").await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("invalid-input-response, timeout-or-duplicate")
        );
    }

    #[tokio::test]
    async fn test_verify_parse_failure_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/siteverify", server.uri());
        let outcome = verify(&http, &url, "shh", "tok").await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }
}
