//! Service-account authentication for the Sheets API.
//!
//! Implements the OAuth 2.0 JWT bearer grant: sign an RS256 assertion with
//! the service-account private key, exchange it for a short-lived access
//! token, and cache the token process-wide. The first caller pays the
//! exchange cost; concurrent first callers may race to fetch, which is
//! harmless since the exchange is idempotent.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// OAuth scope granting spreadsheet read/write access.
const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Assertion lifetime requested from the token endpoint.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this long before the cached token expires.
const REFRESH_MARGIN_SECS: i64 = 60;

/// JWT bearer grant type.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lazily-fetched, cached access token.
pub struct TokenProvider {
    source: TokenSource,
    cached: RwLock<Option<CachedToken>>,
}

enum TokenSource {
    ServiceAccount {
        http: reqwest::Client,
        token_url: String,
        client_email: String,
        private_key: String,
    },
    /// Bypasses the exchange entirely; test suites use this so adapter
    /// tests never need a signing key.
    #[cfg(test)]
    Fixed(String),
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// Claims of the signed assertion.
#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl TokenProvider {
    /// Provider backed by a real service account.
    pub fn service_account(
        http: reqwest::Client,
        token_url: String,
        client_email: String,
        private_key: String,
    ) -> Self {
        Self {
            source: TokenSource::ServiceAccount {
                http,
                token_url,
                client_email,
                private_key,
            },
            cached: RwLock::new(None),
        }
    }

    /// Provider that always hands out the given token.
    #[cfg(test)]
    pub(crate) fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Fixed(token.into()),
            cached: RwLock::new(None),
        }
    }

    /// Get a valid access token, fetching or refreshing as needed.
    pub async fn access_token(&self) -> Result<String> {
        let (http, token_url, client_email, private_key) = match &self.source {
            TokenSource::ServiceAccount {
                http,
                token_url,
                client_email,
                private_key,
            } => (http, token_url, client_email, private_key),
            #[cfg(test)]
            TokenSource::Fixed(token) => return Ok(token.clone()),
        };

        let now = Utc::now();

        // Fast path: cached token still valid
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if token.is_valid(now) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;

        // Double-check after acquiring the write lock
        if let Some(token) = cached.as_ref() {
            if token.is_valid(now) {
                return Ok(token.access_token.clone());
            }
        }

        let token = fetch_token(http, token_url, client_email, private_key, now).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);

        Ok(access_token)
    }
}

/// Build the assertion claims for the JWT bearer grant.
fn build_claims(client_email: &str, token_url: &str, now: DateTime<Utc>) -> AssertionClaims {
    AssertionClaims {
        iss: client_email.to_string(),
        scope: TOKEN_SCOPE.to_string(),
        aud: token_url.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    }
}

async fn fetch_token(
    http: &reqwest::Client,
    token_url: &str,
    client_email: &str,
    private_key: &str,
    now: DateTime<Utc>,
) -> Result<CachedToken> {
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .context("Invalid service-account private key")?;

    let claims = build_claims(client_email, token_url, now);
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .context("Failed to sign service-account assertion")?;

    let response = http
        .post(token_url)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
        .send()
        .await
        .context("Token exchange request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Token exchange rejected with status {status}: {body}");
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Invalid token exchange response")?;

    info!(
        client_email = client_email,
        expires_in = token.expires_in,
        "sheets_token_acquired"
    );

    Ok(CachedToken {
        access_token: token.access_token,
        expires_at: now + Duration::seconds(token.expires_in),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_claims() {
        let now = Utc::now();
        let claims = build_claims("svc@proj.iam.gserviceaccount.com", "https://t.example", now);

        assert_eq!(claims.iss, "svc@proj.iam.gserviceaccount.com");
        assert_eq!(claims.aud, "https://t.example");
        assert_eq!(claims.scope, TOKEN_SCOPE);
        assert_eq!(claims.exp - claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[test]
    fn test_cached_token_validity_margin() {
        let now = Utc::now();
        let fresh = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + Duration::seconds(3600),
        };
        let nearly_expired = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + Duration::seconds(REFRESH_MARGIN_SECS / 2),
        };

        assert!(fresh.is_valid(now));
        assert!(!nearly_expired.is_valid(now));
    }

    #[test]
    fn test_token_response_parsing() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"access_token":"ya29.abc","expires_in":3599,"token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(parsed.access_token, "ya29.abc");
        assert_eq!(parsed.expires_in, 3599);
    }

    #[tokio::test]
    async fn test_fixed_provider_returns_token() {
        let provider = TokenProvider::fixed("test-token");
        assert_eq!(provider.access_token().await.unwrap(), "test-token");
    }
}
