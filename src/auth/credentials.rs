//! Credential manager
//!
//! Obtains an access token from Azure AD using the client-credentials
//! flow, caches it in memory, and refreshes it once the remaining
//! lifetime drops below a safety margin. Refresh is serialized behind an
//! async mutex so concurrent extraction tasks trigger at most one token
//! exchange; everyone else sees the freshly cached token.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AzureSettings;

/// Refresh this long before the reported expiry.
const SAFETY_MARGIN_SECS: i64 = 300;

/// Assumed lifetime when the provider omits expires_in.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Authentication errors. Fatal for the current run: stale credentials
/// do not heal themselves, so no retry is attempted here.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Request(String),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("malformed token response: {0}")]
    Malformed(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Raw token endpoint response. The v1 endpoint reports expires_in as a
/// numeric string, v2 as a number; both are accepted.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<serde_json::Value>,
}

/// A cached bearer token with its absolute expiry instant.
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    token_type: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - ChronoDuration::seconds(SAFETY_MARGIN_SECS)
    }

    fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.value)
    }
}

/// Manages the access token for the Azure Management API.
pub struct CredentialManager {
    client: reqwest::Client,
    token_url: String,
    resource: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialManager {
    /// Create a credential manager from settings.
    pub fn new(settings: &AzureSettings, timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Request(format!("failed to create HTTP client: {e}")))?;

        let token_url = format!(
            "{}/{}/oauth2/token",
            settings.authority_host.trim_end_matches('/'),
            settings.tenant_id
        );

        // The v1 resource parameter wants a trailing slash.
        let resource = format!("{}/", settings.management_host.trim_end_matches('/'));

        Ok(Self {
            client,
            token_url,
            resource,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            cached: Mutex::new(None),
        })
    }

    /// Get a valid bearer authorization header value, refreshing the
    /// cached token if needed. Calls within the validity window return
    /// the cached value without a network round trip.
    pub async fn authorization_header(&self) -> AuthResult<String> {
        let mut guard = self.cached.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_usable(Utc::now()) {
                return Ok(token.header_value());
            }
        }

        let token = self.fetch_token().await?;
        let header = token.header_value();
        *guard = Some(token);
        Ok(header)
    }

    /// Drop the cached token so the next call fetches a fresh one.
    /// Used when the API rejects a request with 401.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
        debug!("cached token invalidated, will refresh on next request");
    }

    async fn fetch_token(&self) -> AuthResult<CachedToken> {
        info!("requesting new access token from {}", self.token_url);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("resource", self.resource.as_str()),
        ];

        let issued_at = Utc::now();
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Request(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(AuthError::Endpoint {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::Malformed(format!("invalid JSON: {e}")))?;

        let value = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Malformed("no access_token in response".to_string()))?;

        let expires_in = parse_expires_in(parsed.expires_in.as_ref())?;
        let token = CachedToken {
            value,
            token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: issued_at + ChronoDuration::seconds(expires_in),
        };

        info!("authenticated, token expires in {expires_in}s");
        Ok(token)
    }
}

fn parse_expires_in(value: Option<&serde_json::Value>) -> AuthResult<i64> {
    let seconds = match value {
        None => DEFAULT_EXPIRES_IN_SECS,
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| AuthError::Malformed(format!("bad expires_in: {n}")))?,
        Some(serde_json::Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| AuthError::Malformed(format!("bad expires_in: {s}")))?,
        Some(other) => {
            return Err(AuthError::Malformed(format!("bad expires_in: {other}")));
        }
    };

    if seconds < 0 {
        return Err(AuthError::Malformed(format!(
            "expires_in in the past: {seconds}"
        )));
    }
    Ok(seconds)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Cut on a char boundary; a byte cut can split multi-byte UTF-8.
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_expires_in_number_and_string() {
        assert_eq!(parse_expires_in(Some(&json!(3599))).unwrap(), 3599);
        assert_eq!(parse_expires_in(Some(&json!("3599"))).unwrap(), 3599);
        assert_eq!(parse_expires_in(None).unwrap(), DEFAULT_EXPIRES_IN_SECS);
        assert!(parse_expires_in(Some(&json!(-5))).is_err());
        assert!(parse_expires_in(Some(&json!([1]))).is_err());
    }

    #[test]
    fn test_token_usable_within_safety_margin() {
        let now = Utc::now();
        let token = CachedToken {
            value: "t".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: now + ChronoDuration::seconds(SAFETY_MARGIN_SECS + 60),
        };
        assert!(token.is_usable(now));

        let stale = CachedToken {
            expires_at: now + ChronoDuration::seconds(SAFETY_MARGIN_SECS - 60),
            ..token
        };
        assert!(!stale.is_usable(now));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = format!("{}é", "a".repeat(499));
        assert_eq!(truncate(&body, 500), format!("{}...", "a".repeat(499)));
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn test_header_value_format() {
        let token = CachedToken {
            value: "abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now(),
        };
        assert_eq!(token.header_value(), "Bearer abc");
    }
}
