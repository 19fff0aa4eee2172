//! HTTP client for the Cost Management Query API
//!
//! Handles authorization headers, retry with exponential backoff, and
//! pagination fetches. Retry policy: transient network errors and 5xx
//! back off and retry; 429 honors Retry-After; 401 invalidates the
//! cached token and retries; other 4xx are surfaced immediately since
//! they indicate a non-transient configuration problem.

use reqwest::{header, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::auth::{AuthError, CredentialManager};
use crate::config::Settings;
use crate::schema::ScopeDescriptor;

use super::types::{QueryRequest, QueryResponse};
use super::DateRange;

const API_VERSION: &str = "2025-03-01";

/// Extraction errors
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("request error: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("request failed after {0} attempts")]
    RetriesExhausted(u32),

    #[error("pagination time budget of {0:?} exceeded")]
    Timeout(Duration),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

/// Retry knobs, taken from the HTTP settings.
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

/// Client for the cost query endpoint.
pub struct CostQueryClient {
    client: reqwest::Client,
    management_host: String,
    credentials: Arc<CredentialManager>,
    retry: RetryPolicy,
}

impl CostQueryClient {
    /// Create a client from settings.
    pub fn new(settings: &Settings, credentials: Arc<CredentialManager>) -> ExtractResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http.request_timeout_secs))
            .build()
            .map_err(|e| ExtractError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            management_host: settings.azure.management_host.trim_end_matches('/').to_string(),
            credentials,
            retry: RetryPolicy {
                max_attempts: settings.http.max_retries.max(1),
                base_delay: Duration::from_secs(settings.http.retry_base_delay_secs),
                max_delay: Duration::from_secs(settings.http.retry_max_delay_secs),
            },
        })
    }

    /// Issue the initial query for one scope over a date range.
    pub async fn query(
        &self,
        scope: &ScopeDescriptor,
        range: &DateRange,
    ) -> ExtractResult<QueryResponse> {
        let url = format!(
            "{}/{}/providers/Microsoft.CostManagement/query?api-version={}",
            self.management_host, scope.path, API_VERSION
        );
        let body = QueryRequest::daily_usage(range);
        debug!(scope = %scope, %range, "querying cost data");
        self.request_with_retry(Method::POST, &url, Some(&body))
            .await
    }

    /// Fetch the next page of a paginated response. The link is
    /// server-supplied and already absolute.
    pub async fn next_page(&self, link: &str) -> ExtractResult<QueryResponse> {
        debug!(%link, "fetching next page");
        self.request_with_retry(Method::GET, link, None).await
    }

    async fn request_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&QueryRequest>,
    ) -> ExtractResult<QueryResponse> {
        let mut delay = self.retry.base_delay;

        for attempt in 1..=self.retry.max_attempts {
            // Fresh header every attempt, so a 401-invalidated token gets
            // replaced before the retry. Auth failures are fatal, not retried.
            let authorization = self.credentials.authorization_header().await?;

            let mut request = self
                .client
                .request(method.clone(), url)
                .header(header::AUTHORIZATION, &authorization)
                .header(header::ACCEPT, "application/json");
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(
                        "transient request error (attempt {attempt}/{}): {e}",
                        self.retry.max_attempts
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                    continue;
                }
                Err(e) => return Err(ExtractError::Request(e.to_string())),
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                warn!(
                    "401 unauthorized, refreshing token (attempt {attempt}/{})",
                    self.retry.max_attempts
                );
                self.credentials.invalidate().await;
                sleep(Duration::from_secs(1).min(self.retry.max_delay)).await;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(&response).unwrap_or(delay).min(self.retry.max_delay);
                warn!(
                    "429 rate limited, waiting {wait:?} (attempt {attempt}/{})",
                    self.retry.max_attempts
                );
                sleep(wait).await;
                delay = (delay * 2).min(self.retry.max_delay);
                continue;
            }

            if status.is_server_error() {
                warn!(
                    "{} server error, waiting {delay:?} (attempt {attempt}/{})",
                    status.as_u16(),
                    self.retry.max_attempts
                );
                sleep(delay).await;
                delay = (delay * 2).min(self.retry.max_delay);
                continue;
            }

            let text = response
                .text()
                .await
                .map_err(|e| ExtractError::Request(format!("failed to read response: {e}")))?;

            if !status.is_success() {
                return Err(ExtractError::Http {
                    status: status.as_u16(),
                    body: truncate(&text, 500),
                });
            }

            return serde_json::from_str(&text).map_err(|e| {
                ExtractError::Parse(format!("{e} - body: {}", truncate(&text, 500)))
            });
        }

        Err(ExtractError::RetriesExhausted(self.retry.max_attempts))
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
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
