//! HTTP transport with a 2xx success contract and bounded retries

use crate::config::RequestPolicy;
use crate::error::{Error, FailureReason, Result};
use bytes::Bytes;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// A request as handed to [`RetryingTransport`]
///
/// The body is held as [`Bytes`] so every attempt resends the identical payload
/// without copying it.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Whether repeating the request after an unknown outcome is harmless
    pub idempotent: bool,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let idempotent = matches!(
            method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
        );
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            idempotent,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST with a JSON body
    pub fn post_json<B: Serialize + ?Sized>(url: impl Into<String>, body: &B) -> Result<Self> {
        let payload = serde_json::to_vec(body)?;
        let mut request = Self::new(Method::POST, url);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(payload));
        Ok(request)
    }

    /// POST with a raw byte body
    pub fn post_bytes(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body.into());
        request
    }

    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Result<Self> {
        let value = HeaderValue::from_str(value.as_ref()).map_err(|e| {
            Error::InvalidInput(format!("Invalid value for header '{}': {}", name, e))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set the `Authorization` header, marked sensitive so it never shows up in debug output
    pub fn authorization(self, token: impl AsRef<str>) -> Result<Self> {
        let mut request = self.header(AUTHORIZATION, token)?;
        if let Some(value) = request.headers.get_mut(AUTHORIZATION) {
            value.set_sensitive(true);
        }
        Ok(request)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

/// A successful (2xx) response, body fully read
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Error body returned by the B2 API on failure
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Executes requests under a [`RequestPolicy`]
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    http: Client,
    policy: RequestPolicy,
}

impl RetryingTransport {
    /// Create a transport with its own HTTP client
    pub fn new(policy: RequestPolicy) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("b2pilot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(http, policy))
    }

    /// Create a transport around an existing HTTP client
    pub fn with_client(http: Client, policy: RequestPolicy) -> Self {
        Self { http, policy }
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    /// Total attempts this request is allowed under the policy
    pub fn max_attempts(&self, request: &TransportRequest) -> u32 {
        if request.idempotent || self.policy.retry_non_idempotent {
            self.policy.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Send the request and decode the 2xx body as JSON
    pub async fn request_json<T: DeserializeOwned>(&self, request: &TransportRequest) -> Result<T> {
        let response = self.request_raw(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Send the request, retrying failed attempts, and return the 2xx response
    pub async fn request_raw(&self, request: &TransportRequest) -> Result<RawResponse> {
        let max_attempts = self.max_attempts(request);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(method = %request.method, url = %request.url, attempt, max_attempts, "sending request");

            match self.attempt(request).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(url = %request.url, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(reason) if attempt < max_attempts => {
                    let delay = backoff_delay(self.policy.retry_delay(), attempt - 1);
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt,
                        max_attempts,
                        ?delay,
                        "attempt failed, retrying: {}",
                        reason
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(reason) => {
                    warn!(method = %request.method, url = %request.url, attempts = attempt, "giving up: {}", reason);
                    return Err(Error::Transport {
                        method: request.method.to_string(),
                        url: request.url.clone(),
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
    }

    async fn attempt(&self, request: &TransportRequest) -> std::result::Result<RawResponse, FailureReason> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = self.policy.timeout() {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(status_failure(status, &body));
        }

        Ok(RawResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

/// Describe a non-2xx response, preferring the service's structured error body
fn status_failure(status: StatusCode, body: &[u8]) -> FailureReason {
    let (code, message) = match serde_json::from_slice::<ServiceError>(body) {
        Ok(err) => (
            err.code,
            err.message.unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
        ),
        Err(_) => (None, String::from_utf8_lossy(body).into_owned()),
    };

    FailureReason::Status {
        status: status.as_u16(),
        code,
        message,
    }
}

/// Exponential backoff from `base` with up to 25% jitter, zero when `base` is zero
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }

    let exponential = base
        .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY);

    let jitter_ms = (exponential.as_millis() as u64) / 4;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };

    exponential + Duration::from_millis(jitter)
}
