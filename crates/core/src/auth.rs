//! Account authorization and token lifecycle

use crate::config::{ClientConfig, Credential};
use crate::error::{Error, Result};
use crate::transport::{RetryingTransport, TransportRequest};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Source of the current time for freshness checks
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A successful account authorization
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    pub account_id: String,
    pub token: String,
    /// Base for API calls, including the `/b2api/<version>` suffix
    pub api_url: String,
    /// Base for downloads, without a version suffix
    pub download_url: String,
    pub s3_api_url: Option<String>,
    pub recommended_part_size: Option<u64>,
    pub absolute_minimum_part_size: Option<u64>,
    pub acquired_at: DateTime<Utc>,
}

impl Authorization {
    pub fn is_fresh(&self, now: DateTime<Utc>, refresh_interval: chrono::Duration) -> bool {
        match self.acquired_at.checked_add_signed(refresh_interval) {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("account_id", &self.account_id)
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("download_url", &self.download_url)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

/// Either no authorization at all or a complete one
#[derive(Debug, Clone, Default)]
pub enum AuthState {
    #[default]
    Absent,
    Valid(Arc<Authorization>),
}

impl AuthState {
    pub fn authorization(&self) -> Option<&Arc<Authorization>> {
        match self {
            AuthState::Absent => None,
            AuthState::Valid(auth) => Some(auth),
        }
    }

    fn fresh(&self, now: DateTime<Utc>, refresh_interval: chrono::Duration) -> Option<Arc<Authorization>> {
        self.authorization()
            .filter(|auth| auth.is_fresh(now, refresh_interval))
            .cloned()
    }
}

/// `b2_authorize_account` response, v2 (flat) or v3 (`apiInfo.storageApi`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeAccountResponse {
    account_id: String,
    authorization_token: String,
    #[serde(flatten)]
    flat: StorageApi,
    #[serde(default)]
    api_info: Option<ApiInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInfo {
    storage_api: StorageApi,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageApi {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    s3_api_url: Option<String>,
    #[serde(default)]
    recommended_part_size: Option<u64>,
    #[serde(default)]
    absolute_minimum_part_size: Option<u64>,
}

impl AuthorizeAccountResponse {
    fn into_authorization(self, api_version: &str, acquired_at: DateTime<Utc>) -> Result<Authorization> {
        let storage = match self.api_info {
            Some(info) => info.storage_api,
            None => self.flat,
        };

        let api_url = storage
            .api_url
            .ok_or_else(|| Error::InvalidInput("authorization response has no apiUrl".to_string()))?;
        let download_url = storage.download_url.ok_or_else(|| {
            Error::InvalidInput("authorization response has no downloadUrl".to_string())
        })?;

        Ok(Authorization {
            account_id: self.account_id,
            token: self.authorization_token,
            api_url: format!("{}/b2api/{}", api_url.trim_end_matches('/'), api_version),
            download_url: download_url.trim_end_matches('/').to_string(),
            s3_api_url: storage.s3_api_url,
            recommended_part_size: storage.recommended_part_size,
            absolute_minimum_part_size: storage.absolute_minimum_part_size,
            acquired_at,
        })
    }
}

/// Outcome of the last finished refresh
#[derive(Debug, Default)]
struct RefreshRecord {
    generation: u64,
    failure: Option<Arc<Error>>,
}

/// Owns the authorization state and refreshes it when stale
///
/// Refreshes are single-flight: concurrent callers that find the state stale
/// queue on one lock. Every caller that queued before a refresh finished
/// takes its outcome, the new authorization or the same failure, without
/// another authorize call.
#[derive(Debug)]
pub struct TokenManager {
    transport: RetryingTransport,
    credential: Credential,
    authorize_url: String,
    api_version: String,
    refresh_interval: chrono::Duration,
    clock: Arc<dyn Clock>,
    state: RwLock<AuthState>,
    /// Bumped each time a refresh finishes, readable without the lock
    generation: AtomicU64,
    refresh: Mutex<RefreshRecord>,
}

impl TokenManager {
    pub fn new(transport: RetryingTransport, config: &ClientConfig) -> Self {
        Self {
            transport,
            credential: config.credential.clone(),
            authorize_url: config.authorize_url(),
            api_version: config.api_version.clone(),
            refresh_interval: config.refresh_interval(),
            clock: Arc::new(SystemClock),
            state: RwLock::new(AuthState::Absent),
            generation: AtomicU64::new(0),
            refresh: Mutex::new(RefreshRecord::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return a fresh authorization, authorizing first if needed
    pub async fn ensure_authorized(&self) -> Result<Arc<Authorization>> {
        if let Some(auth) = self.fresh().await {
            return Ok(auth);
        }

        let seen = self.generation.load(Ordering::Acquire);
        let mut record = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(auth) = self.fresh().await {
            debug!("reusing authorization refreshed by a concurrent caller");
            return Ok(auth);
        }
        if record.generation != seen {
            if let Some(failure) = &record.failure {
                debug!("reusing failed authorization of a concurrent caller");
                return Err(Error::Auth(Arc::clone(failure)));
            }
        }

        let outcome = self.authorize().await;
        record.generation += 1;
        self.generation.store(record.generation, Ordering::Release);

        match outcome {
            Ok(auth) => {
                let auth = Arc::new(auth);
                *self.state.write().await = AuthState::Valid(Arc::clone(&auth));
                record.failure = None;

                info!(
                    account_id = %auth.account_id,
                    api_url = %auth.api_url,
                    "authorization refreshed"
                );
                Ok(auth)
            }
            Err(e) => {
                let failure = Arc::new(e);
                record.failure = Some(Arc::clone(&failure));
                warn!("authorization failed: {}", failure);
                Err(Error::Auth(failure))
            }
        }
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    /// Drop the current authorization so the next call re-authorizes
    pub async fn invalidate(&self) {
        *self.state.write().await = AuthState::Absent;
        debug!("authorization invalidated");
    }

    async fn fresh(&self) -> Option<Arc<Authorization>> {
        self.state
            .read()
            .await
            .fresh(self.clock.now(), self.refresh_interval)
    }

    async fn authorize(&self) -> Result<Authorization> {
        let acquired_at = self.clock.now();
        debug!(url = %self.authorize_url, "authorizing account");

        let request = TransportRequest::get(&self.authorize_url).authorization(basic_auth(&self.credential))?;
        let response: AuthorizeAccountResponse = self.transport.request_json(&request).await?;
        response.into_authorization(&self.api_version, acquired_at)
    }
}

/// `Basic base64(account_id:key)`
fn basic_auth(credential: &Credential) -> String {
    let raw = format!(
        "{}:{}",
        credential.account_id, credential.master_application_key
    );
    format!("Basic {}", STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn authorization(acquired_at: DateTime<Utc>) -> Authorization {
        Authorization {
            account_id: "acc".to_string(),
            token: "4_token".to_string(),
            api_url: "https://api001.backblazeb2.com/b2api/v2".to_string(),
            download_url: "https://f001.backblazeb2.com".to_string(),
            s3_api_url: None,
            recommended_part_size: None,
            absolute_minimum_part_size: None,
            acquired_at,
        }
    }

    #[test]
    fn test_basic_auth_header() {
        let credential = Credential::new("Aladdin", "open sesame");
        assert_eq!(basic_auth(&credential), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_freshness_boundary() {
        let interval = chrono::Duration::seconds(3600);
        let auth = authorization(at(1_000));
        assert!(auth.is_fresh(at(1_000), interval));
        assert!(auth.is_fresh(at(4_599), interval));
        assert!(!auth.is_fresh(at(4_600), interval));
    }

    #[test]
    fn test_absent_state_is_never_fresh() {
        let state = AuthState::default();
        assert!(state.fresh(at(0), chrono::Duration::seconds(3600)).is_none());

        let valid = AuthState::Valid(Arc::new(authorization(at(0))));
        assert!(valid.fresh(at(10), chrono::Duration::seconds(3600)).is_some());
        assert!(valid.fresh(at(10), chrono::Duration::zero()).is_none());
    }

    #[test]
    fn test_parse_v2_response() {
        let response: AuthorizeAccountResponse = serde_json::from_value(serde_json::json!({
            "accountId": "acc",
            "authorizationToken": "4_token",
            "apiUrl": "https://api001.backblazeb2.com/",
            "downloadUrl": "https://f001.backblazeb2.com",
            "recommendedPartSize": 100000000,
            "absoluteMinimumPartSize": 5000000,
            "s3ApiUrl": "https://s3.us-west-001.backblazeb2.com"
        }))
        .unwrap();

        let auth = response.into_authorization("v2", at(5)).unwrap();
        assert_eq!(auth.api_url, "https://api001.backblazeb2.com/b2api/v2");
        assert_eq!(auth.download_url, "https://f001.backblazeb2.com");
        assert_eq!(auth.recommended_part_size, Some(100_000_000));
        assert_eq!(auth.acquired_at, at(5));
    }

    #[test]
    fn test_parse_v3_response() {
        let response: AuthorizeAccountResponse = serde_json::from_value(serde_json::json!({
            "accountId": "acc",
            "authorizationToken": "4_token",
            "apiInfo": {
                "storageApi": {
                    "apiUrl": "https://api002.backblazeb2.com",
                    "downloadUrl": "https://f002.backblazeb2.com",
                    "recommendedPartSize": 100000000
                }
            }
        }))
        .unwrap();

        let auth = response.into_authorization("v3", at(0)).unwrap();
        assert_eq!(auth.api_url, "https://api002.backblazeb2.com/b2api/v3");
        assert_eq!(auth.download_url, "https://f002.backblazeb2.com");
    }

    #[test]
    fn test_response_without_urls_is_rejected() {
        let response: AuthorizeAccountResponse = serde_json::from_value(serde_json::json!({
            "accountId": "acc",
            "authorizationToken": "4_token"
        }))
        .unwrap();
        assert!(response.into_authorization("v2", at(0)).is_err());
    }

    #[test]
    fn test_authorization_debug_redacts_token() {
        let rendered = format!("{:?}", authorization(at(0)));
        assert!(!rendered.contains("4_token"));
    }
}
