//! Configuration management for b2pilot

use crate::error::{Error, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration directory name
const CONFIG_DIR: &str = "b2pilot";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "B2PILOT_CONFIG";

/// Account authorization endpoint, `{}` is the API version
const AUTHORIZE_URL_TEMPLATE: &str = "https://api.backblazeb2.com/b2api/{}/b2_authorize_account";

/// Account credentials used to (re)authorize
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub account_id: String,
    pub master_application_key: String,
}

impl Credential {
    pub fn new(account_id: impl Into<String>, master_application_key: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            master_application_key: master_application_key.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("master_application_key", &"<redacted>")
            .finish()
    }
}

/// Timeout and retry settings applied to every outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPolicy {
    /// Per-attempt timeout in milliseconds, 0 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Additional attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts, 0 retries immediately
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Also retry requests that have side effects (uploads, deletes)
    #[serde(default)]
    pub retry_non_idempotent: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
            retry_non_idempotent: false,
        }
    }
}

impl RequestPolicy {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Everything a [`crate::B2Client`] needs at construction
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credential: Credential,
    /// Seconds an authorization token is trusted before refreshing
    pub refresh_interval_secs: u64,
    /// API version tag, e.g. `v2`
    pub api_version: String,
    /// Override of the account authorization endpoint
    pub auth_url: Option<String>,
    pub request: RequestPolicy,
    /// Compare the SHA-1 reported by the service with the one sent
    pub verify_upload_sha1: bool,
}

impl ClientConfig {
    pub fn new(account_id: impl Into<String>, master_application_key: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(account_id, master_application_key),
            refresh_interval_secs: default_refresh_interval(),
            api_version: default_api_version(),
            auth_url: None,
            request: RequestPolicy::default(),
            verify_upload_sha1: true,
        }
    }

    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    pub fn with_request_policy(mut self, policy: RequestPolicy) -> Self {
        self.request = policy;
        self
    }

    pub fn with_upload_verification(mut self, enabled: bool) -> Self {
        self.verify_upload_sha1 = enabled;
        self
    }

    /// Account authorization endpoint for the configured API version
    pub fn authorize_url(&self) -> String {
        match &self.auth_url {
            Some(url) => url.clone(),
            None => AUTHORIZE_URL_TEMPLATE.replace("{}", &self.api_version),
        }
    }

    pub fn refresh_interval(&self) -> chrono::Duration {
        let secs = i64::try_from(self.refresh_interval_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }

    /// Reject configurations that can never authorize
    pub fn validate(&self) -> Result<()> {
        if self.credential.account_id.trim().is_empty() {
            return Err(Error::InvalidConfig("account_id cannot be empty".to_string()));
        }
        if self.credential.master_application_key.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "master application key cannot be empty".to_string(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(Error::InvalidConfig("api_version cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// On-disk configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub b2: B2Config,
    pub advanced: Option<AdvancedConfig>,
    pub logging: Option<LoggingConfig>,
}

/// B2 account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B2Config {
    pub account_id: String,
    pub application_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_bucket_id: Option<String>,
}

/// Advanced configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub retry_non_idempotent: bool,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_verify_upload_sha1")]
    pub verify_upload_sha1: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
            retry_non_idempotent: false,
            refresh_interval_secs: default_refresh_interval(),
            api_version: default_api_version(),
            verify_upload_sha1: default_verify_upload_sha1(),
            auth_url: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ConfigFile {
    /// Build the client configuration described by this file
    pub fn client_config(&self) -> ClientConfig {
        let advanced = self.advanced.clone().unwrap_or_default();
        let config = ClientConfig::new(&self.b2.account_id, &self.b2.application_key)
            .with_refresh_interval(advanced.refresh_interval_secs)
            .with_api_version(advanced.api_version)
            .with_upload_verification(advanced.verify_upload_sha1)
            .with_request_policy(RequestPolicy {
                timeout_ms: advanced.timeout_ms,
                max_retries: advanced.max_retries,
                retry_delay_ms: advanced.retry_delay_ms,
                retry_non_idempotent: advanced.retry_non_idempotent,
            });

        match advanced.auth_url {
            Some(url) => config.with_auth_url(url),
            None => config,
        }
    }
}

// Default values
fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_refresh_interval() -> u64 {
    60 * 60 // 1 hour
}

fn default_api_version() -> String {
    "v2".to_string()
}

fn default_verify_upload_sha1() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR))
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from the default location
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&get_config_path()?)
}

/// Load configuration from a specific file
pub fn load_config_from(config_path: &std::path::Path) -> Result<ConfigFile> {
    if !config_path.exists() {
        return Err(Error::ConfigNotFound(config_path.to_path_buf()));
    }

    let content = fs::read_to_string(config_path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file: {}", e))
    })?;

    let config: ConfigFile = toml::from_str(&content)?;

    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let config_path = get_config_path()?;
    save_config_to(config, &config_path)?;
    Ok(config_path)
}

/// Save configuration to a specific file
pub fn save_config_to(config: &ConfigFile, config_path: &std::path::Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(config_path, content).map_err(|e| {
        Error::Config(format!("Failed to write config file: {}", e))
    })?;

    // The file holds the master application key
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(config_path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(config_path, perms)?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    if config.b2.account_id.trim().is_empty() {
        return Err(Error::InvalidInput("account_id cannot be empty".to_string()));
    }

    if config.b2.application_key.trim().is_empty() {
        return Err(Error::InvalidInput("application_key cannot be empty".to_string()));
    }

    if let Some(bucket_id) = &config.b2.default_bucket_id {
        if bucket_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "default_bucket_id cannot be empty when set".to_string(),
            ));
        }
    }

    if let Some(advanced) = &config.advanced {
        if advanced.api_version.trim().is_empty() {
            return Err(Error::InvalidInput("api_version cannot be empty".to_string()));
        }
    }

    Ok(())
}

/// Check if configuration exists
pub fn config_exists() -> bool {
    get_config_path().map(|p| p.exists()).unwrap_or(false)
}
