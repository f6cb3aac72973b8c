//! b2pilot-core - Core library for the b2pilot CLI
//!
//! This library provides an authorized client for the Backblaze B2 native API:
//! cached account authorization, a retrying HTTP transport, and an upload
//! pipeline that hashes content and builds the B2 upload headers.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;
pub mod types;
pub mod upload;

// Re-export commonly used types
pub use auth::{AuthState, Authorization, Clock, SystemClock, TokenManager};
pub use client::B2Client;
pub use config::{config_exists, get_config_path, load_config, load_config_from, save_config, save_config_to, validate_config};
pub use config::{AdvancedConfig, B2Config, ClientConfig, ConfigFile, Credential, LoggingConfig, RequestPolicy};
pub use error::{Error, FailureReason, Result};
pub use transport::{RawResponse, RetryingTransport, TransportRequest};
pub use types::{DeletedFile, DownloadedFile, FileRecord, UploadUrl};
pub use upload::{encode_file_name, sha1_hex, UploadPipeline, UploadRequest, DEFAULT_CONTENT_TYPE};
