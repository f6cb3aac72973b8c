//! Response shapes returned by the B2 native API

use crate::transport::RawResponse;
use crate::upload::{decode_file_name, sha1_hex};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The service's description of a stored file version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub bucket_id: String,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_md5: Option<String>,
    #[serde(default)]
    pub content_sha1: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub file_id: String,
    #[serde(default)]
    pub file_info: BTreeMap<String, Value>,
    pub file_name: String,
    #[serde(default)]
    pub file_retention: Option<Value>,
    #[serde(default)]
    pub legal_hold: Option<Value>,
    #[serde(default)]
    pub server_side_encryption: Option<Value>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub upload_timestamp: i64,
}

impl FileRecord {
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.upload_timestamp)
    }
}

/// Endpoint and credential for uploading into one bucket
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    #[serde(default)]
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

impl fmt::Debug for UploadUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadUrl")
            .field("bucket_id", &self.bucket_id)
            .field("upload_url", &self.upload_url)
            .field("authorization_token", &"<redacted>")
            .finish()
    }
}

/// Result of deleting one file version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFile {
    pub file_id: String,
    pub file_name: String,
}

/// A downloaded file with the metadata carried in its response headers
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub file_id: Option<String>,
    pub content_sha1: Option<String>,
}

impl DownloadedFile {
    pub fn from_response(response: RawResponse) -> Self {
        let header = |name: &str| response.header_str(name).map(str::to_string);
        let content_type = header("content-type");
        // Raw bytes so a name sent unencoded (non-ASCII) still survives
        let file_name = response
            .headers
            .get("x-bz-file-name")
            .map(|value| decode_file_name(value.as_bytes()));
        let file_id = header("x-bz-file-id");
        let content_sha1 = header("x-bz-content-sha1");

        Self {
            bytes: response.body,
            content_type,
            file_name,
            file_id,
            content_sha1,
        }
    }

    /// `None` when the service did not report a usable digest
    pub fn verify_sha1(&self) -> Option<bool> {
        let reported = self.content_sha1.as_deref()?;
        let reported = reported.strip_prefix("unverified:").unwrap_or(reported);
        if reported == "none" {
            return None;
        }
        Some(reported.eq_ignore_ascii_case(&sha1_hex(&self.bytes)))
    }
}
