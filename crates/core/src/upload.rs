//! Upload pipeline: content digest, B2 upload headers, send

use crate::error::{Error, Result};
use crate::transport::{RetryingTransport, TransportRequest};
use crate::types::{FileRecord, UploadUrl};
use bytes::Bytes;
use percent_encoding::{percent_decode, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Content type asking the service to pick one from the file extension
pub const DEFAULT_CONTENT_TYPE: &str = "b2/x-auto";

const FILE_NAME_HEADER: HeaderName = HeaderName::from_static("x-bz-file-name");
const CONTENT_SHA1_HEADER: HeaderName = HeaderName::from_static("x-bz-content-sha1");
const FILE_INFO_PREFIX: &str = "x-bz-info-";

/// Characters B2 accepts literally in file names and info values
const FILE_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// One file to upload through a previously obtained upload URL
#[derive(Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub file_name: String,
    /// Defaults to [`DEFAULT_CONTENT_TYPE`]
    pub content_type: Option<String>,
    pub upload_url: String,
    pub upload_token: String,
    /// Sent as `X-Bz-Info-*` headers
    pub file_info: BTreeMap<String, String>,
}

impl UploadRequest {
    pub fn new(
        bytes: impl Into<Bytes>,
        file_name: impl Into<String>,
        upload_url: impl Into<String>,
        upload_token: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: file_name.into(),
            content_type: None,
            upload_url: upload_url.into(),
            upload_token: upload_token.into(),
            file_info: BTreeMap::new(),
        }
    }

    /// Target the endpoint returned by `get_upload_url`
    pub fn to(target: &UploadUrl, bytes: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        Self::new(
            bytes,
            file_name,
            target.upload_url.clone(),
            target.authorization_token.clone(),
        )
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_file_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.file_info.insert(key.into(), value.into());
        self
    }

    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("len", &self.bytes.len())
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type())
            .field("upload_url", &self.upload_url)
            .field("file_info", &self.file_info)
            .finish_non_exhaustive()
    }
}

/// Lowercase hex SHA-1 of `bytes`
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Percent-encode a file name for the `X-Bz-File-Name` header
pub fn encode_file_name(name: &str) -> String {
    utf8_percent_encode(name, FILE_NAME_ENCODE_SET).to_string()
}

/// Reverse of [`encode_file_name`], also accepting raw UTF-8 header bytes
pub fn decode_file_name(encoded: impl AsRef<[u8]>) -> String {
    percent_decode(encoded.as_ref()).decode_utf8_lossy().into_owned()
}

/// Hashes payloads and sends them to an upload URL
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    transport: RetryingTransport,
    verify_sha1: bool,
}

impl UploadPipeline {
    pub fn new(transport: RetryingTransport, verify_sha1: bool) -> Self {
        Self {
            transport,
            verify_sha1,
        }
    }

    /// Build the transport request for `upload`, returning it with the payload digest
    pub fn prepare(upload: &UploadRequest) -> Result<(TransportRequest, String)> {
        let digest = sha1_hex(&upload.bytes);

        let mut request = TransportRequest::post_bytes(&upload.upload_url, upload.bytes.clone())
            .authorization(&upload.upload_token)?
            .header(FILE_NAME_HEADER, encode_file_name(&upload.file_name))?
            .header(CONTENT_SHA1_HEADER, &digest)?
            .header(CONTENT_TYPE, upload.content_type())?
            .header(CONTENT_LENGTH, upload.bytes.len().to_string())?;

        for (key, value) in &upload.file_info {
            let name = HeaderName::from_bytes(format!("{}{}", FILE_INFO_PREFIX, key).as_bytes())
                .map_err(|e| Error::InvalidInput(format!("Invalid file info key '{}': {}", key, e)))?;
            request = request.header(name, encode_file_name(value))?;
        }

        Ok((request, digest))
    }

    /// Upload one file and return the service's record of it
    pub async fn upload(&self, upload: &UploadRequest) -> Result<FileRecord> {
        let (request, digest) = Self::prepare(upload)?;
        debug!(
            file_name = %upload.file_name,
            len = upload.bytes.len(),
            sha1 = %digest,
            "uploading file"
        );

        let record: FileRecord = self.transport.request_json(&request).await?;

        if self.verify_sha1 {
            verify_reported_sha1(&upload.file_name, &digest, record.content_sha1.as_deref())?;
        }

        info!(file_id = %record.file_id, file_name = %record.file_name, len = upload.bytes.len(), "upload complete");
        Ok(record)
    }
}

/// Compare the digest the service stored with the one sent
///
/// Large files report `none`, and files whose digest was supplied after the
/// upload carry an `unverified:` prefix.
fn verify_reported_sha1(file_name: &str, expected: &str, reported: Option<&str>) -> Result<()> {
    let Some(reported) = reported else {
        return Ok(());
    };
    let actual = reported.strip_prefix("unverified:").unwrap_or(reported);

    if actual == "none" || actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }

    Err(Error::IntegrityMismatch {
        file_name: file_name.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            sha1_hex(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_encode_file_name() {
        assert_eq!(encode_file_name("t-package.json"), "t-package.json");
        assert_eq!(encode_file_name("dir/sub dir/a+b.txt"), "dir/sub%20dir/a%2Bb.txt");
        assert_eq!(encode_file_name("café"), "caf%C3%A9");
        assert_eq!(encode_file_name("q?x&y#z"), "q%3Fx%26y%23z");
        assert_eq!(decode_file_name("dir/sub%20dir/a%2Bb.txt"), "dir/sub dir/a+b.txt");
    }

    #[test]
    fn test_prepare_sets_upload_headers() {
        let upload = UploadRequest::new(
            b"hello world".to_vec(),
            "greetings/hello world.txt",
            "https://pod-000-1005-03.backblaze.com/b2api/v2/b2_upload_file/bucket/c001",
            "2_upload_token",
        )
        .with_file_info("src_last_modified_millis", "1533770525000");

        let (request, digest) = UploadPipeline::prepare(&upload).unwrap();
        let header = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();

        assert_eq!(digest, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(header("x-bz-content-sha1"), digest);
        assert_eq!(header("x-bz-file-name"), "greetings/hello%20world.txt");
        assert_eq!(header("content-type"), DEFAULT_CONTENT_TYPE);
        assert_eq!(header("content-length"), "11");
        assert_eq!(header("x-bz-info-src_last_modified_millis"), "1533770525000");
        assert_eq!(header("authorization"), "2_upload_token");
        assert_eq!(request.body.as_deref(), Some(&b"hello world"[..]));
        assert!(!request.idempotent);
    }

    #[test]
    fn test_prepare_uses_supplied_content_type() {
        let upload = UploadRequest::new(Vec::new(), "empty.json", "https://upload", "token")
            .with_content_type("text/json");
        let (request, digest) = UploadPipeline::prepare(&upload).unwrap();
        assert_eq!(request.headers[CONTENT_TYPE].to_str().unwrap(), "text/json");
        assert_eq!(request.headers[CONTENT_LENGTH].to_str().unwrap(), "0");
        assert_eq!(digest, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_invalid_file_info_key() {
        let upload = UploadRequest::new(Vec::new(), "a", "https://upload", "token")
            .with_file_info("bad key", "value");
        assert!(matches!(
            UploadPipeline::prepare(&upload),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_verify_reported_sha1() {
        let expected = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        assert!(verify_reported_sha1("f", expected, Some(expected)).is_ok());
        assert!(verify_reported_sha1("f", expected, Some(expected.to_uppercase().as_str())).is_ok());
        assert!(verify_reported_sha1("f", expected, Some(format!("unverified:{}", expected).as_str())).is_ok());
        assert!(verify_reported_sha1("f", expected, Some("none")).is_ok());
        assert!(verify_reported_sha1("f", expected, None).is_ok());

        let err = verify_reported_sha1("f", expected, Some("deadbeef")).unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }));
    }

    #[test]
    fn test_upload_request_debug_redacts_token() {
        let upload = UploadRequest::new(vec![0u8; 4], "a", "https://upload", "2_upload_secret");
        let rendered = format!("{:?}", upload);
        assert!(!rendered.contains("2_upload_secret"));
        assert!(rendered.contains("len: 4"));
    }
}
