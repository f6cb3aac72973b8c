//! B2 client: authorized access to the native API

use crate::auth::{Authorization, Clock, TokenManager};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::transport::{RetryingTransport, TransportRequest};
use crate::types::{DeletedFile, DownloadedFile, FileRecord, UploadUrl};
use crate::upload::{UploadPipeline, UploadRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetUploadUrlBody<'a> {
    bucket_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFileVersionBody<'a> {
    file_name: &'a str,
    file_id: &'a str,
}

/// Client for a single B2 account
///
/// Every operation authorizes first (reusing a cached token while it is
/// fresh), then goes through the retrying transport.
#[derive(Debug)]
pub struct B2Client {
    config: ClientConfig,
    transport: RetryingTransport,
    tokens: TokenManager,
    uploads: UploadPipeline,
}

impl B2Client {
    /// Create a new B2 client
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = RetryingTransport::new(config.request)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client on top of an existing transport
    pub fn with_transport(config: ClientConfig, transport: RetryingTransport) -> Self {
        let tokens = TokenManager::new(transport.clone(), &config);
        let uploads = UploadPipeline::new(transport.clone(), config.verify_upload_sha1);
        Self {
            config,
            transport,
            tokens,
            uploads,
        }
    }

    /// Replace the clock used for token freshness
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = self.tokens.with_clock(clock);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Authorize now (or reuse a fresh token)
    pub async fn authorize(&self) -> Result<Arc<Authorization>> {
        self.tokens.ensure_authorized().await
    }

    /// Obtain an upload endpoint and token for a bucket
    pub async fn get_upload_url(&self, bucket_id: &str) -> Result<UploadUrl> {
        let auth = self.tokens.ensure_authorized().await?;

        // Handing out an upload URL has no side effect worth guarding
        let request = TransportRequest::post_json(
            format!("{}/b2_get_upload_url", auth.api_url),
            &GetUploadUrlBody { bucket_id },
        )?
        .authorization(&auth.token)?
        .idempotent(true);

        debug!(bucket_id, "requesting upload url");
        self.transport.request_json(&request).await
    }

    /// Upload one file through an upload URL from [`Self::get_upload_url`]
    pub async fn upload_file(&self, upload: &UploadRequest) -> Result<FileRecord> {
        self.tokens.ensure_authorized().await?;
        self.uploads.upload(upload).await
    }

    /// Delete one version of a file
    pub async fn delete_file_version(&self, file_name: &str, file_id: &str) -> Result<DeletedFile> {
        let auth = self.tokens.ensure_authorized().await?;

        let request = TransportRequest::post_json(
            format!("{}/b2_delete_file_version", auth.api_url),
            &DeleteFileVersionBody { file_name, file_id },
        )?
        .authorization(&auth.token)?;

        debug!(file_name, file_id, "deleting file version");
        self.transport.request_json(&request).await
    }

    /// Download a file by its id
    pub async fn download_file_by_id(&self, file_id: &str) -> Result<DownloadedFile> {
        let auth = self.tokens.ensure_authorized().await?;

        let request = TransportRequest::get(format!(
            "{}/b2api/{}/b2_download_file_by_id",
            auth.download_url, self.config.api_version
        ))
        .query("fileId", file_id)
        .authorization(&auth.token)?;

        debug!(file_id, "downloading file");
        let response = self.transport.request_raw(&request).await?;
        Ok(DownloadedFile::from_response(response))
    }
}
