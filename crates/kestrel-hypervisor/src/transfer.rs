//! Delivery of file payloads to guest-agent upload URLs

use crate::error::{HypervisorError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Sends a payload to a URL handed out by `initiate_file_transfer`
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// PUT `body` to `url` and return the HTTP status code
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<u16>;
}

/// `reqwest`-backed uploader
///
/// Upload URLs point straight at ESX hosts, which present self-signed
/// certificates, so certificate verification is off.
pub struct HttpUploadClient {
    client: reqwest::Client,
}

impl HttpUploadClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| HypervisorError::Fault(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UploadClient for HttpUploadClient {
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<u16> {
        let size = body.len();
        let response = self
            .client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| HypervisorError::Fault(format!("upload failed: {}", e)))?;

        let status = response.status().as_u16();
        debug!(status, size, "Guest file upload finished");
        Ok(status)
    }
}

/// Sends `http://` and `https://` URLs over the network and hands every
/// other scheme to `local`
pub struct RoutedUploadClient {
    http: HttpUploadClient,
    local: Arc<dyn UploadClient>,
}

impl RoutedUploadClient {
    pub fn new(local: Arc<dyn UploadClient>) -> Result<Self> {
        Ok(Self {
            http: HttpUploadClient::new()?,
            local,
        })
    }
}

#[async_trait]
impl UploadClient for RoutedUploadClient {
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<u16> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.put(url, body).await
        } else {
            self.local.put(url, body).await
        }
    }
}
