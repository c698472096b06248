//! Remote Gateway - HTTP communication with the GridCast sync service
//!
//! The engine only sees the [`RemoteGateway`] trait: upload a batch of
//! pending mutations, download the authoritative snapshot. Both calls are
//! idempotent from the engine's point of view - the server deduplicates
//! uploads on item id, so replaying an already-acknowledged batch must not
//! duplicate server-side state.
//!
//! [`HttpGateway`] is the production implementation:
//! - `POST {base}/sync/upload` / `GET {base}/sync/download`
//! - Bearer auth with an in-memory token cache
//! - Gzip compression of large upload bodies

use super::models::{Snapshot, SyncQueueItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_API_BASE_URL: &str = "https://api.gridcast.app/v1";

/// Upload bodies above this size are gzip-compressed (60-80% reduction for JSON)
const COMPRESSION_THRESHOLD_BYTES: usize = 4096;

// ============================================================================
// Wire Types
// ============================================================================

/// One upload exchange: pending mutations plus the device envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatch {
    pub items: Vec<SyncQueueItem>,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Server acknowledgement for an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAck {
    /// Ids the server applied (or had already applied)
    pub accepted_ids: Vec<String>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Authoritative remote state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub snapshot: Snapshot,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Gateway Trait
// ============================================================================

/// Interface to the remote store. The transport and its authentication are
/// external collaborator concerns; fakes implement this directly in tests.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn upload(&self, batch: &UploadBatch) -> Result<UploadAck, GatewayError>;
    async fn download(&self) -> Result<RemoteSnapshot, GatewayError>;
}

// ============================================================================
// HTTP Implementation
// ============================================================================

/// HTTP gateway to the GridCast sync service
pub struct HttpGateway {
    client: Client,
    base_url: String,
    /// Bearer access token (cached in memory, managed by the host's auth flow)
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpGateway {
    /// Create a gateway against the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Gateway against the production endpoint
    pub fn default_endpoint() -> Result<Self, GatewayError> {
        Self::new(DEFAULT_API_BASE_URL)
    }

    /// Set access token (after the host authenticates)
    pub async fn set_token(&self, token: String) {
        let mut guard = self.access_token.write().await;
        *guard = Some(token);
    }

    /// Clear token (logout / auth revoked)
    pub async fn clear_token(&self) {
        let mut guard = self.access_token.write().await;
        *guard = None;
    }

    async fn bearer(&self) -> Result<String, GatewayError> {
        self.access_token
            .read()
            .await
            .clone()
            .ok_or(GatewayError::Unauthorized)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn upload(&self, batch: &UploadBatch) -> Result<UploadAck, GatewayError> {
        let token = self.bearer().await?;
        let url = format!("{}/sync/upload", self.base_url);

        let body = serde_json::to_vec(batch)
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;

        let request = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("content-type", "application/json");

        let request = if body.len() > COMPRESSION_THRESHOLD_BYTES {
            let compressed = gzip_compress(&body)
                .map_err(|e| GatewayError::Serialization(e))?;
            log::debug!(
                "Upload compression: {} bytes -> {} bytes",
                body.len(),
                compressed.len()
            );
            request.header("content-encoding", "gzip").body(compressed)
        } else {
            request.body(body)
        };

        let response = request.send().await.map_err(map_transport_error)?;
        handle_response(response).await
    }

    async fn download(&self) -> Result<RemoteSnapshot, GatewayError> {
        let token = self.bearer().await?;
        let url = format!("{}/sync/download", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_transport_error)?;

        // 404 means the store is empty (first sync), not an error
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(RemoteSnapshot {
                snapshot: Snapshot::new(),
                version: 0,
                updated_at: Utc::now(),
            });
        }

        handle_response(response).await
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unauthorized - re-authentication required")]
    Unauthorized,

    #[error("Request rejected by server: {0}")]
    Rejected(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response from server")]
    InvalidResponse,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Transient failures are retried with backoff; the rest surface
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Request(_) => true,
            GatewayError::Timeout => true,
            GatewayError::RateLimited => true,
            GatewayError::Server(_) => true,
            GatewayError::Unauthorized => false,
            GatewayError::Rejected(_) => false,
            GatewayError::InvalidResponse => false,
            GatewayError::Serialization(_) => false,
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Request(e.to_string())
    }
}

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();

    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|_| GatewayError::InvalidResponse)
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to GatewayError
async fn handle_error(response: reqwest::Response) -> GatewayError {
    let status = response.status();

    match status {
        StatusCode::UNAUTHORIZED => GatewayError::Unauthorized,
        StatusCode::FORBIDDEN => {
            let msg = response.text().await.unwrap_or_else(|_| "forbidden".to_string());
            GatewayError::Rejected(msg)
        }
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
        s if s.is_server_error() => {
            let msg = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            GatewayError::Server(msg)
        }
        _ => {
            let msg = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            GatewayError::Request(format!("{}: {}", status, msg))
        }
    }
}

// ============================================================================
// Compression Helpers
// ============================================================================

/// Gzip-compress a byte buffer
pub(crate) fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| e.to_string())?;
    encoder.finish().map_err(|e| e.to_string())
}

/// Decompress a gzip byte buffer
pub(crate) fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| e.to_string())?;
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================
