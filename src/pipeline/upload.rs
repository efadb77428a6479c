//! Upload sink: rendered bytes → remote file, with bounded retries.
//!
//! The sink is split in two so the retry policy can be tested without a
//! server:
//!
//! * [`UploadTransport`] makes exactly one attempt. [`HttpTransport`] sends a
//!   Drive-style `multipart/related` request with reqwest.
//! * [`DriveUploader`] implements [`UploadSink`] by running a transport
//!   under [`retry_with_backoff`] with an exponential policy.
//!
//! ## Retry Strategy
//!
//! Network errors, 5xx and rate limiting are transient; with the default
//! 1 s base and 3 attempts the waits are 2 s → 4 s. Credential and
//! permission failures (401, non-rate-limit 403) fail on the first attempt
//! so the caller can re-authenticate instead of burning the budget. Other
//! 4xx responses are the server rejecting the request itself and are not
//! retried either.

use crate::config::UploadConfig;
use crate::error::{Capture2PdfError, UploadError};
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const PDF_MIME: &str = "application/pdf";

/// Where and as whom to upload.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub token: String,
    /// Parent folder; `None` uploads to the account root.
    pub folder_id: Option<String>,
}

impl std::fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTarget")
            .field("token", &"<redacted>")
            .field("folder_id", &self.folder_id)
            .finish()
    }
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub link: String,
}

/// Uploads a rendered document, retrying as it sees fit.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &UploadTarget,
    ) -> Result<RemoteFile, UploadError>;
}

/// A single upload attempt.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &UploadTarget,
    ) -> Result<RemoteFile, UploadError>;
}

// ── Retrying sink ────────────────────────────────────────────────────────

/// [`UploadSink`] with exponential backoff over an [`UploadTransport`].
pub struct DriveUploader {
    transport: Arc<dyn UploadTransport>,
    policy: RetryPolicy,
}

impl DriveUploader {
    /// Uploader over HTTP using `config`.
    pub fn new(config: UploadConfig) -> Result<Self, Capture2PdfError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), &config))
    }

    /// Uploader over a caller-supplied transport.
    pub fn with_transport(transport: Arc<dyn UploadTransport>, config: &UploadConfig) -> Self {
        Self {
            transport,
            policy: RetryPolicy::exponential(config.max_attempts, config.base_delay),
        }
    }
}

#[async_trait]
impl UploadSink for DriveUploader {
    async fn upload(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &UploadTarget,
    ) -> Result<RemoteFile, UploadError> {
        let file = retry_with_backoff(&self.policy, |attempt| {
            let transport = self.transport.clone();
            async move {
                debug!("Uploading {} (attempt {})", filename, attempt);
                match transport.send(bytes, filename, target).await {
                    Ok(file) => RetryAction::Success(file),
                    Err(e) if e.is_transient() => match e.retry_after() {
                        Some(wait) => RetryAction::RetryAfter(e, wait),
                        None => RetryAction::Retry(e),
                    },
                    Err(e) => RetryAction::Fail(e),
                }
            }
        })
        .await?;

        info!("Uploaded {} as {}", filename, file.id);
        Ok(file)
    }
}

// ── HTTP transport ───────────────────────────────────────────────────────

/// One multipart upload request per call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &UploadConfig) -> Result<Self, Capture2PdfError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Capture2PdfError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &UploadTarget,
    ) -> Result<RemoteFile, UploadError> {
        let boundary = format!("capture2pdf-{}", Uuid::new_v4().simple());
        let body = multipart_body(&boundary, &metadata(filename, target.folder_id.as_deref()), bytes);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&target.token)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status.as_u16(), &text, retry_after));
        }

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        let link = file
            .web_view_link
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));
        Ok(RemoteFile { id: file.id, link })
    }
}

/// JSON metadata part.
fn metadata(filename: &str, folder_id: Option<&str>) -> serde_json::Value {
    let mut meta = serde_json::json!({
        "name": filename,
        "mimeType": PDF_MIME,
    });
    if let Some(folder) = folder_id {
        meta["parents"] = serde_json::json!([folder]);
    }
    meta
}

/// `multipart/related` body: metadata part, then the file.
fn multipart_body(boundary: &str, metadata: &serde_json::Value, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{boundary}\r\nContent-Type: {PDF_MIME}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Map a failed HTTP response onto an [`UploadError`].
fn classify(status: u16, body: &str, retry_after_secs: Option<u64>) -> UploadError {
    let detail = error_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        401 => UploadError::Unauthorized(detail),
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            UploadError::RateLimited {
                retry_after_secs,
                detail,
            }
        }
        403 => UploadError::PermissionDenied(detail),
        429 => UploadError::RateLimited {
            retry_after_secs,
            detail,
        },
        500..=599 => UploadError::Server { status, detail },
        _ => UploadError::Rejected { status, detail },
    }
}

/// Pull `error.message` out of a JSON error body, or fall back to the
/// first line of the raw text.
fn error_message(body: &str) -> Option<String> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = v
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
        {
            return Some(msg.to_string());
        }
    }
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(200).collect())
}
