//! Error types for the edgequake-capture2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Capture2PdfError`] — **Fatal**: the operation cannot proceed at all
//!   (a batch is already running, the state store is unreadable, the
//!   configuration is invalid). Returned as `Err(Capture2PdfError)`.
//!
//! * [`ItemError`] — **Non-fatal**: a single queue item failed (render
//!   glitch, expired token, upload quota) but the batch carries on. It is
//!   absorbed into the item's `status`/`error`/`error_class` rather than
//!   propagated, so callers see partial success instead of losing the whole
//!   batch to one bad document.
//!
//! Stage-level errors ([`RenderError`], [`ImageError`], [`UploadError`],
//! [`AuthError`]) are folded into [`ItemError`] by the orchestrator; each maps
//! to exactly one [`FailureClass`] so the queue can report *why* an item
//! failed, not just that it did.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the edgequake-capture2pdf library.
///
/// Item-level failures use [`ItemError`] and are stored on the
/// [`crate::model::QueueItem`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Capture2PdfError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// `process()` was called while another run was active.
    #[error("Processing already in progress\nWait for the current batch to finish or cancel it.")]
    AlreadyProcessing,

    // ── Storage errors ────────────────────────────────────────────────────
    /// The key-value store could not read, parse or write a value.
    #[error("Storage error for key '{key}': {detail}")]
    Storage { key: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why an item failed, as surfaced on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The captured document was malformed or empty.
    Validation,
    /// Upstream extraction never produced a document.
    SourceUnavailable,
    /// Layout, font or PDF serialisation failed.
    Render,
    /// Token missing, cancelled, expired or rejected.
    Authentication,
    /// Network, quota or server-side upload failure.
    Upload,
    /// Anything else (local write failures, panicked tasks).
    Internal,
}

/// A non-fatal error for a single queue item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The rendered file could not be written to the output directory.
    #[error("Failed to write '{path}': {detail}")]
    Output { path: PathBuf, detail: String },
}

impl ItemError {
    /// Classify the error for the queue.
    pub fn class(&self) -> FailureClass {
        match self {
            ItemError::Render(RenderError::Validation(_)) => FailureClass::Validation,
            ItemError::Render(_) => FailureClass::Render,
            ItemError::Auth(_) => FailureClass::Authentication,
            ItemError::Upload(e) if e.is_auth() => FailureClass::Authentication,
            ItemError::Upload(_) => FailureClass::Upload,
            ItemError::Output { .. } => FailureClass::Internal,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Validation and authentication failures are deterministic, as are
    /// uploads the server rejected outright.
    pub fn is_retryable(&self) -> bool {
        match self {
            ItemError::Render(RenderError::Validation(_)) => false,
            ItemError::Render(_) => true,
            ItemError::Auth(_) => false,
            ItemError::Upload(e) => e.is_transient(),
            ItemError::Output { .. } => true,
        }
    }
}

/// Rendering failed for a whole document.
///
/// Individual image failures never produce this; they are counted on the
/// [`crate::model::RenderedDocument`] instead.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Invalid document: {0}")]
    Validation(String),

    #[error("Failed to load font '{path}': {detail}")]
    Font { path: PathBuf, detail: String },

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("Render task failed: {0}")]
    Internal(String),
}

/// A single image could not be acquired. Logged and counted, never fatal.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("Failed to fetch image '{locator}': {reason}")]
    Fetch { locator: String, reason: String },

    #[error("Image fetch timed out after {secs}s for '{locator}'")]
    Timeout { locator: String, secs: u64 },

    #[error("Unsupported image format for '{locator}': {format}")]
    Unsupported { locator: String, format: String },

    #[error("Failed to decode image '{locator}': {detail}")]
    Decode { locator: String, detail: String },
}

/// Failure reported by the external auth provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not authenticated: sign-in was cancelled")]
    Cancelled,

    #[error("Not authenticated: {0}")]
    Failed(String),

    #[error("Not authenticated: no auth provider configured")]
    NotConfigured,
}

/// One upload attempt failed.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// HTTP 401: the token is missing, expired or revoked.
    #[error("Upload unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 403 (not rate limiting): the token lacks permission on the target.
    #[error("Upload permission denied: {0}")]
    PermissionDenied(String),

    #[error("Upload rate limited: {detail}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        detail: String,
    },

    #[error("Upload server error (HTTP {status}): {detail}")]
    Server { status: u16, detail: String },

    #[error("Upload rejected (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Upload network error: {0}")]
    Network(String),

    #[error("Unexpected upload response: {0}")]
    InvalidResponse(String),
}

impl UploadError {
    /// Credential/permission-class failures; never retried.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            UploadError::Unauthorized(_) | UploadError::PermissionDenied(_)
        )
    }

    /// Network, server and rate-limit failures; worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UploadError::RateLimited { .. } | UploadError::Server { .. } | UploadError::Network(_)
        )
    }

    /// Minimum wait the server asked for before the next request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UploadError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}
