//! Data types shared by the queue, the renderer and the orchestrator.
//!
//! Everything here is plain data: serialisable so the queue and in-flight
//! progress can be persisted as JSON and printed by the CLI, and cloneable so
//! snapshots can be handed to callbacks without holding any lock.

use crate::error::FailureClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Input ────────────────────────────────────────────────────────────────

/// An immutable captured source document, produced by an upstream extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedDocument {
    /// Stable id assigned by the extractor; the queue's idempotency key.
    pub id: String,
    /// Where the document was captured from.
    pub source_url: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    /// Ordered image locators (`https://…`, `data:…`, `file://…` or a path).
    #[serde(default)]
    pub images: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedDocument {
    /// Check the document carries enough to render.
    ///
    /// A blank body alone is fine (the document is just title and author);
    /// a document with no id, or with nothing at all to draw, is not.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("document id is empty".to_string());
        }
        if self.title.trim().is_empty() && self.body.trim().is_empty() && self.images.is_empty() {
            return Err(format!("document '{}' has no title, body or images", self.id));
        }
        Ok(())
    }
}

// ── Queue ────────────────────────────────────────────────────────────────

/// Processing state of a single queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Outcome recorded on a queue item. Every field is optional so partial
/// results can be merged in over several updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub filename: Option<String>,
    pub size_bytes: Option<u64>,
    pub page_count: Option<usize>,
    pub failed_images: Option<usize>,
    pub remote_id: Option<String>,
    pub remote_link: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A partial [`ItemResult`]: `Some` fields overwrite, `None` fields keep the
/// existing value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPatch {
    pub filename: Option<String>,
    pub size_bytes: Option<u64>,
    pub page_count: Option<usize>,
    pub failed_images: Option<usize>,
    pub remote_id: Option<String>,
    pub remote_link: Option<String>,
}

impl ItemResult {
    /// Merge `patch` into `self`.
    pub fn merge(&mut self, patch: ResultPatch) {
        if patch.filename.is_some() {
            self.filename = patch.filename;
        }
        if patch.size_bytes.is_some() {
            self.size_bytes = patch.size_bytes;
        }
        if patch.page_count.is_some() {
            self.page_count = patch.page_count;
        }
        if patch.failed_images.is_some() {
            self.failed_images = patch.failed_images;
        }
        if patch.remote_id.is_some() {
            self.remote_id = patch.remote_id;
        }
        if patch.remote_link.is_some() {
            self.remote_link = patch.remote_link;
        }
    }
}

/// Error message plus classification attached to a failed item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub class: FailureClass,
    pub message: String,
}

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue-local id (UUID v4), distinct from the document id.
    pub id: String,
    /// Id of the embedded [`CapturedDocument`].
    pub source_id: String,
    pub document: CapturedDocument,
    pub status: ItemStatus,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub result: Option<ItemResult>,
    pub error: Option<String>,
    #[serde(default)]
    pub error_class: Option<FailureClass>,
    /// Explicit retries requested by the caller via `retry_failed`.
    #[serde(default)]
    pub retry_count: u32,
}

/// Overall state of the queue for external callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Empty,
    Pending,
    Processing,
    Completed,
    PartialFailure,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Empty => "empty",
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::PartialFailure => "partial_failure",
        };
        f.write_str(s)
    }
}

/// The queue aggregate: items plus counts derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub items: Vec<QueueItem>,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Queue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            items: Vec::new(),
            total: 0,
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Queue {
    /// Recompute every derived count from `items`.
    ///
    /// This is the only place counts are written.
    pub fn recount(&mut self) {
        let count = |s: ItemStatus| self.items.iter().filter(|i| i.status == s).count();
        self.pending = count(ItemStatus::Pending);
        self.processing = count(ItemStatus::Processing);
        self.completed = count(ItemStatus::Completed);
        self.failed = count(ItemStatus::Failed);
        self.total = self.items.len();
        self.updated_at = Utc::now();
    }

    /// Derived overall status.
    pub fn status(&self) -> QueueStatus {
        if self.total == 0 {
            QueueStatus::Empty
        } else if self.processing > 0 {
            QueueStatus::Processing
        } else if self.pending > 0 {
            QueueStatus::Pending
        } else if self.failed > 0 {
            QueueStatus::PartialFailure
        } else {
            QueueStatus::Completed
        }
    }

    pub(crate) fn find_mut(&mut self, item_id: &str) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

/// Stage the orchestrator is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Rendering,
    Uploading,
    Complete,
}

/// Snapshot of a batch run, recomputed after every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    /// Items finished so far, successes plus failures.
    pub completed: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// Title of the item in flight.
    pub current_item: Option<String>,
    pub phase: Phase,
    pub cancelled: bool,
    pub percentage: u8,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Recompute `percentage` from `completed` / `total` (0 for an empty batch).
    pub fn recompute_percentage(&mut self) {
        self.percentage = if self.total == 0 {
            0
        } else {
            ((self.completed as f64 / self.total as f64) * 100.0).round() as u8
        };
    }
}

// ── Output ───────────────────────────────────────────────────────────────

/// A paginated PDF produced from one [`CapturedDocument`].
#[derive(Clone, PartialEq)]
pub struct RenderedDocument {
    pub source_id: String,
    pub bytes: Vec<u8>,
    pub filename: String,
    pub size_bytes: u64,
    pub page_count: usize,
    /// At least one image made it into the document.
    pub has_images: bool,
    /// Images that could not be fetched or decoded and were skipped.
    pub failed_images: usize,
}

impl std::fmt::Debug for RenderedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedDocument")
            .field("source_id", &self.source_id)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("filename", &self.filename)
            .field("page_count", &self.page_count)
            .field("has_images", &self.has_images)
            .field("failed_images", &self.failed_images)
            .finish()
    }
}
