//! # edgequake-capture2pdf
//!
//! Turn a queue of captured web documents into paginated PDFs and upload
//! them, one item at a time, with per-item retry and cooperative
//! cancellation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! CapturedDocument
//!  │
//!  ├─ 1. Queue    enqueue (idempotent on document id), persisted as JSON
//!  ├─ 2. Render   title, author, char-wrapped body, images → A4 PDF
//!  ├─ 3. Write    optional copy into a local directory
//!  ├─ 4. Upload   optional multipart upload with exponential backoff
//!  └─ 5. Report   BatchProgress snapshots after every step
//! ```
//!
//! Failures are per item: a bad image is skipped and counted, a failing
//! render or upload marks only that item `failed`, and the batch reports
//! success and failure counts rather than a single pass/fail.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_capture2pdf::{
//!     CapturedDocument, JsonFileStore, PdfRenderer, Pipeline, ProcessOptions, QueueStore,
//!     RenderConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(JsonFileStore::new("state.json"));
//!     let queue = Arc::new(QueueStore::open(store)?);
//!
//!     let doc: CapturedDocument = serde_json::from_str(&std::fs::read_to_string("post.json")?)?;
//!     queue.enqueue(doc)?;
//!
//!     let renderer = Arc::new(PdfRenderer::new(RenderConfig::default())?);
//!     let pipeline = Pipeline::builder(queue, renderer).build();
//!
//!     let progress = pipeline
//!         .process(&ProcessOptions::default().output_dir("out"))
//!         .await?;
//!     eprintln!("{} ok, {} failed", progress.success_count, progress.failed_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `capture2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-capture2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{AuthProvider, EnvTokenProvider, StaticTokenProvider};
pub use config::{ProcessOptions, QualityLevel, RenderConfig, RenderConfigBuilder, UploadConfig};
pub use error::{
    AuthError, Capture2PdfError, FailureClass, ImageError, ItemError, RenderError, UploadError,
};
pub use model::{
    BatchProgress, CapturedDocument, ItemFailure, ItemResult, ItemStatus, Phase, Queue, QueueItem,
    QueueStatus, RenderedDocument, ResultPatch,
};
pub use orchestrator::{Pipeline, PipelineBuilder};
pub use pipeline::render::{DocumentRenderer, PdfRenderer};
pub use pipeline::upload::{
    DriveUploader, HttpTransport, RemoteFile, UploadSink, UploadTarget, UploadTransport,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::QueueStore;
pub use retry::{Backoff, RetryPolicy};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
