//! Batch orchestration: drive pending queue items through render → upload.
//!
//! Items are processed strictly one at a time in FIFO order. Each item runs
//! through the same per-attempt pipeline whether or not upload is enabled;
//! upload is just an extra stage inside the attempt:
//!
//! ```text
//! pending ──▶ processing ──▶ render ──▶ [write] ──▶ [token ─▶ upload] ──▶ completed
//!                 ▲                                                  │
//!                 └──────────── retry (linear backoff) ◀─────────────┤
//!                                                                    ▼
//!                                                                  failed
//! ```
//!
//! Per-item errors never escape [`Pipeline::process`]; they are written to
//! the item. The only error a caller sees is
//! [`Capture2PdfError::AlreadyProcessing`].
//!
//! Cancellation is cooperative: [`Pipeline::cancel`] raises a flag that is
//! checked between items, so an in-flight render or upload always finishes.
//! The flag is lowered when a run ends; a cancel raised while idle stops the
//! next run before its first item.
//!
//! If the `process` future is dropped mid-item, the item in flight goes back
//! to `pending`. Terminal status writes and progress snapshots are persisted
//! on the blocking pool.

use crate::auth::AuthProvider;
use crate::config::ProcessOptions;
use crate::error::{AuthError, Capture2PdfError, ItemError};
use crate::model::{
    BatchProgress, ItemFailure, ItemStatus, Phase, QueueItem, RenderedDocument, ResultPatch,
};
use crate::pipeline::render::DocumentRenderer;
use crate::pipeline::upload::{UploadSink, UploadTarget};
use crate::queue::QueueStore;
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};
use crate::storage::{KeyValueStore, PROGRESS_KEY};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Candidate names tried before giving up on a free output filename.
const MAX_OUTPUT_SUFFIX: u32 = 999;

/// Sink plus the provider of its tokens; configured together.
struct Uploader {
    sink: Arc<dyn UploadSink>,
    auth: Arc<dyn AuthProvider>,
}

/// The batch orchestrator.
///
/// Construct once with [`Pipeline::builder`] and share via `Arc`; all
/// methods take `&self`.
pub struct Pipeline {
    queue: Arc<QueueStore>,
    renderer: Arc<dyn DocumentRenderer>,
    uploader: Option<Uploader>,
    progress_store: Option<Arc<dyn KeyValueStore>>,
    processing: AtomicBool,
    cancel_requested: AtomicBool,
    progress: Mutex<BatchProgress>,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    queue: Arc<QueueStore>,
    renderer: Arc<dyn DocumentRenderer>,
    uploader: Option<Uploader>,
    progress_store: Option<Arc<dyn KeyValueStore>>,
}

impl PipelineBuilder {
    /// Enable uploads through `sink`, authenticated by `auth`.
    pub fn uploader(mut self, sink: Arc<dyn UploadSink>, auth: Arc<dyn AuthProvider>) -> Self {
        self.uploader = Some(Uploader { sink, auth });
        self
    }

    /// Persist every progress snapshot under `"batch_progress"`.
    pub fn progress_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    pub fn build(self) -> Pipeline {
        let progress = self
            .progress_store
            .as_ref()
            .and_then(|s| match s.get(PROGRESS_KEY) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Could not load last batch progress: {}", e);
                    None
                }
            })
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Pipeline {
            queue: self.queue,
            renderer: self.renderer,
            uploader: self.uploader,
            progress_store: self.progress_store,
            processing: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            progress: Mutex::new(progress),
        }
    }
}

/// Releases the run however it ends, including when the `process` future is
/// dropped mid-flight: the in-flight item returns to `pending`, then the
/// cancel and `processing` flags are lowered.
struct RunGuard<'a> {
    pipeline: &'a Pipeline,
    in_flight: Option<String>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(item_id) = self.in_flight.take() {
            warn!("Run stopped while {} was in flight; returning it to pending", item_id);
            if let Err(e) = self
                .pipeline
                .queue
                .set_status(&item_id, ItemStatus::Pending, None, None)
            {
                warn!("Could not return {} to pending: {}", item_id, e);
            }
        }
        self.pipeline.cancel_requested.store(false, Ordering::SeqCst);
        self.pipeline.processing.store(false, Ordering::SeqCst);
    }
}

impl Pipeline {
    pub fn builder(queue: Arc<QueueStore>, renderer: Arc<dyn DocumentRenderer>) -> PipelineBuilder {
        PipelineBuilder {
            queue,
            renderer,
            uploader: None,
            progress_store: None,
        }
    }

    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    /// Whether a run is active.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Ask the active run (or, when idle, the next one) to stop before its
    /// next item.
    pub fn cancel(&self) {
        if self.is_processing() {
            info!("Cancellation requested; stopping after the current item");
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Latest progress snapshot (of the active run, or of the last one).
    pub fn last_progress(&self) -> BatchProgress {
        self.progress.lock().clone()
    }

    /// Process every pending item once.
    ///
    /// # Returns
    /// The final [`BatchProgress`], even when items failed.
    ///
    /// # Errors
    /// Only [`Capture2PdfError::AlreadyProcessing`], returned without touching
    /// the active run.
    pub async fn process(&self, options: &ProcessOptions) -> Result<BatchProgress, Capture2PdfError> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Capture2PdfError::AlreadyProcessing);
        }
        let mut guard = RunGuard {
            pipeline: self,
            in_flight: None,
        };

        let started = Instant::now();
        let pending = self.queue.pending();
        let total = pending.len();
        info!(
            "Starting batch: {} pending items (upload: {})",
            total, options.upload
        );

        self.update(|p| *p = BatchProgress::new(total)).await;
        if let Some(cb) = &options.callback {
            cb.on_batch_start(total);
        }

        if total == 0 {
            let snap = self
                .update(|p| {
                    p.phase = Phase::Complete;
                    p.percentage = 100;
                })
                .await;
            if let Some(cb) = &options.callback {
                cb.on_batch_complete(&snap);
            }
            return Ok(snap);
        }

        let policy = RetryPolicy::linear(options.max_retries, options.retry_delay);

        for item in pending {
            if self.cancel_requested.load(Ordering::SeqCst) {
                info!("Batch cancelled; remaining items stay pending");
                self.update(|p| p.cancelled = true).await;
                break;
            }

            // Removed by another caller since the snapshot was taken.
            if self.queue.get(&item.id).is_none() {
                debug!("Item {} was removed; skipping", item.id);
                self.update(|p| {
                    p.total = p.total.saturating_sub(1);
                    p.recompute_percentage();
                })
                .await;
                continue;
            }

            // Written inline so a revert from the guard can never be
            // overtaken by this write.
            guard.in_flight = Some(item.id.clone());
            if let Err(e) = self
                .queue
                .set_status(&item.id, ItemStatus::Processing, None, None)
            {
                warn!("Could not mark {} as processing: {}", item.id, e);
            }
            self.enter_phase(options, Phase::Rendering, Some(display_title(&item)))
                .await;

            // Output file claimed by an earlier attempt at this item.
            let written: Mutex<Option<String>> = Mutex::new(None);
            let outcome = retry_with_backoff(&policy, |attempt| {
                let fut = self.attempt(&item, options, attempt, &written);
                async move {
                    match fut.await {
                        Ok(patch) => RetryAction::Success(patch),
                        Err(e) if e.is_retryable() => RetryAction::Retry(e),
                        Err(e) => RetryAction::Fail(e),
                    }
                }
            })
            .await;

            // From here the item's fate is decided; a dropped future must
            // not revert it.
            guard.in_flight = None;
            let failed = match outcome {
                Ok(patch) => {
                    self.record(&item.id, ItemStatus::Completed, Some(patch), None)
                        .await;
                    let snap = self
                        .update(|p| {
                            p.success_count += 1;
                            p.completed += 1;
                            p.recompute_percentage();
                        })
                        .await;
                    info!("Item {}/{} done: {}", snap.completed, snap.total, item.id);
                    if let Some(cb) = &options.callback {
                        cb.on_item_finished(&snap, &item.id, None);
                    }
                    false
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("Item {} failed: {}", item.id, message);
                    self.record(
                        &item.id,
                        ItemStatus::Failed,
                        None,
                        Some(ItemFailure {
                            class: e.class(),
                            message: message.clone(),
                        }),
                    )
                    .await;
                    let snap = self
                        .update(|p| {
                            p.failed_count += 1;
                            p.completed += 1;
                            p.recompute_percentage();
                        })
                        .await;
                    if let Some(cb) = &options.callback {
                        cb.on_item_finished(&snap, &item.id, Some(&message));
                    }
                    true
                }
            };

            if failed && !options.continue_on_error {
                info!("Stopping batch after failure (continue_on_error = false)");
                break;
            }
        }

        let snap = self
            .update(|p| {
                p.phase = Phase::Complete;
                p.current_item = None;
            })
            .await;
        if let Some(cb) = &options.callback {
            cb.on_batch_complete(&snap);
        }
        info!(
            "Batch complete: {} succeeded, {} failed, {} of {} processed{} in {}ms",
            snap.success_count,
            snap.failed_count,
            snap.completed,
            snap.total,
            if snap.cancelled { " (cancelled)" } else { "" },
            started.elapsed().as_millis()
        );
        Ok(snap)
    }

    /// One attempt at one item.
    async fn attempt(
        &self,
        item: &QueueItem,
        options: &ProcessOptions,
        attempt: u32,
        written: &Mutex<Option<String>>,
    ) -> Result<ResultPatch, ItemError> {
        debug!("Item {}: attempt {}", item.id, attempt);
        self.enter_phase(options, Phase::Rendering, Some(display_title(item)))
            .await;
        let rendered = self.renderer.render(&item.document).await?;

        let mut filename = rendered.filename.clone();
        if let Some(dir) = &options.output_dir {
            let owned = written.lock().clone();
            let path = write_output(dir, &rendered, owned.as_deref()).await?;
            debug!("Wrote {}", path.display());
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                filename = name.to_string();
                *written.lock() = Some(filename.clone());
            }
        }

        let mut patch = ResultPatch {
            filename: Some(filename),
            size_bytes: Some(rendered.size_bytes),
            page_count: Some(rendered.page_count),
            failed_images: Some(rendered.failed_images),
            ..Default::default()
        };

        if options.upload {
            self.enter_phase(options, Phase::Uploading, Some(display_title(item)))
                .await;
            let uploader = self.uploader.as_ref().ok_or(AuthError::NotConfigured)?;
            let token = uploader.auth.get_token(false).await?;
            let target = UploadTarget {
                token,
                folder_id: options.folder_id.clone(),
            };
            let file = uploader
                .sink
                .upload(&rendered.bytes, &rendered.filename, &target)
                .await?;
            patch.remote_id = Some(file.id);
            patch.remote_link = Some(file.link);
        }

        Ok(patch)
    }

    async fn enter_phase(&self, options: &ProcessOptions, phase: Phase, current: Option<String>) {
        let snap = self
            .update(|p| {
                p.phase = phase;
                p.current_item = current;
            })
            .await;
        if let Some(cb) = &options.callback {
            cb.on_phase_change(&snap);
        }
    }

    /// Record a terminal status on the blocking pool. Best-effort: a storage
    /// hiccup should not abort the batch.
    async fn record(
        &self,
        item_id: &str,
        status: ItemStatus,
        patch: Option<ResultPatch>,
        error: Option<ItemFailure>,
    ) {
        let queue = self.queue.clone();
        let id = item_id.to_string();
        let written =
            tokio::task::spawn_blocking(move || queue.set_status(&id, status, patch, error)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not record status {:?} for {}: {}", status, item_id, e),
            Err(e) => warn!("Status write for {} did not finish: {}", item_id, e),
        }
    }

    /// Mutate the progress, persist it, and return a snapshot.
    async fn update(&self, f: impl FnOnce(&mut BatchProgress)) -> BatchProgress {
        let snap = {
            let mut p = self.progress.lock();
            f(&mut p);
            p.clone()
        };
        if let Some(store) = self.progress_store.clone() {
            let value = serde_json::to_value(&snap);
            let stored = tokio::task::spawn_blocking(move || {
                let value = value.map_err(|e| Capture2PdfError::Internal(e.to_string()))?;
                store.replace(PROGRESS_KEY, value)
            })
            .await;
            match stored {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Could not persist batch progress: {}", e),
                Err(e) => warn!("Progress write did not finish: {}", e),
            }
        }
        snap
    }
}

fn display_title(item: &QueueItem) -> String {
    let title = item.document.title.trim();
    if title.is_empty() {
        item.source_id.clone()
    } else {
        title.to_string()
    }
}

/// Atomic write: temp file in the same directory, then rename.
///
/// `owned` is a name this item already wrote during the run and may reuse;
/// otherwise an existing file is never replaced and `Name (2).pdf`,
/// `Name (3).pdf`, ... are tried instead.
async fn write_output(
    dir: &Path,
    doc: &RenderedDocument,
    owned: Option<&str>,
) -> Result<PathBuf, ItemError> {
    let output_err = |path: &Path, e: std::io::Error| ItemError::Output {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| output_err(dir, e))?;
    let path = match owned {
        Some(name) => dir.join(name),
        None => free_output_path(dir, &doc.filename).await?,
    };

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &doc.bytes)
        .await
        .map_err(|e| output_err(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| output_err(&path, e))?;
    Ok(path)
}

async fn free_output_path(dir: &Path, filename: &str) -> Result<PathBuf, ItemError> {
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (filename, String::new()),
    };

    let mut candidate = dir.join(filename);
    for n in 2..=MAX_OUTPUT_SUFFIX + 1 {
        let taken = tokio::fs::try_exists(&candidate)
            .await
            .map_err(|e| ItemError::Output {
                path: candidate.clone(),
                detail: e.to_string(),
            })?;
        if !taken {
            return Ok(candidate);
        }
        candidate = dir.join(format!("{stem} ({n}){ext}"));
    }
    Err(ItemError::Output {
        path: dir.join(filename),
        detail: format!("no free name after {MAX_OUTPUT_SUFFIX} attempts"),
    })
}
