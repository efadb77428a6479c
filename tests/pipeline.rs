//! Integration tests for batch processing.
//!
//! Rendering and uploading are replaced by in-process fakes so these run
//! offline and fast; one test drives the real `PdfRenderer` end to end with
//! inline `data:` images.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use edgequake_capture2pdf::{
    AuthProvider, BatchProgress, BatchProgressCallback, Capture2PdfError, CapturedDocument,
    DocumentRenderer, DriveUploader, FailureClass, ItemStatus, JsonFileStore, KeyValueStore,
    MemoryStore, PdfRenderer, Phase, Pipeline, ProcessOptions, QueueStatus, QueueStore,
    RemoteFile, RenderConfig, RenderError, RenderedDocument, StaticTokenProvider, UploadConfig,
    UploadError, UploadSink, UploadTarget, UploadTransport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn doc(id: &str) -> CapturedDocument {
    CapturedDocument {
        id: id.into(),
        source_url: format!("https://example.com/{id}"),
        title: format!("Post {id}"),
        body: "First paragraph.\nSecond paragraph.".into(),
        author: "someone".into(),
        images: vec![],
        captured_at: Utc::now(),
    }
}

fn fast_options() -> ProcessOptions {
    ProcessOptions::default().retry_delay(Duration::from_millis(1))
}

/// Renderer that fails for chosen ids and can be held at a gate.
#[derive(Default)]
struct FakeRenderer {
    failing: HashSet<String>,
    invalid: HashSet<String>,
    calls: Mutex<HashMap<String, u32>>,
    gate: Option<Gate>,
    /// Same output name for every document, as with repeated titles.
    filename: Option<String>,
}

/// Each render reports that it started, then waits for one permit.
struct Gate {
    started: mpsc::UnboundedSender<String>,
    release: Arc<Semaphore>,
}

impl FakeRenderer {
    fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn named(filename: &str) -> Self {
        Self {
            filename: Some(filename.to_string()),
            ..Default::default()
        }
    }

    fn gated() -> (Self, mpsc::UnboundedReceiver<String>, Arc<Semaphore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let renderer = Self {
            gate: Some(Gate {
                started: tx,
                release: release.clone(),
            }),
            ..Default::default()
        };
        (renderer, rx, release)
    }

    fn calls(&self, id: &str) -> u32 {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, doc: &CapturedDocument) -> Result<RenderedDocument, RenderError> {
        *self.calls.lock().entry(doc.id.clone()).or_default() += 1;

        if let Some(gate) = &self.gate {
            let _ = gate.started.send(doc.id.clone());
            let permit = gate.release.acquire().await.unwrap();
            permit.forget();
        }

        if self.invalid.contains(&doc.id) {
            return Err(RenderError::Validation(format!("{} is malformed", doc.id)));
        }
        if self.failing.contains(&doc.id) {
            return Err(RenderError::Pdf(format!("layout exploded for {}", doc.id)));
        }
        let bytes = format!("%PDF-1.3 {}", doc.id).into_bytes();
        Ok(RenderedDocument {
            source_id: doc.id.clone(),
            size_bytes: bytes.len() as u64,
            bytes,
            filename: self
                .filename
                .clone()
                .unwrap_or_else(|| format!("{}.pdf", doc.id)),
            page_count: 1,
            has_images: false,
            failed_images: 0,
        })
    }
}

/// Sink that succeeds unless told otherwise.
#[derive(Default)]
struct FakeSink {
    fail_with: Option<UploadError>,
    uploads: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl UploadSink for FakeSink {
    async fn upload(
        &self,
        _bytes: &[u8],
        filename: &str,
        target: &UploadTarget,
    ) -> Result<RemoteFile, UploadError> {
        self.uploads
            .lock()
            .push((filename.to_string(), target.folder_id.clone()));
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(RemoteFile {
                id: format!("remote-{filename}"),
                link: format!("https://drive.example/{filename}"),
            }),
        }
    }
}

/// Transport that always answers 403 and counts calls.
#[derive(Default)]
struct ForbiddenTransport {
    calls: AtomicU32,
}

#[async_trait]
impl UploadTransport for ForbiddenTransport {
    async fn send(
        &self,
        _bytes: &[u8],
        _filename: &str,
        _target: &UploadTarget,
    ) -> Result<RemoteFile, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(UploadError::PermissionDenied("insufficient scope".into()))
    }
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for RecordingCallback {
    fn on_batch_start(&self, total: usize) {
        self.events.lock().push(format!("start:{total}"));
    }

    fn on_phase_change(&self, progress: &BatchProgress) {
        self.events.lock().push(format!("phase:{:?}", progress.phase));
    }

    fn on_item_finished(&self, progress: &BatchProgress, _item_id: &str, error: Option<&str>) {
        self.events.lock().push(format!(
            "item:{}:{}",
            progress.completed,
            if error.is_some() { "err" } else { "ok" }
        ));
    }

    fn on_batch_complete(&self, progress: &BatchProgress) {
        self.events
            .lock()
            .push(format!("complete:{}", progress.percentage));
    }
}

fn open_queue(store: Arc<dyn KeyValueStore>, ids: &[&str]) -> Arc<QueueStore> {
    let queue = Arc::new(QueueStore::open(store).unwrap());
    for id in ids {
        queue.enqueue(doc(id)).unwrap();
    }
    queue
}

fn status_of(queue: &QueueStore, source_id: &str) -> ItemStatus {
    queue
        .snapshot()
        .items
        .into_iter()
        .find(|i| i.source_id == source_id)
        .map(|i| i.status)
        .unwrap()
}

fn pdfs_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn assert_counts_consistent(queue: &QueueStore) {
    let q = queue.snapshot();
    assert_eq!(q.total, q.items.len());
    assert_eq!(q.total, q.pending + q.processing + q.completed + q.failed);
}

// ── Batch semantics ──────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_queue_completes_immediately() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &[]);
    let pipeline = Pipeline::builder(queue, Arc::new(FakeRenderer::default())).build();

    let progress = assert_ok!(pipeline.process(&fast_options()).await);
    assert_eq!(progress.total, 0);
    assert_eq!(progress.percentage, 100);
    assert_eq!(progress.phase, Phase::Complete);
    assert!(!pipeline.is_processing());
}

#[tokio::test]
async fn failing_item_is_retried_then_isolated() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "bad", "c"]);
    let renderer = Arc::new(FakeRenderer::failing(&["bad"]));
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone()).build();

    let progress = pipeline
        .process(&fast_options().max_retries(2))
        .await
        .unwrap();

    assert_eq!(progress.success_count, 2);
    assert_eq!(progress.failed_count, 1);
    assert_eq!(progress.completed, 3);
    assert_eq!(progress.percentage, 100);
    assert_eq!(renderer.calls("bad"), 2);
    assert_eq!(renderer.calls("a"), 1);

    let failed = queue
        .snapshot()
        .items
        .into_iter()
        .find(|i| i.source_id == "bad")
        .unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.error_class, Some(FailureClass::Render));
    assert!(failed.error.unwrap().contains("layout exploded"));
    assert_eq!(queue.snapshot().status(), QueueStatus::PartialFailure);
    assert_counts_consistent(&queue);
}

#[tokio::test]
async fn validation_failure_is_not_retried() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["v"]);
    let renderer = Arc::new(FakeRenderer {
        invalid: ["v".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone()).build();

    let progress = pipeline
        .process(&fast_options().max_retries(5))
        .await
        .unwrap();
    assert_eq!(progress.failed_count, 1);
    assert_eq!(renderer.calls("v"), 1);
    assert_eq!(
        queue.snapshot().items[0].error_class,
        Some(FailureClass::Validation)
    );
}

#[tokio::test]
async fn stop_on_error_leaves_rest_pending() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "bad", "c"]);
    let renderer = Arc::new(FakeRenderer::failing(&["bad"]));
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone()).build();

    let progress = pipeline
        .process(&fast_options().continue_on_error(false))
        .await
        .unwrap();

    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 2);
    assert_eq!(status_of(&queue, "a"), ItemStatus::Completed);
    assert_eq!(status_of(&queue, "bad"), ItemStatus::Failed);
    assert_eq!(status_of(&queue, "c"), ItemStatus::Pending);
    assert_eq!(renderer.calls("c"), 0);
    assert_counts_consistent(&queue);
}

#[tokio::test]
async fn callbacks_arrive_in_order() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "bad"]);
    let pipeline = Pipeline::builder(queue, Arc::new(FakeRenderer::failing(&["bad"]))).build();
    let cb = Arc::new(RecordingCallback::default());

    pipeline
        .process(&fast_options().max_retries(1).callback(cb.clone()))
        .await
        .unwrap();

    let events = cb.events.lock().clone();
    assert_eq!(events.first().map(String::as_str), Some("start:2"));
    assert_eq!(events.last().map(String::as_str), Some("complete:100"));
    let items: Vec<_> = events.iter().filter(|e| e.starts_with("item:")).collect();
    assert_eq!(items, ["item:1:ok", "item:2:err"]);
    assert!(events.iter().any(|e| e == "phase:Rendering"));
}

#[tokio::test]
async fn progress_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&state));
    let queue = open_queue(store.clone(), &["a", "b"]);
    let pipeline = Pipeline::builder(queue, Arc::new(FakeRenderer::default()))
        .progress_store(store)
        .build();
    let done = pipeline.process(&fast_options()).await.unwrap();

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&state));
    let queue = Arc::new(QueueStore::open(store.clone()).unwrap());
    assert_eq!(queue.snapshot().completed, 2);
    let reopened = Pipeline::builder(queue, Arc::new(FakeRenderer::default()))
        .progress_store(store)
        .build();
    assert_eq!(reopened.last_progress(), done);
}

// ── Concurrency and cancellation ─────────────────────────────────────────────

#[tokio::test]
async fn cancel_stops_between_items() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["1", "2", "3", "4", "5"]);
    let (renderer, mut started, release) = FakeRenderer::gated();
    let pipeline = Arc::new(Pipeline::builder(queue.clone(), Arc::new(renderer)).build());

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.process(&fast_options()).await });

    assert_eq!(started.recv().await.as_deref(), Some("1"));
    pipeline.cancel();
    release.add_permits(5);

    let progress = handle.await.unwrap().unwrap();
    assert!(progress.cancelled);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.success_count, 1);

    let q = queue.snapshot();
    assert_eq!(q.completed, 1);
    assert_eq!(q.pending, 4);
    assert_eq!(q.processing, 0);
    assert!(!pipeline.is_processing());
}

#[tokio::test]
async fn cancel_right_after_spawn_stops_the_run() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "b"]);
    let renderer = Arc::new(FakeRenderer::default());
    let pipeline = Arc::new(Pipeline::builder(queue.clone(), renderer.clone()).build());

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.process(&fast_options()).await });
    pipeline.cancel();

    let progress = handle.await.unwrap().unwrap();
    assert!(progress.cancelled);
    assert_eq!(progress.completed, 0);
    assert_eq!(renderer.calls("a"), 0);
    assert_eq!(queue.snapshot().pending, 2);
}

#[tokio::test]
async fn cancel_during_last_item_does_not_leak_into_next_run() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let (renderer, mut started, release) = FakeRenderer::gated();
    let pipeline = Arc::new(Pipeline::builder(queue.clone(), Arc::new(renderer)).build());

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.process(&fast_options()).await });
    started.recv().await.unwrap();
    pipeline.cancel();
    release.add_permits(1);
    let first = handle.await.unwrap().unwrap();
    assert!(!first.cancelled);
    assert_eq!(first.success_count, 1);

    queue.enqueue(doc("b")).unwrap();
    release.add_permits(1);
    let second = pipeline.process(&fast_options()).await.unwrap();
    assert!(!second.cancelled);
    assert_eq!(second.success_count, 1);
    assert_eq!(status_of(&queue, "b"), ItemStatus::Completed);
}

#[tokio::test]
async fn dropped_run_returns_item_to_pending() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "b"]);
    let (renderer, mut started, release) = FakeRenderer::gated();
    let renderer = Arc::new(renderer);
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone()).build();
    let options = fast_options();

    tokio::select! {
        _ = pipeline.process(&options) => panic!("run finished while its render was held"),
        id = started.recv() => assert_eq!(id.as_deref(), Some("a")),
    }

    assert!(!pipeline.is_processing());
    assert_eq!(status_of(&queue, "a"), ItemStatus::Pending);
    assert_eq!(queue.snapshot().processing, 0);
    assert_counts_consistent(&queue);

    release.add_permits(2);
    let progress = pipeline.process(&options).await.unwrap();
    assert_eq!(progress.success_count, 2);
    assert_eq!(renderer.calls("a"), 2);
    assert_eq!(queue.snapshot().status(), QueueStatus::Completed);
}

#[tokio::test]
async fn second_process_call_is_rejected() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "b"]);
    let (renderer, mut started, release) = FakeRenderer::gated();
    let pipeline = Arc::new(Pipeline::builder(queue.clone(), Arc::new(renderer)).build());

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.process(&fast_options()).await });
    started.recv().await.unwrap();
    assert!(pipeline.is_processing());

    let err = assert_err!(pipeline.process(&fast_options()).await);
    assert!(matches!(err, Capture2PdfError::AlreadyProcessing));

    release.add_permits(2);
    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.success_count, 2);
    assert!(!progress.cancelled);
    assert_eq!(queue.snapshot().status(), QueueStatus::Completed);
}

#[tokio::test]
async fn items_enqueued_mid_run_wait_for_next_run() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let (renderer, mut started, release) = FakeRenderer::gated();
    let pipeline = Arc::new(Pipeline::builder(queue.clone(), Arc::new(renderer)).build());

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.process(&fast_options()).await });
    started.recv().await.unwrap();

    queue.enqueue(doc("late")).unwrap();
    assert_counts_consistent(&queue);
    assert_eq!(queue.snapshot().processing, 1);

    release.add_permits(1);
    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.total, 1);
    assert_eq!(status_of(&queue, "late"), ItemStatus::Pending);

    release.add_permits(1);
    let second = pipeline.process(&fast_options()).await.unwrap();
    assert_eq!(second.total, 1);
    assert_eq!(status_of(&queue, "late"), ItemStatus::Completed);
}

#[tokio::test]
async fn item_removed_mid_run_is_skipped() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "b"]);
    let (renderer, mut started, release) = FakeRenderer::gated();
    let renderer = Arc::new(renderer);
    let pipeline = Arc::new(Pipeline::builder(queue.clone(), renderer.clone()).build());

    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.process(&fast_options()).await });
    started.recv().await.unwrap();

    let b = queue
        .snapshot()
        .items
        .into_iter()
        .find(|i| i.source_id == "b")
        .unwrap();
    queue.remove(&b.id).unwrap();

    release.add_permits(2);
    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.total, 1);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.percentage, 100);
    assert_eq!(renderer.calls("b"), 0);
    assert_counts_consistent(&queue);
}

// ── Upload ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_records_remote_file() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let sink = Arc::new(FakeSink::default());
    let pipeline = Pipeline::builder(queue.clone(), Arc::new(FakeRenderer::default()))
        .uploader(sink.clone(), Arc::new(StaticTokenProvider::new("tok")))
        .build();

    let progress = pipeline
        .process(&fast_options().upload(true).folder_id("folder-1"))
        .await
        .unwrap();
    assert_eq!(progress.success_count, 1);

    let item = &queue.snapshot().items[0];
    let result = item.result.as_ref().unwrap();
    assert_eq!(result.remote_id.as_deref(), Some("remote-a.pdf"));
    assert_eq!(
        result.remote_link.as_deref(),
        Some("https://drive.example/a.pdf")
    );
    assert_eq!(result.page_count, Some(1));
    assert!(result.completed_at.is_some());
    assert_eq!(
        sink.uploads.lock().as_slice(),
        [("a.pdf".to_string(), Some("folder-1".to_string()))]
    );
}

#[tokio::test]
async fn upload_without_uploader_fails_as_authentication() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let renderer = Arc::new(FakeRenderer::default());
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone()).build();

    let progress = pipeline
        .process(&fast_options().upload(true).max_retries(3))
        .await
        .unwrap();
    assert_eq!(progress.failed_count, 1);
    assert_eq!(renderer.calls("a"), 1);
    let item = &queue.snapshot().items[0];
    assert_eq!(item.error_class, Some(FailureClass::Authentication));
}

#[tokio::test]
async fn rejected_token_is_not_retried() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let renderer = Arc::new(FakeRenderer::default());
    let sink = Arc::new(FakeSink::default());
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone())
        .uploader(sink.clone(), Arc::new(StaticTokenProvider::new("")))
        .build();

    pipeline
        .process(&fast_options().upload(true).max_retries(3))
        .await
        .unwrap();
    assert_eq!(renderer.calls("a"), 1);
    assert!(sink.uploads.lock().is_empty());
    assert_eq!(status_of(&queue, "a"), ItemStatus::Failed);
}

#[tokio::test]
async fn permission_denied_upload_fails_after_one_request() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let renderer = Arc::new(FakeRenderer::default());
    let transport = Arc::new(ForbiddenTransport::default());
    let config = UploadConfig {
        base_delay: Duration::from_millis(1),
        ..UploadConfig::default()
    };
    let sink = DriveUploader::with_transport(transport.clone(), &config);
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone())
        .uploader(Arc::new(sink), Arc::new(StaticTokenProvider::new("tok")))
        .build();

    let progress = pipeline
        .process(&fast_options().upload(true).max_retries(3))
        .await
        .unwrap();
    assert_eq!(progress.failed_count, 1);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.calls("a"), 1);

    let item = &queue.snapshot().items[0];
    assert_eq!(item.error_class, Some(FailureClass::Authentication));
    assert!(item.error.as_deref().unwrap().contains("permission denied"));
}

#[tokio::test]
async fn transient_upload_failure_retries_the_item() {
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let renderer = Arc::new(FakeRenderer::default());
    let sink = Arc::new(FakeSink {
        fail_with: Some(UploadError::Server {
            status: 503,
            detail: "backend unavailable".into(),
        }),
        ..Default::default()
    });
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone())
        .uploader(sink.clone(), Arc::new(StaticTokenProvider::new("tok")))
        .build();

    pipeline
        .process(&fast_options().upload(true).max_retries(2))
        .await
        .unwrap();
    assert_eq!(renderer.calls("a"), 2);
    assert_eq!(sink.uploads.lock().len(), 2);
    assert_eq!(
        queue.snapshot().items[0].error_class,
        Some(FailureClass::Upload)
    );
}

// ── Local output ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn same_named_documents_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a", "b", "c"]);
    let pipeline = Pipeline::builder(queue.clone(), Arc::new(FakeRenderer::named("Post.pdf"))).build();

    let progress = pipeline
        .process(&fast_options().output_dir(dir.path()))
        .await
        .unwrap();
    assert_eq!(progress.success_count, 3);
    assert_eq!(
        pdfs_in(dir.path()),
        vec!["Post (2).pdf", "Post (3).pdf", "Post.pdf"]
    );

    for (id, name) in [("a", "Post.pdf"), ("b", "Post (2).pdf"), ("c", "Post (3).pdf")] {
        let item = queue
            .snapshot()
            .items
            .into_iter()
            .find(|i| i.source_id == id)
            .unwrap();
        assert_eq!(item.result.unwrap().filename.as_deref(), Some(name));
        let written = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(written, format!("%PDF-1.3 {id}").into_bytes());
    }
}

#[tokio::test]
async fn retried_item_writes_a_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open_queue(Arc::new(MemoryStore::new()), &["a"]);
    let renderer = Arc::new(FakeRenderer::default());
    let sink = Arc::new(FakeSink {
        fail_with: Some(UploadError::Network("connection reset".into())),
        ..Default::default()
    });
    let pipeline = Pipeline::builder(queue.clone(), renderer.clone())
        .uploader(sink.clone(), Arc::new(StaticTokenProvider::new("tok")))
        .build();

    pipeline
        .process(
            &fast_options()
                .upload(true)
                .max_retries(3)
                .output_dir(dir.path()),
        )
        .await
        .unwrap();
    assert_eq!(renderer.calls("a"), 3);
    assert_eq!(pdfs_in(dir.path()), vec!["a.pdf"]);
}

#[tokio::test]
async fn env_token_provider_reports_missing_variable() {
    let provider = edgequake_capture2pdf::EnvTokenProvider::new("CAPTURE2PDF_PIPELINE_TEST_UNSET");
    let err = assert_err!(provider.get_token(false).await);
    assert!(err.to_string().contains("CAPTURE2PDF_PIPELINE_TEST_UNSET"));
}

// ── Real renderer ────────────────────────────────────────────────────────────

fn png_data_uri(w: u32, h: u32) -> String {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba([200, 30, 30, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&buf)
    )
}

#[tokio::test]
async fn renders_mixed_script_document_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open_queue(Arc::new(MemoryStore::new()), &[]);
    let mut captured = doc("real");
    captured.title = "Café: notes/ideas 👋".into();
    captured.body = "Hello 👋 world, 👨‍👩‍👧 family.\n\n日本語のテキスト\n".repeat(20);
    captured.images = vec![png_data_uri(40, 30), "data:image/png;base64,AAAA".into()];
    queue.enqueue(captured).unwrap();

    let renderer = Arc::new(PdfRenderer::new(RenderConfig::default()).unwrap());
    let pipeline = Pipeline::builder(queue.clone(), renderer).build();
    let progress = pipeline
        .process(&fast_options().output_dir(dir.path()))
        .await
        .unwrap();
    assert_eq!(progress.success_count, 1);

    let item = &queue.snapshot().items[0];
    let result = item.result.as_ref().unwrap();
    let filename = result.filename.clone().unwrap();
    assert!(filename.ends_with(".pdf"));
    assert!(!filename.contains('/'));
    assert!(!filename.contains(':'));
    assert_eq!(result.failed_images, Some(1));
    assert!(result.page_count.unwrap() >= 1);

    let bytes = std::fs::read(dir.path().join(&filename)).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(result.size_bytes, Some(bytes.len() as u64));
}
