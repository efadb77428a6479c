//! CLI binary for edgequake-capture2pdf.
//!
//! A thin shim over the library crate: manages a queue persisted in a JSON
//! state file and drives batch runs with a terminal progress bar.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_capture2pdf::auth::DEFAULT_TOKEN_VAR;
use edgequake_capture2pdf::config::DEFAULT_UPLOAD_ENDPOINT;
use edgequake_capture2pdf::{
    BatchProgress, BatchProgressCallback, CapturedDocument, DriveUploader, EnvTokenProvider,
    ItemStatus, JsonFileStore, KeyValueStore, PdfRenderer, Phase, Pipeline, ProcessOptions,
    ProgressCallback, QualityLevel, QueueStore, RenderConfig, UploadConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per item.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start of the item in flight.
    item_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us the total.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading queue…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            item_started: Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} items  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
    }

    fn elapsed(&self) -> String {
        let ms = self
            .item_started
            .lock()
            .take()
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total} queued documents…"))
        ));
    }

    fn on_phase_change(&self, progress: &BatchProgress) {
        let verb = match progress.phase {
            Phase::Rendering => "rendering",
            Phase::Uploading => "uploading",
            Phase::Idle | Phase::Complete => return,
        };
        let mut started = self.item_started.lock();
        if started.is_none() {
            *started = Some(Instant::now());
        }
        let title = progress.current_item.as_deref().unwrap_or("");
        self.bar.set_message(format!("{verb} {}", truncate(title, 40)));
    }

    fn on_item_finished(&self, progress: &BatchProgress, _item_id: &str, error: Option<&str>) {
        let title = truncate(progress.current_item.as_deref().unwrap_or(""), 48);
        let elapsed = self.elapsed();
        let line = match error {
            None => format!(
                "  {} {:>3}/{:<3}  {:<48}  {}",
                green("✓"),
                progress.completed,
                progress.total,
                title,
                dim(&elapsed),
            ),
            Some(e) => format!(
                "  {} {:>3}/{:<3}  {:<48}  {}  {}",
                red("✗"),
                progress.completed,
                progress.total,
                title,
                red(&truncate(e, 80)),
                dim(&elapsed),
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _progress: &BatchProgress) {
        self.bar.finish_and_clear();
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Queue captured documents (a JSON object or an array of them)
  capture2pdf enqueue captures/*.json

  # Render everything pending into ./out
  capture2pdf run --output-dir out

  # Render and upload into a folder
  CAPTURE2PDF_ACCESS_TOKEN=ya29... capture2pdf run --upload --folder 0AbCdEf

  # Inspect the queue
  capture2pdf status
  capture2pdf status --json

  # Requeue failures and run again
  capture2pdf retry-failed && capture2pdf run

CAPTURED DOCUMENT FORMAT:
  {
    "id": "post-123",
    "source_url": "https://example.com/post/123",
    "title": "Hello",
    "body": "Paragraphs separated by newlines",
    "author": "someone",
    "images": ["https://…/a.png", "data:image/png;base64,…", "./local.jpg"],
    "captured_at": "2026-01-01T12:00:00Z"
  }

ENVIRONMENT VARIABLES:
  CAPTURE2PDF_STATE          State file (queue + last progress)
  CAPTURE2PDF_ACCESS_TOKEN   Bearer token used for uploads
  CAPTURE2PDF_UPLOAD_ENDPOINT Multipart upload URL
  RUST_LOG                   Overrides the log filter
"#;

/// Render captured web documents to PDF and upload them.
#[derive(Parser, Debug)]
#[command(
    name = "capture2pdf",
    version,
    about = "Render queued captured documents to PDF and upload them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON file holding the queue and the last batch progress.
    #[arg(
        long,
        global = true,
        env = "CAPTURE2PDF_STATE",
        default_value = "capture2pdf-state.json"
    )]
    state: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CAPTURE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CAPTURE2PDF_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add captured documents (JSON files, or `-` for stdin) to the queue.
    Enqueue {
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Process every pending item.
    Run(RunArgs),
    /// Show queue counts and items.
    Status {
        /// Print the queue as JSON.
        #[arg(long, env = "CAPTURE2PDF_JSON")]
        json: bool,
    },
    /// Move failed items back to pending.
    RetryFailed,
    /// Remove one item by queue id.
    Remove { id: String },
    /// Remove items from the queue.
    Clear {
        /// Only remove completed items.
        #[arg(long)]
        completed: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Upload each rendered PDF.
    #[arg(long, env = "CAPTURE2PDF_UPLOAD")]
    upload: bool,

    /// Remote folder id to upload into.
    #[arg(long, env = "CAPTURE2PDF_FOLDER")]
    folder: Option<String>,

    /// Also write each PDF into this directory.
    #[arg(short, long, env = "CAPTURE2PDF_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Attempts per item, including the first.
    #[arg(long, env = "CAPTURE2PDF_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_retries: u32,

    /// Base delay between item attempts, in milliseconds.
    #[arg(long, env = "CAPTURE2PDF_RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Stop the batch at the first failed item.
    #[arg(long, env = "CAPTURE2PDF_STOP_ON_ERROR")]
    stop_on_error: bool,

    /// Image quality: draft, standard, high.
    #[arg(long, env = "CAPTURE2PDF_QUALITY", default_value = "standard")]
    quality: QualityLevel,

    /// Print "Source: … · Captured …" at the bottom of the last page.
    #[arg(long, env = "CAPTURE2PDF_FOOTER")]
    footer: bool,

    /// TrueType font for text (default: built-in Helvetica, Latin only).
    #[arg(long, env = "CAPTURE2PDF_TEXT_FONT")]
    text_font: Option<PathBuf>,

    /// TrueType font for emoji and pictographs.
    #[arg(long, env = "CAPTURE2PDF_EMOJI_FONT")]
    emoji_font: Option<PathBuf>,

    /// Per-image download timeout in seconds.
    #[arg(long, env = "CAPTURE2PDF_IMAGE_TIMEOUT", default_value_t = 30)]
    image_timeout: u64,

    /// Environment variable holding the upload bearer token.
    #[arg(long, env = "CAPTURE2PDF_TOKEN_VAR", default_value = DEFAULT_TOKEN_VAR)]
    token_var: String,

    /// Multipart upload URL.
    #[arg(long, env = "CAPTURE2PDF_UPLOAD_ENDPOINT", default_value = DEFAULT_UPLOAD_ENDPOINT)]
    endpoint: String,

    /// Upload attempts per document, including the first.
    #[arg(long, env = "CAPTURE2PDF_UPLOAD_ATTEMPTS", default_value_t = 3)]
    upload_attempts: u32,

    /// Disable progress bar.
    #[arg(long, env = "CAPTURE2PDF_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during a run.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&cli.state));
    let queue = Arc::new(
        QueueStore::open(store.clone())
            .with_context(|| format!("Failed to open state file {}", cli.state.display()))?,
    );

    match &cli.command {
        Command::Enqueue { inputs } => {
            let mut added = 0usize;
            for input in inputs {
                for doc in read_documents(input).await? {
                    let existed = queue.contains(&doc.id);
                    let item = queue
                        .enqueue(doc)
                        .with_context(|| format!("Failed to enqueue from {input}"))?;
                    if !existed {
                        added += 1;
                    }
                    if !cli.quiet {
                        eprintln!(
                            "  {} {}  {}",
                            if existed { dim("=") } else { green("+") },
                            dim(&item.id),
                            item.document.title
                        );
                    }
                }
            }
            if !cli.quiet {
                eprintln!("{} {} new items queued", green("✔"), bold(&added.to_string()));
            }
        }
        Command::Run(args) => run(&cli, args, queue, store, show_progress).await?,
        Command::Status { json } => print_status(&queue, *json)?,
        Command::RetryFailed => {
            let n = queue.retry_failed().context("Failed to requeue items")?;
            if !cli.quiet {
                eprintln!("{} {} failed items moved back to pending", green("✔"), bold(&n.to_string()));
            }
        }
        Command::Remove { id } => {
            if queue.get(id).is_none() {
                anyhow::bail!("No queue item with id '{id}'");
            }
            queue.remove(id).context("Failed to remove item")?;
        }
        Command::Clear { completed } => {
            if *completed {
                queue.clear_completed()
            } else {
                queue.clear_all()
            }
            .context("Failed to clear queue")?;
        }
    }

    Ok(())
}

async fn run(
    cli: &Cli,
    args: &RunArgs,
    queue: Arc<QueueStore>,
    store: Arc<dyn KeyValueStore>,
    show_progress: bool,
) -> Result<()> {
    let render_config = build_render_config(args)?;
    let renderer = Arc::new(PdfRenderer::new(render_config).context("Failed to set up renderer")?);

    let mut builder = Pipeline::builder(queue, renderer).progress_store(store);
    if args.upload {
        let upload_config = UploadConfig {
            endpoint: args.endpoint.clone(),
            max_attempts: args.upload_attempts,
            ..Default::default()
        };
        let sink = DriveUploader::new(upload_config).context("Failed to set up uploader")?;
        builder = builder.uploader(
            Arc::new(sink),
            Arc::new(EnvTokenProvider::new(args.token_var.clone())),
        );
    }
    let pipeline = Arc::new(builder.build());

    let mut options = ProcessOptions::default()
        .upload(args.upload)
        .continue_on_error(!args.stop_on_error)
        .max_retries(args.max_retries)
        .retry_delay(Duration::from_millis(args.retry_delay_ms));
    if let Some(folder) = &args.folder {
        options = options.folder_id(folder.clone());
    }
    if let Some(dir) = &args.output_dir {
        options = options.output_dir(dir.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new_dynamic();
        options = options.callback(cb);
    }

    // First Ctrl-C stops after the current item; a second one exits now.
    // An item cut off that way is back in `pending` the next time the queue
    // is opened.
    let canceller = pipeline.clone();
    let quiet = cli.quiet;
    tokio::spawn(async move {
        let mut presses = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            match on_interrupt(presses) {
                Interrupt::Cancel => {
                    if !quiet {
                        eprintln!(
                            "{} finishing the current item, then stopping… (Ctrl-C again to quit now)",
                            yellow("⏸")
                        );
                    }
                    canceller.cancel();
                }
                Interrupt::ForceExit => {
                    eprintln!("{} interrupted", red("✗"));
                    std::process::exit(EXIT_INTERRUPTED);
                }
            }
        }
    });

    let progress = pipeline
        .process(&options)
        .await
        .context("Batch run failed")?;

    if !cli.quiet {
        print_summary(&progress);
    }
    Ok(())
}

/// Exit status after a forced stop (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    ForceExit,
}

/// What the `presses`-th Ctrl-C of a run does.
fn on_interrupt(presses: u32) -> Interrupt {
    if presses <= 1 {
        Interrupt::Cancel
    } else {
        Interrupt::ForceExit
    }
}

fn build_render_config(args: &RunArgs) -> Result<RenderConfig> {
    let mut builder = RenderConfig::builder()
        .quality(args.quality)
        .include_source_footer(args.footer)
        .image_timeout_secs(args.image_timeout);
    if let Some(path) = &args.text_font {
        builder = builder.text_font_path(path.clone());
    }
    if let Some(path) = &args.emoji_font {
        builder = builder.emoji_font_path(path.clone());
    }
    builder.build().context("Invalid configuration")
}

/// Parse one input (a path or `-`) into documents. Accepts a single object
/// or an array.
async fn read_documents(input: &str) -> Result<Vec<CapturedDocument>> {
    let raw = if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(Path::new(input))
            .await
            .with_context(|| format!("Failed to read {input}"))?
    };

    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{input} is not valid JSON"))?;
    let docs = if value.is_array() {
        serde_json::from_value::<Vec<CapturedDocument>>(value)
    } else {
        serde_json::from_value::<CapturedDocument>(value).map(|d| vec![d])
    }
    .with_context(|| format!("{input} does not contain captured documents"))?;

    for doc in &docs {
        doc.validate()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Invalid document in {input}"))?;
    }
    Ok(docs)
}

fn print_status(queue: &QueueStore, json: bool) -> Result<()> {
    let snapshot = queue.snapshot();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialise queue")?
        );
        return Ok(());
    }

    println!("Status:      {}", bold(&snapshot.status().to_string()));
    println!(
        "Items:       {} total  {} pending  {} processing  {} completed  {} failed",
        snapshot.total, snapshot.pending, snapshot.processing, snapshot.completed, snapshot.failed
    );
    for item in &snapshot.items {
        let mark = match item.status {
            ItemStatus::Pending => dim("·"),
            ItemStatus::Processing => cyan("▸"),
            ItemStatus::Completed => green("✓"),
            ItemStatus::Failed => red("✗"),
        };
        let title = if item.document.title.trim().is_empty() {
            item.source_id.as_str()
        } else {
            item.document.title.as_str()
        };
        println!("  {} {}  {}", mark, dim(&item.id), truncate(title, 60));
        if let Some(result) = &item.result {
            if let Some(link) = &result.remote_link {
                println!("      {}", dim(link));
            } else if let Some(name) = &result.filename {
                println!("      {}", dim(name));
            }
        }
        if let Some(err) = &item.error {
            println!("      {}", red(&truncate(err, 100)));
        }
    }
    Ok(())
}

fn print_summary(progress: &BatchProgress) {
    let mark = if progress.failed_count == 0 {
        green("✔")
    } else if progress.success_count == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {}/{} documents  ({} failed){}",
        mark,
        bold(&progress.success_count.to_string()),
        progress.total,
        if progress.failed_count == 0 {
            progress.failed_count.to_string()
        } else {
            red(&progress.failed_count.to_string())
        },
        if progress.cancelled {
            format!("  {}", yellow("cancelled; remaining items stay pending"))
        } else {
            String::new()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_interrupt_cancels_and_second_exits() {
        assert_eq!(on_interrupt(1), Interrupt::Cancel);
        assert_eq!(on_interrupt(2), Interrupt::ForceExit);
        assert_eq!(on_interrupt(5), Interrupt::ForceExit);
    }
}
