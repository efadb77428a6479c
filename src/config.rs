//! Configuration types for rendering, uploading and batch runs.
//!
//! Rendering is controlled by [`RenderConfig`] (built via
//! [`RenderConfigBuilder`]), the upload sink by [`UploadConfig`], and each
//! batch run by [`ProcessOptions`]. All three have documented defaults so
//! callers only set what they care about.

use crate::error::Capture2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A4 portrait, in PDF points.
pub const A4_WIDTH_PT: f32 = 595.28;
pub const A4_HEIGHT_PT: f32 = 841.89;

/// Default upload endpoint (Drive v3 multipart upload).
pub const DEFAULT_UPLOAD_ENDPOINT: &str =
    "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart&fields=id,webViewLink";

// ── Render ───────────────────────────────────────────────────────────────

/// Configuration for the PDF renderer.
///
/// # Example
/// ```rust
/// use edgequake_capture2pdf::{QualityLevel, RenderConfig};
///
/// let config = RenderConfig::builder()
///     .quality(QualityLevel::High)
///     .include_source_footer(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.quality.max_image_edge(), 2400);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Image fidelity. Default: [`QualityLevel::Standard`].
    pub quality: QualityLevel,

    /// Draw the source URL and capture time at the bottom of the last page.
    /// Default: false.
    pub include_source_footer: bool,

    /// Page width in points. Default: A4 (595.28).
    pub page_width_pt: f32,

    /// Page height in points. Default: A4 (841.89).
    pub page_height_pt: f32,

    /// Uniform margin in points. Default: 50.
    pub margin_pt: f32,

    /// TrueType file for body and title text. Default: builtin Helvetica.
    ///
    /// The builtin faces only cover Latin-1; point this at a CJK-capable font
    /// when captures contain scripts outside it.
    pub text_font_path: Option<PathBuf>,

    /// TrueType file for pictographic runs. Default: builtin ZapfDingbats.
    pub emoji_font_path: Option<PathBuf>,

    /// Per-image fetch timeout for remote images, in seconds. Default: 30.
    pub image_timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            quality: QualityLevel::default(),
            include_source_footer: false,
            page_width_pt: A4_WIDTH_PT,
            page_height_pt: A4_HEIGHT_PT,
            margin_pt: 50.0,
            text_font_path: None,
            emoji_font_path: None,
            image_timeout_secs: 30,
        }
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Width available to text and images.
    pub fn content_width(&self) -> f32 {
        self.page_width_pt - 2.0 * self.margin_pt
    }

    /// Height available between the top and bottom margins.
    pub fn content_height(&self) -> f32 {
        self.page_height_pt - 2.0 * self.margin_pt
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn quality(mut self, quality: QualityLevel) -> Self {
        self.config.quality = quality;
        self
    }

    pub fn include_source_footer(mut self, v: bool) -> Self {
        self.config.include_source_footer = v;
        self
    }

    pub fn page_size_pt(mut self, width: f32, height: f32) -> Self {
        self.config.page_width_pt = width;
        self.config.page_height_pt = height;
        self
    }

    pub fn margin_pt(mut self, margin: f32) -> Self {
        self.config.margin_pt = margin;
        self
    }

    pub fn text_font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.text_font_path = Some(path.into());
        self
    }

    pub fn emoji_font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.emoji_font_path = Some(path.into());
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating page geometry.
    pub fn build(self) -> Result<RenderConfig, Capture2PdfError> {
        let c = &self.config;
        if !(c.page_width_pt.is_finite() && c.page_height_pt.is_finite())
            || c.page_width_pt < 144.0
            || c.page_height_pt < 144.0
        {
            return Err(Capture2PdfError::InvalidConfig(format!(
                "Page must be at least 144×144 pt, got {}×{}",
                c.page_width_pt, c.page_height_pt
            )));
        }
        if !c.margin_pt.is_finite() || c.margin_pt < 0.0 {
            return Err(Capture2PdfError::InvalidConfig(format!(
                "Margin must be ≥ 0, got {}",
                c.margin_pt
            )));
        }
        // Leave room for at least a title line and a footer.
        if c.content_width() < 72.0 || c.content_height() < 72.0 {
            return Err(Capture2PdfError::InvalidConfig(format!(
                "Margin {} leaves less than 72 pt of content on a {}×{} page",
                c.margin_pt, c.page_width_pt, c.page_height_pt
            )));
        }
        Ok(self.config)
    }
}

/// Image fidelity tier.
///
/// Images are downscaled to the tier's maximum edge before embedding; the
/// page layout itself does not change between tiers.
///
/// | Tier | Max edge | Use case |
/// |------|----------|----------|
/// | Draft | 1024 px | Small files for sharing or archiving text |
/// | Standard | 1600 px | Readable screenshots and photos (default) |
/// | High | 2400 px | Print |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Draft,
    #[default]
    Standard,
    High,
}

impl QualityLevel {
    /// Longest image edge, in pixels, kept after normalisation.
    pub fn max_image_edge(self) -> u32 {
        match self {
            QualityLevel::Draft => 1024,
            QualityLevel::Standard => 1600,
            QualityLevel::High => 2400,
        }
    }
}

impl std::str::FromStr for QualityLevel {
    type Err = Capture2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" | "low" => Ok(QualityLevel::Draft),
            "standard" | "medium" => Ok(QualityLevel::Standard),
            "high" => Ok(QualityLevel::High),
            other => Err(Capture2PdfError::InvalidConfig(format!(
                "Unknown quality level '{other}' (expected draft, standard or high)"
            ))),
        }
    }
}

// ── Upload ───────────────────────────────────────────────────────────────

/// Configuration for [`crate::pipeline::upload::DriveUploader`].
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Multipart upload URL. Default: [`DEFAULT_UPLOAD_ENDPOINT`].
    pub endpoint: String,

    /// Attempts per upload, including the first. Default: 3.
    ///
    /// Credential and permission failures always stop after one attempt.
    pub max_attempts: u32,

    /// Backoff unit. The wait before attempt `n + 1` is `base_delay × 2ⁿ`,
    /// so with the default of 1 s: 2 s, then 4 s.
    pub base_delay: Duration,

    /// Per-request timeout. Default: 120 s.
    pub request_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
        }
    }
}

// ── Batch run ────────────────────────────────────────────────────────────

/// Options for one [`crate::orchestrator::Pipeline::process`] call.
///
/// ```rust
/// use edgequake_capture2pdf::ProcessOptions;
/// use std::time::Duration;
///
/// let opts = ProcessOptions::default()
///     .upload(true)
///     .folder_id("0AbCdEf")
///     .max_retries(3)
///     .retry_delay(Duration::from_millis(250));
/// assert!(opts.continue_on_error);
/// ```
#[derive(Clone)]
pub struct ProcessOptions {
    /// Upload each rendered document. Default: false.
    pub upload: bool,

    /// Remote folder to upload into. Default: the account root.
    pub folder_id: Option<String>,

    /// Keep going after an item fails. Default: true.
    pub continue_on_error: bool,

    /// Attempts per item, including the first. Default: 2.
    pub max_retries: u32,

    /// Linear backoff unit: the wait after failed attempt `n` is
    /// `retry_delay × n`. Default: 1 s.
    pub retry_delay: Duration,

    /// Also write each rendered PDF into this directory. Default: none.
    pub output_dir: Option<PathBuf>,

    /// Receives progress snapshots. Default: none.
    pub callback: Option<ProgressCallback>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            upload: false,
            folder_id: None,
            continue_on_error: true,
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            output_dir: None,
            callback: None,
        }
    }
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("upload", &self.upload)
            .field("folder_id", &self.folder_id)
            .field("continue_on_error", &self.continue_on_error)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("output_dir", &self.output_dir)
            .field(
                "callback",
                &self.callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ProcessOptions {
    pub fn upload(mut self, v: bool) -> Self {
        self.upload = v;
        self
    }

    pub fn folder_id(mut self, id: impl Into<String>) -> Self {
        self.folder_id = Some(id.into());
        self
    }

    pub fn continue_on_error(mut self, v: bool) -> Self {
        self.continue_on_error = v;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn callback(mut self, cb: ProgressCallback) -> Self {
        self.callback = Some(cb);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_render_config_is_a4() {
        let c = RenderConfig::default();
        assert_eq!(c.page_width_pt, A4_WIDTH_PT);
        assert_eq!(c.margin_pt, 50.0);
        assert!((c.content_width() - 495.28).abs() < 0.01);
        assert!(RenderConfig::builder().build().is_ok());
    }

    #[test]
    fn builder_rejects_oversized_margin() {
        let err = RenderConfig::builder().margin_pt(290.0).build().unwrap_err();
        assert!(matches!(err, Capture2PdfError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_tiny_page() {
        assert!(RenderConfig::builder()
            .page_size_pt(100.0, 100.0)
            .build()
            .is_err());
    }

    #[test]
    fn quality_parses_aliases() {
        assert_eq!("HIGH".parse::<QualityLevel>().unwrap(), QualityLevel::High);
        assert_eq!("low".parse::<QualityLevel>().unwrap(), QualityLevel::Draft);
        assert!("ultra".parse::<QualityLevel>().is_err());
    }

    #[test]
    fn process_options_defaults() {
        let o = ProcessOptions::default();
        assert!(!o.upload);
        assert!(o.continue_on_error);
        assert_eq!(o.max_retries, 2);
        assert_eq!(o.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn max_retries_is_at_least_one() {
        assert_eq!(ProcessOptions::default().max_retries(0).max_retries, 1);
    }
}
