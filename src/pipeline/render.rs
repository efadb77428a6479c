//! PDF rendering: captured document → paginated A4 PDF via `printpdf`.
//!
//! Image bytes are fetched first (async, network-bound); everything after
//! that (decoding, layout, PDF serialisation) is CPU-bound and runs inside
//! `tokio::task::spawn_blocking`. `printpdf` documents are `!Send`, so the
//! whole document is built and serialised on that one blocking thread.
//!
//! ## Layout
//!
//! Coordinates are tracked in points with a cursor measured down from the
//! top edge; `printpdf` wants millimetres from the bottom-left, so every draw
//! converts at the last moment.
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Title (20 pt bold)       │
//! │ Author (11 pt grey)      │
//! │                          │  one blank line
//! │ Body paragraphs (11 pt)  │  wrapped per character
//! │ [image] [image] …        │  scaled to fit, 10 pt apart
//! │                          │
//! │ source · captured (8 pt) │  last page only, optional
//! └──────────────────────────┘
//! ```

use super::filename::derive_filename;
use super::glyphs::{clusters, runs, GlyphClass};
use super::images;
use super::metrics::{cluster_width, text_width, Weight};
use crate::config::RenderConfig;
use crate::error::{Capture2PdfError, ImageError, RenderError};
use crate::model::{CapturedDocument, RenderedDocument};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerReference, Pt, Rgb,
};
use std::io::BufWriter;
use std::time::Duration;
use tracing::{debug, info, warn};

const TITLE_SIZE: f32 = 20.0;
const AUTHOR_SIZE: f32 = 11.0;
const BODY_SIZE: f32 = 11.0;
const FOOTER_SIZE: f32 = 8.0;
const LINE_SPACING: f32 = 1.4;
const PARAGRAPH_GAP: f32 = 0.5;
const IMAGE_SPACING: f32 = 10.0;
/// Images are placed at 96 dpi: one pixel is 0.75 pt before scaling.
const IMAGE_DPI: f32 = 96.0;
const PT_PER_PX: f32 = 72.0 / IMAGE_DPI;

const BLACK: (f32, f32, f32) = (0.0, 0.0, 0.0);
const GREY: (f32, f32, f32) = (0.4, 0.4, 0.4);

/// Turns a captured document into a rendered one.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, doc: &CapturedDocument) -> Result<RenderedDocument, RenderError>;
}

/// The production renderer.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    config: RenderConfig,
    client: reqwest::Client,
}

impl PdfRenderer {
    pub fn new(config: RenderConfig) -> Result<Self, Capture2PdfError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("capture2pdf/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.image_timeout_secs))
            .build()
            .map_err(|e| Capture2PdfError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}

#[async_trait]
impl DocumentRenderer for PdfRenderer {
    async fn render(&self, doc: &CapturedDocument) -> Result<RenderedDocument, RenderError> {
        doc.validate().map_err(RenderError::Validation)?;

        let mut fetched = Vec::with_capacity(doc.images.len());
        for locator in &doc.images {
            let bytes =
                images::fetch_bytes(&self.client, locator, self.config.image_timeout_secs).await;
            fetched.push((locator.clone(), bytes));
        }

        let config = self.config.clone();
        let doc = doc.clone();
        let rendered = tokio::task::spawn_blocking(move || render_blocking(&config, &doc, fetched))
            .await
            .map_err(|e| RenderError::Internal(format!("Render task panicked: {e}")))??;

        info!(
            "Rendered '{}' → {} ({} pages, {} bytes, {} images failed)",
            rendered.source_id,
            rendered.filename,
            rendered.page_count,
            rendered.size_bytes,
            rendered.failed_images
        );
        Ok(rendered)
    }
}

/// Blocking implementation of document rendering.
fn render_blocking(
    config: &RenderConfig,
    doc: &CapturedDocument,
    fetched: Vec<(String, Result<Vec<u8>, ImageError>)>,
) -> Result<RenderedDocument, RenderError> {
    let max_edge = config.quality.max_image_edge();
    let mut failed_images = 0;
    let mut decoded = Vec::with_capacity(fetched.len());
    for (locator, bytes) in fetched {
        match bytes.and_then(|b| images::normalise(&locator, &b, max_edge)) {
            Ok(img) => decoded.push(img),
            Err(e) => {
                warn!("Skipping image: {}", e);
                failed_images += 1;
            }
        }
    }

    let title = if doc.title.trim().is_empty() {
        "Untitled"
    } else {
        doc.title.trim()
    };
    let mut page = PageWriter::new(config, title)?;

    if !doc.title.trim().is_empty() {
        page.paragraph(doc.title.trim(), TITLE_SIZE, Weight::Bold, BLACK);
    }
    if !doc.author.trim().is_empty() {
        page.paragraph(doc.author.trim(), AUTHOR_SIZE, Weight::Regular, GREY);
    }
    page.skip(BODY_SIZE * LINE_SPACING);

    let body = doc.body.replace("\r\n", "\n").replace('\r', "\n");
    for para in body.split('\n') {
        if para.trim().is_empty() {
            continue;
        }
        page.paragraph(para, BODY_SIZE, Weight::Regular, BLACK);
        page.skip(BODY_SIZE * LINE_SPACING * PARAGRAPH_GAP);
    }

    let mut placed = 0;
    for img in &decoded {
        page.image(img);
        placed += 1;
    }

    if config.include_source_footer {
        let stamp = doc.captured_at.format("%Y-%m-%d %H:%M UTC");
        page.footer(&format!("Source: {} · Captured {}", doc.source_url, stamp));
    }

    let page_count = page.pages;
    let bytes = page.finish()?;
    Ok(RenderedDocument {
        source_id: doc.id.clone(),
        size_bytes: bytes.len() as u64,
        bytes,
        filename: derive_filename(&doc.title),
        page_count,
        has_images: placed > 0,
        failed_images,
    })
}

/// Wrap `text` cluster by cluster so no line exceeds `max_width`.
///
/// A cluster wider than the whole line gets a line to itself.
pub fn wrap(text: &str, size: f32, weight: Weight, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut width = 0.0;
    for cl in clusters(text) {
        let w = cluster_width(&cl, size, weight);
        if !line.is_empty() && width + w > max_width {
            lines.push(std::mem::take(&mut line));
            width = 0.0;
        }
        line.push_str(cl.text);
        width += w;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn mm(pt: f32) -> Mm {
    Mm::from(Pt(pt))
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    symbol: IndirectFontRef,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference, config: &RenderConfig) -> Result<Self, RenderError> {
        let builtin = |f: BuiltinFont| {
            doc.add_builtin_font(f)
                .map_err(|e| RenderError::Pdf(format!("font error: {e}")))
        };

        let (regular, bold) = match &config.text_font_path {
            Some(path) => {
                let font = load_external(doc, path)?;
                (font.clone(), font)
            }
            None => (
                builtin(BuiltinFont::Helvetica)?,
                builtin(BuiltinFont::HelveticaBold)?,
            ),
        };
        let symbol = match &config.emoji_font_path {
            Some(path) => load_external(doc, path)?,
            None => builtin(BuiltinFont::ZapfDingbats)?,
        };
        Ok(Self {
            regular,
            bold,
            symbol,
        })
    }
}

fn load_external(
    doc: &PdfDocumentReference,
    path: &std::path::Path,
) -> Result<IndirectFontRef, RenderError> {
    let font_err = |detail: String| RenderError::Font {
        path: path.to_path_buf(),
        detail,
    };
    let file = std::fs::File::open(path).map_err(|e| font_err(e.to_string()))?;
    let font = doc
        .add_external_font(file)
        .map_err(|e| font_err(e.to_string()))?;
    debug!("Loaded font {}", path.display());
    Ok(font)
}

/// Page state: current layer, page count and a top-down cursor.
struct PageWriter<'a> {
    config: &'a RenderConfig,
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    fonts: Fonts,
    pages: usize,
    /// Distance from the top edge, in points.
    cursor: f32,
}

impl<'a> PageWriter<'a> {
    fn new(config: &'a RenderConfig, title: &str) -> Result<Self, RenderError> {
        let (doc, page, layer) = PdfDocument::new(
            title,
            mm(config.page_width_pt),
            mm(config.page_height_pt),
            "Layer 1",
        );
        let layer = doc.get_page(page).get_layer(layer);
        let fonts = Fonts::load(&doc, config)?;
        Ok(Self {
            config,
            doc,
            layer,
            fonts,
            pages: 1,
            cursor: config.margin_pt,
        })
    }

    fn remaining(&self) -> f32 {
        self.config.page_height_pt - self.config.margin_pt - self.cursor
    }

    fn at_top(&self) -> bool {
        self.cursor <= self.config.margin_pt
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(
            mm(self.config.page_width_pt),
            mm(self.config.page_height_pt),
            "Layer 1",
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.pages += 1;
        self.cursor = self.config.margin_pt;
    }

    /// Move the cursor down without drawing. Never breaks a page by itself.
    fn skip(&mut self, pt: f32) {
        self.cursor += pt;
    }

    fn paragraph(&mut self, text: &str, size: f32, weight: Weight, color: (f32, f32, f32)) {
        let line_height = size * LINE_SPACING;
        self.set_color(color);
        for line in wrap(text, size, weight, self.config.content_width()) {
            if self.remaining() < line_height && !self.at_top() {
                self.new_page();
                self.set_color(color);
            }
            let baseline = self.config.page_height_pt - (self.cursor + size);
            self.draw_line(&line, size, weight, self.config.margin_pt, baseline);
            self.cursor += line_height;
        }
        self.set_color(BLACK);
    }

    /// Draw one line as alternating text/pictographic runs.
    fn draw_line(&self, line: &str, size: f32, weight: Weight, x0: f32, baseline: f32) {
        let mut x = x0;
        for run in runs(&clusters(line)) {
            let font = match (run.class, weight) {
                (GlyphClass::Pictographic, _) => &self.fonts.symbol,
                (GlyphClass::Text, Weight::Bold) => &self.fonts.bold,
                (GlyphClass::Text, Weight::Regular) => &self.fonts.regular,
            };
            self.layer
                .use_text(run.text.as_str(), size, mm(x), mm(baseline), font);
            x += text_width(&run.text, size, weight);
        }
    }

    fn image(&mut self, img: &DynamicImage) {
        let (w_px, h_px) = img.dimensions();
        let native_w = w_px as f32 * PT_PER_PX;
        let native_h = h_px as f32 * PT_PER_PX;
        let scale = 1f32
            .min(self.config.content_width() / native_w)
            .min(self.config.content_height() / native_h);
        let (w, h) = (native_w * scale, native_h * scale);

        if h > self.remaining() && !self.at_top() {
            self.new_page();
        }

        let bottom = self.config.page_height_pt - (self.cursor + h);
        Image::from_dynamic_image(img).add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(mm(self.config.margin_pt)),
                translate_y: Some(mm(bottom)),
                scale_x: Some(scale),
                scale_y: Some(scale),
                dpi: Some(IMAGE_DPI),
                ..Default::default()
            },
        );
        debug!("Placed image {}x{} pt on page {}", w, h, self.pages);
        self.cursor += h + IMAGE_SPACING;
    }

    /// Footer lines stacked upwards from half the bottom margin.
    fn footer(&mut self, text: &str) {
        let line_height = FOOTER_SIZE * LINE_SPACING;
        let lines = wrap(text, FOOTER_SIZE, Weight::Regular, self.config.content_width());
        self.set_color(GREY);
        let mut baseline = self.config.margin_pt * 0.5 + line_height * (lines.len() as f32 - 1.0);
        for line in &lines {
            self.draw_line(line, FOOTER_SIZE, Weight::Regular, self.config.margin_pt, baseline);
            baseline -= line_height;
        }
        self.set_color(BLACK);
    }

    fn set_color(&self, (r, g, b): (f32, f32, f32)) {
        self.layer.set_fill_color(Color::Rgb(Rgb::new(r, g, b, None)));
    }

    fn finish(self) -> Result<Vec<u8>, RenderError> {
        let mut buf = BufWriter::new(Vec::new());
        self.doc
            .save(&mut buf)
            .map_err(|e| RenderError::Pdf(format!("PDF save error: {e}")))?;
        buf.into_inner()
            .map_err(|e| RenderError::Pdf(format!("PDF buffer error: {e}")))
    }
}
