//! Per-document stages: rendering and uploading.
//!
//! Each submodule implements one concern so it can be tested on its own and
//! swapped behind the [`render::DocumentRenderer`] and
//! [`upload::UploadSink`] traits.
//!
//! ## Data Flow
//!
//! ```text
//! CapturedDocument ──▶ images ──▶ render ──────────▶ upload
//!                      (fetch,    (glyphs, metrics,   (multipart,
//!                       decode)    layout, filename)   retry)
//! ```
//!
//! 1. [`images`]: resolve image locators to bytes and normalise them
//! 2. [`glyphs`]: split text into clusters and pictographic/text runs
//! 3. [`metrics`]: advance widths used for character-level wrapping
//! 4. [`filename`]: title → safe `.pdf` file name
//! 5. [`render`]: paginate into a PDF; CPU work in `spawn_blocking`
//! 6. [`upload`]: send the PDF with bounded exponential retries

pub mod filename;
pub mod glyphs;
pub mod images;
pub mod metrics;
pub mod render;
pub mod upload;
