//! Image acquisition: locator → raw bytes → normalised RGB image.
//!
//! Locators come from the capture and may be:
//!
//! * `http://` / `https://` — fetched with the renderer's shared client and a
//!   per-image timeout
//! * `data:<mime>;base64,<payload>` — decoded in place
//! * `file://<path>` or a plain path — read from disk
//!
//! Fetching is async; decoding and resizing are CPU-bound and are done by
//! [`normalise`] inside the renderer's blocking task. Every failure here is
//! an [`ImageError`]: the renderer logs it, counts it and moves on.

use crate::error::ImageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, RgbImage};
use std::time::Duration;
use tracing::debug;

/// Check if the locator looks like a remote URL.
pub fn is_url(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Fetch the raw bytes behind `locator`.
pub async fn fetch_bytes(
    client: &reqwest::Client,
    locator: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, ImageError> {
    if is_url(locator) {
        fetch_remote(client, locator, timeout_secs).await
    } else if let Some(rest) = locator.strip_prefix("data:") {
        decode_data_uri(locator, rest)
    } else {
        let path = locator.strip_prefix("file://").unwrap_or(locator);
        tokio::fs::read(path).await.map_err(|e| ImageError::Fetch {
            locator: locator.to_string(),
            reason: e.to_string(),
        })
    }
}

async fn fetch_remote(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, ImageError> {
    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ImageError::Timeout {
                locator: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ImageError::Fetch {
                locator: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client
        .get(url)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(map_err)?;

    if !response.status().is_success() {
        return Err(ImageError::Fetch {
            locator: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    debug!("Fetched image {} ({} bytes)", url, bytes.len());
    Ok(bytes.to_vec())
}

fn decode_data_uri(locator: &str, rest: &str) -> Result<Vec<u8>, ImageError> {
    let (header, payload) = rest.split_once(',').ok_or_else(|| ImageError::Decode {
        locator: short(locator),
        detail: "data URI has no ',' separator".into(),
    })?;
    if !header.ends_with(";base64") {
        return Err(ImageError::Unsupported {
            locator: short(locator),
            format: format!("non-base64 data URI ({header})"),
        });
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageError::Decode {
            locator: short(locator),
            detail: e.to_string(),
        })
}

/// Decode `bytes`, flatten transparency onto white, and downscale so the
/// longest edge is at most `max_edge`. Never upscales.
pub fn normalise(locator: &str, bytes: &[u8], max_edge: u32) -> Result<DynamicImage, ImageError> {
    let format = image::guess_format(bytes).map_err(|_| ImageError::Unsupported {
        locator: short(locator),
        format: "unrecognised".into(),
    })?;
    if !is_supported(format) {
        return Err(ImageError::Unsupported {
            locator: short(locator),
            format: format!("{format:?}"),
        });
    }

    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        ImageError::Decode {
            locator: short(locator),
            detail: e.to_string(),
        }
    })?;

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(ImageError::Decode {
            locator: short(locator),
            detail: "image has no pixels".into(),
        });
    }
    let img = if w.max(h) > max_edge {
        img.resize(max_edge, max_edge, FilterType::Triangle)
    } else {
        img
    };

    debug!(
        "Normalised {:?} image {}x{} → {}x{}",
        format,
        w,
        h,
        img.width(),
        img.height()
    );
    Ok(DynamicImage::ImageRgb8(flatten(&img)))
}

fn is_supported(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp
    )
}

/// RGB8 with alpha composited over white.
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u16;
        let over = |c: u8| ((c as u16 * a + 255 * (255 - a)) / 255) as u8;
        image::Rgb([over(r), over(g), over(b)])
    })
}

/// Data URIs can be megabytes long; keep log lines readable.
fn short(locator: &str) -> String {
    const MAX: usize = 64;
    if locator.len() <= MAX {
        return locator.to_string();
    }
    let cut = (0..=MAX).rev().find(|&i| locator.is_char_boundary(i)).unwrap_or(0);
    format!("{}…", &locator[..cut])
}
