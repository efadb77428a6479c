//! Filename derivation: document title → safe `.pdf` file name.
//!
//! Rules, applied in order:
//! 1. Strip characters illegal on common filesystems (`< > : " / \ | ? *`)
//!    and control characters other than whitespace
//! 2. Collapse runs of whitespace to a single space and trim
//! 3. Truncate to [`MAX_STEM_CHARS`] characters (never splitting a char)
//! 4. Fall back to [`DEFAULT_STEM`] when nothing is left
//! 5. Append `.pdf` unless the name already ends with it (any case)

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest stem kept, in characters.
pub const MAX_STEM_CHARS: usize = 100;
/// Stem used when the title sanitises to nothing.
pub const DEFAULT_STEM: &str = "document";
pub const EXTENSION: &str = ".pdf";

static RE_ILLEGAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x08\x0B\x0C\x0E-\x1F\x7F]"#).unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Derive the output filename for a document titled `title`.
pub fn derive_filename(title: &str) -> String {
    let stripped = RE_ILLEGAL.replace_all(title, "");
    let collapsed = RE_WHITESPACE.replace_all(&stripped, " ");
    let trimmed = collapsed.trim();

    let mut stem: String = trimmed.chars().take(MAX_STEM_CHARS).collect();
    // Truncation may leave a trailing space or dot, which Windows rejects.
    let clean_len = stem.trim_end_matches(&[' ', '.'][..]).len();
    stem.truncate(clean_len);

    if stem.is_empty() {
        stem = DEFAULT_STEM.to_string();
    }

    if has_extension(&stem) {
        stem
    } else {
        format!("{stem}{EXTENSION}")
    }
}

fn has_extension(name: &str) -> bool {
    name.len() > EXTENSION.len()
        && name
            .get(name.len() - EXTENSION.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(EXTENSION))
}
