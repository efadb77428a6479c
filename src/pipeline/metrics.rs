//! Advance widths used for line wrapping.
//!
//! Widths are in thousandths of the font size (PDF glyph-space units). ASCII
//! uses the Helvetica AFM table, which is what the builtin faces draw with.
//! Outside ASCII there is no embedded metrics source, so widths are
//! estimated per class: East Asian wide characters and pictographs are one
//! em, everything else an average Latin glyph. The estimate errs wide, so a
//! line may wrap a little early but does not run into the margin.

use super::glyphs::{is_modifier, Cluster, GlyphClass};

/// Helvetica widths for U+0020..=U+007E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

const WIDE: u16 = 1000;
const FALLBACK: u16 = 556;
/// Helvetica-Bold is about 6% wider on average.
const BOLD_FACTOR: f32 = 1.06;

/// Text weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    Regular,
    Bold,
}

/// Width of a single base character in glyph-space units.
pub fn char_units(c: char) -> u16 {
    let cp = c as u32;
    if is_modifier(c) {
        return 0;
    }
    if (0x20..=0x7E).contains(&cp) {
        return HELVETICA_ASCII[(cp - 0x20) as usize];
    }
    if is_wide(cp) {
        return WIDE;
    }
    FALLBACK
}

fn is_wide(cp: u32) -> bool {
    matches!(cp,
        0x1100..=0x115F      // Hangul Jamo
        | 0x2E80..=0x303E    // CJK radicals, punctuation
        | 0x3041..=0x33FF    // kana, CJK compatibility
        | 0x3400..=0x4DBF    // CJK ext A
        | 0x4E00..=0x9FFF    // CJK unified
        | 0xA000..=0xA4CF    // Yi
        | 0xAC00..=0xD7A3    // Hangul syllables
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
        | 0xFE30..=0xFE4F    // CJK compatibility forms
        | 0xFF00..=0xFF60    // fullwidth forms
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x3FFFD) // CJK ext B and beyond
}

/// Rendered width of a cluster in points. Modifiers add nothing; the
/// cluster is as wide as its base character.
pub fn cluster_width(cluster: &Cluster<'_>, size: f32, weight: Weight) -> f32 {
    let units = match cluster.class {
        GlyphClass::Pictographic => WIDE,
        GlyphClass::Text => char_units(cluster.base),
    };
    scale(units, size, weight)
}

/// Rendered width of plain text in points.
pub fn text_width(text: &str, size: f32, weight: Weight) -> f32 {
    super::glyphs::clusters(text)
        .iter()
        .map(|c| cluster_width(c, size, weight))
        .sum()
}

fn scale(units: u16, size: f32, weight: Weight) -> f32 {
    let w = units as f32 / 1000.0 * size;
    match weight {
        Weight::Regular => w,
        Weight::Bold => w * BOLD_FACTOR,
    }
}
