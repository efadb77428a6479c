//! Glyph classification: pictographic vs textual runs.
//!
//! Body text may mix scripts and emoji. Pictographic code points need a
//! different face from ordinary text, so each wrapped line is split into
//! runs of one class before drawing.
//!
//! Classification is by an enumerated table of Unicode ranges, not full
//! grapheme segmentation. To keep composed sequences (keycaps, ZWJ
//! families, flags with tags, skin tones, accented letters) in one piece,
//! modifier code points are glued onto the cluster before them:
//!
//! * variation selectors (U+FE00–FE0F, U+E0100–E01EF)
//! * zero width joiner (U+200D), together with the code point it joins
//! * emoji skin-tone modifiers (U+1F3FB–1F3FF)
//! * combining marks (U+0300–036F, U+20D0–20FF)
//! * tag characters (U+E0020–E007F)
//!
//! A modifier never starts a run and never carries width of its own.

/// Pictographic ranges, inclusive.
const PICTOGRAPHIC: &[(u32, u32)] = &[
    (0x00A9, 0x00A9),   // ©
    (0x00AE, 0x00AE),   // ®
    (0x203C, 0x203C),   // ‼
    (0x2049, 0x2049),   // ⁉
    (0x2122, 0x2122),   // ™
    (0x2139, 0x2139),   // ℹ
    (0x2194, 0x21AA),   // arrows
    (0x2300, 0x23FF),   // misc technical (⌚ ⏰ …)
    (0x2600, 0x26FF),   // misc symbols
    (0x2700, 0x27BF),   // dingbats
    (0x2B00, 0x2BFF),   // misc symbols and arrows
    (0x3030, 0x3030),   // 〰
    (0x303D, 0x303D),   // 〽
    (0x3297, 0x3297),   // ㊗
    (0x3299, 0x3299),   // ㊙
    (0x1F000, 0x1F02F), // mahjong
    (0x1F0A0, 0x1F0FF), // playing cards
    (0x1F1E6, 0x1F1FF), // regional indicators
    (0x1F300, 0x1F5FF), // misc symbols and pictographs
    (0x1F600, 0x1F64F), // emoticons
    (0x1F680, 0x1F6FF), // transport and map
    (0x1F780, 0x1F7FF), // geometric shapes extended
    (0x1F900, 0x1F9FF), // supplemental symbols and pictographs
    (0x1FA70, 0x1FAFF), // symbols and pictographs extended-A
];

const ZWJ: char = '\u{200D}';

/// Run class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphClass {
    Text,
    Pictographic,
}

pub fn is_pictographic(c: char) -> bool {
    let cp = c as u32;
    PICTOGRAPHIC
        .binary_search_by(|&(lo, hi)| {
            if hi < cp {
                std::cmp::Ordering::Less
            } else if lo > cp {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .is_ok()
}

/// Code points that attach to the previous cluster.
pub fn is_modifier(c: char) -> bool {
    matches!(c as u32,
        0xFE00..=0xFE0F
        | 0xE0100..=0xE01EF
        | 0x200D
        | 0x1F3FB..=0x1F3FF
        | 0x0300..=0x036F
        | 0x20D0..=0x20FF
        | 0xE0020..=0xE007F)
}

pub fn classify(c: char) -> GlyphClass {
    if is_pictographic(c) {
        GlyphClass::Pictographic
    } else {
        GlyphClass::Text
    }
}

/// A base character plus any modifiers glued to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster<'a> {
    pub text: &'a str,
    /// The base character; decides class and width.
    pub base: char,
    pub class: GlyphClass,
}

/// Split `text` into clusters.
///
/// A leading modifier with nothing to attach to becomes its own textual
/// cluster so no input is dropped.
pub fn clusters(text: &str) -> Vec<Cluster<'_>> {
    let mut out: Vec<Cluster<'_>> = Vec::new();
    let mut start = 0;
    let mut base = None;
    let mut join_next = false;

    for (idx, c) in text.char_indices() {
        let attaches = base.is_some() && (join_next || is_modifier(c));
        if attaches {
            join_next = c == ZWJ;
            continue;
        }
        if let Some(b) = base {
            out.push(Cluster {
                text: &text[start..idx],
                base: b,
                class: classify(b),
            });
        }
        start = idx;
        base = Some(c);
        join_next = false;
    }
    if let Some(b) = base {
        out.push(Cluster {
            text: &text[start..],
            base: b,
            class: classify(b),
        });
    }
    out
}

/// A maximal span of clusters sharing one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub class: GlyphClass,
    pub text: String,
}

/// Group consecutive clusters of the same class into runs.
pub fn runs(clusters: &[Cluster<'_>]) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for cl in clusters {
        match out.last_mut() {
            Some(run) if run.class == cl.class => run.text.push_str(cl.text),
            _ => out.push(Run {
                class: cl.class,
                text: cl.text.to_string(),
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_disjoint() {
        for pair in PICTOGRAPHIC.windows(2) {
            assert!(pair[0].1 < pair[1].0, "{:X?} overlaps {:X?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn classifies_common_emoji() {
        assert!(is_pictographic('😀'));
        assert!(is_pictographic('🚀'));
        assert!(is_pictographic('☀'));
        assert!(is_pictographic('©'));
        assert!(!is_pictographic('a'));
        assert!(!is_pictographic('字'));
        assert!(!is_pictographic('\u{FE0F}'));
    }

    #[test]
    fn variation_selector_attaches_to_previous() {
        let cs = clusters("☀\u{FE0F}x");
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].text, "☀\u{FE0F}");
        assert_eq!(cs[0].class, GlyphClass::Pictographic);
        assert_eq!(cs[1].text, "x");
    }

    #[test]
    fn zwj_sequence_is_one_cluster() {
        // man + ZWJ + woman + ZWJ + girl
        let family = "👨\u{200D}👩\u{200D}👧";
        let cs = clusters(family);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs[0].text, family);
    }

    #[test]
    fn skin_tone_and_combining_marks_attach() {
        let cs = clusters("👍\u{1F3FD}e\u{0301}");
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[1].text, "e\u{0301}");
        assert_eq!(cs[1].class, GlyphClass::Text);
    }

    #[test]
    fn leading_modifier_is_kept() {
        let cs = clusters("\u{FE0F}a");
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].text, "\u{FE0F}");
        assert_eq!(cs[0].class, GlyphClass::Text);
    }

    #[test]
    fn runs_group_by_class() {
        let cs = clusters("hi 😀😀 there ☀\u{FE0F}");
        let rs = runs(&cs);
        let shape: Vec<(GlyphClass, &str)> =
            rs.iter().map(|r| (r.class, r.text.as_str())).collect();
        assert_eq!(
            shape,
            vec![
                (GlyphClass::Text, "hi "),
                (GlyphClass::Pictographic, "😀😀"),
                (GlyphClass::Text, " there "),
                (GlyphClass::Pictographic, "☀\u{FE0F}"),
            ]
        );
    }

    #[test]
    fn empty_input() {
        assert!(clusters("").is_empty());
        assert!(runs(&[]).is_empty());
    }
}
