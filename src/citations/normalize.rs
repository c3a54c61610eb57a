//! Deterministic text normalization applied before citation extraction.
//!
//! Normalization is idempotent: `normalize(normalize(s)) == normalize(s)`.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static SECTION_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)&(?:sect|#167|#xa7);").expect("valid regex"));

static SLIP_OPINION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\(\s*slip\s+op(?:inion|\.)?[^)]*\)|,?\s*slip\s+op(?:inion|\.)?(?:\s+at\s+[0-9lIO]+)?")
        .expect("valid regex")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Numeric tokens where OCR confused digits with `l`, `I` or `O`.
static OCR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9lIO]*[0-9][0-9lIO]*\b").expect("valid regex"));

static REPORTER_SERIES_SPACING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(F|P|A|N\.E|N\.W|S\.E|S\.W)\.\s(2d|3d|4th)\b").expect("valid regex")
});

static SECTION_SPACING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(§+)\s*([0-9])").expect("valid regex"));

/// Normalize text for citation extraction.
///
/// Steps, in order: NFKC, typographic dashes and quotes to ASCII, slip-opinion
/// suffixes removed, section entities to `§`, whitespace collapsed,
/// OCR digit confusion repaired, reporter series spacing canonicalized
/// (`F. 3d` to `F.3d`), and one space after section marks.
pub fn normalize(text: &str) -> String {
    let mut current: String = text.nfkc().map(map_char).collect();
    // Removing one suffix can expose another.
    loop {
        let stripped = SLIP_OPINION.replace_all(&current, "");
        if stripped == current {
            break;
        }
        current = stripped.into_owned();
    }
    let entities = SECTION_ENTITY.replace_all(&current, "§");
    let collapsed = WHITESPACE.replace_all(&entities, " ");
    let digits = OCR_NUMBER.replace_all(&collapsed, |caps: &regex::Captures| {
        caps[0]
            .chars()
            .map(|c| match c {
                'l' | 'I' => '1',
                'O' => '0',
                other => other,
            })
            .collect::<String>()
    });
    let reporters = REPORTER_SERIES_SPACING.replace_all(&digits, "$1.$2");
    let sections = SECTION_SPACING.replace_all(&reporters, "$1 $2");
    sections.trim().to_string()
}

fn map_char(c: char) -> char {
    match c {
        '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => '-',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{00AB}' | '\u{00BB}' | '\u{2033}' => '"',
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
        '\u{00A0}' | '\u{2007}' | '\u{202F}' => ' ',
        other => other,
    }
}
