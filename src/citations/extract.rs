//! Deterministic citation extraction over normalized text.
//!
//! Recognizes full case citations against a closed list of reporters, short
//! forms (`123 F.3d at 460`), `Id.`, `Ibid.`, `supra` references and
//! statutory citations. Dependent forms are linked to the full citation they
//! refer to.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::normalize::normalize;

/// Reporter abbreviations in normalized form.
pub const REPORTERS: &[&str] = &[
    "U.S.",
    "S. Ct.",
    "L. Ed.",
    "L. Ed. 2d",
    "F.",
    "F.2d",
    "F.3d",
    "F.4th",
    "F. Supp.",
    "F. Supp. 2d",
    "F. Supp. 3d",
    "F. App'x",
    "B.R.",
    "Cal.",
    "Cal. 2d",
    "Cal. 3d",
    "Cal. 4th",
    "Cal. 5th",
    "Cal. App.",
    "Cal. App. 2d",
    "Cal. App. 3d",
    "Cal. App. 4th",
    "Cal. App. 5th",
    "Cal. Rptr.",
    "Cal. Rptr. 2d",
    "Cal. Rptr. 3d",
    "P.",
    "P.2d",
    "P.3d",
    "A.",
    "A.2d",
    "A.3d",
    "N.E.",
    "N.E.2d",
    "N.E.3d",
    "N.W.",
    "N.W.2d",
    "S.E.",
    "S.E.2d",
    "S.W.",
    "S.W.2d",
    "S.W.3d",
    "So.",
    "So. 2d",
    "So. 3d",
    "N.Y.",
    "N.Y.2d",
    "N.Y.3d",
    "A.D.2d",
    "A.D.3d",
    "N.Y.S.2d",
    "N.Y.S.3d",
    "Ill. 2d",
    "Wis. 2d",
];

static REPORTER_ALTERNATION: LazyLock<String> = LazyLock::new(|| {
    let mut reporters: Vec<&str> = REPORTERS.to_vec();
    // Longest first so "F. Supp. 2d" wins over "F.".
    reporters.sort_by_key(|r| std::cmp::Reverse(r.len()));
    reporters
        .iter()
        .map(|r| regex::escape(r))
        .collect::<Vec<_>>()
        .join("|")
});

static FULL_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<volume>\d{{1,4}}) (?P<reporter>{}) (?P<page>\d{{1,6}})\b(?:, (?P<pin>\d+(?:-\d+)?))?(?: \((?P<court>[^()]*?) ?(?P<year>(?:1[6-9]|20)\d{{2}})\))?",
        *REPORTER_ALTERNATION
    ))
    .expect("valid regex")
});

static SHORT_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<volume>\d{{1,4}}) (?P<reporter>{}) at (?P<pin>\d+(?:-\d+)?)",
        *REPORTER_ALTERNATION
    ))
    .expect("valid regex")
});

static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[Ii]d\.(?:,? at (?P<pin>\d+(?:-\d+)?))?").expect("valid regex"));

static IBID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[Ii]bid\.?").expect("valid regex"));

static SUPRA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<name>[A-Z][A-Za-z'\-]+), supra(?:,? at (?P<pin>\d+(?:-\d+)?))?")
        .expect("valid regex")
});

const SECTION: &str = r"(?P<section>\d[0-9A-Za-z]*(?:[.\-]\d[0-9A-Za-z]*)*(?:\([0-9A-Za-z]{1,4}\))*)";

static STATUTES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"\b(?P<title>\d{{1,3}}) (?P<code>U\.S\.C\.(?:A\.)?) (?:§+ )?{SECTION}"),
        format!(r"\b(?P<title>\d{{1,3}}) (?P<code>C\.F\.R\.) (?:§+ )?{SECTION}"),
        format!(r"\b(?P<code>(?:Cal\. )?(?:[A-Z][a-z]*\. ){{1,4}}Code) §+ {SECTION}"),
        format!(r"\b(?P<code>Code(?: [A-Z][a-z]*\.){{1,3}}) §+ {SECTION}"),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

/// Words that introduce a citation and are never part of a party name.
const SIGNALS: &[&str] = &[
    "See", "see", "Cf.", "cf.", "also", "But", "but", "Accord", "accord", "E.g.,", "e.g.,",
    "Compare", "compare", "with", "and", "Contra", "contra", "generally",
];

/// Lowercase words allowed inside a party name.
const CONNECTORS: &[&str] = &["of", "the", "for", "de", "ex", "rel.", "&", "in", "re"];

/// Abbreviations that end with a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Inc.", "Co.", "Corp.", "Ltd.", "L.L.C.", "LLC.", "Bros.", "Ass'n.", "Dep't.", "U.S.", "St.",
    "Mfg.", "Ins.", "Nat'l.", "Int'l.", "Cal.", "Cty.", "Cnty.", "Dist.", "Sch.", "Univ.", "Bd.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CitationKind {
    FullCase,
    ShortCase,
    Id,
    Ibid,
    Supra,
    Statute,
}

impl CitationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullCase => "FULL_CASE",
            Self::ShortCase => "SHORT_CASE",
            Self::Id => "ID",
            Self::Ibid => "IBID",
            Self::Supra => "SUPRA",
            Self::Statute => "STATUTE",
        }
    }

    /// Forms that refer back to an earlier citation.
    pub fn is_dependent(&self) -> bool {
        matches!(self, Self::ShortCase | Self::Id | Self::Ibid | Self::Supra)
    }
}

impl fmt::Display for CitationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL_CASE" => Ok(Self::FullCase),
            "SHORT_CASE" => Ok(Self::ShortCase),
            "ID" => Ok(Self::Id),
            "IBID" => Ok(Self::Ibid),
            "SUPRA" => Ok(Self::Supra),
            "STATUTE" => Ok(Self::Statute),
            _ => Err(format!("Invalid citation kind: {}", s)),
        }
    }
}

/// One citation found in a document.
///
/// For statutes, `volume` holds the title (when present), `reporter` the code
/// and `page` the section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCitation {
    pub index: usize,
    pub raw: String,
    pub kind: CitationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plaintiff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defendant: Option<String>,
    /// Byte range in the normalized text.
    pub span: (usize, usize),
    /// Index of the full citation this one refers back to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antecedent: Option<usize>,
}

impl ExtractedCitation {
    fn bare(kind: CitationKind, raw: &str, span: (usize, usize)) -> Self {
        Self {
            index: 0,
            raw: raw.to_string(),
            kind,
            volume: None,
            reporter: None,
            page: None,
            pinpoint: None,
            year: None,
            court: None,
            plaintiff: None,
            defendant: None,
            span,
            antecedent: None,
        }
    }

    pub fn case_name(&self) -> Option<String> {
        match (&self.plaintiff, &self.defendant) {
            (Some(p), Some(d)) => Some(format!("{} v. {}", p, d)),
            _ => None,
        }
    }

    /// Canonical `volume reporter page` key used for authority lookups.
    pub fn lookup_key(&self) -> Option<String> {
        if self.kind != CitationKind::FullCase {
            return None;
        }
        Some(format!(
            "{} {} {}",
            self.volume?,
            self.reporter.as_deref()?,
            self.page.as_deref()?
        ))
    }
}

/// Normalize `text` and extract every citation in order of appearance.
pub fn extract_citations(text: &str) -> Vec<ExtractedCitation> {
    extract_normalized(&normalize(text))
}

/// Extract citations from text that is already normalized.
pub fn extract_normalized(text: &str) -> Vec<ExtractedCitation> {
    let mut candidates: Vec<ExtractedCitation> = Vec::new();

    for caps in FULL_CASE.captures_iter(text) {
        candidates.push(full_case(&caps));
    }
    for caps in SHORT_CASE.captures_iter(text) {
        let mut c = from_match(CitationKind::ShortCase, &caps);
        c.volume = caps.name("volume").and_then(|m| m.as_str().parse().ok());
        c.reporter = caps.name("reporter").map(|m| m.as_str().to_string());
        c.pinpoint = caps.name("pin").map(|m| m.as_str().to_string());
        candidates.push(c);
    }
    for caps in ID.captures_iter(text) {
        let mut c = from_match(CitationKind::Id, &caps);
        c.pinpoint = caps.name("pin").map(|m| m.as_str().to_string());
        candidates.push(c);
    }
    for caps in IBID.captures_iter(text) {
        candidates.push(from_match(CitationKind::Ibid, &caps));
    }
    for caps in SUPRA.captures_iter(text) {
        let mut c = from_match(CitationKind::Supra, &caps);
        c.plaintiff = caps.name("name").map(|m| m.as_str().to_string());
        c.pinpoint = caps.name("pin").map(|m| m.as_str().to_string());
        candidates.push(c);
    }
    for pattern in STATUTES.iter() {
        for caps in pattern.captures_iter(text) {
            let mut c = from_match(CitationKind::Statute, &caps);
            c.volume = caps.name("title").and_then(|m| m.as_str().parse().ok());
            c.reporter = caps.name("code").map(|m| m.as_str().to_string());
            c.page = caps.name("section").map(|m| m.as_str().to_string());
            candidates.push(c);
        }
    }

    // Earliest first; on equal starts the longer match wins.
    candidates.sort_by(|a, b| a.span.0.cmp(&b.span.0).then(b.span.1.cmp(&a.span.1)));
    let mut citations: Vec<ExtractedCitation> = Vec::new();
    for candidate in candidates {
        if citations.last().is_some_and(|prev| candidate.span.0 < prev.span.1) {
            continue;
        }
        citations.push(candidate);
    }

    for i in 0..citations.len() {
        citations[i].index = i;
        if citations[i].kind == CitationKind::FullCase {
            let window_start = if i == 0 { 0 } else { citations[i - 1].span.1 };
            let prefix = &text[window_start..citations[i].span.0];
            if let Some((plaintiff, defendant)) = party_names(prefix) {
                citations[i].plaintiff = Some(plaintiff);
                citations[i].defendant = Some(defendant);
            }
        }
    }

    resolve_antecedents(&mut citations);
    citations
}

fn from_match(kind: CitationKind, caps: &Captures) -> ExtractedCitation {
    let whole = caps.get(0).map(|m| (m.as_str(), m.start(), m.end()));
    let (raw, start, end) = whole.unwrap_or(("", 0, 0));
    ExtractedCitation::bare(kind, raw, (start, end))
}

fn full_case(caps: &Captures) -> ExtractedCitation {
    let mut c = from_match(CitationKind::FullCase, caps);
    c.volume = caps.name("volume").and_then(|m| m.as_str().parse().ok());
    c.reporter = caps.name("reporter").map(|m| m.as_str().to_string());
    c.page = caps.name("page").map(|m| m.as_str().to_string());
    c.pinpoint = caps.name("pin").map(|m| m.as_str().to_string());
    c.year = caps.name("year").and_then(|m| m.as_str().parse().ok());
    c.court = caps
        .name("court")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());
    c
}

/// Recover `(plaintiff, defendant)` from the text immediately preceding a
/// full citation, e.g. `See Smith v. Jones, ` yields `("Smith", "Jones")`.
fn party_names(prefix: &str) -> Option<(String, String)> {
    let trimmed = prefix.trim_end().strip_suffix(',')?;
    let v_pos = trimmed.rfind(" v. ")?;
    let defendant = trimmed[v_pos + 4..].trim();
    if defendant.is_empty()
        || defendant.len() > 120
        || defendant.contains([';', '(', ')'])
    {
        return None;
    }

    let mut words: Vec<&str> = Vec::new();
    for token in trimmed[..v_pos].split_whitespace().rev() {
        let bare = token.trim_start_matches(['(', '"', '\'']);
        if SIGNALS.contains(&bare) || words.len() >= 8 {
            break;
        }
        if CONNECTORS.contains(&bare) {
            words.push(bare);
            continue;
        }
        let ends_sentence = (bare.ends_with('.') && !ABBREVIATIONS.contains(&bare) && bare.len() > 3)
            || bare.ends_with([';', ':', ')']);
        if ends_sentence {
            break;
        }
        if bare.chars().next().is_some_and(|c| c.is_uppercase()) {
            words.push(bare);
        } else {
            break;
        }
    }
    while words.last().is_some_and(|w| CONNECTORS.contains(w)) {
        words.pop();
    }
    if words.is_empty() {
        return None;
    }
    words.reverse();
    Some((words.join(" "), defendant.to_string()))
}

fn resolve_antecedents(citations: &mut [ExtractedCitation]) {
    for i in 0..citations.len() {
        let antecedent = match citations[i].kind {
            CitationKind::FullCase | CitationKind::Statute => None,
            CitationKind::ShortCase => (0..i).rev().find(|&j| {
                citations[j].kind == CitationKind::FullCase
                    && citations[j].volume == citations[i].volume
                    && citations[j].reporter == citations[i].reporter
            }),
            CitationKind::Id | CitationKind::Ibid => i.checked_sub(1).and_then(|j| match citations[j].kind {
                CitationKind::FullCase | CitationKind::Statute => Some(j),
                _ => citations[j].antecedent,
            }),
            CitationKind::Supra => {
                let name = citations[i].plaintiff.clone().unwrap_or_default().to_lowercase();
                (0..i).rev().find(|&j| {
                    citations[j].kind == CitationKind::FullCase
                        && [&citations[j].plaintiff, &citations[j].defendant]
                            .iter()
                            .filter_map(|p| p.as_deref())
                            .any(|party| {
                                party
                                    .to_lowercase()
                                    .split(|c: char| !c.is_alphanumeric() && c != '\'')
                                    .any(|word| word == name)
                            })
                })
            }
        };
        citations[i].antecedent = antecedent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_full_case_with_all_fields() {
        let text = "See Smith v. Jones, 123 F.3d 456, 460-61 (9th Cir. 1999).";
        let cites = extract_citations(text);
        assert_eq!(cites.len(), 1);
        let c = &cites[0];
        assert_eq!(c.kind, CitationKind::FullCase);
        assert_eq!(c.volume, Some(123));
        assert_eq!(c.reporter.as_deref(), Some("F.3d"));
        assert_eq!(c.page.as_deref(), Some("456"));
        assert_eq!(c.pinpoint.as_deref(), Some("460-61"));
        assert_eq!(c.court.as_deref(), Some("9th Cir."));
        assert_eq!(c.year, Some(1999));
        assert_eq!(c.plaintiff.as_deref(), Some("Smith"));
        assert_eq!(c.defendant.as_deref(), Some("Jones"));
        assert_eq!(c.case_name().as_deref(), Some("Smith v. Jones"));
        assert_eq!(c.lookup_key().as_deref(), Some("123 F.3d 456"));
        assert_eq!(c.raw, "123 F.3d 456, 460-61 (9th Cir. 1999)");
    }

    #[test]
    fn prefers_longest_reporter() {
        let cites = extract_citations("Doe v. Acme Corp., 55 F. Supp. 2d 1020 (N.D. Cal. 1999)");
        assert_eq!(cites[0].reporter.as_deref(), Some("F. Supp. 2d"));
        assert_eq!(cites[0].plaintiff.as_deref(), Some("Doe"));
        assert_eq!(cites[0].defendant.as_deref(), Some("Acme Corp."));
        assert_eq!(cites[0].court.as_deref(), Some("N.D. Cal."));
    }

    #[test]
    fn multi_word_party_names_stop_at_signal() {
        let cites = extract_citations(
            "But see People ex rel. Lockyer v. Shamrock Foods Co., 24 Cal. 4th 415 (2000).",
        );
        assert_eq!(cites[0].plaintiff.as_deref(), Some("People ex rel. Lockyer"));
        assert_eq!(cites[0].defendant.as_deref(), Some("Shamrock Foods Co."));
        assert_eq!(cites[0].court, None);
        assert_eq!(cites[0].year, Some(2000));
    }

    #[test]
    fn resolves_short_forms_id_and_supra() {
        let text = "Smith v. Jones, 123 F.3d 456 (9th Cir. 1999). Roe v. Wade, 410 U.S. 113 (1973). \
                    123 F.3d at 460. Id. at 461. Smith, supra, at 458. Ibid.";
        let cites = extract_citations(text);
        let kinds: Vec<CitationKind> = cites.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CitationKind::FullCase,
                CitationKind::FullCase,
                CitationKind::ShortCase,
                CitationKind::Id,
                CitationKind::Supra,
                CitationKind::Ibid,
            ]
        );
        assert_eq!(cites[2].antecedent, Some(0));
        assert_eq!(cites[3].antecedent, Some(0));
        assert_eq!(cites[3].pinpoint.as_deref(), Some("461"));
        assert_eq!(cites[4].antecedent, Some(0));
        assert_eq!(cites[5].antecedent, Some(0));
        assert_eq!(cites[1].plaintiff.as_deref(), Some("Roe"));
    }

    #[test]
    fn id_without_antecedent_is_unresolved() {
        let cites = extract_citations("Id. at 5.");
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].kind, CitationKind::Id);
        assert_eq!(cites[0].antecedent, None);
    }

    #[test]
    fn extracts_statutes() {
        let text = "Under 42 U.S.C. § 1983 and Cal. Civ. Proc. Code § 425.16, and Code Civ. Proc. § 437c.";
        let cites = extract_citations(text);
        assert_eq!(cites.len(), 3);
        assert!(cites.iter().all(|c| c.kind == CitationKind::Statute));
        assert_eq!(cites[0].volume, Some(42));
        assert_eq!(cites[0].page.as_deref(), Some("1983"));
        assert_eq!(cites[1].reporter.as_deref(), Some("Cal. Civ. Proc. Code"));
        assert_eq!(cites[1].page.as_deref(), Some("425.16"));
        assert_eq!(cites[2].page.as_deref(), Some("437c"));
        assert!(cites[0].lookup_key().is_none());
    }

    #[test]
    fn spans_index_normalized_text() {
        let text = "Smith v. Jones, 123 F. 3d 456 (1999)";
        let normalized = normalize(text);
        let cites = extract_normalized(&normalized);
        let (start, end) = cites[0].span;
        assert_eq!(&normalized[start..end], cites[0].raw);
    }

    #[test]
    fn mixed_unicode_extracts_same_canonical_form() {
        let canonical = "Smith v. Jones, 123 F.3d 456, 460-61 (9th Cir. 1999)";
        let mixed = "Smith v.\u{00A0}Jones, 123\u{00A0}F. 3d 456, 460\u{2013}61 (9th Cir. I999)";
        let a = extract_citations(canonical);
        let b = extract_citations(mixed);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].raw, b[0].raw);
        assert_eq!(a[0].lookup_key(), b[0].lookup_key());
        assert_eq!(normalize(&b[0].raw), b[0].raw);
    }

    #[test]
    fn lowercase_sentence_text_is_not_a_party() {
        let cites = extract_citations("as the court held in Smith v. Jones, 1 U.S. 1 (1801)");
        assert_eq!(cites[0].plaintiff.as_deref(), Some("Smith"));
        let cites = extract_citations("The rule is settled. 1 U.S. 1 (1801)");
        assert_eq!(cites[0].plaintiff, None);
    }

    #[test]
    fn kind_roundtrip() {
        for kind in [
            CitationKind::FullCase,
            CitationKind::ShortCase,
            CitationKind::Id,
            CitationKind::Ibid,
            CitationKind::Supra,
            CitationKind::Statute,
        ] {
            assert_eq!(kind.as_str().parse::<CitationKind>().unwrap(), kind);
        }
        assert!(CitationKind::Supra.is_dependent());
        assert!(!CitationKind::Statute.is_dependent());
    }
}
