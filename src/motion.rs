//! Motion parameters and complexity tier classification.
//!
//! The tier is derived from the motion type at intake and drives the citation
//! failure tolerance and premium model routing. An intake event may pin the
//! tier explicitly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Complexity tier of a motion. A is the simplest, C the most complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
}

/// Procedural motions that rarely turn on contested authority.
const TIER_A_KEYWORDS: &[&str] = &[
    "extension",
    "continuance",
    "pro hac vice",
    "substitution",
    "stipulat",
    "withdraw as counsel",
    "leave to file",
];

/// Dispositive and high-stakes motions.
const TIER_C_KEYWORDS: &[&str] = &[
    "summary judgment",
    "summary adjudication",
    "msj",
    "msa",
    "preliminary injunction",
    "anti-slapp",
    "class certification",
];

/// Motion types that require a separate statement of undisputed facts.
const SEPARATE_STATEMENT_KEYWORDS: &[&str] = &[
    "summary judgment",
    "summary adjudication",
    "msj",
    "msa",
];

impl Tier {
    /// Classify a free-form motion type. Unknown types default to tier B.
    pub fn classify(motion_type: &str) -> Self {
        let lowered = motion_type.to_lowercase();
        if contains_any(&lowered, TIER_C_KEYWORDS) {
            Tier::C
        } else if contains_any(&lowered, TIER_A_KEYWORDS) {
            Tier::A
        } else {
            Tier::B
        }
    }

    /// Maximum tolerated citation failure rate. Halting requires a rate
    /// strictly greater than this value.
    pub fn citation_tolerance(&self) -> f64 {
        match self {
            Tier::A => 0.20,
            Tier::B => 0.15,
            Tier::C => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "C" => Ok(Tier::C),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| {
        if needle.len() <= 3 {
            // Short abbreviations must match a whole word ("msa" inside "mass" must not count).
            haystack
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| word == *needle)
        } else {
            haystack.contains(needle)
        }
    })
}

/// A source document supplied with the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Extracted text, when the intake pipeline already has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Intake event received when an order is paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub order_id: String,
    pub motion_type: String,
    pub jurisdiction: String,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    /// Explicit tier override. Classified from `motion_type` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Immutable motion parameters carried by a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionParams {
    pub motion_type: String,
    pub jurisdiction: String,
    pub tier: Tier,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl MotionParams {
    pub fn from_intake(event: &IntakeEvent) -> Self {
        Self {
            motion_type: event.motion_type.clone(),
            jurisdiction: event.jurisdiction.clone(),
            tier: event
                .tier
                .unwrap_or_else(|| Tier::classify(&event.motion_type)),
            documents: event.documents.clone(),
            instructions: event.instructions.clone(),
        }
    }

    /// Whether the motion type requires a separate statement (Phase IX.1).
    pub fn requires_separate_statement(&self) -> bool {
        contains_any(&self.motion_type.to_lowercase(), SEPARATE_STATEMENT_KEYWORDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_procedural_motions_as_tier_a() {
        assert_eq!(Tier::classify("Motion for Extension of Time"), Tier::A);
        assert_eq!(Tier::classify("Application for Pro Hac Vice Admission"), Tier::A);
        assert_eq!(Tier::classify("Stipulation to Continue Trial"), Tier::A);
    }

    #[test]
    fn classify_dispositive_motions_as_tier_c() {
        assert_eq!(Tier::classify("Motion for Summary Judgment"), Tier::C);
        assert_eq!(Tier::classify("MSJ"), Tier::C);
        assert_eq!(Tier::classify("Special Motion to Strike (Anti-SLAPP)"), Tier::C);
        assert_eq!(Tier::classify("Motion for Preliminary Injunction"), Tier::C);
    }

    #[test]
    fn classify_defaults_to_tier_b() {
        assert_eq!(Tier::classify("Motion to Compel Discovery"), Tier::B);
        assert_eq!(Tier::classify("Demurrer"), Tier::B);
        assert_eq!(Tier::classify(""), Tier::B);
    }

    #[test]
    fn abbreviations_match_whole_words_only() {
        assert_eq!(Tier::classify("Motion re mass tort coordination"), Tier::B);
        assert_eq!(Tier::classify("MSA re second cause of action"), Tier::C);
    }

    #[test]
    fn tolerance_tightens_with_complexity() {
        assert!(Tier::A.citation_tolerance() > Tier::B.citation_tolerance());
        assert!(Tier::B.citation_tolerance() > Tier::C.citation_tolerance());
        assert_eq!(Tier::C.citation_tolerance(), 0.10);
    }

    #[test]
    fn intake_override_wins_over_classification() {
        let event = IntakeEvent {
            order_id: "ord-1".into(),
            motion_type: "Motion for Extension of Time".into(),
            jurisdiction: "CA".into(),
            documents: vec![],
            tier: Some(Tier::C),
            instructions: None,
        };
        assert_eq!(MotionParams::from_intake(&event).tier, Tier::C);
    }

    #[test]
    fn separate_statement_only_for_msj_and_msa() {
        let mut params = MotionParams {
            motion_type: "Motion for Summary Judgment".into(),
            jurisdiction: "CA".into(),
            tier: Tier::C,
            documents: vec![],
            instructions: None,
        };
        assert!(params.requires_separate_statement());
        params.motion_type = "Motion for Preliminary Injunction".into();
        assert!(!params.requires_separate_statement());
    }

    #[test]
    fn tier_parse_roundtrip() {
        assert_eq!("b".parse::<Tier>().unwrap(), Tier::B);
        assert!("D".parse::<Tier>().is_err());
    }
}
