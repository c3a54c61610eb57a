//! Verification statuses and the hard-stop rule.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::authority::{AuthorityRecord, LookupStatus};
use super::extract::{CitationKind, ExtractedCitation};
use crate::motion::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    Flagged,
    Rejected,
    Blocked,
    Pending,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "VERIFIED",
            Self::Flagged => "FLAGGED",
            Self::Rejected => "REJECTED",
            Self::Blocked => "BLOCKED",
            Self::Pending => "PENDING",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::Blocked)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VERIFIED" => Ok(Self::Verified),
            "FLAGGED" => Ok(Self::Flagged),
            "REJECTED" => Ok(Self::Rejected),
            "BLOCKED" => Ok(Self::Blocked),
            "PENDING" => Ok(Self::Pending),
            _ => Err(format!("Invalid verification status: {}", s)),
        }
    }
}

/// Reason codes attached to non-verified citations.
pub mod reasons {
    pub const NOT_FOUND: &str = "not_found";
    pub const AMBIGUOUS: &str = "ambiguous";
    pub const CASE_NAME_MISMATCH: &str = "case_name_mismatch";
    pub const INVALID_REFERENCE: &str = "invalid_reference";
    pub const AUTHORITY_ERROR: &str = "authority_error";
    pub const UNRESOLVED_ANTECEDENT: &str = "unresolved_antecedent";
    pub const STATUTE: &str = "statutory_reference";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedCitation {
    #[serde(flatten)]
    pub citation: ExtractedCitation,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_case_name: Option<String>,
}

/// Classify a full citation against the authority's record.
pub fn classify(
    citation: &ExtractedCitation,
    record: &AuthorityRecord,
) -> (VerificationStatus, Option<String>) {
    match record.status {
        LookupStatus::Found => {
            let agrees = match (citation.case_name(), record.case_name.as_deref()) {
                (Some(claimed), Some(actual)) => names_agree(&claimed, actual),
                _ => true,
            };
            if agrees {
                (VerificationStatus::Verified, None)
            } else {
                (
                    VerificationStatus::Blocked,
                    Some(format!(
                        "{}: cited as '{}', authority has '{}'",
                        reasons::CASE_NAME_MISMATCH,
                        citation.case_name().unwrap_or_default(),
                        record.case_name.as_deref().unwrap_or_default()
                    )),
                )
            }
        }
        LookupStatus::Ambiguous => (
            VerificationStatus::Flagged,
            Some(format!("{}: {} candidate cases", reasons::AMBIGUOUS, record.candidates)),
        ),
        LookupStatus::InvalidReference => (
            VerificationStatus::Blocked,
            Some(reasons::INVALID_REFERENCE.to_string()),
        ),
        LookupStatus::NotFound => (VerificationStatus::Rejected, Some(reasons::NOT_FOUND.to_string())),
    }
}

const NAME_STOPWORDS: &[&str] = &[
    "v", "vs", "the", "of", "and", "a", "an", "in", "re", "ex", "rel", "inc", "co", "corp", "llc",
    "ltd", "et", "al", "people", "state", "united", "states", "america", "county", "city", "company",
    "corporation",
];

fn significant_words(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !NAME_STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Whether a cited case name plausibly names the authority's case: at
/// least one significant word appears in both. Names with no significant
/// words (e.g. "People v. State") cannot contradict.
pub fn names_agree(claimed: &str, actual: &str) -> bool {
    let claimed_words = significant_words(claimed);
    let actual_words = significant_words(actual);
    if claimed_words.is_empty() || actual_words.is_empty() {
        return true;
    }
    claimed_words.iter().any(|w| actual_words.contains(w))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    BlockedCitation,
    FailureRateExceeded,
}

/// Outcome of the hard-stop rule over one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardStopDecision {
    pub halt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<HaltReason>,
    pub failure_rate: f64,
    pub tolerance: f64,
    /// Full case citations counted in the rate.
    pub evaluated: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl HardStopDecision {
    pub fn summary(&self) -> String {
        match self.reason {
            Some(HaltReason::BlockedCitation) => format!(
                "{} citation(s) BLOCKED (mismatched or invalid authority)",
                self.blocked
            ),
            Some(HaltReason::FailureRateExceeded) => format!(
                "citation failure rate {:.1}% exceeds tier tolerance {:.1}% ({} of {})",
                self.failure_rate * 100.0,
                self.tolerance * 100.0,
                self.failed,
                self.evaluated
            ),
            None => format!(
                "{} of {} citations failed ({:.1}%, tolerance {:.1}%)",
                self.failed,
                self.evaluated,
                self.failure_rate * 100.0,
                self.tolerance * 100.0
            ),
        }
    }
}

/// Apply the hard-stop rule.
///
/// Any BLOCKED citation halts. Otherwise the failure rate over full case
/// citations (statutes and dependent forms excluded) halts only when it is
/// strictly greater than the tier tolerance.
pub fn evaluate_hard_stop(citations: &[VerifiedCitation], tier: Tier) -> HardStopDecision {
    let tolerance = tier.citation_tolerance();
    let blocked = citations
        .iter()
        .filter(|c| c.status == VerificationStatus::Blocked)
        .count();
    let full: Vec<&VerifiedCitation> = citations
        .iter()
        .filter(|c| c.citation.kind == CitationKind::FullCase)
        .collect();
    let evaluated = full.len();
    let failed = full.iter().filter(|c| c.status.is_failure()).count();
    let failure_rate = if evaluated == 0 {
        0.0
    } else {
        failed as f64 / evaluated as f64
    };

    let reason = if blocked > 0 {
        Some(HaltReason::BlockedCitation)
    } else if failure_rate > tolerance {
        Some(HaltReason::FailureRateExceeded)
    } else {
        None
    };

    HardStopDecision {
        halt: reason.is_some(),
        reason,
        failure_rate,
        tolerance,
        evaluated,
        failed,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::extract::extract_citations;
    use proptest::prelude::*;

    fn verified(kind: CitationKind, status: VerificationStatus) -> VerifiedCitation {
        let mut citation = extract_citations("Smith v. Jones, 123 F.3d 456 (1999)")
            .remove(0);
        citation.kind = kind;
        VerifiedCitation {
            citation,
            status,
            reason: None,
            external_id: None,
            authority_case_name: None,
        }
    }

    fn batch(total: usize, rejected: usize) -> Vec<VerifiedCitation> {
        (0..total)
            .map(|i| {
                let status = if i < rejected {
                    VerificationStatus::Rejected
                } else {
                    VerificationStatus::Verified
                };
                verified(CitationKind::FullCase, status)
            })
            .collect()
    }

    #[test]
    fn tier_c_boundary_is_strictly_greater_than() {
        let one = evaluate_hard_stop(&batch(10, 1), Tier::C);
        assert!(!one.halt, "10% must not exceed a 10% tolerance");
        assert_eq!(one.failure_rate, 0.1);

        let two = evaluate_hard_stop(&batch(10, 2), Tier::C);
        assert!(two.halt);
        assert_eq!(two.reason, Some(HaltReason::FailureRateExceeded));
    }

    #[test]
    fn tier_a_tolerates_twenty_percent() {
        assert!(!evaluate_hard_stop(&batch(10, 2), Tier::A).halt);
        assert!(evaluate_hard_stop(&batch(10, 3), Tier::A).halt);
    }

    #[test]
    fn statutes_and_dependents_do_not_count() {
        let mut citations = batch(4, 0);
        for _ in 0..6 {
            citations.push(verified(CitationKind::Statute, VerificationStatus::Pending));
            citations.push(verified(CitationKind::ShortCase, VerificationStatus::Flagged));
        }
        let decision = evaluate_hard_stop(&citations, Tier::C);
        assert_eq!(decision.evaluated, 4);
        assert!(!decision.halt);
    }

    #[test]
    fn empty_batch_never_halts() {
        let decision = evaluate_hard_stop(&[], Tier::C);
        assert!(!decision.halt);
        assert_eq!(decision.failure_rate, 0.0);
    }

    #[test]
    fn classify_maps_authority_answers() {
        let citation = extract_citations("Smith v. Jones, 123 F.3d 456 (1999)").remove(0);
        let mut record = AuthorityRecord::not_found("123 F.3d 456");
        assert_eq!(classify(&citation, &record).0, VerificationStatus::Rejected);

        record.status = LookupStatus::Found;
        record.case_name = Some("Smith v. Jones Trucking, Inc.".into());
        assert_eq!(classify(&citation, &record).0, VerificationStatus::Verified);

        record.case_name = Some("Anderson v. Liberty Lobby".into());
        let (status, reason) = classify(&citation, &record);
        assert_eq!(status, VerificationStatus::Blocked);
        assert!(reason.unwrap().starts_with(reasons::CASE_NAME_MISMATCH));

        record.status = LookupStatus::Ambiguous;
        assert_eq!(classify(&citation, &record).0, VerificationStatus::Flagged);

        record.status = LookupStatus::InvalidReference;
        assert_eq!(classify(&citation, &record).0, VerificationStatus::Blocked);
    }

    #[test]
    fn names_agree_ignores_boilerplate_words() {
        assert!(names_agree("People v. Garcia", "The People v. Jose Garcia"));
        assert!(!names_agree("Smith v. Jones", "Brown v. Board of Education"));
        assert!(names_agree("People v. State", "Anything v. Else"));
    }

    proptest! {
        #[test]
        fn single_blocked_citation_always_halts(
            verified_count in 0usize..40,
            tier in prop::sample::select(vec![Tier::A, Tier::B, Tier::C]),
            blocked_kind in prop::sample::select(vec![CitationKind::FullCase, CitationKind::ShortCase, CitationKind::Id]),
        ) {
            let mut citations = batch(verified_count, 0);
            citations.push(verified(blocked_kind, VerificationStatus::Blocked));
            let decision = evaluate_hard_stop(&citations, tier);
            prop_assert!(decision.halt);
            prop_assert_eq!(decision.reason, Some(HaltReason::BlockedCitation));
        }
    }
}
