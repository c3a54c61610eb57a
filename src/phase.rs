//! Phase registry for the motion production workflow.
//!
//! This module is the single source of truth for:
//! - phase ordering (`PhaseCode`, including sub-phases such as V.1 and VII.1)
//! - model routing and token budgets per phase
//! - applicability predicates evaluated against the motion parameters
//! - required output keys checked by the phase gate
//! - checkpoint placement
//!
//! Nothing else in the crate hard-codes a phase attribute.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::motion::{MotionParams, Tier};

/// Ordered phase identifier. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhaseCode {
    #[serde(rename = "I")]
    I,
    #[serde(rename = "II")]
    II,
    #[serde(rename = "III")]
    III,
    #[serde(rename = "IV")]
    IV,
    #[serde(rename = "V")]
    V,
    #[serde(rename = "V.1")]
    V1,
    #[serde(rename = "VI")]
    VI,
    #[serde(rename = "VII")]
    VII,
    #[serde(rename = "VII.1")]
    VII1,
    #[serde(rename = "VIII")]
    VIII,
    #[serde(rename = "VIII.5")]
    VIII5,
    #[serde(rename = "IX")]
    IX,
    #[serde(rename = "IX.1")]
    IX1,
    #[serde(rename = "X")]
    X,
}

impl PhaseCode {
    pub const ALL: [PhaseCode; 14] = [
        PhaseCode::I,
        PhaseCode::II,
        PhaseCode::III,
        PhaseCode::IV,
        PhaseCode::V,
        PhaseCode::V1,
        PhaseCode::VI,
        PhaseCode::VII,
        PhaseCode::VII1,
        PhaseCode::VIII,
        PhaseCode::VIII5,
        PhaseCode::IX,
        PhaseCode::IX1,
        PhaseCode::X,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseCode::I => "I",
            PhaseCode::II => "II",
            PhaseCode::III => "III",
            PhaseCode::IV => "IV",
            PhaseCode::V => "V",
            PhaseCode::V1 => "V.1",
            PhaseCode::VI => "VI",
            PhaseCode::VII => "VII",
            PhaseCode::VII1 => "VII.1",
            PhaseCode::VIII => "VIII",
            PhaseCode::VIII5 => "VIII.5",
            PhaseCode::IX => "IX",
            PhaseCode::IX1 => "IX.1",
            PhaseCode::X => "X",
        }
    }

    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn definition(&self) -> &'static PhaseDefinition {
        &REGISTRY[self.ordinal()]
    }
}

impl fmt::Display for PhaseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        PhaseCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == wanted)
            .ok_or_else(|| format!("Invalid phase code: {}", s))
    }
}

/// Model capability tier requested for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Standard,
    Premium,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
        }
    }
}

/// Model routing for a phase: the default tier, and the tier used for
/// tier-C motions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRoute {
    pub default: ModelTier,
    pub tier_c: ModelTier,
}

impl ModelRoute {
    const fn fixed(tier: ModelTier) -> Self {
        Self {
            default: tier,
            tier_c: tier,
        }
    }

    const fn escalating() -> Self {
        Self {
            default: ModelTier::Standard,
            tier_c: ModelTier::Premium,
        }
    }

    pub fn for_tier(&self, tier: Tier) -> ModelTier {
        match tier {
            Tier::C => self.tier_c,
            Tier::A | Tier::B => self.default,
        }
    }
}

/// How much work a citation check is allowed to batch per authority call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationRisk {
    /// First-pass verification of the initial draft.
    Standard,
    /// Post-revision verification, where newly inserted authority is most likely.
    Elevated,
}

/// What a phase does when it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// A generation call whose structured output is stored verbatim.
    Generation,
    /// Deterministic extraction plus authority verification of the current draft.
    CitationCheck(CitationRisk),
    /// Judge simulation: a generation call normalized through the quality gate.
    Grade,
}

/// Predicate evaluated against the motion before a phase is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    Always,
    /// Skipped for tier-A motions.
    TiersBAndC,
    /// Runs only inside the revision loop, never on the mainline.
    RevisionLoopOnly,
    /// Runs only for motion types that require a separate statement.
    SeparateStatement,
}

/// Type of human checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointType {
    /// Pauses until an operator responds. Subject to reminder, escalation and auto-cancel deadlines.
    Hold,
    /// Informational. Never gates advancement.
    Notification,
    /// Pauses until an operator approves with full affirmation.
    Blocking,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::Hold => "HOLD",
            CheckpointType::Notification => "NOTIFICATION",
            CheckpointType::Blocking => "BLOCKING",
        }
    }

    pub fn gates_advancement(&self) -> bool {
        !matches!(self, CheckpointType::Notification)
    }
}

impl FromStr for CheckpointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOLD" => Ok(CheckpointType::Hold),
            "NOTIFICATION" => Ok(CheckpointType::Notification),
            "BLOCKING" => Ok(CheckpointType::Blocking),
            _ => Err(format!("Invalid checkpoint type: {}", s)),
        }
    }
}

/// Checkpoint placed in front of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointRule {
    Notification,
    Blocking,
    /// HOLD when the output of `source` sets boolean `flag`, otherwise a notification.
    HoldWhenFlagged { source: PhaseCode, flag: &'static str },
}

impl CheckpointRule {
    pub fn resolve(&self, outputs: &BTreeMap<PhaseCode, PhaseOutput>) -> CheckpointType {
        match self {
            CheckpointRule::Notification => CheckpointType::Notification,
            CheckpointRule::Blocking => CheckpointType::Blocking,
            CheckpointRule::HoldWhenFlagged { source, flag } => {
                let flagged = outputs
                    .get(source)
                    .and_then(|out| out.data.get(*flag))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if flagged {
                    CheckpointType::Hold
                } else {
                    CheckpointType::Notification
                }
            }
        }
    }
}

/// Stored output of a committed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    /// Revision loop iteration the output was produced in (0 on the mainline).
    pub loop_iteration: u32,
    pub data: Value,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl PhaseOutput {
    pub fn has_keys(&self, keys: &[&str]) -> bool {
        self.missing_keys(keys).is_empty()
    }

    pub fn missing_keys(&self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .filter(|key| self.data.get(**key).is_none_or(Value::is_null))
            .map(|key| key.to_string())
            .collect()
    }
}

/// Static definition of one phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseDefinition {
    pub code: PhaseCode,
    pub name: &'static str,
    pub kind: PhaseKind,
    pub model: ModelRoute,
    pub token_budget: u32,
    pub applicability: Applicability,
    /// Keys the stored output must carry. The phase gate checks these on
    /// every predecessor.
    pub required_output_keys: &'static [&'static str],
    /// Upstream outputs included in the prompt context.
    pub inputs: &'static [PhaseCode],
    pub checkpoint: Option<CheckpointRule>,
    pub instructions: &'static str,
}

impl PhaseDefinition {
    pub fn is_revision_only(&self) -> bool {
        self.applicability == Applicability::RevisionLoopOnly
    }

    /// Motion-level applicability. Revision-only phases are applicable to
    /// every motion; whether they run depends on the loop state.
    pub fn applies_to(&self, motion: &MotionParams) -> bool {
        match self.applicability {
            Applicability::Always | Applicability::RevisionLoopOnly => true,
            Applicability::TiersBAndC => motion.tier != Tier::A,
            Applicability::SeparateStatement => motion.requires_separate_statement(),
        }
    }

    pub fn is_mainline_for(&self, motion: &MotionParams) -> bool {
        !self.is_revision_only() && self.applies_to(motion)
    }

    pub fn model_tier(&self, tier: Tier) -> ModelTier {
        self.model.for_tier(tier)
    }

    /// Keys the generation response itself must contain. Grade phases store
    /// derived fields the model never returns.
    pub fn response_keys(&self) -> &'static [&'static str] {
        match self.kind {
            PhaseKind::Grade => &["grade"],
            _ => self.required_output_keys,
        }
    }
}

/// Fixed order of the revision loop.
pub const REVISION_SEQUENCE: [PhaseCode; 3] = [PhaseCode::VIII, PhaseCode::VII1, PhaseCode::VII];

pub static REGISTRY: [PhaseDefinition; 14] = [
    PhaseDefinition {
        code: PhaseCode::I,
        name: "Intake Analysis",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Fast),
        token_budget: 4_000,
        applicability: Applicability::Always,
        required_output_keys: &["case_summary", "issues"],
        inputs: &[],
        checkpoint: None,
        instructions: "Summarize the case from the supplied documents and identify every legal issue the motion must address.",
    },
    PhaseDefinition {
        code: PhaseCode::II,
        name: "Legal Standards",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Standard),
        token_budget: 8_000,
        applicability: Applicability::Always,
        required_output_keys: &["legal_standards", "elements"],
        inputs: &[PhaseCode::I],
        checkpoint: None,
        instructions: "State the governing legal standard for each issue in the controlling jurisdiction and break each standard into its elements.",
    },
    PhaseDefinition {
        code: PhaseCode::III,
        name: "Evidence Strategy",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Standard),
        token_budget: 8_000,
        applicability: Applicability::Always,
        required_output_keys: &["evidence_map", "evidence_gaps"],
        inputs: &[PhaseCode::I, PhaseCode::II],
        checkpoint: None,
        instructions: "Map the available evidence to each element and list the gaps. Set hold_required to true when a gap must be resolved by the client before research continues.",
    },
    PhaseDefinition {
        code: PhaseCode::IV,
        name: "Authority Research",
        kind: PhaseKind::Generation,
        model: ModelRoute::escalating(),
        token_budget: 16_000,
        applicability: Applicability::Always,
        required_output_keys: &["authorities"],
        inputs: &[PhaseCode::I, PhaseCode::II, PhaseCode::III],
        checkpoint: Some(CheckpointRule::HoldWhenFlagged {
            source: PhaseCode::III,
            flag: "hold_required",
        }),
        instructions: "Identify controlling and persuasive authority for each element. Give full reporter citations and the proposition each authority supports.",
    },
    PhaseDefinition {
        code: PhaseCode::V,
        name: "Initial Draft",
        kind: PhaseKind::Generation,
        model: ModelRoute::escalating(),
        token_budget: 32_000,
        applicability: Applicability::Always,
        required_output_keys: &["draft"],
        inputs: &[PhaseCode::I, PhaseCode::II, PhaseCode::III, PhaseCode::IV],
        checkpoint: None,
        instructions: "Draft the complete memorandum of points and authorities. Cite only authority identified in research, in proper reporter form.",
    },
    PhaseDefinition {
        code: PhaseCode::V1,
        name: "Citation Accuracy Check",
        kind: PhaseKind::CitationCheck(CitationRisk::Standard),
        model: ModelRoute::fixed(ModelTier::Fast),
        token_budget: 0,
        applicability: Applicability::Always,
        required_output_keys: &["citation_report"],
        inputs: &[PhaseCode::V],
        checkpoint: None,
        instructions: "",
    },
    PhaseDefinition {
        code: PhaseCode::VI,
        name: "Opposition Anticipation",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Standard),
        token_budget: 8_000,
        applicability: Applicability::TiersBAndC,
        required_output_keys: &["anticipated_arguments"],
        inputs: &[PhaseCode::II, PhaseCode::V],
        checkpoint: None,
        instructions: "Anticipate the strongest arguments opposing counsel will raise and how the draft should pre-empt each.",
    },
    PhaseDefinition {
        code: PhaseCode::VII,
        name: "Judge Simulation",
        kind: PhaseKind::Grade,
        model: ModelRoute::fixed(ModelTier::Premium),
        token_budget: 8_000,
        applicability: Applicability::Always,
        required_output_keys: &["grade", "numeric_grade", "passed"],
        inputs: &[PhaseCode::II, PhaseCode::VI],
        checkpoint: None,
        instructions: "Evaluate the draft as the assigned judge would. Grade it on the letter scale from A+ to F and list strengths, weaknesses and concrete suggestions.",
    },
    PhaseDefinition {
        code: PhaseCode::VII1,
        name: "Post-Revision Citation Check",
        kind: PhaseKind::CitationCheck(CitationRisk::Elevated),
        model: ModelRoute::fixed(ModelTier::Fast),
        token_budget: 0,
        applicability: Applicability::RevisionLoopOnly,
        required_output_keys: &["citation_report"],
        inputs: &[PhaseCode::VIII],
        checkpoint: None,
        instructions: "",
    },
    PhaseDefinition {
        code: PhaseCode::VIII,
        name: "Revisions",
        kind: PhaseKind::Generation,
        model: ModelRoute::escalating(),
        token_budget: 32_000,
        applicability: Applicability::RevisionLoopOnly,
        required_output_keys: &["revised_draft"],
        inputs: &[PhaseCode::II, PhaseCode::IV, PhaseCode::VII],
        checkpoint: None,
        instructions: "Revise the draft to address every weakness and suggestion from the judge's evaluation. Return the full revised motion.",
    },
    PhaseDefinition {
        code: PhaseCode::VIII5,
        name: "Caption Validation",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Fast),
        token_budget: 2_000,
        applicability: Applicability::Always,
        required_output_keys: &["caption"],
        inputs: &[PhaseCode::I],
        checkpoint: None,
        instructions: "Validate the caption against the case documents: court, parties, case number, judge and hearing details.",
    },
    PhaseDefinition {
        code: PhaseCode::IX,
        name: "Supporting Documents",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Standard),
        token_budget: 16_000,
        applicability: Applicability::Always,
        required_output_keys: &["supporting_documents"],
        inputs: &[PhaseCode::I, PhaseCode::III, PhaseCode::VIII5],
        checkpoint: None,
        instructions: "Prepare the notice of motion, supporting declarations and proposed order.",
    },
    PhaseDefinition {
        code: PhaseCode::IX1,
        name: "Separate Statement",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Standard),
        token_budget: 16_000,
        applicability: Applicability::SeparateStatement,
        required_output_keys: &["separate_statement"],
        inputs: &[PhaseCode::III, PhaseCode::IX],
        checkpoint: None,
        instructions: "Prepare the separate statement of undisputed material facts with supporting evidence for each fact.",
    },
    PhaseDefinition {
        code: PhaseCode::X,
        name: "Final Assembly",
        kind: PhaseKind::Generation,
        model: ModelRoute::fixed(ModelTier::Fast),
        token_budget: 4_000,
        applicability: Applicability::Always,
        required_output_keys: &["final_package"],
        inputs: &[PhaseCode::VIII5, PhaseCode::IX, PhaseCode::IX1],
        checkpoint: Some(CheckpointRule::Blocking),
        instructions: "Assemble the filing package in order and produce the delivery manifest.",
    },
];

/// Applicable mainline phases for a motion, in execution order.
pub fn mainline(motion: &MotionParams) -> Vec<PhaseCode> {
    REGISTRY
        .iter()
        .filter(|def| def.is_mainline_for(motion))
        .map(|def| def.code)
        .collect()
}

/// The phase that should execute after `current` (the last committed phase).
///
/// Returns `None` once the final phase has been committed.
pub fn next_phase(
    current: Option<PhaseCode>,
    in_revision: bool,
    motion: &MotionParams,
) -> Option<PhaseCode> {
    if in_revision {
        return Some(match current {
            Some(PhaseCode::VIII) => PhaseCode::VII1,
            Some(PhaseCode::VII1) => PhaseCode::VII,
            _ => PhaseCode::VIII,
        });
    }
    REGISTRY
        .iter()
        .filter(|def| def.is_mainline_for(motion))
        .map(|def| def.code)
        .find(|code| current.is_none_or(|cur| *code > cur))
}

/// The applicable mainline phase immediately before `code`.
pub fn previous_mainline(code: PhaseCode, motion: &MotionParams) -> Option<PhaseCode> {
    REGISTRY
        .iter()
        .rev()
        .filter(|def| def.is_mainline_for(motion))
        .map(|def| def.code)
        .find(|candidate| *candidate < code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(motion_type: &str, tier: Tier) -> MotionParams {
        MotionParams {
            motion_type: motion_type.into(),
            jurisdiction: "CA".into(),
            tier,
            documents: vec![],
            instructions: None,
        }
    }

    #[test]
    fn registry_is_indexed_by_ordinal() {
        for code in PhaseCode::ALL {
            assert_eq!(code.definition().code, code);
        }
    }

    #[test]
    fn phase_codes_order_sub_phases_after_parent() {
        assert!(PhaseCode::V < PhaseCode::V1);
        assert!(PhaseCode::V1 < PhaseCode::VI);
        assert!(PhaseCode::VII1 < PhaseCode::VIII);
        assert!(PhaseCode::VIII5 < PhaseCode::IX);
        assert!(PhaseCode::IX1 < PhaseCode::X);
    }

    #[test]
    fn phase_code_parse_and_display() {
        assert_eq!("vii.1".parse::<PhaseCode>().unwrap(), PhaseCode::VII1);
        assert_eq!(PhaseCode::VIII5.to_string(), "VIII.5");
        assert!("XI".parse::<PhaseCode>().is_err());
        let json = serde_json::to_string(&PhaseCode::IX1).unwrap();
        assert_eq!(json, "\"IX.1\"");
    }

    #[test]
    fn tier_a_skips_opposition_and_separate_statement() {
        let phases = mainline(&motion("Motion for Extension of Time", Tier::A));
        assert!(!phases.contains(&PhaseCode::VI));
        assert!(!phases.contains(&PhaseCode::IX1));
        assert!(!phases.contains(&PhaseCode::VIII));
        assert!(!phases.contains(&PhaseCode::VII1));
        assert_eq!(phases.first(), Some(&PhaseCode::I));
        assert_eq!(phases.last(), Some(&PhaseCode::X));
    }

    #[test]
    fn msj_runs_separate_statement() {
        let phases = mainline(&motion("Motion for Summary Judgment", Tier::C));
        assert!(phases.contains(&PhaseCode::VI));
        assert!(phases.contains(&PhaseCode::IX1));
    }

    #[test]
    fn next_phase_walks_mainline() {
        let m = motion("Motion to Compel", Tier::B);
        assert_eq!(next_phase(None, false, &m), Some(PhaseCode::I));
        assert_eq!(next_phase(Some(PhaseCode::V1), false, &m), Some(PhaseCode::VI));
        assert_eq!(next_phase(Some(PhaseCode::VII), false, &m), Some(PhaseCode::VIII5));
        assert_eq!(next_phase(Some(PhaseCode::IX), false, &m), Some(PhaseCode::X));
        assert_eq!(next_phase(Some(PhaseCode::X), false, &m), None);
    }

    #[test]
    fn next_phase_follows_revision_sequence() {
        let m = motion("Motion to Compel", Tier::B);
        assert_eq!(next_phase(Some(PhaseCode::VII), true, &m), Some(PhaseCode::VIII));
        assert_eq!(next_phase(Some(PhaseCode::VIII), true, &m), Some(PhaseCode::VII1));
        assert_eq!(next_phase(Some(PhaseCode::VII1), true, &m), Some(PhaseCode::VII));
    }

    #[test]
    fn previous_mainline_skips_inapplicable_phases() {
        let a = motion("Motion for Extension of Time", Tier::A);
        assert_eq!(previous_mainline(PhaseCode::VII, &a), Some(PhaseCode::V1));
        assert_eq!(previous_mainline(PhaseCode::X, &a), Some(PhaseCode::IX));
        assert_eq!(previous_mainline(PhaseCode::I, &a), None);

        let msj = motion("MSJ", Tier::C);
        assert_eq!(previous_mainline(PhaseCode::X, &msj), Some(PhaseCode::IX1));
    }

    #[test]
    fn model_routing_escalates_for_tier_c() {
        let draft = PhaseCode::V.definition();
        assert_eq!(draft.model_tier(Tier::B), ModelTier::Standard);
        assert_eq!(draft.model_tier(Tier::C), ModelTier::Premium);
        assert_eq!(PhaseCode::I.definition().model_tier(Tier::C), ModelTier::Fast);
    }

    #[test]
    fn authority_research_holds_only_when_flagged() {
        let rule = PhaseCode::IV.definition().checkpoint.unwrap();
        let mut outputs = BTreeMap::new();
        assert_eq!(rule.resolve(&outputs), CheckpointType::Notification);
        outputs.insert(
            PhaseCode::III,
            PhaseOutput {
                loop_iteration: 0,
                data: serde_json::json!({"evidence_map": {}, "evidence_gaps": [], "hold_required": true}),
                completed_at: chrono::Utc::now(),
            },
        );
        assert_eq!(rule.resolve(&outputs), CheckpointType::Hold);
    }

    #[test]
    fn missing_keys_treats_null_as_missing() {
        let out = PhaseOutput {
            loop_iteration: 0,
            data: serde_json::json!({"draft": null, "notes": "x"}),
            completed_at: chrono::Utc::now(),
        };
        assert_eq!(out.missing_keys(&["draft", "notes"]), vec!["draft".to_string()]);
        assert!(!out.has_keys(&["draft"]));
    }

    #[test]
    fn grade_phase_only_requires_grade_from_model() {
        assert_eq!(PhaseCode::VII.definition().response_keys(), &["grade"]);
        assert_eq!(PhaseCode::V.definition().response_keys(), &["draft"]);
    }
}
