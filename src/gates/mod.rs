//! Phase gate: decides whether a phase may start given the committed state.
//!
//! A phase may be entered only when it is the next eligible phase, it applies
//! to the motion, and every applicable predecessor has committed an output
//! carrying its required keys. Inside the revision loop, predecessors must
//! come from the current loop iteration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::phase::{self, PhaseCode};
use crate::workflow::WorkflowInstance;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingPrerequisite {
    NotApplicable,
    OutsideRevisionLoop,
    OutOfOrder { expected: Option<PhaseCode> },
    MissingOutput { phase: PhaseCode },
    MissingKeys { phase: PhaseCode, keys: Vec<String> },
    StaleIteration { phase: PhaseCode, expected: u32, found: u32 },
}

impl fmt::Display for MissingPrerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApplicable => write!(f, "phase does not apply to this motion"),
            Self::OutsideRevisionLoop => write!(f, "phase runs only inside the revision loop"),
            Self::OutOfOrder { expected: Some(expected) } => write!(f, "out of order (next eligible phase is {})", expected),
            Self::OutOfOrder { expected: None } => write!(f, "out of order (workflow has no remaining phases)"),
            Self::MissingOutput { phase } => write!(f, "phase {} has no committed output", phase),
            Self::MissingKeys { phase, keys } => write!(f, "phase {} output lacks {}", phase, keys.join(", ")),
            Self::StaleIteration { phase, expected, found } => write!(
                f,
                "phase {} output is from loop {} (current loop {})",
                phase, found, expected
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub phase: PhaseCode,
    pub allowed: bool,
    pub missing: Vec<MissingPrerequisite>,
}

impl GateDecision {
    pub fn missing_descriptions(&self) -> Vec<String> {
        self.missing.iter().map(ToString::to_string).collect()
    }
}

/// Predecessors `phase` depends on, with the loop iteration their output
/// must come from (`None` accepts any iteration).
fn required_predecessors(code: PhaseCode, instance: &WorkflowInstance) -> Vec<(PhaseCode, Option<u32>)> {
    let motion = &instance.motion;
    let mainline_before = |limit: PhaseCode| -> Vec<(PhaseCode, Option<u32>)> {
        phase::mainline(motion)
            .into_iter()
            .filter(|p| *p < limit)
            .map(|p| (p, None))
            .collect()
    };
    let current_loop = instance.revision_loop_count;

    match code {
        PhaseCode::VIII => {
            let mut required = mainline_before(PhaseCode::VII);
            required.push((PhaseCode::VII, None));
            required
        }
        PhaseCode::VII1 => {
            let mut required = mainline_before(PhaseCode::VII);
            required.push((PhaseCode::VIII, Some(current_loop)));
            required
        }
        PhaseCode::VII if instance.in_revision => {
            let mut required = mainline_before(PhaseCode::VII);
            required.push((PhaseCode::VIII, Some(current_loop)));
            required.push((PhaseCode::VII1, Some(current_loop)));
            required
        }
        other => mainline_before(other),
    }
}

/// Decide whether `code` may start now.
pub fn can_enter(code: PhaseCode, instance: &WorkflowInstance) -> GateDecision {
    let definition = code.definition();
    let mut missing = Vec::new();

    if definition.is_revision_only() {
        if !instance.in_revision {
            missing.push(MissingPrerequisite::OutsideRevisionLoop);
        }
    } else if !definition.applies_to(&instance.motion) {
        missing.push(MissingPrerequisite::NotApplicable);
    }

    let expected = instance.next_phase();
    if expected != Some(code) {
        missing.push(MissingPrerequisite::OutOfOrder { expected });
    }

    for (predecessor, iteration) in required_predecessors(code, instance) {
        let Some(output) = instance.phase_outputs.get(&predecessor) else {
            missing.push(MissingPrerequisite::MissingOutput { phase: predecessor });
            continue;
        };
        let keys = output.missing_keys(predecessor.definition().required_output_keys);
        if !keys.is_empty() {
            missing.push(MissingPrerequisite::MissingKeys { phase: predecessor, keys });
        }
        match iteration {
            Some(expected) if output.loop_iteration != expected => {
                missing.push(MissingPrerequisite::StaleIteration {
                    phase: predecessor,
                    expected,
                    found: output.loop_iteration,
                });
            }
            _ => {}
        }
    }

    GateDecision {
        phase: code,
        allowed: missing.is_empty(),
        missing,
    }
}
