//! Quality gate: judge simulation grading and the revision-loop decision.
//!
//! Grades use a single letter scale with a fixed numeric mapping. The
//! passing threshold is the `PASSING_GRADE` constant and is the only place
//! the threshold is defined.

mod grade;

pub use grade::{LetterGrade, PASSING_GRADE};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::GenerationError;
use crate::executor::{ExecutionOutcome, ExecutionReport, PhaseExecutor, extract_json_object};
use crate::phase::{PhaseCode, PhaseOutput};
use crate::workflow::WorkflowInstance;

/// Default upper bound on revision loops.
pub const MAX_REVISION_LOOPS: u32 = 3;

/// Grade recorded on the workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeGrade {
    pub letter: LetterGrade,
    pub numeric: f64,
    pub passed: bool,
}

impl JudgeGrade {
    pub fn from_letter(letter: LetterGrade) -> Self {
        Self {
            letter,
            numeric: letter.numeric(),
            passed: letter >= PASSING_GRADE,
        }
    }
}

impl fmt::Display for JudgeGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}, {})",
            self.letter,
            self.numeric,
            if self.passed { "passed" } else { "below bar" }
        )
    }
}

/// Full evaluation returned by the judge simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub grade: JudgeGrade,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl GradeReport {
    /// Stored output of the judge phase.
    pub fn to_output_value(&self) -> Value {
        json!({
            "grade": self.grade.letter.as_str(),
            "numeric_grade": self.grade.numeric,
            "passed": self.grade.passed,
            "strengths": self.strengths,
            "weaknesses": self.weaknesses,
            "suggestions": self.suggestions,
        })
    }

    /// Recover a report from a stored judge output.
    pub fn from_output(output: &PhaseOutput) -> Option<Self> {
        let map = output.data.as_object()?;
        normalize_grade(map).ok()
    }
}

/// What the orchestrator does after a judge evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionDecision {
    /// Grade met the bar; continue on the mainline.
    Pass,
    /// Enter (or repeat) the revision loop as iteration `loop_number`.
    Revise { loop_number: u32 },
    /// Loop bound reached without a passing grade; deliver with the quality flag.
    DeliverFlagged,
}

/// Decide the next move after an evaluation, given loops already completed.
pub fn decide_revision(passed: bool, loops_completed: u32, max_loops: u32) -> RevisionDecision {
    if passed {
        RevisionDecision::Pass
    } else if loops_completed < max_loops {
        RevisionDecision::Revise {
            loop_number: loops_completed + 1,
        }
    } else {
        RevisionDecision::DeliverFlagged
    }
}

/// Result of running the judge phase.
#[derive(Debug, Clone)]
pub enum GradeOutcome {
    Graded {
        report: GradeReport,
        execution: ExecutionReport,
    },
    ParseFailed {
        error: String,
        execution: ExecutionReport,
    },
}

/// The quality gate. Grades drafts through the generation service and
/// normalizes the response onto the letter scale.
#[derive(Debug, Clone)]
pub struct QualityGate {
    max_loops: u32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(MAX_REVISION_LOOPS)
    }
}

impl QualityGate {
    pub fn new(max_loops: u32) -> Self {
        Self { max_loops }
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    pub fn decide(&self, grade: &JudgeGrade, loops_completed: u32) -> RevisionDecision {
        decide_revision(grade.passed, loops_completed, self.max_loops)
    }

    /// Grade the workflow's current draft.
    pub async fn grade(
        &self,
        executor: &PhaseExecutor,
        instance: &WorkflowInstance,
    ) -> Result<GradeOutcome, GenerationError> {
        let definition = PhaseCode::VII.definition();
        let prompt = build_grade_prompt(instance);
        let execution = executor.execute_prompt(definition, instance, prompt).await?;

        let outcome = match &execution.outcome {
            ExecutionOutcome::Parsed(map) => match normalize_grade(map) {
                Ok(report) => GradeOutcome::Graded {
                    report,
                    execution,
                },
                Err(error) => GradeOutcome::ParseFailed { error, execution },
            },
            ExecutionOutcome::ParseFailed { error } => GradeOutcome::ParseFailed {
                error: error.clone(),
                execution,
            },
        };
        Ok(outcome)
    }
}

/// Build the judge prompt for the current draft.
pub fn build_grade_prompt(instance: &WorkflowInstance) -> String {
    let draft = instance.current_draft().unwrap_or("(no draft available)");
    let standards = instance
        .phase_outputs
        .get(&PhaseCode::II)
        .map(|out| serde_json::to_string_pretty(&out.data).unwrap_or_default())
        .unwrap_or_else(|| "{}".to_string());
    let opposition = instance
        .phase_outputs
        .get(&PhaseCode::VI)
        .map(|out| serde_json::to_string_pretty(&out.data).unwrap_or_default())
        .map(|json| format!("\n## Anticipated Opposition\n```json\n{}\n```\n", json))
        .unwrap_or_default();

    format!(
        r#"# Judge Simulation

You are the judge assigned to hear this motion. Evaluate the draft exactly as you would from the bench.

## Motion
- Type: {motion_type}
- Jurisdiction: {jurisdiction}
- Revision loop: {loop_count}

## Governing Standards
```json
{standards}
```
{opposition}
## Draft
{draft}

## Grading Scale

A+, A, A-, B+, B, B-, C+, C, C-, D+, D, D-, F. A draft at {passing} or above is ready to file.

## Output

Respond with ONLY a JSON object in this exact format (no markdown, no explanation):

```json
{{
  "grade": "B+",
  "strengths": ["..."],
  "weaknesses": ["..."],
  "suggestions": ["specific, actionable revision instructions"]
}}
```
"#,
        motion_type = instance.motion.motion_type,
        jurisdiction = instance.motion.jurisdiction,
        loop_count = instance.revision_loop_count,
        standards = standards,
        opposition = opposition,
        draft = draft,
        passing = PASSING_GRADE,
    )
}

/// Parse a raw judge response into a grade report.
pub fn parse_grade_response(response: &str) -> Result<GradeReport, String> {
    let map = extract_json_object(response)?;
    normalize_grade(&map)
}

/// Normalize a parsed judge payload onto the letter scale.
///
/// The `grade` field is authoritative and may be a letter or a number. A
/// numeric `score` is accepted when `grade` is absent or unrecognized.
/// Numbers up to 4.0 are grade points; larger ones are percentages.
pub fn normalize_grade(map: &Map<String, Value>) -> Result<GradeReport, String> {
    let letter = map
        .get("grade")
        .and_then(|grade| match grade {
            Value::String(s) => LetterGrade::parse(s),
            Value::Number(n) => n.as_f64().map(LetterGrade::from_number),
            _ => None,
        })
        .or_else(|| {
            map.get("score")
                .and_then(Value::as_f64)
                .map(LetterGrade::from_number)
        })
        .ok_or_else(|| {
            format!(
                "Unrecognized grade: {}",
                map.get("grade").map(|v| v.to_string()).unwrap_or_else(|| "missing".into())
            )
        })?;

    Ok(GradeReport {
        grade: JudgeGrade::from_letter(letter),
        strengths: string_list(map.get("strengths")),
        weaknesses: string_list(map.get("weaknesses")),
        suggestions: string_list(map.get("suggestions")),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn judge_grade_from_letter_applies_passing_bar() {
        assert!(JudgeGrade::from_letter(LetterGrade::BPlus).passed);
        assert!(JudgeGrade::from_letter(LetterGrade::A).passed);
        assert!(!JudgeGrade::from_letter(LetterGrade::B).passed);
        assert_eq!(JudgeGrade::from_letter(LetterGrade::BMinus).numeric, 2.7);
    }

    #[test]
    fn decide_revision_bounds_loops() {
        assert_eq!(decide_revision(true, 0, 3), RevisionDecision::Pass);
        assert_eq!(
            decide_revision(false, 0, 3),
            RevisionDecision::Revise { loop_number: 1 }
        );
        assert_eq!(
            decide_revision(false, 2, 3),
            RevisionDecision::Revise { loop_number: 3 }
        );
        assert_eq!(decide_revision(false, 3, 3), RevisionDecision::DeliverFlagged);
        assert_eq!(decide_revision(true, 3, 3), RevisionDecision::Pass);
    }

    #[test]
    fn failing_sequence_delivers_flagged_on_fourth_evaluation() {
        let gate = QualityGate::default();
        let grades = [LetterGrade::F, LetterGrade::D, LetterGrade::C, LetterGrade::C];
        let mut loops = 0;
        let mut decisions = Vec::new();
        for letter in grades {
            let decision = gate.decide(&JudgeGrade::from_letter(letter), loops);
            if let RevisionDecision::Revise { loop_number } = decision {
                loops = loop_number;
            }
            decisions.push(decision);
        }
        assert_eq!(loops, 3);
        assert_eq!(decisions.last(), Some(&RevisionDecision::DeliverFlagged));
    }

    #[test]
    fn parse_grade_response_from_code_block() {
        let response = r#"Here is my evaluation:
```json
{"grade": "B-", "strengths": ["clear facts"], "weaknesses": ["thin authority"], "suggestions": ["add controlling case"]}
```"#;
        let report = parse_grade_response(response).unwrap();
        assert_eq!(report.grade.letter, LetterGrade::BMinus);
        assert!(!report.grade.passed);
        assert_eq!(report.weaknesses, vec!["thin authority".to_string()]);
    }

    #[test]
    fn parse_grade_response_accepts_percentage_score() {
        let report = parse_grade_response(r#"{"score": 88, "suggestions": "tighten the argument"}"#)
            .unwrap();
        assert_eq!(report.grade.letter, LetterGrade::BPlus);
        assert!(report.grade.passed);
        assert_eq!(report.suggestions, vec!["tighten the argument".to_string()]);
    }

    #[test]
    fn parse_grade_response_reads_four_point_scale() {
        let report = parse_grade_response(r#"{"score": 3.5}"#).unwrap();
        assert_eq!(report.grade.letter, LetterGrade::BPlus);
        assert!(report.grade.passed);

        let report = parse_grade_response(r#"{"grade": 3.3}"#).unwrap();
        assert_eq!(report.grade.letter, LetterGrade::BPlus);
        assert!(report.grade.passed);

        let report = parse_grade_response(r#"{"grade": 3.7}"#).unwrap();
        assert_eq!(report.grade.letter, LetterGrade::AMinus);

        let report = parse_grade_response(r#"{"score": 4.0}"#).unwrap();
        assert_eq!(report.grade.letter, LetterGrade::A);

        let report = parse_grade_response(r#"{"score": 2.9}"#).unwrap();
        assert_eq!(report.grade.letter, LetterGrade::BMinus);
        assert!(!report.grade.passed);
    }

    #[test]
    fn parse_grade_response_rejects_unknown_grade() {
        let err = parse_grade_response(r#"{"grade": "excellent"}"#).unwrap_err();
        assert!(err.contains("Unrecognized grade"));
        assert!(parse_grade_response("no json here").is_err());
    }

    #[test]
    fn stored_output_roundtrips_through_phase_output() {
        let report = GradeReport {
            grade: JudgeGrade::from_letter(LetterGrade::AMinus),
            strengths: vec!["organized".into()],
            weaknesses: vec![],
            suggestions: vec![],
        };
        let output = PhaseOutput {
            loop_iteration: 1,
            data: report.to_output_value(),
            completed_at: chrono::Utc::now(),
        };
        assert!(output.has_keys(PhaseCode::VII.definition().required_output_keys));
        assert_eq!(GradeReport::from_output(&output), Some(report));
    }

    proptest! {
        #[test]
        fn loop_count_never_exceeds_bound(
            passes in prop::collection::vec(prop::bool::weighted(0.2), 1..20),
            max_loops in 0u32..=MAX_REVISION_LOOPS,
        ) {
            let gate = QualityGate::new(max_loops);
            let mut loops = 0u32;
            for passed in passes {
                let letter = if passed { LetterGrade::A } else { LetterGrade::F };
                match gate.decide(&JudgeGrade::from_letter(letter), loops) {
                    RevisionDecision::Revise { loop_number } => {
                        prop_assert_eq!(loop_number, loops + 1);
                        loops = loop_number;
                    }
                    RevisionDecision::Pass | RevisionDecision::DeliverFlagged => break,
                }
                prop_assert!(loops <= max_loops);
            }
        }
    }
}
