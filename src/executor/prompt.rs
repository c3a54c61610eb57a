//! Prompt assembly for generation phases.

use serde_json::Value;

use crate::phase::{PhaseCode, PhaseDefinition};
use crate::workflow::WorkflowInstance;

/// Longest document excerpt included verbatim in a prompt.
const MAX_DOCUMENT_CHARS: usize = 20_000;

pub fn system_prompt(instance: &WorkflowInstance) -> String {
    format!(
        "You are a senior litigation attorney preparing a {} in {}. \
         Your work product is filed with a court: cite only authority you can identify with a full reporter citation, \
         follow the jurisdiction's formatting rules, and answer with structured JSON only.",
        instance.motion.motion_type, instance.motion.jurisdiction
    )
}

/// Build the user prompt for a generation phase.
pub fn build_phase_prompt(definition: &PhaseDefinition, instance: &WorkflowInstance) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "# Phase {}: {}\n\n{}",
        definition.code, definition.name, definition.instructions
    ));
    sections.push(motion_section(instance));

    if matches!(definition.code, PhaseCode::I | PhaseCode::III) {
        if let Some(documents) = documents_section(instance) {
            sections.push(documents);
        }
    }

    let prior: Vec<String> = definition
        .inputs
        .iter()
        .filter_map(|code| {
            instance.phase_outputs.get(code).map(|out| {
                format!(
                    "### Phase {}: {}\n```json\n{}\n```",
                    code,
                    code.definition().name,
                    pretty(&out.data)
                )
            })
        })
        .collect();
    if !prior.is_empty() {
        sections.push(format!("## Prior Work\n\n{}", prior.join("\n\n")));
    }

    if definition.code == PhaseCode::VIII {
        if let Some(draft) = instance.current_draft() {
            sections.push(format!("## Draft Under Revision\n\n{}", draft));
        }
        sections.push(format!(
            "## Revision Loop\n\nThis is revision {} of at most the configured limit.",
            instance.revision_loop_count
        ));
    }

    if let Some(feedback) = instance.operator_feedback.as_deref() {
        sections.push(format!("## Reviewer Feedback\n\nAddress this feedback from the supervising attorney:\n{}", feedback));
    }

    if definition.code == PhaseCode::X && instance.quality_bar_not_met {
        sections.push(
            "## Quality Disclosure\n\nThe draft did not reach the passing grade within the revision limit. \
             Include a prominent attorney-review notice in the delivery manifest."
                .to_string(),
        );
    }

    sections.push(output_section(definition));
    sections.join("\n\n")
}

fn motion_section(instance: &WorkflowInstance) -> String {
    let motion = &instance.motion;
    let mut lines = vec![
        "## Motion".to_string(),
        String::new(),
        format!("- Type: {}", motion.motion_type),
        format!("- Jurisdiction: {}", motion.jurisdiction),
        format!("- Complexity tier: {}", motion.tier),
        format!("- Order: {}", instance.order_id),
    ];
    if let Some(instructions) = motion.instructions.as_deref() {
        lines.push(format!("- Client instructions: {}", instructions));
    }
    lines.join("\n")
}

fn documents_section(instance: &WorkflowInstance) -> Option<String> {
    if instance.motion.documents.is_empty() {
        return None;
    }
    let docs: Vec<String> = instance
        .motion
        .documents
        .iter()
        .map(|doc| {
            let kind = doc.kind.as_deref().unwrap_or("document");
            match doc.text.as_deref() {
                Some(text) => format!(
                    "### {} ({})\n{}",
                    doc.name,
                    kind,
                    truncate_chars(text, MAX_DOCUMENT_CHARS)
                ),
                None => format!("### {} ({})\n(text not extracted)", doc.name, kind),
            }
        })
        .collect();
    Some(format!("## Source Documents\n\n{}", docs.join("\n\n")))
}

fn output_section(definition: &PhaseDefinition) -> String {
    let keys: Vec<String> = definition
        .response_keys()
        .iter()
        .map(|k| format!("\"{}\"", k))
        .collect();
    let extra = if definition.code == PhaseCode::III {
        "\nAlso include a boolean \"hold_required\"."
    } else {
        ""
    };
    format!(
        "## Output\n\nRespond with ONLY a JSON object containing the keys {}.{}",
        keys.join(", "),
        extra
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{DocumentRef, IntakeEvent};
    use crate::phase::PhaseOutput;
    use chrono::Utc;
    use serde_json::json;

    fn instance() -> WorkflowInstance {
        let event = IntakeEvent {
            order_id: "ord-7".into(),
            motion_type: "Motion to Compel".into(),
            jurisdiction: "California Superior Court".into(),
            documents: vec![DocumentRef {
                name: "complaint.pdf".into(),
                kind: Some("complaint".into()),
                text: Some("Plaintiff alleges breach.".into()),
            }],
            tier: None,
            instructions: Some("Emphasize meet-and-confer efforts".into()),
        };
        WorkflowInstance::from_intake(&event, Utc::now())
    }

    #[test]
    fn intake_prompt_includes_documents_and_output_keys() {
        let prompt = build_phase_prompt(PhaseCode::I.definition(), &instance());
        assert!(prompt.contains("# Phase I: Intake Analysis"));
        assert!(prompt.contains("Plaintiff alleges breach."));
        assert!(prompt.contains("Emphasize meet-and-confer efforts"));
        assert!(prompt.contains("\"case_summary\", \"issues\""));
    }

    #[test]
    fn prompt_threads_declared_inputs_only() {
        let mut wf = instance();
        wf.phase_outputs.insert(
            PhaseCode::I,
            PhaseOutput {
                loop_iteration: 0,
                data: json!({"case_summary": "SUMMARY-MARKER", "issues": []}),
                completed_at: Utc::now(),
            },
        );
        let prompt = build_phase_prompt(PhaseCode::II.definition(), &wf);
        assert!(prompt.contains("SUMMARY-MARKER"));
        assert!(!prompt.contains("Plaintiff alleges breach."));
    }

    #[test]
    fn evidence_prompt_requests_hold_flag() {
        let prompt = build_phase_prompt(PhaseCode::III.definition(), &instance());
        assert!(prompt.contains("hold_required"));
    }

    #[test]
    fn operator_feedback_and_quality_disclosure() {
        let mut wf = instance();
        wf.operator_feedback = Some("Cite the 2019 appellate decision".into());
        wf.quality_bar_not_met = true;
        let prompt = build_phase_prompt(PhaseCode::X.definition(), &wf);
        assert!(prompt.contains("Cite the 2019 appellate decision"));
        assert!(prompt.contains("Quality Disclosure"));
    }
}
