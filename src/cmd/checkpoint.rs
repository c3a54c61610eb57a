//! Checkpoint commands: operator responses and the deadline sweep.

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use docket::checkpoint::{ApprovalAffirmation, CheckpointAction, CheckpointResponse, ResponseEffect};
use docket::orchestrator::Orchestrator;
use docket::phase::PhaseCode;

use super::print_json;

/// Assemble a response from CLI flags.
pub fn build_response(
    action: CheckpointAction,
    feedback: Option<String>,
    responder: Option<String>,
    affirm_all: bool,
    affirm: &[String],
    expected_phase: Option<PhaseCode>,
) -> Result<CheckpointResponse> {
    let mut affirmation = if affirm_all {
        ApprovalAffirmation::all()
    } else {
        ApprovalAffirmation::default()
    };
    for item in affirm {
        match item.as_str() {
            "completeness" => affirmation.completeness = true,
            "citation_accuracy" => affirmation.citation_accuracy = true,
            "standards_compliance" => affirmation.standards_compliance = true,
            "no_conflicts" => affirmation.no_conflicts = true,
            other => bail!(
                "Unknown affirmation '{}'. Valid values: completeness, citation_accuracy, standards_compliance, no_conflicts",
                other
            ),
        }
    }

    Ok(CheckpointResponse {
        action,
        feedback,
        responder: responder.or_else(|| std::env::var("USER").ok()),
        affirmation,
        expected_phase,
    })
}

pub async fn cmd_respond(
    orchestrator: &Orchestrator,
    checkpoint_id: Uuid,
    response: CheckpointResponse,
    json: bool,
) -> Result<()> {
    let action = response.action;
    let (effect, wf) = orchestrator.respond_to_checkpoint(checkpoint_id, response).await?;

    if json {
        return print_json(&json!({
            "checkpoint_id": checkpoint_id,
            "action": action.as_str(),
            "effect": effect,
            "workflow_id": wf.id,
            "status": wf.status,
        }));
    }

    match effect {
        ResponseEffect::Resumed { phase } => println!("Approved. Phase {} may now run.", phase),
        ResponseEffect::Rewound { redo: Some(phase) } => {
            println!("Changes requested. Phase {} will run again with the feedback.", phase)
        }
        ResponseEffect::Rewound { redo: None } => println!("Changes requested."),
        ResponseEffect::Cancelled => println!("Workflow {} cancelled.", wf.id),
        ResponseEffect::Acknowledged => println!("Notification acknowledged."),
    }
    println!("Workflow {} is {}", wf.id, wf.status);
    Ok(())
}

pub async fn cmd_sweep(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let report = orchestrator.sweep(Utc::now()).await?;
    if json {
        return print_json(&report);
    }
    if report.is_empty() {
        println!("Nothing due.");
    } else {
        println!(
            "Reminders: {}  Escalations: {}  Timed out: {}  Deferred: {}",
            report.reminders_sent, report.escalations_sent, report.timed_out, report.deferred
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirm_all_sets_every_item() {
        let response = build_response(CheckpointAction::Approve, None, Some("ops".into()), true, &[], None).unwrap();
        assert!(response.affirmation.missing().is_empty());
        assert_eq!(response.responder.as_deref(), Some("ops"));
    }

    #[test]
    fn individual_affirmations_accumulate() {
        let items = vec!["completeness".to_string(), "no_conflicts".to_string()];
        let response = build_response(CheckpointAction::Approve, None, None, false, &items, None).unwrap();
        assert_eq!(
            response.affirmation.missing(),
            vec!["citation_accuracy", "standards_compliance"]
        );
    }

    #[test]
    fn unknown_affirmation_is_rejected() {
        let items = vec!["vibes".to_string()];
        let err = build_response(CheckpointAction::Approve, None, None, false, &items, None).unwrap_err();
        assert!(err.to_string().contains("vibes"));
    }
}
