//! Workflow lifecycle commands: intake, inspection, stepping and operator
//! transitions.

use anyhow::{Context, Result, bail};
use serde_json::json;
use uuid::Uuid;

use docket::errors::WorkflowError;
use docket::motion::IntakeEvent;
use docket::orchestrator::{Orchestrator, StepOutcome};
use docket::workflow::{StatusSnapshot, WorkflowInstance, WorkflowStatus};

use super::{print_json, read_input};

pub async fn cmd_intake(orchestrator: &Orchestrator, file: Option<&std::path::Path>, json: bool) -> Result<()> {
    let raw = read_input(file)?;
    let event: IntakeEvent = serde_json::from_str(&raw).context("Invalid intake event JSON")?;
    let (instance, created) = orchestrator.intake(&event).await?;

    if json {
        return print_json(&json!({ "workflow_id": instance.id, "created": created, "tier": instance.motion.tier }));
    }
    if created {
        println!("Created workflow {} for order {}", instance.id, instance.order_id);
    } else {
        println!("Order {} already has workflow {}", instance.order_id, instance.id);
    }
    println!("  Motion: {} ({})", instance.motion.motion_type, instance.motion.jurisdiction);
    println!("  Tier:   {}", instance.motion.tier);
    Ok(())
}

pub async fn cmd_list(orchestrator: &Orchestrator, status: Option<WorkflowStatus>, json: bool) -> Result<()> {
    let workflows = orchestrator.list(status).await?;
    if json {
        let rows: Vec<_> = workflows
            .iter()
            .map(|wf| {
                json!({
                    "workflow_id": wf.id,
                    "order_id": wf.order_id,
                    "status": wf.status,
                    "tier": wf.motion.tier,
                    "current_phase": wf.current_phase,
                    "progress_percent": wf.progress_percent(),
                })
            })
            .collect();
        return print_json(&rows);
    }

    if workflows.is_empty() {
        println!("No workflows.");
        return Ok(());
    }
    println!("{:<38} {:<16} {:<20} {:<4} {:>5}", "WORKFLOW", "ORDER", "STATUS", "TIER", "DONE");
    for wf in &workflows {
        println!(
            "{:<38} {:<16} {:<20} {:<4} {:>4}%",
            wf.id,
            wf.order_id,
            wf.status.as_str(),
            wf.motion.tier.as_str(),
            wf.progress_percent()
        );
    }
    Ok(())
}

pub async fn cmd_status(orchestrator: &Orchestrator, workflow_id: Uuid, json: bool) -> Result<()> {
    let snapshot = orchestrator.status(workflow_id).await?;
    if json {
        return print_json(&snapshot);
    }
    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(s: &StatusSnapshot) {
    println!();
    println!("Workflow {} (order {})", s.workflow_id, s.order_id);
    println!("  Status:     {}", s.status);
    if let Some(reason) = &s.status_reason {
        println!("  Reason:     {}", reason);
    }
    println!("  Tier:       {}", s.tier);
    println!(
        "  Phase:      {} -> {}",
        s.last_completed_phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        s.next_phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
    );
    println!("  Progress:   {}%", s.progress_percent);
    println!("  Citations:  {}", s.citation_count);
    if let Some(grade) = &s.judge_grade {
        println!(
            "  Grade:      {} ({:.1}){}",
            grade.letter,
            grade.numeric,
            if grade.passed { "" } else { " below bar" }
        );
    }
    if s.revision_loop_count > 0 {
        println!("  Revisions:  {}", s.revision_loop_count);
    }
    if s.quality_bar_not_met {
        println!("  Delivered without meeting the quality bar.");
    }
    if let Some(cp) = &s.checkpoint_pending {
        println!();
        println!("  Pending {} checkpoint {}", cp.checkpoint_type.as_str(), cp.id);
        println!("    Before phase {}: {}", cp.phase, cp.reason);
    }
    println!();
}

fn report_outcome(workflow_id: Uuid, outcome: &StepOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({ "workflow_id": workflow_id, "result": outcome }));
    }
    println!("{}", outcome);
    Ok(())
}

pub async fn cmd_step(orchestrator: &Orchestrator, workflow_id: Uuid, json: bool) -> Result<()> {
    let outcome = orchestrator.step(workflow_id).await?;
    report_outcome(workflow_id, &outcome, json)
}

pub async fn cmd_run(orchestrator: &Orchestrator, workflow_id: Uuid, json: bool) -> Result<()> {
    let outcome = orchestrator.run_until_parked(workflow_id).await?;
    report_outcome(workflow_id, &outcome, json)?;
    if !json {
        print_snapshot(&orchestrator.status(workflow_id).await?);
    }
    Ok(())
}

fn report_transition(action: &str, wf: &WorkflowInstance, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({
            "workflow_id": wf.id,
            "action": action,
            "status": wf.status,
            "status_version": wf.status_version,
        }));
    }
    println!("{}: workflow {} is now {}", action, wf.id, wf.status);
    Ok(())
}

pub async fn cmd_cancel(orchestrator: &Orchestrator, workflow_id: Uuid, reason: Option<String>, json: bool) -> Result<()> {
    let wf = orchestrator.cancel(workflow_id, reason).await?;
    report_transition("cancel", &wf, json)
}

pub async fn cmd_restart(orchestrator: &Orchestrator, workflow_id: Uuid, confirm: bool, json: bool) -> Result<()> {
    let wf = match orchestrator.restart(workflow_id, confirm).await {
        Err(WorkflowError::ConfirmationRequired(id)) => {
            bail!("Restarting {} discards every phase output; re-run with --confirm", id)
        }
        other => other?,
    };
    report_transition("restart", &wf, json)
}

pub async fn cmd_hold(orchestrator: &Orchestrator, workflow_id: Uuid, reason: Option<String>, json: bool) -> Result<()> {
    let wf = orchestrator.hold(workflow_id, reason).await?;
    report_transition("hold", &wf, json)
}

pub async fn cmd_resume(orchestrator: &Orchestrator, workflow_id: Uuid, json: bool) -> Result<()> {
    let wf = orchestrator.resume(workflow_id).await?;
    report_transition("resume", &wf, json)
}

pub async fn cmd_unblock(
    orchestrator: &Orchestrator,
    workflow_id: Uuid,
    feedback: Option<String>,
    json: bool,
) -> Result<()> {
    let wf = orchestrator.unblock(workflow_id, feedback).await?;
    report_transition("unblock", &wf, json)
}

pub async fn cmd_audit(orchestrator: &Orchestrator, workflow_id: Uuid, json: bool) -> Result<()> {
    orchestrator.load(workflow_id).await?;
    let (executions, gates) = orchestrator
        .store()
        .call(move |db| Ok((db.list_phase_executions(workflow_id)?, db.list_gate_checks(workflow_id)?)))
        .await?;

    if json {
        return print_json(&json!({ "phase_executions": executions, "gate_checks": gates }));
    }

    println!();
    println!("Phase executions ({}):", executions.len());
    for e in &executions {
        println!(
            "  {} {:<5} loop {} v{} {:<17} {}ms {}",
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            e.phase.to_string(),
            e.loop_iteration,
            e.status_version,
            e.status.as_str(),
            e.duration_ms,
            e.error.as_deref().unwrap_or_default()
        );
    }
    println!();
    println!("Gate checks ({}):", gates.len());
    for g in &gates {
        let verdict = if g.allowed {
            "allowed".to_string()
        } else {
            format!("denied, missing {}", g.missing.join(", "))
        };
        println!(
            "  {} {:<5} v{} {}",
            g.checked_at.format("%Y-%m-%d %H:%M:%S"),
            g.phase.to_string(),
            g.status_version,
            verdict
        );
    }
    println!();
    Ok(())
}
