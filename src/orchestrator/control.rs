//! Operator transitions. Each one is a single version-checked commit.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::Orchestrator;
use crate::errors::WorkflowError;
use crate::store::{CommitEffects, CommitOutcome};
use crate::workflow::{WorkflowInstance, WorkflowStatus};

impl Orchestrator {
    /// Cancel a workflow. Clears phase history, counters and pending
    /// checkpoints in the same transaction.
    pub async fn cancel(&self, workflow_id: Uuid, reason: Option<String>) -> Result<WorkflowInstance, WorkflowError> {
        let mut wf = self.load(workflow_id).await?;
        if wf.status.is_terminal() {
            return Err(invalid(&wf, "cancel"));
        }
        let expected = wf.status_version;
        wf.reset(Utc::now());
        wf.status = WorkflowStatus::Cancelled;
        wf.status_reason = Some(reason.unwrap_or_else(|| "cancelled_by_operator".to_string()));
        let effects = CommitEffects {
            cancel_pending_checkpoints: Some("workflow_cancelled".to_string()),
            clear_citations: true,
            ..CommitEffects::none()
        };
        self.commit_control(expected, wf, effects, "cancel").await
    }

    /// Wipe all progress and start again from Phase I. Destructive, so the
    /// caller must confirm.
    pub async fn restart(&self, workflow_id: Uuid, confirm: bool) -> Result<WorkflowInstance, WorkflowError> {
        if !confirm {
            return Err(WorkflowError::ConfirmationRequired(workflow_id));
        }
        let mut wf = self.load(workflow_id).await?;
        let expected = wf.status_version;
        let discarded = wf.phase_outputs.len();
        wf.reset(Utc::now());
        let effects = CommitEffects {
            cancel_pending_checkpoints: Some("workflow_restarted".to_string()),
            clear_citations: true,
            ..CommitEffects::none()
        };
        let wf = self.commit_control(expected, wf, effects, "restart").await?;
        warn!(workflow_id = %workflow_id, discarded_phases = discarded, "workflow restarted from phase I");
        Ok(wf)
    }

    /// Pause a workflow that is pending or running.
    pub async fn hold(&self, workflow_id: Uuid, reason: Option<String>) -> Result<WorkflowInstance, WorkflowError> {
        let mut wf = self.load(workflow_id).await?;
        if !matches!(wf.status, WorkflowStatus::Pending | WorkflowStatus::Running) {
            return Err(invalid(&wf, "hold"));
        }
        let expected = wf.status_version;
        wf.status = WorkflowStatus::OnHold;
        wf.status_reason = Some(reason.unwrap_or_else(|| "operator_hold".to_string()));
        wf.release_claim();
        wf.updated_at = Utc::now();
        self.commit_control(expected, wf, CommitEffects::none(), "hold").await
    }

    pub async fn resume(&self, workflow_id: Uuid) -> Result<WorkflowInstance, WorkflowError> {
        let mut wf = self.load(workflow_id).await?;
        if wf.status != WorkflowStatus::OnHold {
            return Err(invalid(&wf, "resume"));
        }
        let expected = wf.status_version;
        wf.status = WorkflowStatus::Running;
        wf.status_reason = None;
        wf.updated_at = Utc::now();
        self.commit_control(expected, wf, CommitEffects::none(), "resume").await
    }

    /// Clear a BLOCKED status after an operator has dealt with the cause.
    /// The failed phase runs again on the next step, with `feedback` in its
    /// prompt when given.
    pub async fn unblock(&self, workflow_id: Uuid, feedback: Option<String>) -> Result<WorkflowInstance, WorkflowError> {
        let mut wf = self.load(workflow_id).await?;
        if wf.status != WorkflowStatus::Blocked {
            return Err(invalid(&wf, "unblock"));
        }
        let expected = wf.status_version;
        info!(
            workflow_id = %workflow_id,
            reason = wf.status_reason.as_deref().unwrap_or_default(),
            "clearing block"
        );
        wf.status = WorkflowStatus::Running;
        wf.status_reason = None;
        if feedback.is_some() {
            wf.operator_feedback = feedback;
        }
        wf.release_claim();
        wf.updated_at = Utc::now();
        self.commit_control(expected, wf, CommitEffects::none(), "unblock").await
    }

    async fn commit_control(
        &self,
        expected: i64,
        mut wf: WorkflowInstance,
        effects: CommitEffects,
        action: &'static str,
    ) -> Result<WorkflowInstance, WorkflowError> {
        match self.commit(expected, &wf, effects).await? {
            CommitOutcome::Committed => {
                wf.status_version = expected + 1;
                info!(
                    workflow_id = %wf.id,
                    action,
                    status = %wf.status,
                    version = wf.status_version,
                    "operator transition committed"
                );
                Ok(wf)
            }
            _ => Err(WorkflowError::ConcurrencyConflict {
                workflow_id: wf.id,
                expected,
            }),
        }
    }
}

fn invalid(wf: &WorkflowInstance, action: &'static str) -> WorkflowError {
    WorkflowError::InvalidTransition {
        workflow_id: wf.id,
        action,
        status: wf.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::fixture::{event, harness};
    use super::super::{OrchestratorSettings, StepOutcome};
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use crate::phase::PhaseCode;

    #[tokio::test]
    async fn restart_requires_confirmation() {
        let h = harness(OrchestratorSettings::default());
        let (wf, _) = h.orchestrator.intake(&event("ord-r", "Motion to Compel")).await.unwrap();
        h.orchestrator.step(wf.id).await.unwrap();
        h.orchestrator.step(wf.id).await.unwrap();

        let err = h.orchestrator.restart(wf.id, false).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ConfirmationRequired(_)));
        assert_eq!(h.orchestrator.load(wf.id).await.unwrap().current_phase, Some(PhaseCode::II));

        let restarted = h.orchestrator.restart(wf.id, true).await.unwrap();
        assert_eq!(restarted.status, WorkflowStatus::Pending);
        assert_eq!(restarted.current_phase, None);
        assert!(restarted.phase_outputs.is_empty());
        let stored = h.orchestrator.load(wf.id).await.unwrap();
        assert_eq!(stored, restarted);
        assert_eq!(stored.next_phase(), Some(PhaseCode::I));
    }

    #[tokio::test]
    async fn cancel_clears_state_and_pending_checkpoints() {
        let h = harness(OrchestratorSettings::default());
        let (wf, _) = h.orchestrator.intake(&event("ord-c", "Motion to Compel")).await.unwrap();
        h.generation.push(
            PhaseCode::III,
            &json!({"evidence_map": {}, "evidence_gaps": [], "hold_required": true}).to_string(),
        );
        let parked = h.orchestrator.run_until_parked(wf.id).await.unwrap();
        let StepOutcome::AwaitingCheckpoint { checkpoint_id: Some(cp), .. } = parked else {
            panic!("expected HOLD, got {parked:?}");
        };

        let cancelled = h.orchestrator.cancel(wf.id, None).await.unwrap();
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
        assert!(cancelled.phase_outputs.is_empty());
        assert!(cancelled.checkpoint_pending.is_none());
        let checkpoint = h.store.call(move |db| db.get_checkpoint(cp)).await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Cancelled);

        assert_eq!(h.orchestrator.step(wf.id).await.unwrap(), StepOutcome::Cancelled);
        let err = h.orchestrator.cancel(wf.id, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { action: "cancel", .. }));
    }

    #[tokio::test]
    async fn hold_and_resume() {
        let h = harness(OrchestratorSettings::default());
        let (wf, _) = h.orchestrator.intake(&event("ord-h", "Motion to Compel")).await.unwrap();
        h.orchestrator.hold(wf.id, Some("client call".into())).await.unwrap();
        assert_eq!(h.orchestrator.step(wf.id).await.unwrap(), StepOutcome::OnHold);
        assert_eq!(h.generation.total_calls(), 0);

        assert!(h.orchestrator.hold(wf.id, None).await.is_err());
        h.orchestrator.resume(wf.id).await.unwrap();
        assert!(matches!(
            h.orchestrator.step(wf.id).await.unwrap(),
            StepOutcome::Advanced { phase: PhaseCode::I, .. }
        ));
    }

    #[tokio::test]
    async fn unblock_reruns_failed_phase_with_feedback() {
        let h = harness(OrchestratorSettings::default());
        let (wf, _) = h.orchestrator.intake(&event("ord-u", "Motion to Compel")).await.unwrap();
        h.generation.push(PhaseCode::I, "not json");
        assert!(matches!(h.orchestrator.step(wf.id).await.unwrap(), StepOutcome::Blocked { .. }));

        assert!(h.orchestrator.resume(wf.id).await.is_err());
        let unblocked = h
            .orchestrator
            .unblock(wf.id, Some("Return JSON only".into()))
            .await
            .unwrap();
        assert_eq!(unblocked.status, WorkflowStatus::Running);

        let outcome = h.orchestrator.step(wf.id).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advanced { phase: PhaseCode::I, .. }));
        assert!(h.generation.last_request().unwrap().prompt.contains("Return JSON only"));
    }

    #[tokio::test]
    async fn stale_snapshot_cannot_overwrite_operator_transition() {
        let h = harness(OrchestratorSettings::default());
        let (wf, _) = h.orchestrator.intake(&event("ord-s", "Motion to Compel")).await.unwrap();
        let stale = h.orchestrator.load(wf.id).await.unwrap();
        h.orchestrator.hold(wf.id, None).await.unwrap();

        assert_eq!(h.orchestrator.step_with(stale).await.unwrap(), StepOutcome::InProgress);
        assert_eq!(h.generation.total_calls(), 0);
        assert_eq!(h.orchestrator.load(wf.id).await.unwrap().status, WorkflowStatus::OnHold);
    }
}
