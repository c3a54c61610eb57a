use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    Checkpoint, CheckpointAction, CheckpointNotifier, CheckpointResponse, CheckpointScheduler, CheckpointStatus,
};
use crate::errors::WorkflowError;
use crate::phase::{self, CheckpointRule, CheckpointType, PhaseCode};
use crate::policy;
use crate::store::{CheckpointResolution, CommitEffects, CommitOutcome, Store};
use crate::workflow::{WorkflowInstance, WorkflowStatus};

/// Status reason recorded when a HOLD checkpoint auto-cancels.
pub const HOLD_TIMEOUT: &str = "hold_timeout";

const NOTICE_CREATED: &str = "created";
const NOTICE_REMINDER: &str = "reminder";
const NOTICE_ESCALATION: &str = "escalation";
const NOTICE_TIMED_OUT: &str = "timed_out";

/// Attempts at committing an auto-cancel before leaving it to the next sweep.
const TIMEOUT_COMMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    Reminder,
    Escalation,
    AutoCancel,
}

impl DeadlineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::Escalation => "escalation",
            Self::AutoCancel => "auto_cancel",
        }
    }
}

impl std::str::FromStr for DeadlineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(Self::Reminder),
            "escalation" => Ok(Self::Escalation),
            "auto_cancel" | "auto-cancel" => Ok(Self::AutoCancel),
            _ => Err(format!("Invalid deadline kind: {}", s)),
        }
    }
}

/// HOLD deadlines, measured from checkpoint creation.
#[derive(Debug, Clone)]
pub struct CheckpointSettings {
    pub remind_after: Duration,
    pub escalate_after: Duration,
    pub auto_cancel_after: Duration,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            remind_after: Duration::hours(48),
            escalate_after: Duration::hours(72),
            auto_cancel_after: Duration::days(7),
        }
    }
}

/// What a checkpoint response did to the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ResponseEffect {
    /// Approved; the locked phase may now run.
    Resumed { phase: PhaseCode },
    /// Changes requested; `redo` runs again with the feedback.
    Rewound { redo: Option<PhaseCode> },
    Cancelled,
    /// A notification was acknowledged.
    Acknowledged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub reminders_sent: usize,
    pub escalations_sent: usize,
    pub timed_out: usize,
    /// Timeouts left for the next sweep after repeated conflicts.
    pub deferred: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reminders_sent == 0 && self.escalations_sent == 0 && self.timed_out == 0 && self.deferred == 0
    }
}

pub struct CheckpointManager {
    store: Store,
    settings: CheckpointSettings,
    scheduler: Arc<dyn CheckpointScheduler>,
    notifier: Arc<dyn CheckpointNotifier>,
}

impl CheckpointManager {
    pub fn new(
        store: Store,
        settings: CheckpointSettings,
        scheduler: Arc<dyn CheckpointScheduler>,
        notifier: Arc<dyn CheckpointNotifier>,
    ) -> Self {
        Self {
            store,
            settings,
            scheduler,
            notifier,
        }
    }

    /// The checkpoint type guarding `phase` for this workflow, if any.
    pub fn checkpoint_type_for(phase: PhaseCode, instance: &WorkflowInstance) -> Option<CheckpointType> {
        phase
            .definition()
            .checkpoint
            .map(|rule| rule.resolve(&instance.phase_outputs))
    }

    /// Build (but do not persist) a checkpoint locked in front of `phase`.
    pub fn build(
        &self,
        instance: &WorkflowInstance,
        phase: PhaseCode,
        checkpoint_type: CheckpointType,
        now: DateTime<Utc>,
    ) -> Checkpoint {
        let hold = checkpoint_type == CheckpointType::Hold;
        Checkpoint {
            id: Uuid::new_v4(),
            workflow_id: instance.id,
            phase,
            checkpoint_type,
            status: CheckpointStatus::Pending,
            reason: checkpoint_reason(instance, phase, checkpoint_type),
            details: checkpoint_details(instance, phase),
            created_at: now,
            resolved_at: None,
            resolved_by: None,
            feedback: None,
            resolution_reason: None,
            remind_at: hold.then(|| now + self.settings.remind_after),
            escalate_at: hold.then(|| now + self.settings.escalate_after),
            auto_cancel_at: hold.then(|| now + self.settings.auto_cancel_after),
            reminder_sent_at: None,
            escalated_at: None,
        }
    }

    /// Announce a committed checkpoint and register its deadlines.
    pub async fn announce(&self, checkpoint: &Checkpoint) {
        let deadlines = [
            (DeadlineKind::Reminder, checkpoint.remind_at),
            (DeadlineKind::Escalation, checkpoint.escalate_at),
            (DeadlineKind::AutoCancel, checkpoint.auto_cancel_at),
        ];
        for (kind, at) in deadlines {
            if let Some(at) = at {
                let result = self.scheduler.schedule(checkpoint.id, kind, at).await;
                let _ = policy::CHECKPOINT_SCHEDULE.resolve(result, || ());
            }
        }
        let result = self.notifier.notify(checkpoint, NOTICE_CREATED).await;
        let _ = policy::CHECKPOINT_NOTIFY.resolve(result, || ());
    }

    /// Apply an operator response to a checkpoint.
    pub async fn respond(
        &self,
        checkpoint_id: Uuid,
        response: CheckpointResponse,
        now: DateTime<Utc>,
    ) -> Result<(ResponseEffect, WorkflowInstance), WorkflowError> {
        let checkpoint = self
            .store
            .call(move |db| db.get_checkpoint(checkpoint_id))
            .await
            .map_err(WorkflowError::Store)?
            .ok_or(WorkflowError::CheckpointNotFound(checkpoint_id))?;
        let workflow_id = checkpoint.workflow_id;
        let mut instance = self
            .store
            .call(move |db| db.get_workflow(workflow_id))
            .await
            .map_err(WorkflowError::Store)?
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))?;

        let stale = |reason: String| WorkflowError::CheckpointStale {
            checkpoint_id,
            reason,
        };

        if !checkpoint.is_pending() {
            return Err(stale(format!("checkpoint is already {}", checkpoint.status)));
        }
        if let Some(expected) = response.expected_phase
            && expected != checkpoint.phase
        {
            return Err(stale(format!(
                "checkpoint is locked to phase {}, response targets phase {}",
                checkpoint.phase, expected
            )));
        }

        let mut resolution = CheckpointResolution {
            id: checkpoint.id,
            status: CheckpointStatus::Approved,
            resolved_by: response.responder.clone(),
            feedback: response.feedback.clone(),
            reason: None,
            resolved_at: now,
        };

        if checkpoint.checkpoint_type == CheckpointType::Notification {
            if response.action != CheckpointAction::Approve {
                return Err(WorkflowError::InvalidTransition {
                    workflow_id,
                    action: response.action.as_str(),
                    status: "NOTIFICATION checkpoint".to_string(),
                });
            }
            resolution.reason = Some("acknowledged".to_string());
            let acknowledged = self
                .store
                .call(move |db| db.resolve_checkpoint(&resolution))
                .await
                .map_err(WorkflowError::Store)?;
            if !acknowledged {
                return Err(stale("checkpoint was resolved concurrently".to_string()));
            }
            info!(checkpoint_id = %checkpoint_id, workflow_id = %workflow_id, "notification acknowledged");
            return Ok((ResponseEffect::Acknowledged, instance));
        }

        if instance.status != WorkflowStatus::AwaitingCheckpoint {
            return Err(stale(format!("workflow is {}", instance.status)));
        }
        if instance.checkpoint_pending != Some(checkpoint.id) {
            return Err(stale("workflow is parked on a different checkpoint".to_string()));
        }
        if instance.next_phase() != Some(checkpoint.phase) {
            return Err(stale(format!(
                "workflow has moved past phase {}",
                checkpoint.phase
            )));
        }

        let expected = instance.status_version;
        let mut effects = CommitEffects::none();
        instance.checkpoint_pending = None;
        instance.status_reason = None;
        instance.updated_at = now;

        let effect = match response.action {
            CheckpointAction::Approve => {
                if checkpoint.checkpoint_type == CheckpointType::Blocking {
                    let missing = response.affirmation.missing();
                    if !missing.is_empty() {
                        return Err(WorkflowError::AffirmationIncomplete { missing });
                    }
                }
                instance.status = WorkflowStatus::Running;
                instance.cleared_checkpoints.insert(checkpoint.phase);
                ResponseEffect::Resumed {
                    phase: checkpoint.phase,
                }
            }
            CheckpointAction::RequestChanges => {
                resolution.status = CheckpointStatus::ChangesRequested;
                let redo = instance.current_phase;
                if let Some(code) = redo {
                    instance.phase_outputs.remove(&code);
                    instance.current_phase = phase::previous_mainline(code, &instance.motion);
                }
                instance.status = WorkflowStatus::Running;
                instance.cleared_checkpoints.remove(&checkpoint.phase);
                instance.operator_feedback = response.feedback.clone();
                ResponseEffect::Rewound { redo }
            }
            CheckpointAction::Cancel => {
                resolution.status = CheckpointStatus::Cancelled;
                resolution.reason = Some("cancelled_by_operator".to_string());
                instance.status = WorkflowStatus::Cancelled;
                instance.status_reason = Some("cancelled_at_checkpoint".to_string());
                instance.release_claim();
                effects.cancel_pending_checkpoints = Some("workflow_cancelled".to_string());
                ResponseEffect::Cancelled
            }
        };
        effects.resolve_checkpoint = Some(resolution);

        let stored = instance.clone();
        let outcome = self
            .store
            .call(move |db| db.commit_workflow(expected, &stored, &effects))
            .await
            .map_err(WorkflowError::Store)?;
        match outcome {
            CommitOutcome::Committed => {
                instance.status_version = expected + 1;
                info!(
                    workflow_id = %workflow_id,
                    checkpoint_id = %checkpoint_id,
                    action = response.action.as_str(),
                    version = instance.status_version,
                    "checkpoint resolved"
                );
                Ok((effect, instance))
            }
            CommitOutcome::Conflict => Err(WorkflowError::ConcurrencyConflict { workflow_id, expected }),
            CommitOutcome::CheckpointStale => Err(stale("checkpoint was resolved concurrently".to_string())),
        }
    }

    /// Send due reminders and escalations and auto-cancel expired HOLDs.
    /// Safe to run repeatedly and concurrently.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, WorkflowError> {
        let mut report = SweepReport::default();

        let reminders = self
            .store
            .call(move |db| db.due_reminders(now))
            .await
            .map_err(WorkflowError::Store)?;
        for checkpoint in reminders {
            if self.send_reminder(&checkpoint, now).await? {
                report.reminders_sent += 1;
            }
        }

        let escalations = self
            .store
            .call(move |db| db.due_escalations(now))
            .await
            .map_err(WorkflowError::Store)?;
        for checkpoint in escalations {
            if self.send_escalation(&checkpoint, now).await? {
                report.escalations_sent += 1;
            }
        }

        let timeouts = self
            .store
            .call(move |db| db.due_timeouts(now))
            .await
            .map_err(WorkflowError::Store)?;
        for checkpoint in timeouts {
            if self.time_out(&checkpoint, now).await? {
                report.timed_out += 1;
            } else {
                report.deferred += 1;
            }
        }

        if !report.is_empty() {
            info!(
                reminders = report.reminders_sent,
                escalations = report.escalations_sent,
                timed_out = report.timed_out,
                deferred = report.deferred,
                "checkpoint sweep finished"
            );
        }
        Ok(report)
    }

    /// Handle a deadline callback delivered by the external scheduler.
    /// Returns whether anything changed; early or duplicate deliveries are no-ops.
    pub async fn handle_deadline(
        &self,
        checkpoint_id: Uuid,
        kind: DeadlineKind,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkflowError> {
        let Some(checkpoint) = self
            .store
            .call(move |db| db.get_checkpoint(checkpoint_id))
            .await
            .map_err(WorkflowError::Store)?
        else {
            return Err(WorkflowError::CheckpointNotFound(checkpoint_id));
        };
        if !checkpoint.is_pending() {
            return Ok(false);
        }
        let due = |at: Option<DateTime<Utc>>| at.is_some_and(|at| at <= now);
        match kind {
            DeadlineKind::Reminder if due(checkpoint.remind_at) => self.send_reminder(&checkpoint, now).await,
            DeadlineKind::Escalation if due(checkpoint.escalate_at) => self.send_escalation(&checkpoint, now).await,
            DeadlineKind::AutoCancel if due(checkpoint.auto_cancel_at) => self.time_out(&checkpoint, now).await,
            _ => Ok(false),
        }
    }

    async fn send_reminder(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<bool, WorkflowError> {
        let id = checkpoint.id;
        let claimed = self
            .store
            .call(move |db| db.mark_reminder_sent(id, now))
            .await
            .map_err(WorkflowError::Store)?;
        if claimed {
            let result = self.notifier.notify(checkpoint, NOTICE_REMINDER).await;
            let _ = policy::CHECKPOINT_NOTIFY.resolve(result, || ());
        }
        Ok(claimed)
    }

    async fn send_escalation(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<bool, WorkflowError> {
        let id = checkpoint.id;
        let claimed = self
            .store
            .call(move |db| db.mark_escalated(id, now))
            .await
            .map_err(WorkflowError::Store)?;
        if claimed {
            let result = self.notifier.notify(checkpoint, NOTICE_ESCALATION).await;
            let _ = policy::CHECKPOINT_NOTIFY.resolve(result, || ());
        }
        Ok(claimed)
    }

    /// Auto-cancel a HOLD: checkpoint to TIMED_OUT and workflow to CANCELLED
    /// in one transaction. Returns false when the commit kept conflicting.
    async fn time_out(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<bool, WorkflowError> {
        let resolution = CheckpointResolution {
            id: checkpoint.id,
            status: CheckpointStatus::TimedOut,
            resolved_by: Some("system".to_string()),
            feedback: None,
            reason: Some(HOLD_TIMEOUT.to_string()),
            resolved_at: now,
        };

        for _ in 0..TIMEOUT_COMMIT_ATTEMPTS {
            let workflow_id = checkpoint.workflow_id;
            let Some(mut instance) = self
                .store
                .call(move |db| db.get_workflow(workflow_id))
                .await
                .map_err(WorkflowError::Store)?
            else {
                return Err(WorkflowError::WorkflowNotFound(workflow_id));
            };

            if instance.status.is_terminal() || instance.checkpoint_pending != Some(checkpoint.id) {
                // Workflow moved on without this checkpoint; just close it.
                let resolution = resolution.clone();
                let closed = self
                    .store
                    .call(move |db| db.resolve_checkpoint(&resolution))
                    .await
                    .map_err(WorkflowError::Store)?;
                return Ok(closed);
            }

            let expected = instance.status_version;
            instance.status = WorkflowStatus::Cancelled;
            instance.status_reason = Some(HOLD_TIMEOUT.to_string());
            instance.checkpoint_pending = None;
            instance.release_claim();
            instance.updated_at = now;
            let effects = CommitEffects {
                resolve_checkpoint: Some(resolution.clone()),
                cancel_pending_checkpoints: Some(HOLD_TIMEOUT.to_string()),
                ..CommitEffects::none()
            };
            let outcome = self
                .store
                .call(move |db| db.commit_workflow(expected, &instance, &effects))
                .await
                .map_err(WorkflowError::Store)?;
            match outcome {
                CommitOutcome::Committed => {
                    warn!(
                        workflow_id = %workflow_id,
                        checkpoint_id = %checkpoint.id,
                        phase = %checkpoint.phase,
                        "HOLD checkpoint timed out, workflow cancelled"
                    );
                    let result = self.notifier.notify(checkpoint, NOTICE_TIMED_OUT).await;
                    let _ = policy::CHECKPOINT_NOTIFY.resolve(result, || ());
                    return Ok(true);
                }
                CommitOutcome::CheckpointStale => return Ok(false),
                CommitOutcome::Conflict => continue,
            }
        }
        warn!(checkpoint_id = %checkpoint.id, "auto-cancel kept conflicting, deferring to next sweep");
        Ok(false)
    }
}

fn checkpoint_reason(instance: &WorkflowInstance, phase: PhaseCode, checkpoint_type: CheckpointType) -> String {
    let name = phase.definition().name;
    match checkpoint_type {
        CheckpointType::Hold => {
            let detail = hold_source(phase)
                .and_then(|source| instance.phase_outputs.get(&source))
                .and_then(|out| out.data.get("hold_reason"))
                .and_then(Value::as_str);
            match detail {
                Some(detail) => format!("Hold before {}: {}", name, detail),
                None => format!("Hold before {}: prior phase requested attorney review", name),
            }
        }
        CheckpointType::Notification => format!("{} starting", name),
        CheckpointType::Blocking if instance.quality_bar_not_met => format!(
            "Attorney approval required before {} (quality bar not met after {} revision loops)",
            name, instance.revision_loop_count
        ),
        CheckpointType::Blocking => format!("Attorney approval required before {}", name),
    }
}

fn hold_source(phase: PhaseCode) -> Option<PhaseCode> {
    match phase.definition().checkpoint {
        Some(CheckpointRule::HoldWhenFlagged { source, .. }) => Some(source),
        _ => None,
    }
}

fn checkpoint_details(instance: &WorkflowInstance, phase: PhaseCode) -> Value {
    let mut details = json!({
        "phase": phase,
        "tier": instance.motion.tier,
        "motion_type": instance.motion.motion_type,
        "revision_loop_count": instance.revision_loop_count,
        "quality_bar_not_met": instance.quality_bar_not_met,
    });
    if let Some(grade) = &instance.judge_grade {
        details["judge_grade"] = json!(grade);
    }
    if let Some(source) = hold_source(phase)
        && let Some(gaps) = instance
            .phase_outputs
            .get(&source)
            .and_then(|out| out.data.get("evidence_gaps"))
    {
        details["evidence_gaps"] = gaps.clone();
    }
    let latest_report = [PhaseCode::VII1, PhaseCode::V1]
        .iter()
        .find_map(|code| instance.phase_outputs.get(code))
        .and_then(|out| out.data.get("citation_report"));
    if let Some(report) = latest_report {
        details["citation_report"] = report.clone();
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ApprovalAffirmation;
    use crate::motion::IntakeEvent;
    use crate::phase::PhaseOutput;
    use crate::testing::{RecordingNotifier, RecordingScheduler};

    struct Fixture {
        manager: CheckpointManager,
        store: Store,
        notifier: Arc<RecordingNotifier>,
        scheduler: Arc<RecordingScheduler>,
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingScheduler::default())
    }

    fn fixture_with(scheduler: RecordingScheduler) -> Fixture {
        let store = Store::in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Arc::new(scheduler);
        let manager = CheckpointManager::new(
            store.clone(),
            CheckpointSettings::default(),
            scheduler.clone(),
            notifier.clone(),
        );
        Fixture {
            manager,
            store,
            notifier,
            scheduler,
        }
    }

    fn output(data: Value) -> PhaseOutput {
        PhaseOutput {
            loop_iteration: 0,
            data,
            completed_at: Utc::now(),
        }
    }

    /// A workflow parked on a checkpoint in front of `phase`, committed at version 1.
    async fn parked(fx: &Fixture, phase: PhaseCode, checkpoint_type: CheckpointType, created: DateTime<Utc>) -> (WorkflowInstance, Checkpoint) {
        let event = IntakeEvent {
            order_id: format!("ord-{}", Uuid::new_v4()),
            motion_type: "Motion to Compel".into(),
            jurisdiction: "CA".into(),
            documents: vec![],
            tier: None,
            instructions: None,
        };
        let mut wf = WorkflowInstance::from_intake(&event, created);
        let inserted = wf.clone();
        fx.store.call(move |db| db.insert_workflow(&inserted).map(|_| ())).await.unwrap();

        for code in phase::mainline(&wf.motion) {
            if code >= phase {
                break;
            }
            let keys = code.definition().required_output_keys;
            let mut data = serde_json::Map::new();
            for key in keys {
                data.insert(key.to_string(), json!("x"));
            }
            if code == PhaseCode::III {
                data.insert("hold_required".into(), json!(true));
                data.insert("hold_reason".into(), json!("key witness unavailable"));
            }
            wf.phase_outputs.insert(code, output(Value::Object(data)));
            wf.current_phase = Some(code);
        }
        let cp = fx.manager.build(&wf, phase, checkpoint_type, created);
        wf.status = WorkflowStatus::AwaitingCheckpoint;
        wf.checkpoint_pending = Some(cp.id);
        let effects = CommitEffects {
            new_checkpoint: Some(cp.clone()),
            ..CommitEffects::none()
        };
        let stored = wf.clone();
        let outcome = fx
            .store
            .call(move |db| db.commit_workflow(0, &stored, &effects))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
        wf.status_version = 1;
        (wf, cp)
    }

    #[tokio::test]
    async fn hold_checkpoint_gets_deadlines_and_reason() {
        let fx = fixture();
        let now = Utc::now();
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, now).await;
        assert_eq!(cp.remind_at, Some(now + Duration::hours(48)));
        assert_eq!(cp.escalate_at, Some(now + Duration::hours(72)));
        assert_eq!(cp.auto_cancel_at, Some(now + Duration::days(7)));
        assert!(cp.reason.contains("key witness unavailable"));

        fx.manager.announce(&cp).await;
        assert_eq!(fx.scheduler.scheduled().len(), 3);
        assert_eq!(fx.notifier.notices(), vec![(cp.id, "created".to_string())]);
    }

    #[tokio::test]
    async fn approve_resumes_locked_phase() {
        let fx = fixture();
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, Utc::now()).await;
        let (effect, wf) = fx
            .manager
            .respond(cp.id, CheckpointResponse::approve().by("attorney"), Utc::now())
            .await
            .unwrap();
        assert_eq!(effect, ResponseEffect::Resumed { phase: PhaseCode::IV });
        assert_eq!(wf.status, WorkflowStatus::Running);
        assert!(wf.cleared_checkpoints.contains(&PhaseCode::IV));
        assert_eq!(wf.status_version, 2);
    }

    #[tokio::test]
    async fn second_response_is_stale() {
        let fx = fixture();
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, Utc::now()).await;
        fx.manager.respond(cp.id, CheckpointResponse::approve(), Utc::now()).await.unwrap();
        let err = fx
            .manager
            .respond(cp.id, CheckpointResponse::cancel(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CheckpointStale { .. }));
    }

    #[tokio::test]
    async fn response_for_a_different_phase_is_stale() {
        let fx = fixture();
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, Utc::now()).await;
        let err = fx
            .manager
            .respond(cp.id, CheckpointResponse::approve().at_phase(PhaseCode::X), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CheckpointStale { .. }));
    }

    #[tokio::test]
    async fn blocking_approval_requires_every_affirmation() {
        let fx = fixture();
        let (_, cp) = parked(&fx, PhaseCode::X, CheckpointType::Blocking, Utc::now()).await;
        let partial = ApprovalAffirmation {
            completeness: true,
            citation_accuracy: true,
            standards_compliance: false,
            no_conflicts: true,
        };
        let err = fx
            .manager
            .respond(cp.id, CheckpointResponse::approve().affirmed(partial), Utc::now())
            .await
            .unwrap_err();
        match err {
            WorkflowError::AffirmationIncomplete { missing } => assert_eq!(missing, vec!["standards_compliance"]),
            other => panic!("expected affirmation error, got {other:?}"),
        }

        let (effect, _) = fx
            .manager
            .respond(
                cp.id,
                CheckpointResponse::approve().affirmed(ApprovalAffirmation::all()),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(effect, ResponseEffect::Resumed { phase: PhaseCode::X });
    }

    #[tokio::test]
    async fn request_changes_rewinds_and_threads_feedback() {
        let fx = fixture();
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, Utc::now()).await;
        let (effect, wf) = fx
            .manager
            .respond(cp.id, CheckpointResponse::request_changes("Address the missing deposition"), Utc::now())
            .await
            .unwrap();
        assert_eq!(effect, ResponseEffect::Rewound { redo: Some(PhaseCode::III) });
        assert_eq!(wf.current_phase, Some(PhaseCode::II));
        assert!(!wf.phase_outputs.contains_key(&PhaseCode::III));
        assert_eq!(wf.next_phase(), Some(PhaseCode::III));
        assert_eq!(wf.operator_feedback.as_deref(), Some("Address the missing deposition"));
        assert!(!wf.cleared_checkpoints.contains(&PhaseCode::IV));
    }

    #[tokio::test]
    async fn sweep_sends_each_notice_once() {
        let fx = fixture();
        let created = Utc::now() - Duration::hours(80);
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, created).await;

        let now = Utc::now();
        let first = fx.manager.sweep(now).await.unwrap();
        assert_eq!(first.reminders_sent, 1);
        assert_eq!(first.escalations_sent, 1);
        assert_eq!(first.timed_out, 0);

        let second = fx.manager.sweep(now).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(
            fx.notifier.notices(),
            vec![(cp.id, "reminder".to_string()), (cp.id, "escalation".to_string())]
        );
    }

    #[tokio::test]
    async fn eight_day_old_hold_is_auto_cancelled_by_sweep() {
        let fx = fixture();
        let created = Utc::now() - Duration::days(8);
        let (wf, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, created).await;

        let report = fx.manager.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.timed_out, 1);

        let id = wf.id;
        let stored = fx.store.call(move |db| db.get_workflow(id)).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Cancelled);
        assert_eq!(stored.status_reason.as_deref(), Some(HOLD_TIMEOUT));
        let cp_id = cp.id;
        let checkpoint = fx.store.call(move |db| db.get_checkpoint(cp_id)).await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::TimedOut);
        assert_eq!(checkpoint.resolution_reason.as_deref(), Some(HOLD_TIMEOUT));

        let again = fx.manager.sweep(Utc::now()).await.unwrap();
        assert_eq!(again.timed_out, 0);
        assert_eq!(again.deferred, 0);
    }

    #[tokio::test]
    async fn unreachable_scheduler_leaves_timeout_to_the_sweep() {
        let fx = fixture_with(RecordingScheduler::failing());
        let created = Utc::now() - Duration::days(8);
        let (wf, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, created).await;

        fx.manager.announce(&cp).await;
        assert!(fx.scheduler.scheduled().is_empty());
        assert_eq!(fx.notifier.notices(), vec![(cp.id, "created".to_string())]);
        let cp_id = cp.id;
        let pending = fx.store.call(move |db| db.get_checkpoint(cp_id)).await.unwrap().unwrap();
        assert_eq!(pending.status, CheckpointStatus::Pending);

        let report = fx.manager.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.timed_out, 1);
        let id = wf.id;
        let stored = fx.store.call(move |db| db.get_workflow(id)).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Cancelled);
        assert_eq!(stored.status_reason.as_deref(), Some(HOLD_TIMEOUT));
    }

    #[tokio::test]
    async fn early_and_duplicate_deadline_deliveries_are_no_ops() {
        let fx = fixture();
        let created = Utc::now();
        let (_, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Hold, created).await;

        assert!(!fx.manager.handle_deadline(cp.id, DeadlineKind::AutoCancel, created + Duration::days(1)).await.unwrap());
        let due = created + Duration::hours(49);
        assert!(fx.manager.handle_deadline(cp.id, DeadlineKind::Reminder, due).await.unwrap());
        assert!(!fx.manager.handle_deadline(cp.id, DeadlineKind::Reminder, due).await.unwrap());
        assert!(fx.manager.handle_deadline(cp.id, DeadlineKind::AutoCancel, created + Duration::days(7)).await.unwrap());
        assert!(!fx.manager.handle_deadline(cp.id, DeadlineKind::AutoCancel, created + Duration::days(8)).await.unwrap());
    }

    #[tokio::test]
    async fn notification_is_acknowledged_without_touching_workflow() {
        let fx = fixture();
        let (wf, cp) = parked(&fx, PhaseCode::IV, CheckpointType::Notification, Utc::now()).await;
        assert!(cp.auto_cancel_at.is_none());
        let err = fx
            .manager
            .respond(cp.id, CheckpointResponse::request_changes("no"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));

        let (effect, after) = fx
            .manager
            .respond(cp.id, CheckpointResponse::approve(), Utc::now())
            .await
            .unwrap();
        assert_eq!(effect, ResponseEffect::Acknowledged);
        assert_eq!(after.status_version, wf.status_version);
    }
}
