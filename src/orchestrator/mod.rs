//! The workflow state machine.
//!
//! Every external trigger (the durable step runtime, operator commands, the
//! checkpoint sweep) goes through `Orchestrator`. Each mutation is a
//! version-checked commit against the store; there are no in-process locks.

mod control;
mod step;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::checkpoint::{CheckpointManager, CheckpointResponse, ResponseEffect, SweepReport};
use crate::citations::CitationPipeline;
use crate::errors::WorkflowError;
use crate::executor::PhaseExecutor;
use crate::judge::{MAX_REVISION_LOOPS, QualityGate};
use crate::motion::IntakeEvent;
use crate::phase::{CheckpointType, PhaseCode};
use crate::store::{CommitEffects, CommitOutcome, InsertOutcome, Store};
use crate::workflow::{StatusSnapshot, WorkflowInstance, WorkflowStatus};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Simultaneous phase executions allowed across every process sharing the store.
    pub slot_capacity: u32,
    /// How long a step's claim on a workflow stays live without renewal.
    pub claim_lease: Duration,
    /// How long an execution slot stays held without renewal or release.
    pub slot_lease: Duration,
    pub max_revision_loops: u32,
    /// Upper bound on steps taken by one `run_until_parked` call.
    pub max_steps_per_run: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            slot_capacity: 5,
            claim_lease: Duration::minutes(30),
            slot_lease: Duration::minutes(30),
            max_revision_loops: MAX_REVISION_LOOPS,
            max_steps_per_run: 64,
        }
    }
}

impl OrchestratorSettings {
    /// How often a running phase renews its claim and slot leases: a third
    /// of the shorter lease.
    pub fn renewal_period(&self) -> std::time::Duration {
        let shorter = self.claim_lease.min(self.slot_lease);
        (shorter / 3)
            .to_std()
            .unwrap_or_default()
            .max(std::time::Duration::from_millis(10))
    }
}

/// Result of one `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// A phase executed and its output was committed.
    Advanced { phase: PhaseCode, version: i64 },
    AwaitingCheckpoint {
        checkpoint_id: Option<Uuid>,
        phase: Option<PhaseCode>,
        checkpoint_type: Option<CheckpointType>,
    },
    /// Another caller holds the workflow, or won the race for this step.
    InProgress,
    /// Every execution slot is taken; retry later.
    Throttled,
    Blocked { reason: Option<String> },
    OnHold,
    Completed,
    Cancelled,
}

impl StepOutcome {
    /// Whether calling `step` again right away can make progress.
    pub fn can_continue(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advanced { phase, version } => write!(f, "advanced: phase {} committed (version {})", phase, version),
            Self::AwaitingCheckpoint {
                phase: Some(phase),
                checkpoint_type: Some(kind),
                ..
            } => write!(f, "awaiting {} checkpoint before phase {}", kind.as_str(), phase),
            Self::AwaitingCheckpoint { .. } => write!(f, "awaiting checkpoint"),
            Self::InProgress => write!(f, "in progress"),
            Self::Throttled => write!(f, "throttled: execution ceiling reached"),
            Self::Blocked { reason: Some(reason) } => write!(f, "blocked: {}", reason),
            Self::Blocked { reason: None } => write!(f, "blocked"),
            Self::OnHold => write!(f, "on hold"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub struct Orchestrator {
    store: Store,
    executor: PhaseExecutor,
    citations: CitationPipeline,
    quality: QualityGate,
    checkpoints: CheckpointManager,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        executor: PhaseExecutor,
        citations: CitationPipeline,
        checkpoints: CheckpointManager,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            executor,
            citations,
            quality: QualityGate::new(settings.max_revision_loops),
            checkpoints,
            settings,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Create a workflow for an order. Replayed intake events return the
    /// existing workflow instead of creating a second one.
    pub async fn intake(&self, event: &IntakeEvent) -> Result<(WorkflowInstance, bool), WorkflowError> {
        let instance = WorkflowInstance::from_intake(event, Utc::now());
        let candidate = instance.clone();
        let outcome = self
            .store
            .call(move |db| db.insert_workflow(&candidate))
            .await
            .map_err(WorkflowError::Store)?;
        match outcome {
            InsertOutcome::Created => {
                info!(
                    workflow_id = %instance.id,
                    order_id = %instance.order_id,
                    tier = %instance.motion.tier,
                    motion_type = %instance.motion.motion_type,
                    "workflow created"
                );
                Ok((instance, true))
            }
            InsertOutcome::Existing(existing) => {
                info!(workflow_id = %existing.id, order_id = %existing.order_id, "intake replayed, workflow exists");
                Ok((existing, false))
            }
        }
    }

    pub async fn load(&self, workflow_id: Uuid) -> Result<WorkflowInstance, WorkflowError> {
        self.store
            .call(move |db| db.get_workflow(workflow_id))
            .await
            .map_err(WorkflowError::Store)?
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))
    }

    pub async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        self.store
            .call(move |db| db.list_workflows(status))
            .await
            .map_err(WorkflowError::Store)
    }

    /// Read-only snapshot for dashboards.
    pub async fn status(&self, workflow_id: Uuid) -> Result<StatusSnapshot, WorkflowError> {
        let instance = self.load(workflow_id).await?;
        let pending_id = instance.checkpoint_pending;
        let (checkpoint, citation_count) = self
            .store
            .call(move |db| {
                let checkpoint = match pending_id {
                    Some(id) => db.get_checkpoint(id)?,
                    None => None,
                };
                Ok((checkpoint, db.count_citations(workflow_id)?))
            })
            .await
            .map_err(WorkflowError::Store)?;

        let next_phase = if instance.status.is_terminal() {
            None
        } else {
            instance.next_phase()
        };
        Ok(StatusSnapshot {
            workflow_id: instance.id,
            order_id: instance.order_id.clone(),
            status: instance.status,
            status_reason: instance.status_reason.clone(),
            tier: instance.motion.tier,
            last_completed_phase: instance.current_phase,
            next_phase,
            progress_percent: instance.progress_percent(),
            checkpoint_pending: checkpoint,
            judge_grade: instance.judge_grade.clone(),
            citation_count,
            revision_loop_count: instance.revision_loop_count,
            quality_bar_not_met: instance.quality_bar_not_met,
            status_version: instance.status_version,
        })
    }

    /// Apply an operator response to a checkpoint.
    pub async fn respond_to_checkpoint(
        &self,
        checkpoint_id: Uuid,
        response: CheckpointResponse,
    ) -> Result<(ResponseEffect, WorkflowInstance), WorkflowError> {
        self.checkpoints.respond(checkpoint_id, response, Utc::now()).await
    }

    /// Periodic deadline sweep; also purges expired citation cache entries.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, WorkflowError> {
        let report = self.checkpoints.sweep(now).await?;
        let purged = self
            .store
            .call(move |db| db.purge_expired_cache(now))
            .await
            .map_err(WorkflowError::Store)?;
        if purged > 0 {
            info!(purged, "expired citation cache entries removed");
        }
        Ok(report)
    }

    async fn commit(
        &self,
        expected: i64,
        instance: &WorkflowInstance,
        effects: CommitEffects,
    ) -> Result<CommitOutcome, WorkflowError> {
        let stored = instance.clone();
        self.store
            .call(move |db| db.commit_workflow(expected, &stored, &effects))
            .await
            .map_err(WorkflowError::Store)
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::{event, harness};
    use super::*;

    #[tokio::test]
    async fn intake_is_idempotent_per_order() {
        let h = harness(OrchestratorSettings::default());
        let (first, created) = h.orchestrator.intake(&event("ord-1", "Motion to Compel")).await.unwrap();
        assert!(created);
        let (second, created) = h.orchestrator.intake(&event("ord-1", "Motion to Compel")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(h.orchestrator.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_of_new_workflow() {
        let h = harness(OrchestratorSettings::default());
        let (wf, _) = h
            .orchestrator
            .intake(&event("ord-2", "Motion for Summary Judgment"))
            .await
            .unwrap();
        let snapshot = h.orchestrator.status(wf.id).await.unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Pending);
        assert_eq!(snapshot.tier, crate::motion::Tier::C);
        assert_eq!(snapshot.next_phase, Some(PhaseCode::I));
        assert_eq!(snapshot.progress_percent, 0);
        assert_eq!(snapshot.citation_count, 0);
        assert!(snapshot.checkpoint_pending.is_none());
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let h = harness(OrchestratorSettings::default());
        let err = h.orchestrator.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowNotFound(_)));
    }

    #[test]
    fn outcome_display() {
        let outcome = StepOutcome::AwaitingCheckpoint {
            checkpoint_id: None,
            phase: Some(PhaseCode::X),
            checkpoint_type: Some(CheckpointType::Blocking),
        };
        assert_eq!(outcome.to_string(), "awaiting BLOCKING checkpoint before phase X");
        assert!(!outcome.can_continue());
        assert!(StepOutcome::Advanced { phase: PhaseCode::I, version: 2 }.can_continue());
    }
}
