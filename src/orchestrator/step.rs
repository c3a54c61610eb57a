use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Orchestrator, StepOutcome};
use crate::audit::{GateCheckRecord, PhaseExecutionRecord};
use crate::checkpoint::CheckpointManager;
use crate::errors::{GenerationError, WorkflowError};
use crate::executor::ExecutionOutcome;
use crate::gates;
use crate::judge::{GradeOutcome, GradeReport, RevisionDecision};
use crate::phase::{PhaseCode, PhaseDefinition, PhaseKind, PhaseOutput};
use crate::policy;
use crate::store::{CitationRows, CommitEffects, CommitOutcome};
use crate::workflow::{WorkflowInstance, WorkflowStatus};

/// What executing a claimed phase produced.
enum PhaseResult {
    Output {
        data: Value,
        citations: Option<CitationRows>,
        grade: Option<GradeReport>,
    },
    ParseFailed {
        error: String,
    },
    CitationHalt {
        summary: String,
        citations: CitationRows,
    },
    Failed(GenerationError),
}

impl Orchestrator {
    /// Advance a workflow by at most one phase.
    ///
    /// Safe to call concurrently and repeatedly: the caller that loses the
    /// claim race gets `InProgress` and makes no external call.
    pub async fn step(&self, workflow_id: Uuid) -> Result<StepOutcome, WorkflowError> {
        let snapshot = self.load(workflow_id).await?;
        self.step_with(snapshot).await
    }

    /// Step from a snapshot the caller already read. Its `status_version` is
    /// the expected version for the claim.
    pub async fn step_with(&self, mut wf: WorkflowInstance) -> Result<StepOutcome, WorkflowError> {
        match wf.status {
            WorkflowStatus::Completed => return Ok(StepOutcome::Completed),
            WorkflowStatus::Cancelled => return Ok(StepOutcome::Cancelled),
            WorkflowStatus::OnHold => return Ok(StepOutcome::OnHold),
            WorkflowStatus::Blocked => {
                return Ok(StepOutcome::Blocked {
                    reason: wf.status_reason.clone(),
                });
            }
            WorkflowStatus::AwaitingCheckpoint => {
                let phase = wf.next_phase();
                return Ok(StepOutcome::AwaitingCheckpoint {
                    checkpoint_id: wf.checkpoint_pending,
                    checkpoint_type: phase.and_then(|p| CheckpointManager::checkpoint_type_for(p, &wf)),
                    phase,
                });
            }
            WorkflowStatus::Pending | WorkflowStatus::Running => {}
        }

        let now = Utc::now();
        if wf.has_live_claim(now) {
            debug!(workflow_id = %wf.id, phase = ?wf.in_flight_phase, "workflow claimed by another step");
            return Ok(StepOutcome::InProgress);
        }

        let expected = wf.status_version;
        let Some(phase) = wf.next_phase() else {
            return self.complete(wf).await;
        };

        let mut notification = None;
        if !wf.cleared_checkpoints.contains(&phase)
            && let Some(checkpoint_type) = CheckpointManager::checkpoint_type_for(phase, &wf)
        {
            let checkpoint = self.checkpoints.build(&wf, phase, checkpoint_type, now);
            if checkpoint_type.gates_advancement() {
                return self.park_on_checkpoint(wf, checkpoint).await;
            }
            wf.cleared_checkpoints.insert(phase);
            notification = Some(checkpoint);
        }

        let decision = gates::can_enter(phase, &wf);
        if !decision.allowed {
            self.audit_gate(GateCheckRecord::from_decision(wf.id, expected, &decision))
                .await?;
            warn!(
                workflow_id = %wf.id,
                phase = %phase,
                missing = ?decision.missing_descriptions(),
                "phase gate refused entry"
            );
            return Err(WorkflowError::PrerequisiteViolation {
                phase,
                missing: decision.missing_descriptions(),
            });
        }

        // Claim before any external call.
        wf.status = WorkflowStatus::Running;
        wf.in_flight_phase = Some(phase);
        wf.lease_expires_at = Some(now + self.settings.claim_lease);
        wf.updated_at = now;
        let effects = CommitEffects {
            new_checkpoint: notification.clone(),
            ..CommitEffects::none()
        };
        match self.commit(expected, &wf, effects).await? {
            CommitOutcome::Committed => {}
            CommitOutcome::Conflict | CommitOutcome::CheckpointStale => {
                debug!(workflow_id = %wf.id, phase = %phase, expected, "claim lost to a concurrent step");
                return Ok(StepOutcome::InProgress);
            }
        }
        wf.status_version = expected + 1;
        info!(workflow_id = %wf.id, phase = %phase, version = wf.status_version, "phase claimed");

        if let Some(checkpoint) = &notification {
            self.checkpoints.announce(checkpoint).await;
        }
        self.audit_gate(GateCheckRecord::from_decision(wf.id, wf.status_version, &decision))
            .await?;

        let holder = Uuid::new_v4();
        let Some(slot) = self.acquire_slot(&wf, phase, holder).await? else {
            info!(workflow_id = %wf.id, phase = %phase, "execution ceiling reached, releasing claim");
            self.release_claim(wf).await?;
            return Ok(StepOutcome::Throttled);
        };

        let result = self.run_with_renewal(wf, phase, slot, holder).await;

        let released = self.store.call(move |db| db.release_slot(slot, holder)).await;
        if let Err(e) = released {
            warn!(slot, error = %e, "failed to release execution slot, lease will expire");
        }
        result
    }

    /// Drive a workflow until it parks, finishes, or stops advancing.
    pub async fn run_until_parked(&self, workflow_id: Uuid) -> Result<StepOutcome, WorkflowError> {
        let mut last = StepOutcome::InProgress;
        for _ in 0..self.settings.max_steps_per_run {
            last = self.step(workflow_id).await?;
            if !last.can_continue() {
                return Ok(last);
            }
        }
        warn!(workflow_id = %workflow_id, steps = self.settings.max_steps_per_run, "step limit reached");
        Ok(last)
    }

    async fn complete(&self, mut wf: WorkflowInstance) -> Result<StepOutcome, WorkflowError> {
        let expected = wf.status_version;
        wf.status = WorkflowStatus::Completed;
        wf.status_reason = wf.quality_bar_not_met.then(|| "quality_bar_not_met".to_string());
        wf.release_claim();
        wf.updated_at = Utc::now();
        match self.commit(expected, &wf, CommitEffects::none()).await? {
            CommitOutcome::Committed => {
                info!(
                    workflow_id = %wf.id,
                    version = expected + 1,
                    quality_bar_not_met = wf.quality_bar_not_met,
                    "workflow completed"
                );
                Ok(StepOutcome::Completed)
            }
            _ => Ok(StepOutcome::InProgress),
        }
    }

    async fn park_on_checkpoint(
        &self,
        mut wf: WorkflowInstance,
        checkpoint: crate::checkpoint::Checkpoint,
    ) -> Result<StepOutcome, WorkflowError> {
        let expected = wf.status_version;
        wf.status = WorkflowStatus::AwaitingCheckpoint;
        wf.checkpoint_pending = Some(checkpoint.id);
        wf.release_claim();
        wf.updated_at = checkpoint.created_at;
        let effects = CommitEffects {
            new_checkpoint: Some(checkpoint.clone()),
            ..CommitEffects::none()
        };
        match self.commit(expected, &wf, effects).await? {
            CommitOutcome::Committed => {}
            _ => return Ok(StepOutcome::InProgress),
        }
        info!(
            workflow_id = %wf.id,
            checkpoint_id = %checkpoint.id,
            phase = %checkpoint.phase,
            checkpoint_type = checkpoint.checkpoint_type.as_str(),
            "workflow parked on checkpoint"
        );
        self.checkpoints.announce(&checkpoint).await;
        Ok(StepOutcome::AwaitingCheckpoint {
            checkpoint_id: Some(checkpoint.id),
            phase: Some(checkpoint.phase),
            checkpoint_type: Some(checkpoint.checkpoint_type),
        })
    }

    async fn acquire_slot(&self, wf: &WorkflowInstance, phase: PhaseCode, holder: Uuid) -> Result<Option<i64>, WorkflowError> {
        let capacity = self.settings.slot_capacity;
        let lease = self.settings.slot_lease;
        let workflow_id = wf.id;
        self.store
            .call(move |db| db.try_acquire_slot(capacity, holder, workflow_id, phase, lease, Utc::now()))
            .await
            .map_err(WorkflowError::Store)
    }

    /// Drop this step's claim without changing anything else. Losing the
    /// race here is fine: whoever won owns the workflow now.
    async fn release_claim(&self, mut wf: WorkflowInstance) -> Result<(), WorkflowError> {
        let expected = wf.status_version;
        wf.release_claim();
        wf.updated_at = Utc::now();
        if self.commit(expected, &wf, CommitEffects::none()).await? != CommitOutcome::Committed {
            debug!(workflow_id = %wf.id, "claim already superseded");
        }
        Ok(())
    }

    /// Run a claimed phase, renewing the claim and slot leases until it
    /// finishes. A crashed process stops renewing and its leases lapse.
    async fn run_with_renewal(
        &self,
        wf: WorkflowInstance,
        phase: PhaseCode,
        slot: i64,
        holder: Uuid,
    ) -> Result<StepOutcome, WorkflowError> {
        let workflow_id = wf.id;
        let version = wf.status_version;
        let period = self.settings.renewal_period();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let work = self.run_claimed(wf, phase);
        tokio::pin!(work);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => self.renew_leases(workflow_id, version, phase, slot, holder).await,
            }
        }
    }

    async fn renew_leases(&self, workflow_id: Uuid, version: i64, phase: PhaseCode, slot: i64, holder: Uuid) {
        let now = Utc::now();
        let claim_until = now + self.settings.claim_lease;
        let slot_until = now + self.settings.slot_lease;
        let renewed = self
            .store
            .call(move |db| {
                Ok((
                    db.renew_claim(workflow_id, version, phase, claim_until)?,
                    db.renew_slot(slot, holder, slot_until)?,
                ))
            })
            .await;
        match renewed {
            Ok((true, true)) => debug!(workflow_id = %workflow_id, phase = %phase, "leases renewed"),
            Ok((claim, slot_held)) => debug!(
                workflow_id = %workflow_id,
                phase = %phase,
                claim_renewed = claim,
                slot_renewed = slot_held,
                "lease no longer held, not renewed"
            ),
            Err(e) => warn!(workflow_id = %workflow_id, phase = %phase, error = %e, "failed to renew leases"),
        }
    }

    async fn run_claimed(&self, mut wf: WorkflowInstance, phase: PhaseCode) -> Result<StepOutcome, WorkflowError> {
        let definition = phase.definition();
        let result = match self.execute_phase(definition, &wf).await {
            Ok(result) => result,
            Err(err) => {
                self.release_claim(wf).await?;
                return Err(err);
            }
        };

        let expected = wf.status_version;
        let now = Utc::now();
        wf.release_claim();
        wf.updated_at = now;

        let (effects, outcome) = match result {
            PhaseResult::Output { data, citations, grade } => {
                let loop_iteration = wf.revision_loop_count;
                wf.phase_outputs.insert(
                    phase,
                    PhaseOutput {
                        loop_iteration,
                        data,
                        completed_at: now,
                    },
                );
                wf.current_phase = Some(phase);
                wf.status = WorkflowStatus::Running;
                wf.status_reason = None;
                if definition.kind == PhaseKind::Generation {
                    wf.operator_feedback = None;
                }
                if let Some(report) = grade {
                    self.apply_grade(&mut wf, report);
                }
                let effects = CommitEffects {
                    citations,
                    ..CommitEffects::none()
                };
                (
                    effects,
                    StepOutcome::Advanced {
                        phase,
                        version: expected + 1,
                    },
                )
            }
            PhaseResult::ParseFailed { error } => {
                let reason = format!("phase_failed: {}: {}", phase, error);
                wf.status = WorkflowStatus::Blocked;
                wf.status_reason = Some(reason.clone());
                (CommitEffects::none(), StepOutcome::Blocked { reason: Some(reason) })
            }
            PhaseResult::CitationHalt { summary, citations } => {
                let reason = format!("citation_integrity: {}", summary);
                wf.status = WorkflowStatus::Blocked;
                wf.status_reason = Some(reason.clone());
                let effects = CommitEffects {
                    citations: Some(citations),
                    ..CommitEffects::none()
                };
                (effects, StepOutcome::Blocked { reason: Some(reason) })
            }
            PhaseResult::Failed(err) => {
                let message = err.to_string();
                self.release_claim(wf).await?;
                return Err(if err.is_transient() {
                    WorkflowError::TransientExternal { phase, message }
                } else {
                    WorkflowError::External { phase, message }
                });
            }
        };

        match self.commit(expected, &wf, effects).await? {
            CommitOutcome::Committed => {}
            _ => {
                warn!(
                    workflow_id = %wf.id,
                    phase = %phase,
                    expected,
                    "workflow changed during execution, result discarded"
                );
                return Ok(StepOutcome::InProgress);
            }
        }

        match &outcome {
            StepOutcome::Blocked { reason } => warn!(
                workflow_id = %wf.id,
                phase = %phase,
                version = expected + 1,
                reason = reason.as_deref().unwrap_or_default(),
                "workflow blocked"
            ),
            _ => info!(
                workflow_id = %wf.id,
                phase = %phase,
                version = expected + 1,
                next = ?wf.next_phase(),
                "phase committed"
            ),
        }
        Ok(outcome)
    }

    /// Run the phase and append its audit row. The audit row is written
    /// for failed attempts too.
    async fn execute_phase(&self, definition: &PhaseDefinition, wf: &WorkflowInstance) -> Result<PhaseResult, WorkflowError> {
        let phase = definition.code;
        let loop_iteration = wf.revision_loop_count;
        let version = wf.status_version;

        let (record, result) = match definition.kind {
            PhaseKind::Generation => match self.executor.execute(definition, wf).await {
                Ok(report) => {
                    let record = PhaseExecutionRecord::from_report(wf.id, loop_iteration, version, &report);
                    let result = match report.outcome {
                        ExecutionOutcome::Parsed(map) => PhaseResult::Output {
                            data: Value::Object(map),
                            citations: None,
                            grade: None,
                        },
                        ExecutionOutcome::ParseFailed { error } => PhaseResult::ParseFailed { error },
                    };
                    (record, result)
                }
                Err(err) => (
                    PhaseExecutionRecord::from_error(wf.id, phase, loop_iteration, version, &err),
                    PhaseResult::Failed(err),
                ),
            },
            PhaseKind::Grade => match self.quality.grade(&self.executor, wf).await {
                Ok(GradeOutcome::Graded { report, execution }) => (
                    PhaseExecutionRecord::from_report(wf.id, loop_iteration, version, &execution),
                    PhaseResult::Output {
                        data: report.to_output_value(),
                        citations: None,
                        grade: Some(report),
                    },
                ),
                Ok(GradeOutcome::ParseFailed { error, execution }) => {
                    let mut record = PhaseExecutionRecord::from_report(wf.id, loop_iteration, version, &execution);
                    record.status = crate::audit::ExecutionStatus::ParseFailed;
                    record.error = Some(error.clone());
                    (record, PhaseResult::ParseFailed { error })
                }
                Err(err) => (
                    PhaseExecutionRecord::from_error(wf.id, phase, loop_iteration, version, &err),
                    PhaseResult::Failed(err),
                ),
            },
            PhaseKind::CitationCheck(risk) => {
                let started = Instant::now();
                let draft = wf.current_draft().unwrap_or_default();
                let report = self.citations.verify(draft, wf.motion.tier, risk).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                let record = PhaseExecutionRecord::from_citation_report(
                    wf.id,
                    phase,
                    loop_iteration,
                    version,
                    &report,
                    duration_ms,
                );
                let rows = CitationRows {
                    phase,
                    loop_iteration,
                    tier: wf.motion.tier,
                    citations: report.citations.clone(),
                };
                let result = if report.decision.halt {
                    PhaseResult::CitationHalt {
                        summary: report.decision.summary(),
                        citations: rows,
                    }
                } else {
                    PhaseResult::Output {
                        data: report.to_output_value(),
                        citations: Some(rows),
                        grade: None,
                    }
                };
                (record, result)
            }
        };

        let appended = self.store.call(move |db| db.append_phase_execution(&record)).await;
        policy::EXECUTION_AUDIT
            .resolve(appended, || 0)
            .map_err(WorkflowError::Store)?;
        Ok(result)
    }

    async fn audit_gate(&self, record: GateCheckRecord) -> Result<(), WorkflowError> {
        let appended = self.store.call(move |db| db.append_gate_check(&record)).await;
        policy::GATE_AUDIT
            .resolve(appended, || 0)
            .map_err(WorkflowError::Store)?;
        Ok(())
    }

    fn apply_grade(&self, wf: &mut WorkflowInstance, report: GradeReport) {
        let decision = self.quality.decide(&report.grade, wf.revision_loop_count);
        info!(
            workflow_id = %wf.id,
            grade = %report.grade,
            loops_completed = wf.revision_loop_count,
            decision = ?decision,
            "judge evaluation"
        );
        match decision {
            RevisionDecision::Pass => {
                wf.in_revision = false;
            }
            RevisionDecision::Revise { loop_number } => {
                wf.in_revision = true;
                wf.revision_loop_count = loop_number;
            }
            RevisionDecision::DeliverFlagged => {
                wf.in_revision = false;
                wf.quality_bar_not_met = true;
                warn!(
                    workflow_id = %wf.id,
                    loops = wf.revision_loop_count,
                    "revision limit reached, delivering with quality disclosure"
                );
            }
        }
        wf.judge_grade = Some(report.grade);
    }
}
