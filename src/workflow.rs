//! Workflow instance state.
//!
//! A `WorkflowInstance` is mutated only by orchestrator steps and checkpoint
//! resolutions, and every mutation is committed against `status_version`.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::judge::JudgeGrade;
use crate::motion::{IntakeEvent, MotionParams};
use crate::phase::{self, PhaseCode, PhaseOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    AwaitingCheckpoint,
    Blocked,
    OnHold,
    Completed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingCheckpoint => "awaiting_checkpoint",
            Self::Blocked => "blocked",
            Self::OnHold => "on_hold",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "awaiting_checkpoint" => Ok(Self::AwaitingCheckpoint),
            "blocked" => Ok(Self::Blocked),
            "on_hold" => Ok(Self::OnHold),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid workflow status: {}", s)),
        }
    }
}

/// Durable state of one motion production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub order_id: String,
    pub motion: MotionParams,
    /// Last committed phase. `None` until Phase I commits.
    pub current_phase: Option<PhaseCode>,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub phase_outputs: BTreeMap<PhaseCode, PhaseOutput>,
    #[serde(default)]
    pub revision_loop_count: u32,
    #[serde(default)]
    pub in_revision: bool,
    /// Set when the loop bound was reached without a passing grade.
    #[serde(default)]
    pub quality_bar_not_met: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_grade: Option<JudgeGrade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_pending: Option<Uuid>,
    /// Phases whose checkpoint has been cleared (approved, or notified) in the current cycle.
    #[serde(default)]
    pub cleared_checkpoints: BTreeSet<PhaseCode>,
    /// Operator feedback threaded into the next generation prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_feedback: Option<String>,
    /// Phase claimed by an in-flight step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight_phase: Option<PhaseCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub status_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn from_intake(event: &IntakeEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: event.order_id.clone(),
            motion: MotionParams::from_intake(event),
            current_phase: None,
            status: WorkflowStatus::Pending,
            status_reason: None,
            phase_outputs: BTreeMap::new(),
            revision_loop_count: 0,
            in_revision: false,
            quality_bar_not_met: false,
            judge_grade: None,
            checkpoint_pending: None,
            cleared_checkpoints: BTreeSet::new(),
            operator_feedback: None,
            in_flight_phase: None,
            lease_expires_at: None,
            status_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn next_phase(&self) -> Option<PhaseCode> {
        phase::next_phase(self.current_phase, self.in_revision, &self.motion)
    }

    /// Whether another step currently holds an unexpired claim.
    pub fn has_live_claim(&self, now: DateTime<Utc>) -> bool {
        self.in_flight_phase.is_some() && self.lease_expires_at.is_some_and(|until| until > now)
    }

    /// The draft currently under review: the latest revision when one exists,
    /// otherwise the initial draft.
    pub fn current_draft(&self) -> Option<&str> {
        self.phase_outputs
            .get(&PhaseCode::VIII)
            .and_then(|out| out.data.get("revised_draft"))
            .and_then(|v| v.as_str())
            .or_else(|| {
                self.phase_outputs
                    .get(&PhaseCode::V)
                    .and_then(|out| out.data.get("draft"))
                    .and_then(|v| v.as_str())
            })
    }

    /// Percentage of applicable mainline phases committed.
    pub fn progress_percent(&self) -> u8 {
        if self.status == WorkflowStatus::Completed {
            return 100;
        }
        let mainline = phase::mainline(&self.motion);
        if mainline.is_empty() {
            return 0;
        }
        let done = mainline
            .iter()
            .filter(|code| self.phase_outputs.contains_key(code))
            .count();
        ((done * 100) / mainline.len()) as u8
    }

    /// Reset to a fresh instance for the same order, keeping identity and version.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.current_phase = None;
        self.status = WorkflowStatus::Pending;
        self.status_reason = None;
        self.phase_outputs.clear();
        self.revision_loop_count = 0;
        self.in_revision = false;
        self.quality_bar_not_met = false;
        self.judge_grade = None;
        self.checkpoint_pending = None;
        self.cleared_checkpoints.clear();
        self.operator_feedback = None;
        self.in_flight_phase = None;
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    pub fn release_claim(&mut self) {
        self.in_flight_phase = None;
        self.lease_expires_at = None;
    }
}

/// Read-only status snapshot served to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub workflow_id: Uuid,
    pub order_id: String,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub tier: crate::motion::Tier,
    pub last_completed_phase: Option<PhaseCode>,
    pub next_phase: Option<PhaseCode>,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_pending: Option<crate::checkpoint::Checkpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_grade: Option<JudgeGrade>,
    pub citation_count: usize,
    pub revision_loop_count: u32,
    pub quality_bar_not_met: bool,
    pub status_version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Tier;
    use serde_json::json;

    fn instance() -> WorkflowInstance {
        let event = IntakeEvent {
            order_id: "ord-42".into(),
            motion_type: "Motion to Compel".into(),
            jurisdiction: "CA".into(),
            documents: vec![],
            tier: None,
            instructions: None,
        };
        WorkflowInstance::from_intake(&event, Utc::now())
    }

    fn output(data: serde_json::Value) -> PhaseOutput {
        PhaseOutput {
            loop_iteration: 0,
            data,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::AwaitingCheckpoint,
            WorkflowStatus::Blocked,
            WorkflowStatus::OnHold,
            WorkflowStatus::Completed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("paused".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn new_instance_starts_at_phase_one() {
        let wf = instance();
        assert_eq!(wf.motion.tier, Tier::B);
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert_eq!(wf.next_phase(), Some(PhaseCode::I));
        assert_eq!(wf.progress_percent(), 0);
    }

    #[test]
    fn live_claim_requires_unexpired_lease() {
        let mut wf = instance();
        let now = Utc::now();
        wf.in_flight_phase = Some(PhaseCode::I);
        wf.lease_expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(wf.has_live_claim(now));
        assert!(!wf.has_live_claim(now + chrono::Duration::seconds(61)));
        wf.release_claim();
        assert!(!wf.has_live_claim(now));
    }

    #[test]
    fn current_draft_prefers_revision() {
        let mut wf = instance();
        assert_eq!(wf.current_draft(), None);
        wf.phase_outputs
            .insert(PhaseCode::V, output(json!({"draft": "first"})));
        assert_eq!(wf.current_draft(), Some("first"));
        wf.phase_outputs
            .insert(PhaseCode::VIII, output(json!({"revised_draft": "second"})));
        assert_eq!(wf.current_draft(), Some("second"));
    }

    #[test]
    fn reset_clears_progress() {
        let mut wf = instance();
        wf.current_phase = Some(PhaseCode::V);
        wf.phase_outputs
            .insert(PhaseCode::V, output(json!({"draft": "x"})));
        wf.revision_loop_count = 2;
        wf.quality_bar_not_met = true;
        wf.cleared_checkpoints.insert(PhaseCode::IV);
        wf.status_version = 9;
        wf.reset(Utc::now());
        assert_eq!(wf.current_phase, None);
        assert!(wf.phase_outputs.is_empty());
        assert_eq!(wf.revision_loop_count, 0);
        assert!(!wf.quality_bar_not_met);
        assert!(wf.cleared_checkpoints.is_empty());
        assert_eq!(wf.status_version, 9);
    }

    #[test]
    fn instance_serializes_phase_output_map() {
        let mut wf = instance();
        wf.phase_outputs
            .insert(PhaseCode::V1, output(json!({"citation_report": {}})));
        let json = serde_json::to_string(&wf).unwrap();
        assert!(json.contains("\"V.1\""));
        let back: WorkflowInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wf);
    }
}
