//! Human review checkpoints.
//!
//! HOLD and BLOCKING checkpoints park the workflow on a locked phase until an
//! operator responds. NOTIFICATION checkpoints are recorded and the workflow
//! moves on. HOLD checkpoints carry reminder, escalation and auto-cancel
//! deadlines that are pushed to the external scheduler and re-checked by the
//! periodic sweep.

mod manager;
mod notify;

pub use manager::{CheckpointManager, CheckpointSettings, DeadlineKind, HOLD_TIMEOUT, ResponseEffect, SweepReport};
pub use notify::{CheckpointNotifier, CheckpointScheduler, LogNotifier, LogScheduler};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::phase::{CheckpointType, PhaseCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    ChangesRequested,
    Cancelled,
    TimedOut,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::ChangesRequested => "CHANGES_REQUESTED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "CHANGES_REQUESTED" => Ok(Self::ChangesRequested),
            "CANCELLED" => Ok(Self::Cancelled),
            "TIMED_OUT" => Ok(Self::TimedOut),
            _ => Err(format!("Invalid checkpoint status: {}", s)),
        }
    }
}

/// A checkpoint row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// The phase this checkpoint is locked in front of.
    pub phase: PhaseCode,
    pub checkpoint_type: CheckpointType,
    pub status: CheckpointStatus,
    pub reason: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub feedback: Option<String>,
    pub resolution_reason: Option<String>,
    pub remind_at: Option<DateTime<Utc>>,
    pub escalate_at: Option<DateTime<Utc>>,
    pub auto_cancel_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointAction {
    Approve,
    RequestChanges,
    Cancel,
}

impl CheckpointAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::RequestChanges => "request_changes",
            Self::Cancel => "cancel",
        }
    }
}

impl FromStr for CheckpointAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "approve" => Ok(Self::Approve),
            "request_changes" => Ok(Self::RequestChanges),
            "cancel" => Ok(Self::Cancel),
            _ => Err(format!(
                "Invalid checkpoint action '{}'. Valid values: approve, request_changes, cancel",
                s
            )),
        }
    }
}

/// Items an operator must affirm before approving a BLOCKING checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAffirmation {
    #[serde(default)]
    pub completeness: bool,
    #[serde(default)]
    pub citation_accuracy: bool,
    #[serde(default)]
    pub standards_compliance: bool,
    #[serde(default)]
    pub no_conflicts: bool,
}

impl ApprovalAffirmation {
    pub fn all() -> Self {
        Self {
            completeness: true,
            citation_accuracy: true,
            standards_compliance: true,
            no_conflicts: true,
        }
    }

    pub fn missing(&self) -> Vec<&'static str> {
        [
            (self.completeness, "completeness"),
            (self.citation_accuracy, "citation_accuracy"),
            (self.standards_compliance, "standards_compliance"),
            (self.no_conflicts, "no_conflicts"),
        ]
        .into_iter()
        .filter(|(given, _)| !given)
        .map(|(_, name)| name)
        .collect()
    }
}

/// An operator's response to a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub action: CheckpointAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
    #[serde(default)]
    pub affirmation: ApprovalAffirmation,
    /// The phase the caller believes the checkpoint is locked to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_phase: Option<PhaseCode>,
}

impl CheckpointResponse {
    pub fn new(action: CheckpointAction) -> Self {
        Self {
            action,
            feedback: None,
            responder: None,
            affirmation: ApprovalAffirmation::default(),
            expected_phase: None,
        }
    }

    pub fn approve() -> Self {
        Self::new(CheckpointAction::Approve)
    }

    pub fn request_changes(feedback: impl Into<String>) -> Self {
        Self {
            feedback: Some(feedback.into()),
            ..Self::new(CheckpointAction::RequestChanges)
        }
    }

    pub fn cancel() -> Self {
        Self::new(CheckpointAction::Cancel)
    }

    pub fn affirmed(mut self, affirmation: ApprovalAffirmation) -> Self {
        self.affirmation = affirmation;
        self
    }

    pub fn by(mut self, responder: impl Into<String>) -> Self {
        self.responder = Some(responder.into());
        self
    }

    pub fn at_phase(mut self, phase: PhaseCode) -> Self {
        self.expected_phase = Some(phase);
        self
    }
}
