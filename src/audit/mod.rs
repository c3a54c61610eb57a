//! Append-only audit rows: one per phase execution attempt (failures
//! included) and one per gate check.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::citations::CitationReport;
use crate::errors::GenerationError;
use crate::executor::{ExecutionOutcome, ExecutionReport};
use crate::gates::GateDecision;
use crate::phase::PhaseCode;

/// Longest raw generation text kept in an audit row.
const MAX_RAW_OUTPUT_CHARS: usize = 64_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    ParseFailed,
    TransientFailure,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::ParseFailed => "parse_failed",
            Self::TransientFailure => "transient_failure",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "parse_failed" => Ok(Self::ParseFailed),
            "transient_failure" => Ok(Self::TransientFailure),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionRecord {
    /// Row id, assigned by the store.
    #[serde(default)]
    pub id: Option<i64>,
    pub workflow_id: Uuid,
    pub phase: PhaseCode,
    pub loop_iteration: u32,
    /// Version of the claim this attempt ran under.
    pub status_version: i64,
    pub status: ExecutionStatus,
    pub model: Option<String>,
    pub prompt_sha256: Option<String>,
    pub raw_output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl PhaseExecutionRecord {
    fn base(workflow_id: Uuid, phase: PhaseCode, loop_iteration: u32, status_version: i64, status: ExecutionStatus) -> Self {
        Self {
            id: None,
            workflow_id,
            phase,
            loop_iteration,
            status_version,
            status,
            model: None,
            prompt_sha256: None,
            raw_output: None,
            error: None,
            duration_ms: 0,
            input_tokens: None,
            output_tokens: None,
            created_at: Utc::now(),
        }
    }

    pub fn from_report(workflow_id: Uuid, loop_iteration: u32, status_version: i64, report: &ExecutionReport) -> Self {
        let (status, error) = match &report.outcome {
            ExecutionOutcome::Parsed(_) => (ExecutionStatus::Succeeded, None),
            ExecutionOutcome::ParseFailed { error } => (ExecutionStatus::ParseFailed, Some(error.clone())),
        };
        Self {
            model: Some(report.model.clone()),
            prompt_sha256: Some(report.prompt_sha256.clone()),
            raw_output: Some(report.raw_text.chars().take(MAX_RAW_OUTPUT_CHARS).collect()),
            error,
            duration_ms: report.duration_ms,
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            ..Self::base(workflow_id, report.phase, loop_iteration, status_version, status)
        }
    }

    pub fn from_error(
        workflow_id: Uuid,
        phase: PhaseCode,
        loop_iteration: u32,
        status_version: i64,
        error: &GenerationError,
    ) -> Self {
        let status = if error.is_transient() {
            ExecutionStatus::TransientFailure
        } else {
            ExecutionStatus::Failed
        };
        Self {
            error: Some(error.to_string()),
            ..Self::base(workflow_id, phase, loop_iteration, status_version, status)
        }
    }

    /// A citation check. Halting reports are recorded as failed attempts.
    pub fn from_citation_report(
        workflow_id: Uuid,
        phase: PhaseCode,
        loop_iteration: u32,
        status_version: i64,
        report: &CitationReport,
        duration_ms: u64,
    ) -> Self {
        let (status, error) = if report.decision.halt {
            (ExecutionStatus::Failed, Some(report.decision.summary()))
        } else {
            (ExecutionStatus::Succeeded, None)
        };
        Self {
            error,
            duration_ms,
            raw_output: serde_json::to_string(&report.to_output_value()).ok(),
            ..Self::base(workflow_id, phase, loop_iteration, status_version, status)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheckRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub workflow_id: Uuid,
    pub phase: PhaseCode,
    pub allowed: bool,
    pub missing: Vec<String>,
    pub status_version: i64,
    pub checked_at: DateTime<Utc>,
}

impl GateCheckRecord {
    pub fn from_decision(workflow_id: Uuid, status_version: i64, decision: &GateDecision) -> Self {
        Self {
            id: None,
            workflow_id,
            phase: decision.phase,
            allowed: decision.allowed,
            missing: decision.missing_descriptions(),
            status_version,
            checked_at: Utc::now(),
        }
    }
}
