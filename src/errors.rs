//! Typed error hierarchy for the docket engine.
//!
//! Three top-level enums cover the three external seams:
//! - `WorkflowError`: orchestration failures, one variant per failure class
//! - `GenerationError`: calls to the generative-language service
//! - `AuthorityError`: calls to the citation authority
//!
//! Only transient failures are ever recovered automatically. Structural and
//! integrity failures park the workflow until an operator acts.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::phase::PhaseCode;

/// Errors from the orchestration subsystem.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Timeout or rate limit that survived local retries. The caller may retry the step.
    #[error("Transient external failure in phase {phase}: {message}")]
    TransientExternal { phase: PhaseCode, message: String },

    /// Non-retryable failure of an external collaborator (auth, misconfiguration).
    #[error("External service failure in phase {phase}: {message}")]
    External { phase: PhaseCode, message: String },

    /// Generation output could not be parsed into the phase's required structure.
    #[error("Phase {phase} produced unparseable output: {message}")]
    StructuralParse { phase: PhaseCode, message: String },

    #[error("Phase {phase} cannot start, missing prerequisites: {}", missing.join(", "))]
    PrerequisiteViolation { phase: PhaseCode, missing: Vec<String> },

    #[error("Workflow {workflow_id} changed concurrently (expected version {expected})")]
    ConcurrencyConflict { workflow_id: Uuid, expected: i64 },

    #[error("Citation integrity failure: {0}")]
    CitationIntegrity(String),

    #[error("Checkpoint {checkpoint_id} is stale: {reason}")]
    CheckpointStale { checkpoint_id: Uuid, reason: String },

    #[error("Approval is missing required affirmations: {}", missing.join(", "))]
    AffirmationIncomplete { missing: Vec<&'static str> },

    #[error("Destructive restart of workflow {0} requires explicit confirmation")]
    ConfirmationRequired(Uuid),

    #[error("Cannot {action} workflow {workflow_id} in status {status}")]
    InvalidTransition {
        workflow_id: Uuid,
        action: &'static str,
        status: String,
    },

    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("Checkpoint {0} not found")]
    CheckpointNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl WorkflowError {
    /// Whether the external runtime should simply retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientExternal { .. } | Self::ConcurrencyConflict { .. }
        )
    }
}

/// Errors from the generation service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("Generation call timed out after {}s", duration.as_secs())]
    Timeout { duration: Duration },

    #[error("Generation service rate limited: {0}")]
    RateLimited(String),

    #[error("Generation service outage: {0}")]
    ProviderOutage(String),

    #[error("Generation transport error: {0}")]
    Transport(String),

    #[error("Generation service rejected credentials: {0}")]
    ProviderAuth(String),

    #[error("Generation service misconfigured: {0}")]
    Misconfiguration(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited(_) | Self::ProviderOutage(_) | Self::Transport(_)
        )
    }
}

/// Errors from the citation authority.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthorityError {
    #[error("Authority lookup timed out after {}s", duration.as_secs())]
    Timeout { duration: Duration },

    #[error("Authority rate limited: {0}")]
    RateLimited(String),

    #[error("Authority unavailable: {0}")]
    Unavailable(String),

    #[error("Authority rejected credentials: {0}")]
    Auth(String),

    #[error("Authority returned a malformed response: {0}")]
    Malformed(String),

    #[error("Authority misconfigured: {0}")]
    Misconfiguration(String),
}

impl AuthorityError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited(_) | Self::Unavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_prerequisite_lists_missing() {
        let err = WorkflowError::PrerequisiteViolation {
            phase: PhaseCode::V,
            missing: vec!["IV incomplete".to_string(), "III missing evidence_map".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Phase V"));
        assert!(msg.contains("IV incomplete"));
        assert!(msg.contains("III missing evidence_map"));
    }

    #[test]
    fn only_transient_and_conflict_are_retryable() {
        let transient = WorkflowError::TransientExternal {
            phase: PhaseCode::II,
            message: "timeout".into(),
        };
        let conflict = WorkflowError::ConcurrencyConflict {
            workflow_id: Uuid::nil(),
            expected: 3,
        };
        let parse = WorkflowError::StructuralParse {
            phase: PhaseCode::II,
            message: "bad json".into(),
        };
        let integrity = WorkflowError::CitationIntegrity("blocked citation".into());
        assert!(transient.is_retryable());
        assert!(conflict.is_retryable());
        assert!(!parse.is_retryable());
        assert!(!integrity.is_retryable());
    }

    #[test]
    fn generation_error_classification() {
        assert!(
            GenerationError::Timeout {
                duration: Duration::from_secs(30)
            }
            .is_transient()
        );
        assert!(GenerationError::RateLimited("429".into()).is_transient());
        assert!(GenerationError::ProviderOutage("502".into()).is_transient());
        assert!(!GenerationError::ProviderAuth("401".into()).is_transient());
        assert!(!GenerationError::Misconfiguration("no key".into()).is_transient());
    }

    #[test]
    fn authority_error_classification() {
        assert!(AuthorityError::Unavailable("503".into()).is_transient());
        assert!(!AuthorityError::Malformed("not json".into()).is_transient());
        assert!(!AuthorityError::Auth("403".into()).is_transient());
    }

    #[test]
    fn affirmation_error_names_missing_items() {
        let err = WorkflowError::AffirmationIncomplete {
            missing: vec!["citation_accuracy", "no_conflicts"],
        };
        assert!(err.to_string().contains("citation_accuracy, no_conflicts"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WorkflowError::WorkflowNotFound(Uuid::nil()));
        assert_std_error(&GenerationError::Transport("x".into()));
        assert_std_error(&AuthorityError::Unavailable("x".into()));
    }
}
