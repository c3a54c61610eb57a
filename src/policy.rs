//! Per-check failure policies.
//!
//! Every side check that can fail independently of the main operation names
//! its own policy here instead of sharing one global flag.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// What happens when a check cannot be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Availability wins: log and continue with a fallback.
    FailOpen,
    /// Correctness wins: the failure propagates.
    FailClosed,
}

/// A named check with its declared policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub policy: FailurePolicy,
}

impl Check {
    pub const fn new(name: &'static str, policy: FailurePolicy) -> Self {
        Self { name, policy }
    }

    /// Apply the policy to a check result. Fail-open checks substitute
    /// `fallback`; fail-closed checks return the error.
    pub fn resolve<T, E: fmt::Display>(
        &self,
        result: Result<T, E>,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, E> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => match self.policy {
                FailurePolicy::FailOpen => {
                    warn!(check = self.name, error = %err, "check failed open");
                    Ok(fallback())
                }
                FailurePolicy::FailClosed => {
                    error!(check = self.name, error = %err, "check failed closed");
                    Err(err)
                }
            },
        }
    }
}

/// Cache reads fall through to the authority.
pub const CITATION_CACHE_READ: Check = Check::new("citation_cache_read", FailurePolicy::FailOpen);
/// A failed cache write only costs a future lookup.
pub const CITATION_CACHE_WRITE: Check = Check::new("citation_cache_write", FailurePolicy::FailOpen);
/// An authority that cannot answer never yields a pass.
pub const AUTHORITY_LOOKUP: Check = Check::new("authority_lookup", FailurePolicy::FailClosed);
/// Reminder and escalation delivery.
pub const CHECKPOINT_NOTIFY: Check = Check::new("checkpoint_notify", FailurePolicy::FailOpen);
/// Timer registration; the periodic sweep covers lost timers.
pub const CHECKPOINT_SCHEDULE: Check = Check::new("checkpoint_schedule", FailurePolicy::FailOpen);
/// Phase execution audit rows.
pub const EXECUTION_AUDIT: Check = Check::new("execution_audit", FailurePolicy::FailClosed);
/// Gate check audit rows.
pub const GATE_AUDIT: Check = Check::new("gate_audit", FailurePolicy::FailClosed);
