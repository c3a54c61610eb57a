use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::{DocketDb, ts};
use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::citations::VerifiedCitation;
use crate::motion::Tier;
use crate::phase::PhaseCode;
use crate::workflow::{WorkflowInstance, WorkflowStatus};

#[derive(Debug)]
pub enum InsertOutcome {
    Created,
    /// A workflow already exists for this order.
    Existing(WorkflowInstance),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The stored version no longer matches the expected one.
    Conflict,
    /// The checkpoint being resolved is no longer pending.
    CheckpointStale,
}

/// Resolve a pending checkpoint in the same transaction as the workflow write.
#[derive(Debug, Clone)]
pub struct CheckpointResolution {
    pub id: Uuid,
    pub status: CheckpointStatus,
    pub resolved_by: Option<String>,
    pub feedback: Option<String>,
    pub reason: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Citation rows produced by one verification phase. Replaces earlier rows
/// for the same phase.
#[derive(Debug, Clone)]
pub struct CitationRows {
    pub phase: PhaseCode,
    pub loop_iteration: u32,
    pub tier: Tier,
    pub citations: Vec<VerifiedCitation>,
}

/// Writes that must land atomically with a workflow transition.
#[derive(Debug, Clone, Default)]
pub struct CommitEffects {
    pub new_checkpoint: Option<Checkpoint>,
    pub resolve_checkpoint: Option<CheckpointResolution>,
    pub citations: Option<CitationRows>,
    /// Cancel every other pending checkpoint with this reason.
    pub cancel_pending_checkpoints: Option<String>,
    pub clear_citations: bool,
}

impl CommitEffects {
    pub fn none() -> Self {
        Self::default()
    }
}

impl DocketDb {
    /// Insert a new workflow, unless one already exists for the same order.
    pub fn insert_workflow(&self, instance: &WorkflowInstance) -> Result<InsertOutcome> {
        let state = serde_json::to_string(instance).context("Failed to serialize workflow")?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO workflows
                 (id, order_id, status, current_phase, status_version, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    instance.id.to_string(),
                    instance.order_id,
                    instance.status.as_str(),
                    instance.current_phase.map(|p| p.as_str()),
                    instance.status_version,
                    state,
                    ts(&instance.created_at),
                    ts(&instance.updated_at),
                ],
            )
            .context("Failed to insert workflow")?;
        if inserted == 1 {
            return Ok(InsertOutcome::Created);
        }
        let existing = self
            .get_workflow_by_order(&instance.order_id)?
            .context("Workflow insert ignored but no row exists for the order")?;
        Ok(InsertOutcome::Existing(existing))
    }

    pub fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        self.conn
            .query_row(
                "SELECT state, status_version FROM workflows WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .context("Failed to query workflow")?
            .map(|(state, version)| decode_workflow(&state, version))
            .transpose()
    }

    pub fn get_workflow_by_order(&self, order_id: &str) -> Result<Option<WorkflowInstance>> {
        self.conn
            .query_row(
                "SELECT state, status_version FROM workflows WHERE order_id = ?1",
                params![order_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .context("Failed to query workflow by order")?
            .map(|(state, version)| decode_workflow(&state, version))
            .transpose()
    }

    /// All workflows, newest first, optionally filtered by status.
    pub fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<WorkflowInstance>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT state, status_version FROM workflows
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY created_at DESC",
            )
            .context("Failed to prepare list_workflows")?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query workflows")?;
        let mut workflows = Vec::new();
        for row in rows {
            let (state, version) = row.context("Failed to read workflow row")?;
            workflows.push(decode_workflow(&state, version)?);
        }
        Ok(workflows)
    }

    /// Conditionally write `instance` as version `expected + 1`, together with
    /// `effects`, in one transaction.
    pub fn commit_workflow(
        &self,
        expected: i64,
        instance: &WorkflowInstance,
        effects: &CommitEffects,
    ) -> Result<CommitOutcome> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(resolution) = &effects.resolve_checkpoint {
            let resolved = tx
                .execute(
                    "UPDATE checkpoints
                     SET status = ?1, resolved_at = ?2, resolved_by = ?3, feedback = ?4, resolution_reason = ?5
                     WHERE id = ?6 AND status = 'PENDING'",
                    params![
                        resolution.status.as_str(),
                        ts(&resolution.resolved_at),
                        resolution.resolved_by,
                        resolution.feedback,
                        resolution.reason,
                        resolution.id.to_string(),
                    ],
                )
                .context("Failed to resolve checkpoint")?;
            if resolved == 0 {
                return Ok(CommitOutcome::CheckpointStale);
            }
        }

        let mut stored = instance.clone();
        stored.status_version = expected + 1;
        let state = serde_json::to_string(&stored).context("Failed to serialize workflow")?;
        let updated = tx
            .execute(
                "UPDATE workflows
                 SET status = ?1, current_phase = ?2, status_version = ?3, state = ?4, updated_at = ?5
                 WHERE id = ?6 AND status_version = ?7",
                params![
                    stored.status.as_str(),
                    stored.current_phase.map(|p| p.as_str()),
                    stored.status_version,
                    state,
                    ts(&stored.updated_at),
                    stored.id.to_string(),
                    expected,
                ],
            )
            .context("Failed to update workflow")?;
        if updated == 0 {
            return Ok(CommitOutcome::Conflict);
        }

        if let Some(reason) = &effects.cancel_pending_checkpoints {
            tx.execute(
                "UPDATE checkpoints
                 SET status = 'CANCELLED', resolved_at = ?1, resolution_reason = ?2
                 WHERE workflow_id = ?3 AND status = 'PENDING'",
                params![ts(&stored.updated_at), reason, stored.id.to_string()],
            )
            .context("Failed to cancel pending checkpoints")?;
        }

        if effects.clear_citations {
            tx.execute(
                "DELETE FROM citations WHERE workflow_id = ?1",
                params![stored.id.to_string()],
            )
            .context("Failed to clear citations")?;
        }

        if let Some(checkpoint) = &effects.new_checkpoint {
            Self::insert_checkpoint_tx(&tx, checkpoint)?;
        }

        if let Some(rows) = &effects.citations {
            Self::replace_citations_tx(&tx, stored.id, rows, &stored.updated_at)?;
        }

        tx.commit().context("Failed to commit workflow transaction")?;
        Ok(CommitOutcome::Committed)
    }

    /// Extend the claim held at `version` on `phase` until `until`. The
    /// version is left alone, so the holder's final commit still matches.
    /// Returns false when the claim is gone or the workflow has moved on.
    pub fn renew_claim(
        &self,
        id: Uuid,
        version: i64,
        phase: PhaseCode,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut instance) = self.get_workflow(id)? else {
            return Ok(false);
        };
        if instance.status_version != version || instance.in_flight_phase != Some(phase) {
            return Ok(false);
        }
        instance.lease_expires_at = Some(until);
        let state = serde_json::to_string(&instance).context("Failed to serialize workflow")?;
        let updated = self
            .conn
            .execute(
                "UPDATE workflows SET state = ?1 WHERE id = ?2 AND status_version = ?3",
                params![state, id.to_string(), version],
            )
            .context("Failed to renew workflow claim")?;
        Ok(updated == 1)
    }
}

fn decode_workflow(state: &str, version: i64) -> Result<WorkflowInstance> {
    let mut instance: WorkflowInstance =
        serde_json::from_str(state).context("Failed to parse workflow state JSON")?;
    // The column is authoritative.
    instance.status_version = version;
    Ok(instance)
}
