use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::{CheckpointResolution, DocketDb, parse_enum, parse_opt_ts, parse_ts, ts};
use crate::checkpoint::Checkpoint;

const CHECKPOINT_COLUMNS: &str = "id, workflow_id, phase, checkpoint_type, status, reason, details, created_at,
     resolved_at, resolved_by, feedback, resolution_reason, remind_at, escalate_at, auto_cancel_at,
     reminder_sent_at, escalated_at";

/// Intermediate row struct for checkpoints.
struct CheckpointRow {
    id: String,
    workflow_id: String,
    phase: String,
    checkpoint_type: String,
    status: String,
    reason: String,
    details: String,
    created_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
    feedback: Option<String>,
    resolution_reason: Option<String>,
    remind_at: Option<String>,
    escalate_at: Option<String>,
    auto_cancel_at: Option<String>,
    reminder_sent_at: Option<String>,
    escalated_at: Option<String>,
}

impl CheckpointRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            phase: row.get(2)?,
            checkpoint_type: row.get(3)?,
            status: row.get(4)?,
            reason: row.get(5)?,
            details: row.get(6)?,
            created_at: row.get(7)?,
            resolved_at: row.get(8)?,
            resolved_by: row.get(9)?,
            feedback: row.get(10)?,
            resolution_reason: row.get(11)?,
            remind_at: row.get(12)?,
            escalate_at: row.get(13)?,
            auto_cancel_at: row.get(14)?,
            reminder_sent_at: row.get(15)?,
            escalated_at: row.get(16)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            id: Uuid::parse_str(&self.id).context("Invalid checkpoint id")?,
            workflow_id: Uuid::parse_str(&self.workflow_id).context("Invalid workflow id")?,
            phase: parse_enum(&self.phase, "checkpoint phase")?,
            checkpoint_type: parse_enum(&self.checkpoint_type, "checkpoint type")?,
            status: parse_enum(&self.status, "checkpoint status")?,
            reason: self.reason,
            details: serde_json::from_str(&self.details).context("Failed to parse checkpoint details JSON")?,
            created_at: parse_ts(&self.created_at)?,
            resolved_at: parse_opt_ts(self.resolved_at)?,
            resolved_by: self.resolved_by,
            feedback: self.feedback,
            resolution_reason: self.resolution_reason,
            remind_at: parse_opt_ts(self.remind_at)?,
            escalate_at: parse_opt_ts(self.escalate_at)?,
            auto_cancel_at: parse_opt_ts(self.auto_cancel_at)?,
            reminder_sent_at: parse_opt_ts(self.reminder_sent_at)?,
            escalated_at: parse_opt_ts(self.escalated_at)?,
        })
    }
}

impl DocketDb {
    pub(super) fn insert_checkpoint_tx(conn: &Connection, checkpoint: &Checkpoint) -> Result<()> {
        conn.execute(
            "INSERT INTO checkpoints
             (id, workflow_id, phase, checkpoint_type, status, reason, details, created_at,
              remind_at, escalate_at, auto_cancel_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                checkpoint.id.to_string(),
                checkpoint.workflow_id.to_string(),
                checkpoint.phase.as_str(),
                checkpoint.checkpoint_type.as_str(),
                checkpoint.status.as_str(),
                checkpoint.reason,
                checkpoint.details.to_string(),
                ts(&checkpoint.created_at),
                checkpoint.remind_at.as_ref().map(ts),
                checkpoint.escalate_at.as_ref().map(ts),
                checkpoint.auto_cancel_at.as_ref().map(ts),
            ],
        )
        .context("Failed to insert checkpoint")?;
        Ok(())
    }

    pub fn get_checkpoint(&self, id: Uuid) -> Result<Option<Checkpoint>> {
        let sql = format!("SELECT {} FROM checkpoints WHERE id = ?1", CHECKPOINT_COLUMNS);
        self.conn
            .query_row(&sql, params![id.to_string()], CheckpointRow::from_row)
            .optional()
            .context("Failed to query checkpoint")?
            .map(CheckpointRow::into_checkpoint)
            .transpose()
    }

    pub fn list_checkpoints(&self, workflow_id: Uuid) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints WHERE workflow_id = ?1 ORDER BY created_at",
            CHECKPOINT_COLUMNS
        );
        self.query_checkpoints(&sql, params![workflow_id.to_string()])
    }

    /// Pending checkpoints whose reminder is due and not yet sent.
    pub fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints
             WHERE status = 'PENDING' AND remind_at IS NOT NULL AND remind_at <= ?1 AND reminder_sent_at IS NULL
             ORDER BY remind_at",
            CHECKPOINT_COLUMNS
        );
        self.query_checkpoints(&sql, params![ts(&now)])
    }

    /// Pending checkpoints whose escalation is due and not yet sent.
    pub fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints
             WHERE status = 'PENDING' AND escalate_at IS NOT NULL AND escalate_at <= ?1 AND escalated_at IS NULL
             ORDER BY escalate_at",
            CHECKPOINT_COLUMNS
        );
        self.query_checkpoints(&sql, params![ts(&now)])
    }

    /// Pending checkpoints past their auto-cancel deadline.
    pub fn due_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM checkpoints
             WHERE status = 'PENDING' AND auto_cancel_at IS NOT NULL AND auto_cancel_at <= ?1
             ORDER BY auto_cancel_at",
            CHECKPOINT_COLUMNS
        );
        self.query_checkpoints(&sql, params![ts(&now)])
    }

    /// Claim the reminder for a checkpoint. Returns false if another sweep
    /// already sent it or the checkpoint was resolved.
    pub fn mark_reminder_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE checkpoints SET reminder_sent_at = ?1
                 WHERE id = ?2 AND status = 'PENDING' AND reminder_sent_at IS NULL",
                params![ts(&now), id.to_string()],
            )
            .context("Failed to mark reminder sent")?;
        Ok(changed == 1)
    }

    pub fn mark_escalated(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE checkpoints SET escalated_at = ?1
                 WHERE id = ?2 AND status = 'PENDING' AND escalated_at IS NULL",
                params![ts(&now), id.to_string()],
            )
            .context("Failed to mark checkpoint escalated")?;
        Ok(changed == 1)
    }

    /// Resolve a pending checkpoint without touching its workflow. Used for
    /// notification acknowledgements and for checkpoints of finished workflows.
    pub fn resolve_checkpoint(&self, resolution: &CheckpointResolution) -> Result<bool> {
        let changed = self
            .conn
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
        Ok(changed == 1)
    }

    fn query_checkpoints(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare checkpoint query")?;
        let rows = stmt
            .query_map(params, CheckpointRow::from_row)
            .context("Failed to query checkpoints")?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row.context("Failed to read checkpoint row")?.into_checkpoint()?);
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use crate::motion::IntakeEvent;
    use crate::phase::{CheckpointType, PhaseCode};
    use crate::store::{CommitEffects, CommitOutcome};
    use crate::workflow::WorkflowInstance;
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> Result<(DocketDb, WorkflowInstance)> {
        let db = DocketDb::open_in_memory()?;
        let event = IntakeEvent {
            order_id: "ord-cp".into(),
            motion_type: "Motion to Compel".into(),
            jurisdiction: "CA".into(),
            documents: vec![],
            tier: None,
            instructions: None,
        };
        let wf = WorkflowInstance::from_intake(&event, Utc::now());
        db.insert_workflow(&wf)?;
        Ok((db, wf))
    }

    fn hold(workflow_id: Uuid, created: DateTime<Utc>) -> Checkpoint {
        Checkpoint {
            id: Uuid::new_v4(),
            workflow_id,
            phase: PhaseCode::IV,
            checkpoint_type: CheckpointType::Hold,
            status: CheckpointStatus::Pending,
            reason: "evidence gaps".into(),
            details: json!({"gaps": ["deposition"]}),
            created_at: created,
            resolved_at: None,
            resolved_by: None,
            feedback: None,
            resolution_reason: None,
            remind_at: Some(created + Duration::hours(48)),
            escalate_at: Some(created + Duration::hours(72)),
            auto_cancel_at: Some(created + Duration::days(7)),
            reminder_sent_at: None,
            escalated_at: None,
        }
    }

    #[test]
    fn checkpoint_is_inserted_with_the_workflow_commit() -> Result<()> {
        let (db, wf) = setup()?;
        let cp = hold(wf.id, Utc::now());
        let effects = CommitEffects {
            new_checkpoint: Some(cp.clone()),
            ..CommitEffects::none()
        };
        assert_eq!(db.commit_workflow(0, &wf, &effects)?, CommitOutcome::Committed);
        let stored = db.get_checkpoint(cp.id)?.unwrap();
        assert_eq!(stored, cp_with_ms(cp));
        Ok(())
    }

    /// Stored timestamps carry millisecond precision.
    fn cp_with_ms(mut cp: Checkpoint) -> Checkpoint {
        let trunc = |t: DateTime<Utc>| parse_ts(&ts(&t)).unwrap();
        cp.created_at = trunc(cp.created_at);
        cp.remind_at = cp.remind_at.map(trunc);
        cp.escalate_at = cp.escalate_at.map(trunc);
        cp.auto_cancel_at = cp.auto_cancel_at.map(trunc);
        cp
    }

    #[test]
    fn due_queries_follow_deadlines() -> Result<()> {
        let (db, wf) = setup()?;
        let created = Utc::now() - Duration::hours(80);
        let cp = hold(wf.id, created);
        db.commit_workflow(0, &wf, &CommitEffects { new_checkpoint: Some(cp.clone()), ..CommitEffects::none() })?;

        let now = Utc::now();
        assert_eq!(db.due_reminders(now)?.len(), 1);
        assert_eq!(db.due_escalations(now)?.len(), 1);
        assert!(db.due_timeouts(now)?.is_empty());

        assert!(db.mark_reminder_sent(cp.id, now)?);
        assert!(!db.mark_reminder_sent(cp.id, now)?);
        assert!(db.due_reminders(now)?.is_empty());
        assert!(db.mark_escalated(cp.id, now)?);
        assert!(db.due_escalations(now)?.is_empty());
        Ok(())
    }

    #[test]
    fn resolving_a_resolved_checkpoint_is_stale() -> Result<()> {
        let (db, wf) = setup()?;
        let cp = hold(wf.id, Utc::now());
        db.commit_workflow(0, &wf, &CommitEffects { new_checkpoint: Some(cp.clone()), ..CommitEffects::none() })?;

        let resolution = CheckpointResolution {
            id: cp.id,
            status: CheckpointStatus::Approved,
            resolved_by: Some("attorney".into()),
            feedback: None,
            reason: None,
            resolved_at: Utc::now(),
        };
        let effects = CommitEffects {
            resolve_checkpoint: Some(resolution),
            ..CommitEffects::none()
        };
        assert_eq!(db.commit_workflow(1, &wf, &effects)?, CommitOutcome::Committed);
        assert_eq!(db.commit_workflow(2, &wf, &effects)?, CommitOutcome::CheckpointStale);
        assert_eq!(db.get_workflow(wf.id)?.unwrap().status_version, 2);
        assert_eq!(db.list_checkpoints(wf.id)?[0].status, CheckpointStatus::Approved);
        Ok(())
    }

    #[test]
    fn conflicting_resolution_rolls_back_checkpoint_update() -> Result<()> {
        let (db, wf) = setup()?;
        let cp = hold(wf.id, Utc::now());
        db.commit_workflow(0, &wf, &CommitEffects { new_checkpoint: Some(cp.clone()), ..CommitEffects::none() })?;

        let effects = CommitEffects {
            resolve_checkpoint: Some(CheckpointResolution {
                id: cp.id,
                status: CheckpointStatus::Cancelled,
                resolved_by: None,
                feedback: None,
                reason: None,
                resolved_at: Utc::now(),
            }),
            ..CommitEffects::none()
        };
        assert_eq!(db.commit_workflow(0, &wf, &effects)?, CommitOutcome::Conflict);
        assert!(db.get_checkpoint(cp.id)?.unwrap().is_pending());
        Ok(())
    }
}
