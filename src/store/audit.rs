use anyhow::{Context, Result};
use rusqlite::params;
use uuid::Uuid;

use super::{DocketDb, parse_enum, parse_ts, ts};
use crate::audit::{GateCheckRecord, PhaseExecutionRecord};

impl DocketDb {
    pub fn append_phase_execution(&self, record: &PhaseExecutionRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO phase_executions
                 (workflow_id, phase, loop_iteration, status_version, status, model, prompt_sha256,
                  raw_output, error, duration_ms, input_tokens, output_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.workflow_id.to_string(),
                    record.phase.as_str(),
                    record.loop_iteration,
                    record.status_version,
                    record.status.as_str(),
                    record.model,
                    record.prompt_sha256,
                    record.raw_output,
                    record.error,
                    record.duration_ms as i64,
                    record.input_tokens.map(|t| t as i64),
                    record.output_tokens.map(|t| t as i64),
                    ts(&record.created_at),
                ],
            )
            .context("Failed to append phase execution")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_phase_executions(&self, workflow_id: Uuid) -> Result<Vec<PhaseExecutionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, phase, loop_iteration, status_version, status, model, prompt_sha256,
                        raw_output, error, duration_ms, input_tokens, output_tokens, created_at
                 FROM phase_executions WHERE workflow_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_phase_executions")?;
        let mut rows = stmt
            .query(params![workflow_id.to_string()])
            .context("Failed to query phase executions")?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().context("Failed to read phase execution row")? {
            let phase: String = row.get(1)?;
            let status: String = row.get(4)?;
            let created_at: String = row.get(12)?;
            records.push(PhaseExecutionRecord {
                id: Some(row.get(0)?),
                workflow_id,
                phase: parse_enum(&phase, "execution phase")?,
                loop_iteration: row.get(2)?,
                status_version: row.get(3)?,
                status: parse_enum(&status, "execution status")?,
                model: row.get(5)?,
                prompt_sha256: row.get(6)?,
                raw_output: row.get(7)?,
                error: row.get(8)?,
                duration_ms: row.get::<_, i64>(9)? as u64,
                input_tokens: row.get::<_, Option<i64>>(10)?.map(|t| t as u64),
                output_tokens: row.get::<_, Option<i64>>(11)?.map(|t| t as u64),
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(records)
    }

    pub fn append_gate_check(&self, record: &GateCheckRecord) -> Result<i64> {
        let missing = serde_json::to_string(&record.missing).context("Failed to serialize gate misses")?;
        self.conn
            .execute(
                "INSERT INTO gate_checks (workflow_id, phase, allowed, missing, status_version, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.workflow_id.to_string(),
                    record.phase.as_str(),
                    record.allowed,
                    missing,
                    record.status_version,
                    ts(&record.checked_at),
                ],
            )
            .context("Failed to append gate check")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_gate_checks(&self, workflow_id: Uuid) -> Result<Vec<GateCheckRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, phase, allowed, missing, status_version, checked_at
                 FROM gate_checks WHERE workflow_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_gate_checks")?;
        let mut rows = stmt
            .query(params![workflow_id.to_string()])
            .context("Failed to query gate checks")?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().context("Failed to read gate check row")? {
            let phase: String = row.get(1)?;
            let missing: String = row.get(3)?;
            let checked_at: String = row.get(5)?;
            records.push(GateCheckRecord {
                id: Some(row.get(0)?),
                workflow_id,
                phase: parse_enum(&phase, "gate phase")?,
                allowed: row.get(2)?,
                missing: serde_json::from_str(&missing).context("Failed to parse gate misses")?,
                status_version: row.get(4)?,
                checked_at: parse_ts(&checked_at)?,
            });
        }
        Ok(records)
    }
}
