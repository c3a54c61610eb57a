use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::{DocketDb, ts};
use crate::phase::PhaseCode;

impl DocketDb {
    /// Lease one of `capacity` global execution slots. Returns the slot
    /// number, or `None` when every slot is held by an unexpired lease.
    pub fn try_acquire_slot(
        &self,
        capacity: u32,
        holder: Uuid,
        workflow_id: Uuid,
        phase: PhaseCode,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        for slot in 0..capacity {
            self.conn
                .execute("INSERT OR IGNORE INTO execution_slots (slot) VALUES (?1)", params![slot])
                .context("Failed to seed execution slot")?;
        }
        let now_ts = ts(&now);
        self.conn
            .query_row(
                "UPDATE execution_slots
                 SET holder = ?1, workflow_id = ?2, phase = ?3, expires_at = ?4
                 WHERE slot = (
                     SELECT slot FROM execution_slots
                     WHERE slot < ?5 AND (holder IS NULL OR expires_at <= ?6)
                     ORDER BY slot LIMIT 1
                 )
                 RETURNING slot",
                params![
                    holder.to_string(),
                    workflow_id.to_string(),
                    phase.as_str(),
                    ts(&(now + lease)),
                    capacity,
                    now_ts,
                ],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to acquire execution slot")
    }

    /// Release a slot if `holder` still owns it.
    pub fn release_slot(&self, slot: i64, holder: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE execution_slots SET holder = NULL, workflow_id = NULL, phase = NULL, expires_at = NULL
                 WHERE slot = ?1 AND holder = ?2",
                params![slot, holder.to_string()],
            )
            .context("Failed to release execution slot")?;
        Ok(changed == 1)
    }

    /// Push a held slot's expiry out to `until`. False when `holder` no
    /// longer owns the slot.
    pub fn renew_slot(&self, slot: i64, holder: Uuid, until: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE execution_slots SET expires_at = ?1 WHERE slot = ?2 AND holder = ?3",
                params![ts(&until), slot, holder.to_string()],
            )
            .context("Failed to renew execution slot")?;
        Ok(changed == 1)
    }

    /// Slots currently held by unexpired leases.
    pub fn active_slots(&self, now: DateTime<Utc>) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM execution_slots WHERE holder IS NOT NULL AND expires_at > ?1",
                params![ts(&now)],
                |row| row.get(0),
            )
            .context("Failed to count active slots")
    }
}
