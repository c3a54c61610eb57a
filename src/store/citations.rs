use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use uuid::Uuid;

use super::{CitationRows, DocketDb, parse_enum, ts};
use crate::citations::{AuthorityRecord, CitationKind, VerificationStatus};
use crate::phase::PhaseCode;

/// A persisted citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationRow {
    pub phase: PhaseCode,
    pub loop_iteration: u32,
    pub raw: String,
    pub kind: CitationKind,
    pub case_name: Option<String>,
    pub external_id: Option<String>,
    pub status: VerificationStatus,
    pub reason: Option<String>,
}

impl DocketDb {
    pub(super) fn replace_citations_tx(
        conn: &Connection,
        workflow_id: Uuid,
        rows: &CitationRows,
        at: &DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM citations WHERE workflow_id = ?1 AND phase = ?2",
            params![workflow_id.to_string(), rows.phase.as_str()],
        )
        .context("Failed to clear phase citations")?;
        let mut stmt = conn
            .prepare(
                "INSERT INTO citations
                 (workflow_id, phase, loop_iteration, position, raw, kind, case_name, lookup_key,
                  external_id, status, reason, tier, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )
            .context("Failed to prepare citation insert")?;
        for (position, verified) in rows.citations.iter().enumerate() {
            let citation = &verified.citation;
            stmt.execute(params![
                workflow_id.to_string(),
                rows.phase.as_str(),
                rows.loop_iteration,
                position as i64,
                citation.raw,
                citation.kind.as_str(),
                verified.authority_case_name.clone().or_else(|| citation.case_name()),
                citation.lookup_key(),
                verified.external_id,
                verified.status.as_str(),
                verified.reason,
                rows.tier.as_str(),
                ts(at),
            ])
            .context("Failed to insert citation")?;
        }
        Ok(())
    }

    pub fn list_citations(&self, workflow_id: Uuid) -> Result<Vec<CitationRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT phase, loop_iteration, raw, kind, case_name, external_id, status, reason
                 FROM citations WHERE workflow_id = ?1 ORDER BY phase, position",
            )
            .context("Failed to prepare list_citations")?;
        let rows = stmt
            .query_map(params![workflow_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .context("Failed to query citations")?;
        let mut citations = Vec::new();
        for row in rows {
            let (phase, loop_iteration, raw, kind, case_name, external_id, status, reason) =
                row.context("Failed to read citation row")?;
            citations.push(CitationRow {
                phase: parse_enum(&phase, "citation phase")?,
                loop_iteration,
                raw,
                kind: parse_enum(&kind, "citation kind")?,
                case_name,
                external_id,
                status: parse_enum(&status, "citation status")?,
                reason,
            });
        }
        Ok(citations)
    }

    pub fn count_citations(&self, workflow_id: Uuid) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM citations WHERE workflow_id = ?1",
                params![workflow_id.to_string()],
                |row| row.get(0),
            )
            .context("Failed to count citations")?;
        Ok(count as usize)
    }

    /// Unexpired cache entries for `keys`.
    pub fn cache_get_many(&self, keys: &[String], now: DateTime<Utc>) -> Result<HashMap<String, AuthorityRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM citation_cache WHERE lookup_key = ?1 AND expires_at > ?2")
            .context("Failed to prepare cache lookup")?;
        let now = ts(&now);
        let mut found = HashMap::new();
        for key in keys {
            let mut rows = stmt
                .query(params![key, now])
                .context("Failed to query citation cache")?;
            if let Some(row) = rows.next().context("Failed to read cache row")? {
                let payload: String = row.get(0)?;
                let record: AuthorityRecord =
                    serde_json::from_str(&payload).context("Failed to parse cached authority record")?;
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    pub fn cache_put_many(&self, records: &[AuthorityRecord], fetched_at: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let expires_at = fetched_at + ttl;
        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO citation_cache (lookup_key, external_id, payload, fetched_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(lookup_key) DO UPDATE SET
                    external_id = excluded.external_id,
                    payload = excluded.payload,
                    fetched_at = excluded.fetched_at,
                    expires_at = excluded.expires_at",
            )
            .context("Failed to prepare cache insert")?;
        for record in records {
            let payload = serde_json::to_string(record).context("Failed to serialize authority record")?;
            stmt.execute(params![record.key, record.external_id, payload, ts(&fetched_at), ts(&expires_at)])
                .context("Failed to write citation cache")?;
        }
        Ok(())
    }

    /// Delete expired cache entries. Returns the number removed.
    pub fn purge_expired_cache(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute("DELETE FROM citation_cache WHERE expires_at <= ?1", params![ts(&now)])
            .context("Failed to purge citation cache")
    }
}
