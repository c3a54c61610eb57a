//! SQLite persistence.
//!
//! Every workflow mutation is a conditional `UPDATE ... WHERE status_version = ?`
//! so concurrent steps, in this process or another one sharing the database,
//! cannot both commit from the same starting state.

mod audit;
mod checkpoints;
mod citations;
mod slots;
mod workflows;

pub use citations::CitationRow;
pub use workflows::{CheckpointResolution, CitationRows, CommitEffects, CommitOutcome, InsertOutcome};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

/// Async-safe handle to the docket database.
///
/// Runs all access on tokio's blocking pool via `spawn_blocking` so SQLite
/// I/O never ties up async worker threads.
#[derive(Clone)]
pub struct Store {
    inner: Arc<std::sync::Mutex<DocketDb>>,
}

impl Store {
    pub fn new(db: DocketDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(DocketDb::open(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(DocketDb::open_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DocketDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct DocketDb {
    conn: Connection,
}

impl DocketDb {
    /// Open (or create) a database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to set journal mode")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    id TEXT PRIMARY KEY,
                    order_id TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL,
                    current_phase TEXT,
                    status_version INTEGER NOT NULL DEFAULT 0,
                    state TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS phase_executions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    loop_iteration INTEGER NOT NULL DEFAULT 0,
                    status_version INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    model TEXT,
                    prompt_sha256 TEXT,
                    raw_output TEXT,
                    error TEXT,
                    duration_ms INTEGER NOT NULL DEFAULT 0,
                    input_tokens INTEGER,
                    output_tokens INTEGER,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS gate_checks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    allowed INTEGER NOT NULL,
                    missing TEXT NOT NULL DEFAULT '[]',
                    status_version INTEGER NOT NULL,
                    checked_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    id TEXT PRIMARY KEY,
                    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    checkpoint_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    reason TEXT NOT NULL,
                    details TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    resolved_at TEXT,
                    resolved_by TEXT,
                    feedback TEXT,
                    resolution_reason TEXT,
                    remind_at TEXT,
                    escalate_at TEXT,
                    auto_cancel_at TEXT,
                    reminder_sent_at TEXT,
                    escalated_at TEXT
                );

                CREATE TABLE IF NOT EXISTS citations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    loop_iteration INTEGER NOT NULL DEFAULT 0,
                    position INTEGER NOT NULL,
                    raw TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    case_name TEXT,
                    lookup_key TEXT,
                    external_id TEXT,
                    status TEXT NOT NULL,
                    reason TEXT,
                    tier TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS citation_cache (
                    lookup_key TEXT PRIMARY KEY,
                    external_id TEXT,
                    payload TEXT NOT NULL,
                    fetched_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS execution_slots (
                    slot INTEGER PRIMARY KEY,
                    holder TEXT,
                    workflow_id TEXT,
                    phase TEXT,
                    expires_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status);
                CREATE INDEX IF NOT EXISTS idx_phase_executions_workflow ON phase_executions(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_gate_checks_workflow ON gate_checks(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_workflow ON checkpoints(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_status ON checkpoints(status);
                CREATE INDEX IF NOT EXISTS idx_citations_workflow ON citations(workflow_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix, so stored
/// timestamps compare correctly as text.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str, what: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to parse {}", what))
}
