//! Configuration for docket, read from `.docket/docket.toml`.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Values are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [generation]
//! api_key_env = "ANTHROPIC_API_KEY"
//! temperature = 0.2
//! timeout_secs = 300
//!
//! [models]
//! fast = "claude-3-5-haiku-latest"
//! standard = "claude-sonnet-4-5"
//! premium = "claude-opus-4-1"
//!
//! [authority]
//! token_env = "COURTLISTENER_TOKEN"
//! timeout_secs = 30
//! max_batch = 50
//!
//! [citations]
//! standard_batch = 4
//! elevated_batch = 2
//! cache_ttl_days = 30
//!
//! [quality]
//! max_revision_loops = 3
//!
//! [checkpoints]
//! remind_after_hours = 48
//! escalate_after_hours = 72
//! auto_cancel_after_hours = 168
//!
//! [orchestrator]
//! slot_capacity = 5
//! claim_lease_minutes = 30
//! slot_lease_minutes = 30
//!
//! [logging]
//! level = "info"
//! json = false
//! file = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::checkpoint::CheckpointSettings;
use crate::citations::CitationSettings;
use crate::generation::ModelCatalog;
use crate::judge::MAX_REVISION_LOOPS;
use crate::orchestrator::OrchestratorSettings;
use crate::retry::BackoffPolicy;

/// The name of the docket state directory.
pub const DOCKET_DIR: &str = ".docket";
pub const CONFIG_FILE: &str = "docket.toml";
pub const DB_FILE: &str = "docket.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    /// Name of the environment variable holding the provider API key.
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    /// Wall-clock limit on a single generation call.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            temperature: 0.2,
            timeout_secs: 300,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub fast: String,
    pub standard: String,
    pub premium: String,
}

impl Default for ModelsSection {
    fn default() -> Self {
        let catalog = ModelCatalog::default();
        Self {
            fast: catalog.fast,
            standard: catalog.standard,
            premium: catalog.premium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoritySection {
    pub base_url: Option<String>,
    /// Name of the environment variable holding the lookup API token.
    pub token_env: String,
    pub timeout_secs: u64,
    /// Largest number of citations the service accepts per request.
    pub max_batch: usize,
}

impl Default for AuthoritySection {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: "COURTLISTENER_TOKEN".to_string(),
            timeout_secs: 30,
            max_batch: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationsSection {
    pub standard_batch: usize,
    pub elevated_batch: usize,
    pub cache_ttl_days: u64,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
    pub retry_jitter: f64,
    pub max_retries: u32,
}

impl Default for CitationsSection {
    fn default() -> Self {
        Self {
            standard_batch: 4,
            elevated_batch: 2,
            cache_ttl_days: 30,
            retry_base_ms: 1_000,
            retry_cap_ms: 32_000,
            retry_jitter: 0.2,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySection {
    /// Can only lower the built-in bound of three loops.
    pub max_revision_loops: u32,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            max_revision_loops: MAX_REVISION_LOOPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointsSection {
    pub remind_after_hours: i64,
    pub escalate_after_hours: i64,
    pub auto_cancel_after_hours: i64,
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            remind_after_hours: 48,
            escalate_after_hours: 72,
            auto_cancel_after_hours: 7 * 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub slot_capacity: u32,
    pub claim_lease_minutes: i64,
    pub slot_lease_minutes: i64,
    pub max_steps_per_run: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            slot_capacity: 5,
            claim_lease_minutes: 30,
            slot_lease_minutes: 30,
            max_steps_per_run: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when neither `DOCKET_LOG` nor `RUST_LOG` is set.
    pub level: String,
    pub json: bool,
    /// Write a daily rolling log under `.docket/logs`.
    pub file: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: true,
        }
    }
}

/// Root of `docket.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocketToml {
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub models: ModelsSection,
    #[serde(default)]
    pub authority: AuthoritySection,
    #[serde(default)]
    pub citations: CitationsSection,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DocketToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse docket.toml")
    }

    /// Load `docket.toml` from the docket directory, or defaults if absent.
    pub fn load_or_default(docket_dir: &Path) -> Result<Self> {
        let config_path = docket_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize docket.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `DOCKET_*` overrides. Returns a warning for each variable that
    /// is set but cannot be parsed; those keep the file value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(url) = lookup("DOCKET_GENERATION_BASE_URL") {
            self.generation.base_url = Some(url);
        }
        if let Some(url) = lookup("DOCKET_AUTHORITY_BASE_URL") {
            self.authority.base_url = Some(url);
        }
        if let Some(model) = lookup("DOCKET_MODEL_FAST") {
            self.models.fast = model;
        }
        if let Some(model) = lookup("DOCKET_MODEL_STANDARD") {
            self.models.standard = model;
        }
        if let Some(model) = lookup("DOCKET_MODEL_PREMIUM") {
            self.models.premium = model;
        }
        if let Some(raw) = lookup("DOCKET_SLOT_CAPACITY") {
            match raw.parse() {
                Ok(capacity) => self.orchestrator.slot_capacity = capacity,
                Err(_) => warnings.push(format!("Ignoring DOCKET_SLOT_CAPACITY='{}': not a number", raw)),
            }
        }
        if let Some(raw) = lookup("DOCKET_LOG_JSON") {
            match parse_bool(&raw) {
                Some(json) => self.logging.json = json,
                None => warnings.push(format!("Ignoring DOCKET_LOG_JSON='{}': expected true or false", raw)),
            }
        }

        warnings
    }

    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.generation.temperature) {
            warnings.push(format!(
                "generation.temperature {} is outside 0.0..=1.0",
                self.generation.temperature
            ));
        }
        if self.generation.timeout_secs == 0 {
            warnings.push("generation.timeout_secs is 0; every call would time out".to_string());
        }
        for (tier, model) in [
            ("fast", &self.models.fast),
            ("standard", &self.models.standard),
            ("premium", &self.models.premium),
        ] {
            if model.trim().is_empty() {
                warnings.push(format!("models.{} is empty", tier));
            }
        }
        if self.authority.max_batch == 0 {
            warnings.push("authority.max_batch is 0; treated as 1".to_string());
        }
        if self.citations.standard_batch == 0 || self.citations.elevated_batch == 0 {
            warnings.push("citation batch sizes must be at least 1".to_string());
        }
        if self.citations.elevated_batch > self.citations.standard_batch {
            warnings.push(format!(
                "citations.elevated_batch ({}) is larger than standard_batch ({})",
                self.citations.elevated_batch, self.citations.standard_batch
            ));
        }
        if !(0.0..1.0).contains(&self.citations.retry_jitter) {
            warnings.push(format!(
                "citations.retry_jitter {} is outside 0.0..1.0",
                self.citations.retry_jitter
            ));
        }
        if self.citations.retry_base_ms > self.citations.retry_cap_ms {
            warnings.push("citations.retry_base_ms exceeds retry_cap_ms".to_string());
        }
        if self.quality.max_revision_loops > MAX_REVISION_LOOPS {
            warnings.push(format!(
                "quality.max_revision_loops {} exceeds the limit of {}; using {}",
                self.quality.max_revision_loops, MAX_REVISION_LOOPS, MAX_REVISION_LOOPS
            ));
        }
        let cp = &self.checkpoints;
        if !(0 < cp.remind_after_hours
            && cp.remind_after_hours < cp.escalate_after_hours
            && cp.escalate_after_hours < cp.auto_cancel_after_hours)
        {
            warnings.push(format!(
                "checkpoint deadlines must increase: remind {}h, escalate {}h, auto-cancel {}h",
                cp.remind_after_hours, cp.escalate_after_hours, cp.auto_cancel_after_hours
            ));
        }
        if self.orchestrator.slot_capacity == 0 {
            warnings.push("orchestrator.slot_capacity is 0; no phase could ever run".to_string());
        }
        if self.orchestrator.claim_lease_minutes <= 0 || self.orchestrator.slot_lease_minutes <= 0 {
            warnings.push("orchestrator lease durations must be positive".to_string());
        }
        let floor = self.lease_floor_minutes();
        for (name, minutes) in [
            ("claim_lease_minutes", self.orchestrator.claim_lease_minutes),
            ("slot_lease_minutes", self.orchestrator.slot_lease_minutes),
        ] {
            if (1..floor).contains(&minutes) {
                warnings.push(format!(
                    "orchestrator.{} ({}) is shorter than the worst-case generation call ({} minutes); using {}",
                    name, minutes, floor, floor
                ));
            }
        }
        if EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }

        warnings
    }

    pub fn model_catalog(&self) -> ModelCatalog {
        ModelCatalog {
            fast: self.models.fast.clone(),
            standard: self.models.standard.clone(),
            premium: self.models.premium.clone(),
        }
    }

    /// Retry schedule for generation calls.
    pub fn generation_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.generation.max_retries,
            ..BackoffPolicy::default()
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    pub fn citation_settings(&self) -> CitationSettings {
        let c = &self.citations;
        CitationSettings {
            standard_batch: c.standard_batch.max(1),
            elevated_batch: c.elevated_batch.max(1),
            cache_ttl: Duration::from_secs(c.cache_ttl_days * 24 * 60 * 60),
            backoff: BackoffPolicy {
                base: Duration::from_millis(c.retry_base_ms),
                cap: Duration::from_millis(c.retry_cap_ms.max(c.retry_base_ms)),
                jitter: c.retry_jitter.clamp(0.0, 0.99),
                max_retries: c.max_retries,
            },
            lookup_timeout: Duration::from_secs(self.authority.timeout_secs),
        }
    }

    pub fn checkpoint_settings(&self) -> CheckpointSettings {
        CheckpointSettings {
            remind_after: chrono::Duration::hours(self.checkpoints.remind_after_hours),
            escalate_after: chrono::Duration::hours(self.checkpoints.escalate_after_hours),
            auto_cancel_after: chrono::Duration::hours(self.checkpoints.auto_cancel_after_hours),
        }
    }

    /// Longest a single generation phase can run: every attempt timing out,
    /// plus every backoff sleep at full jitter.
    pub fn phase_execution_bound(&self) -> Duration {
        self.generation_backoff().worst_case(self.generation_timeout())
    }

    /// Shortest lease, in whole minutes, that outlives `phase_execution_bound`.
    pub fn lease_floor_minutes(&self) -> i64 {
        self.phase_execution_bound().as_secs().div_ceil(60).max(1) as i64
    }

    /// Leases are raised to `lease_floor_minutes` when configured lower.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let o = &self.orchestrator;
        let floor = self.lease_floor_minutes();
        OrchestratorSettings {
            slot_capacity: o.slot_capacity,
            claim_lease: chrono::Duration::minutes(o.claim_lease_minutes.max(floor)),
            slot_lease: chrono::Duration::minutes(o.slot_lease_minutes.max(floor)),
            max_revision_loops: self.quality.max_revision_loops.min(MAX_REVISION_LOOPS),
            max_steps_per_run: o.max_steps_per_run.max(1),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration for one project directory.
///
/// Merges settings from:
/// 1. docket.toml
/// 2. `.env` and the process environment
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct DocketConfig {
    pub project_dir: PathBuf,
    pub docket_dir: PathBuf,
    pub toml: DocketToml,
    /// Unparsable environment overrides, reported by `validate`.
    pub env_warnings: Vec<String>,
    /// CLI override for the database location.
    pub cli_db_path: Option<PathBuf>,
    /// CLI override: JSON log output.
    pub cli_json_logs: bool,
    pub verbose: bool,
}

impl DocketConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        // A missing .env is normal.
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let docket_dir = project_dir.join(DOCKET_DIR);
        let mut toml = DocketToml::load_or_default(&docket_dir)?;
        let env_warnings = toml.apply_env_overrides();

        Ok(Self {
            project_dir,
            docket_dir,
            toml,
            env_warnings,
            cli_db_path: None,
            cli_json_logs: false,
            verbose: false,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        json_logs: bool,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_json_logs = json_logs;
        config.cli_db_path = db_path;
        Ok(config)
    }

    pub fn config_path(&self) -> PathBuf {
        self.docket_dir.join(CONFIG_FILE)
    }

    /// Database path (CLI → `DOCKET_DB` → `.docket/docket.db`).
    pub fn db_path(&self) -> PathBuf {
        self.cli_db_path
            .clone()
            .or_else(|| std::env::var("DOCKET_DB").ok().filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| self.docket_dir.join(DB_FILE))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.docket_dir.join("logs")
    }

    pub fn json_logs(&self) -> bool {
        self.cli_json_logs || self.toml.logging.json
    }

    /// Fallback filter directive when no filter variable is set.
    pub fn log_level(&self) -> &str {
        if self.verbose { "debug" } else { &self.toml.logging.level }
    }

    /// Provider API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.toml.generation.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn authority_token(&self) -> Option<String> {
        std::env::var(&self.toml.authority.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}
