use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointManager, LogNotifier, LogScheduler};
use crate::citations::{CitationPipeline, CourtListenerAuthority};
use crate::docket_config::DocketConfig;
use crate::executor::PhaseExecutor;
use crate::generation::{AnthropicClient, GenerationService, UnconfiguredGeneration};
use crate::orchestrator::Orchestrator;
use crate::store::Store;

/// Runtime configuration for docket.
///
/// Bridges `DocketConfig` with what the orchestrator needs at runtime:
/// resolved paths, credentials, and the concrete external clients.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    docket: DocketConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, json_logs: bool, db_path: Option<PathBuf>) -> Result<Self> {
        let docket = DocketConfig::with_cli_args(project_dir, verbose, json_logs, db_path)?;
        Ok(Self::from_docket(docket))
    }

    pub fn from_docket(docket: DocketConfig) -> Self {
        Self {
            project_dir: docket.project_dir.clone(),
            db_path: docket.db_path(),
            log_dir: docket.log_dir(),
            verbose: docket.verbose,
            docket,
        }
    }

    pub fn docket(&self) -> &DocketConfig {
        &self.docket
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn open_store(&self) -> Result<Store> {
        self.ensure_directories()?;
        Store::open(&self.db_path)
    }

    /// Generation client for this environment. Without an API key every
    /// phase fails with a misconfiguration error naming the variable.
    pub fn generation(&self) -> Result<Arc<dyn GenerationService>> {
        let section = &self.docket.toml.generation;
        match self.docket.api_key() {
            Some(key) => {
                let client = AnthropicClient::new(key, section.base_url.clone(), section.temperature)
                    .context("Failed to build generation client")?;
                Ok(Arc::new(client))
            }
            None => {
                warn!(env = %section.api_key_env, "no generation API key; phases will block");
                Ok(Arc::new(UnconfiguredGeneration {
                    api_key_env: section.api_key_env.clone(),
                }))
            }
        }
    }

    pub fn authority(&self) -> Result<CourtListenerAuthority> {
        let section = &self.docket.toml.authority;
        let token = self.docket.authority_token();
        if token.is_none() {
            info!(env = %section.token_env, "no citation authority token; using anonymous lookups");
        }
        CourtListenerAuthority::new(
            section.base_url.clone(),
            token,
            std::time::Duration::from_secs(section.timeout_secs),
            section.max_batch,
        )
        .context("Failed to build citation authority client")
    }

    /// Wire the store, clients and settings into an orchestrator.
    pub fn orchestrator(&self, store: Store) -> Result<Orchestrator> {
        let toml = &self.docket.toml;
        let executor = PhaseExecutor::new(
            self.generation()?,
            toml.model_catalog(),
            toml.generation_timeout(),
            toml.generation_backoff(),
        );
        let citations = CitationPipeline::new(Arc::new(self.authority()?), store.clone(), toml.citation_settings());
        let checkpoints = CheckpointManager::new(
            store.clone(),
            toml.checkpoint_settings(),
            Arc::new(LogScheduler),
            Arc::new(LogNotifier),
        );
        Ok(Orchestrator::new(
            store,
            executor,
            citations,
            checkpoints,
            toml.orchestrator_settings(),
        ))
    }
}
