//! Generation service seam.
//!
//! Real implementation: `AnthropicClient` (Messages API over reqwest).
//! The orchestrator only sees `Arc<dyn GenerationService>`, so tests plug in
//! scripted doubles.

mod anthropic;

pub use anthropic::AnthropicClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::GenerationError;
use crate::phase::{ModelTier, PhaseCode};

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub workflow_id: Uuid,
    pub phase: PhaseCode,
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub prompt: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError>;
}

/// Maps model tiers to concrete model identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub fast: String,
    pub standard: String,
    pub premium: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            fast: "claude-3-5-haiku-latest".to_string(),
            standard: "claude-sonnet-4-5".to_string(),
            premium: "claude-opus-4-1".to_string(),
        }
    }
}

impl ModelCatalog {
    pub fn resolve(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Standard => &self.standard,
            ModelTier::Premium => &self.premium,
        }
    }
}

/// Stand-in used when no API key is configured. Every call fails with a
/// non-transient misconfiguration error naming the missing variable.
#[derive(Debug, Clone)]
pub struct UnconfiguredGeneration {
    pub api_key_env: String,
}

#[async_trait]
impl GenerationService for UnconfiguredGeneration {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        Err(GenerationError::Misconfiguration(format!(
            "{} is not set; export it or configure [generation] api_key_env",
            self.api_key_env
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_resolves_each_tier() {
        let catalog = ModelCatalog {
            fast: "f".into(),
            standard: "s".into(),
            premium: "p".into(),
        };
        assert_eq!(catalog.resolve(ModelTier::Fast), "f");
        assert_eq!(catalog.resolve(ModelTier::Standard), "s");
        assert_eq!(catalog.resolve(ModelTier::Premium), "p");
    }

    #[tokio::test]
    async fn unconfigured_generation_names_missing_key() {
        let service = UnconfiguredGeneration {
            api_key_env: "ANTHROPIC_API_KEY".into(),
        };
        let request = GenerationRequest {
            workflow_id: Uuid::nil(),
            phase: PhaseCode::I,
            model: "m".into(),
            max_tokens: 10,
            system: String::new(),
            prompt: String::new(),
            timeout: Duration::from_secs(1),
        };
        let err = service.generate(&request).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }
}
