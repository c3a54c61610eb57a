//! Phase executor: assembles the prompt for a phase, calls the generation
//! service with the registry's model and budget, and parses the structured
//! result.
//!
//! Parse failures are reported as `ExecutionOutcome::ParseFailed` with the raw
//! text preserved for the audit trail. They are never retried automatically.

mod parse;
pub mod prompt;

pub use parse::extract_json_object;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::GenerationError;
use crate::generation::{GenerationRequest, GenerationService, ModelCatalog};
use crate::phase::{PhaseCode, PhaseDefinition};
use crate::retry::{BackoffPolicy, retry_transient};
use crate::workflow::WorkflowInstance;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Parsed(Map<String, Value>),
    ParseFailed { error: String },
}

/// Everything the audit trail needs about one execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub phase: PhaseCode,
    pub model: String,
    pub prompt_sha256: String,
    pub raw_text: String,
    pub duration_ms: u64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Parsed(_))
    }
}

pub struct PhaseExecutor {
    generation: Arc<dyn GenerationService>,
    models: ModelCatalog,
    timeout: Duration,
    retry: BackoffPolicy,
}

impl PhaseExecutor {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        models: ModelCatalog,
        timeout: Duration,
        retry: BackoffPolicy,
    ) -> Self {
        Self {
            generation,
            models,
            timeout,
            retry,
        }
    }

    /// Execute a generation phase with its standard prompt.
    pub async fn execute(
        &self,
        definition: &PhaseDefinition,
        instance: &WorkflowInstance,
    ) -> Result<ExecutionReport, GenerationError> {
        let prompt = prompt::build_phase_prompt(definition, instance);
        self.execute_prompt(definition, instance, prompt).await
    }

    /// Execute a phase with a caller-built prompt.
    ///
    /// Transient failures are retried with backoff; anything that survives
    /// the retries is returned as `Err`.
    pub async fn execute_prompt(
        &self,
        definition: &PhaseDefinition,
        instance: &WorkflowInstance,
        prompt: String,
    ) -> Result<ExecutionReport, GenerationError> {
        let model = self
            .models
            .resolve(definition.model_tier(instance.motion.tier))
            .to_string();
        let system = prompt::system_prompt(instance);
        let prompt_sha256 = hash_prompt(&system, &prompt);
        let request = GenerationRequest {
            workflow_id: instance.id,
            phase: definition.code,
            model: model.clone(),
            max_tokens: definition.token_budget,
            system,
            prompt,
            timeout: self.timeout,
        };

        info!(
            workflow_id = %instance.id,
            phase = %definition.code,
            model = %model,
            budget = definition.token_budget,
            "executing phase"
        );

        let started = Instant::now();
        let generation = &self.generation;
        let request_ref = &request;
        let timeout = self.timeout;
        let label = format!("generate:{}", definition.code);
        let response = retry_transient(&self.retry, &label, GenerationError::is_transient, || async move {
            match tokio::time::timeout(timeout, generation.generate(request_ref)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout { duration: timeout }),
            }
        })
        .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match extract_json_object(&response.text) {
            Ok(map) => {
                let missing: Vec<&str> = definition
                    .response_keys()
                    .iter()
                    .copied()
                    .filter(|key| map.get(*key).is_none_or(Value::is_null))
                    .collect();
                if missing.is_empty() {
                    ExecutionOutcome::Parsed(map)
                } else {
                    ExecutionOutcome::ParseFailed {
                        error: format!("Response is missing required keys: {}", missing.join(", ")),
                    }
                }
            }
            Err(error) => ExecutionOutcome::ParseFailed { error },
        };

        debug!(
            phase = %definition.code,
            duration_ms,
            parsed = matches!(outcome, ExecutionOutcome::Parsed(_)),
            "phase execution finished"
        );

        Ok(ExecutionReport {
            phase: definition.code,
            model: response.model,
            prompt_sha256,
            raw_text: response.text,
            duration_ms,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            outcome,
        })
    }
}

fn hash_prompt(system: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update(b"\n\n");
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}
