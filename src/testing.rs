//! Test doubles for the external seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointNotifier, CheckpointScheduler, DeadlineKind};
use crate::citations::{AuthorityQuery, AuthorityRecord, CitationAuthority, LookupStatus};
use crate::errors::{AuthorityError, GenerationError};
use crate::generation::{GenerationRequest, GenerationResponse, GenerationService};
use crate::phase::{PhaseCode, PhaseKind};
use crate::retry::BackoffPolicy;

/// Millisecond backoff so retry paths run fast.
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(1),
        cap: Duration::from_millis(4),
        jitter: 0.2,
        max_retries: 3,
    }
}

/// A well-formed response for `phase` carrying every required key.
pub fn default_response(phase: PhaseCode) -> String {
    let def = phase.definition();
    match def.kind {
        PhaseKind::Grade => json!({
            "grade": "A-",
            "strengths": ["clear structure"],
            "weaknesses": [],
            "suggestions": [],
        })
        .to_string(),
        _ => {
            let mut data = serde_json::Map::new();
            for key in def.required_output_keys {
                data.insert(key.to_string(), Value::String(format!("{} content", key)));
            }
            Value::Object(data).to_string()
        }
    }
}

/// Generation service answering from per-phase scripts. Phases without a
/// queued response get `default_response` when defaults are enabled.
#[derive(Default)]
pub struct ScriptedGeneration {
    scripts: Mutex<HashMap<PhaseCode, VecDeque<Result<String, GenerationError>>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    defaults: bool,
    latency: Duration,
}

impl ScriptedGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        Self {
            defaults: true,
            ..Self::default()
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, phase: PhaseCode, text: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, phase: PhaseCode, err: GenerationError) {
        self.scripts
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(Err(err));
    }

    pub fn calls_for(&self, phase: PhaseCode) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.phase == phase)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.phase)
            .and_then(VecDeque::pop_front);
        let text = match scripted {
            Some(result) => result?,
            None if self.defaults => default_response(request.phase),
            None => {
                return Err(GenerationError::Misconfiguration(format!(
                    "no scripted response for phase {}",
                    request.phase
                )));
            }
        };
        Ok(GenerationResponse {
            text,
            model: request.model.clone(),
            input_tokens: Some(100),
            output_tokens: Some(200),
        })
    }
}

/// Citation authority backed by a fixed table. Unknown keys are not found.
#[derive(Default)]
pub struct StaticAuthority {
    records: Mutex<HashMap<String, AuthorityRecord>>,
    failure: Mutex<Option<AuthorityError>>,
    batches: Mutex<Vec<usize>>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn found(&self, key: &str, case_name: &str) {
        let record = AuthorityRecord {
            key: key.to_string(),
            status: LookupStatus::Found,
            external_id: Some(format!("cl-{}", key.replace(' ', "-"))),
            case_name: Some(case_name.to_string()),
            date_filed: None,
            candidates: 1,
        };
        self.records.lock().unwrap().insert(key.to_string(), record);
    }

    pub fn fail_with(&self, err: AuthorityError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CitationAuthority for StaticAuthority {
    fn max_batch(&self) -> usize {
        50
    }

    async fn lookup_batch(&self, queries: &[AuthorityQuery]) -> Result<Vec<AuthorityRecord>, AuthorityError> {
        self.batches.lock().unwrap().push(queries.len());
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        let records = self.records.lock().unwrap();
        Ok(queries
            .iter()
            .map(|q| {
                records
                    .get(&q.key)
                    .cloned()
                    .unwrap_or_else(|| AuthorityRecord::not_found(&q.key))
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(Uuid, DeadlineKind, DateTime<Utc>)>>,
    fail: bool,
}

impl RecordingScheduler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn scheduled(&self) -> Vec<(Uuid, DeadlineKind, DateTime<Utc>)> {
        self.scheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointScheduler for RecordingScheduler {
    async fn schedule(&self, checkpoint_id: Uuid, kind: DeadlineKind, at: DateTime<Utc>) -> Result<()> {
        if self.fail {
            bail!("scheduler unreachable");
        }
        self.scheduled.lock().unwrap().push((checkpoint_id, kind, at));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<(Uuid, String)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointNotifier for RecordingNotifier {
    async fn notify(&self, checkpoint: &Checkpoint, notice: &str) -> Result<()> {
        self.notices
            .lock()
            .unwrap()
            .push((checkpoint.id, notice.to_string()));
        Ok(())
    }
}
