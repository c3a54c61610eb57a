//! Citation verification pipeline: extract, consult the cache, look up the
//! misses in batches, classify, and apply the hard-stop rule.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::authority::{AuthorityQuery, AuthorityRecord, CitationAuthority};
use super::decision::{HardStopDecision, VerificationStatus, VerifiedCitation, classify, evaluate_hard_stop, reasons};
use super::extract::{CitationKind, extract_citations};
use crate::errors::AuthorityError;
use crate::motion::Tier;
use crate::phase::CitationRisk;
use crate::policy;
use crate::retry::{BackoffPolicy, retry_transient};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct CitationSettings {
    pub standard_batch: usize,
    pub elevated_batch: usize,
    pub cache_ttl: Duration,
    pub backoff: BackoffPolicy,
    pub lookup_timeout: Duration,
}

impl Default for CitationSettings {
    fn default() -> Self {
        Self {
            standard_batch: 4,
            elevated_batch: 2,
            cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            backoff: BackoffPolicy::default(),
            lookup_timeout: Duration::from_secs(30),
        }
    }
}

impl CitationSettings {
    pub fn batch_size(&self, risk: CitationRisk) -> usize {
        match risk {
            CitationRisk::Standard => self.standard_batch,
            CitationRisk::Elevated => self.elevated_batch,
        }
        .max(1)
    }
}

/// Result of verifying one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    pub citations: Vec<VerifiedCitation>,
    pub decision: HardStopDecision,
    pub batches: usize,
    pub cache_hits: usize,
    pub authority_errors: usize,
}

impl CitationReport {
    pub fn count(&self, status: VerificationStatus) -> usize {
        self.citations.iter().filter(|c| c.status == status).count()
    }

    /// Phase output payload stored under `citation_report`.
    pub fn to_output_value(&self) -> Value {
        serde_json::json!({
            "citation_report": {
                "total": self.citations.len(),
                "verified": self.count(VerificationStatus::Verified),
                "flagged": self.count(VerificationStatus::Flagged),
                "rejected": self.count(VerificationStatus::Rejected),
                "blocked": self.count(VerificationStatus::Blocked),
                "pending": self.count(VerificationStatus::Pending),
                "failure_rate": self.decision.failure_rate,
                "tolerance": self.decision.tolerance,
                "halt": self.decision.halt,
                "summary": self.decision.summary(),
                "batches": self.batches,
                "cache_hits": self.cache_hits,
            }
        })
    }
}

pub struct CitationPipeline {
    authority: Arc<dyn CitationAuthority>,
    store: Store,
    settings: CitationSettings,
}

impl CitationPipeline {
    pub fn new(authority: Arc<dyn CitationAuthority>, store: Store, settings: CitationSettings) -> Self {
        Self {
            authority,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &CitationSettings {
        &self.settings
    }

    /// Verify every citation in `text`. Never fails: authority errors become
    /// REJECTED citations with reason `authority_error`.
    pub async fn verify(&self, text: &str, tier: Tier, risk: CitationRisk) -> CitationReport {
        let extracted = extract_citations(text);

        let mut seen = HashSet::new();
        let keys: Vec<String> = extracted
            .iter()
            .filter_map(|c| c.lookup_key())
            .filter(|k| seen.insert(k.clone()))
            .collect();

        let mut records = self.cached(&keys).await;
        let cache_hits = records.len();

        let misses: Vec<AuthorityQuery> = keys
            .iter()
            .filter(|k| !records.contains_key(*k))
            .map(|k| AuthorityQuery { key: k.clone() })
            .collect();

        let batch_size = self
            .settings
            .batch_size(risk)
            .min(self.authority.max_batch().max(1));
        let mut failed_keys = HashSet::new();
        let mut fetched = Vec::new();
        let mut batches = 0;

        for batch in misses.chunks(batch_size) {
            batches += 1;
            match self.lookup(batch).await {
                Ok(found) => {
                    for query in batch {
                        match found.iter().find(|r| r.key == query.key) {
                            Some(record) => {
                                records.insert(query.key.clone(), record.clone());
                                fetched.push(record.clone());
                            }
                            None => {
                                failed_keys.insert(query.key.clone());
                            }
                        }
                    }
                }
                Err(_) => {
                    failed_keys.extend(batch.iter().map(|q| q.key.clone()));
                }
            }
        }

        self.remember(fetched).await;

        let mut citations: Vec<VerifiedCitation> = Vec::with_capacity(extracted.len());
        for citation in extracted {
            let (status, reason, external_id, authority_case_name) = match citation.kind {
                CitationKind::FullCase => match citation.lookup_key() {
                    Some(key) if failed_keys.contains(&key) => (
                        VerificationStatus::Rejected,
                        Some(reasons::AUTHORITY_ERROR.to_string()),
                        None,
                        None,
                    ),
                    Some(key) => match records.get(&key) {
                        Some(record) => {
                            let (status, reason) = classify(&citation, record);
                            (status, reason, record.external_id.clone(), record.case_name.clone())
                        }
                        None => (
                            VerificationStatus::Rejected,
                            Some(reasons::NOT_FOUND.to_string()),
                            None,
                            None,
                        ),
                    },
                    None => (
                        VerificationStatus::Rejected,
                        Some(reasons::NOT_FOUND.to_string()),
                        None,
                        None,
                    ),
                },
                CitationKind::Statute => (
                    VerificationStatus::Pending,
                    Some(reasons::STATUTE.to_string()),
                    None,
                    None,
                ),
                CitationKind::ShortCase | CitationKind::Id | CitationKind::Ibid | CitationKind::Supra => {
                    match citation.antecedent.and_then(|j| citations.get(j)) {
                        Some(parent) => (
                            parent.status,
                            parent.reason.clone(),
                            parent.external_id.clone(),
                            parent.authority_case_name.clone(),
                        ),
                        None => (
                            VerificationStatus::Flagged,
                            Some(reasons::UNRESOLVED_ANTECEDENT.to_string()),
                            None,
                            None,
                        ),
                    }
                }
            };
            citations.push(VerifiedCitation {
                citation,
                status,
                reason,
                external_id,
                authority_case_name,
            });
        }

        let decision = evaluate_hard_stop(&citations, tier);
        info!(
            citations = citations.len(),
            batches,
            cache_hits,
            authority_errors = failed_keys.len(),
            halt = decision.halt,
            failure_rate = decision.failure_rate,
            "citation verification finished"
        );

        CitationReport {
            citations,
            decision,
            batches,
            cache_hits,
            authority_errors: failed_keys.len(),
        }
    }

    async fn cached(&self, keys: &[String]) -> HashMap<String, AuthorityRecord> {
        if keys.is_empty() {
            return HashMap::new();
        }
        let owned = keys.to_vec();
        let now = Utc::now();
        let result = self
            .store
            .call(move |db| db.cache_get_many(&owned, now))
            .await;
        policy::CITATION_CACHE_READ
            .resolve(result, HashMap::new)
            .unwrap_or_default()
    }

    async fn remember(&self, records: Vec<AuthorityRecord>) {
        if records.is_empty() {
            return;
        }
        let ttl = chrono::Duration::from_std(self.settings.cache_ttl).unwrap_or(chrono::Duration::days(30));
        let now = Utc::now();
        let result = self
            .store
            .call(move |db| db.cache_put_many(&records, now, ttl))
            .await;
        let _ = policy::CITATION_CACHE_WRITE.resolve(result, || ());
    }

    async fn lookup(&self, batch: &[AuthorityQuery]) -> Result<Vec<AuthorityRecord>, AuthorityError> {
        let authority = &self.authority;
        let timeout = self.settings.lookup_timeout;
        debug!(size = batch.len(), "authority batch");
        let result = retry_transient(&self.settings.backoff, "authority_lookup", AuthorityError::is_transient, || async move {
            match tokio::time::timeout(timeout, authority.lookup_batch(batch)).await {
                Ok(result) => result,
                Err(_) => Err(AuthorityError::Timeout { duration: timeout }),
            }
        })
        .await;
        if let Err(err) = &result {
            warn!(size = batch.len(), error = %err, "authority lookup failed, citations rejected");
        }
        policy::AUTHORITY_LOOKUP.resolve(result, Vec::new)
    }
}
