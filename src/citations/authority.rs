//! Citation authority seam.
//!
//! Real implementation: `CourtListenerAuthority`, which batches lookups
//! through the citation-lookup endpoint. The pipeline only sees
//! `Arc<dyn CitationAuthority>`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AuthorityError;

pub const DEFAULT_BASE_URL: &str = "https://www.courtlistener.com/api/rest/v4/citation-lookup/";

/// One case citation to look up, keyed by its canonical `volume reporter page`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorityQuery {
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    /// The citation matches more than one case.
    Ambiguous,
    NotFound,
    /// The reporter exists but the volume or page does not.
    InvalidReference,
}

/// The authority's answer for one citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub key: String,
    pub status: LookupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filed: Option<String>,
    #[serde(default)]
    pub candidates: usize,
}

impl AuthorityRecord {
    pub fn not_found(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: LookupStatus::NotFound,
            external_id: None,
            case_name: None,
            date_filed: None,
            candidates: 0,
        }
    }
}

#[async_trait]
pub trait CitationAuthority: Send + Sync {
    /// Largest batch a single call accepts.
    fn max_batch(&self) -> usize;

    /// Look up a batch of citations. Returns one record per query, in order.
    async fn lookup_batch(&self, queries: &[AuthorityQuery]) -> Result<Vec<AuthorityRecord>, AuthorityError>;
}

/// CourtListener citation-lookup client.
#[derive(Clone)]
pub struct CourtListenerAuthority {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    max_batch: usize,
}

impl CourtListenerAuthority {
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        timeout: Duration,
        max_batch: usize,
    ) -> Result<Self, AuthorityError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AuthorityError::Misconfiguration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token,
            timeout,
            max_batch: max_batch.max(1),
        })
    }

    fn map_status(status: StatusCode, body: &str) -> AuthorityError {
        let detail = format!("{}: {}", status, body.chars().take(300).collect::<String>());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthorityError::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS => AuthorityError::RateLimited(detail),
            s if s.is_server_error() => AuthorityError::Unavailable(detail),
            _ => AuthorityError::Malformed(detail),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    citation: String,
    #[serde(default)]
    normalized_citations: Vec<String>,
    status: u16,
    #[serde(default)]
    clusters: Vec<Cluster>,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    id: Option<u64>,
    #[serde(default)]
    case_name: Option<String>,
    #[serde(default)]
    date_filed: Option<String>,
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map raw lookup results back onto the queries that produced them.
fn records_from_results(
    queries: &[AuthorityQuery],
    results: &[LookupResult],
) -> Result<Vec<AuthorityRecord>, AuthorityError> {
    if results.iter().any(|r| r.status == 429) {
        return Err(AuthorityError::RateLimited(
            "citation-lookup throttled part of the batch".to_string(),
        ));
    }
    Ok(queries
        .iter()
        .map(|query| {
            let key = squash(&query.key);
            let matched = results.iter().find(|r| {
                squash(&r.citation) == key || r.normalized_citations.iter().any(|n| squash(n) == key)
            });
            let Some(result) = matched else {
                return AuthorityRecord::not_found(&query.key);
            };
            let status = match result.status {
                200 if result.clusters.len() == 1 => LookupStatus::Found,
                200 | 300 => LookupStatus::Ambiguous,
                400 => LookupStatus::InvalidReference,
                _ => LookupStatus::NotFound,
            };
            let first = result.clusters.first();
            AuthorityRecord {
                key: query.key.clone(),
                status,
                external_id: first.and_then(|c| c.id).map(|id| id.to_string()),
                case_name: first.and_then(|c| c.case_name.clone()),
                date_filed: first.and_then(|c| c.date_filed.clone()),
                candidates: result.clusters.len(),
            }
        })
        .collect())
}

#[async_trait]
impl CitationAuthority for CourtListenerAuthority {
    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn lookup_batch(&self, queries: &[AuthorityQuery]) -> Result<Vec<AuthorityRecord>, AuthorityError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let text = queries
            .iter()
            .map(|q| q.key.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        debug!(count = queries.len(), "authority batch lookup");

        let mut request = self
            .client
            .post(&self.base_url)
            .timeout(self.timeout)
            .form(&[("text", text.as_str())]);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AuthorityError::Timeout {
                    duration: self.timeout,
                }
            } else {
                AuthorityError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        let results: Vec<LookupResult> = response
            .json()
            .await
            .map_err(|e| AuthorityError::Malformed(e.to_string()))?;
        records_from_results(queries, &results)
    }
}
