use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationRequest, GenerationResponse, GenerationService};
use crate::errors::GenerationError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Anthropic Messages API client. Performs exactly one HTTP call per
/// `generate`; retries belong to the caller.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>, temperature: f32) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GenerationError::Misconfiguration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            temperature,
        })
    }

    fn map_status(status: StatusCode, body: &str) -> GenerationError {
        let detail = format!("{}: {}", status, truncate(body, 300));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::ProviderAuth(detail),
            StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited(detail),
            StatusCode::REQUEST_TIMEOUT => GenerationError::Transport(detail),
            s if s.is_server_error() || s.as_u16() == 529 => GenerationError::ProviderOutage(detail),
            _ => GenerationError::Misconfiguration(detail),
        }
    }
}

#[async_trait]
impl GenerationService for AnthropicClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        debug!(
            workflow_id = %request.workflow_id,
            phase = %request.phase,
            model = %request.model,
            max_tokens = request.max_tokens,
            timeout_secs = request.timeout.as_secs(),
            "invoking generation service"
        );

        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: self.temperature,
            system: (!request.system.is_empty()).then_some(request.system.as_str()),
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        duration: request.timeout,
                    }
                } else {
                    GenerationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to decode response: {}", e)))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(GenerationError::Transport(
                "Response carried no text content".to_string(),
            ));
        }

        debug!(
            phase = %request.phase,
            input_tokens = ?parsed.usage.as_ref().map(|u| u.input_tokens),
            output_tokens = ?parsed.usage.as_ref().map(|u| u.output_tokens),
            "generation completed"
        );

        Ok(GenerationResponse {
            text,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            input_tokens: parsed.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: parsed.usage.as_ref().map(|u| u.output_tokens),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_separates_transient_from_permanent() {
        assert!(AnthropicClient::map_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(AnthropicClient::map_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(
            AnthropicClient::map_status(StatusCode::from_u16(529).unwrap(), "overloaded")
                .is_transient()
        );
        assert!(!AnthropicClient::map_status(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!AnthropicClient::map_status(StatusCode::BAD_REQUEST, "bad").is_transient());
    }

    #[test]
    fn request_body_omits_empty_system() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 100,
            temperature: 0.2,
            system: None,
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn response_body_decodes_text_blocks() {
        let raw = r#"{"model":"m","content":[{"type":"text","text":"{\"a\":1}"}],"usage":{"input_tokens":3,"output_tokens":4}}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text.as_deref(), Some("{\"a\":1}"));
        assert_eq!(parsed.usage.unwrap().output_tokens, 4);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
