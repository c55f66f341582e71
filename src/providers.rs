//! Provider adapters — one per inference backend, all implementing the
//! uniform [`ProviderAdapter`] generate contract.
//!
//! Every adapter maps its backend's HTTP failure modes onto the shared
//! [`ProviderError`] taxonomy so the failover engine can reason about them
//! uniformly: connection/timeout → `Unavailable`, missing model →
//! `NotFound`, 429 → `RateLimited` (with a parsed wait hint when the
//! backend provides one), content filtering → `Blocked`, empty or
//! malformed payloads → `InvalidResponse`.

use crate::{
    config::{Config, REQUEST_TIMEOUT_SECS},
    error::ProviderError,
    types::{FinishReason, InferenceRequest, InferenceResponse, ProviderId},
};
use async_trait::async_trait;
use std::sync::OnceLock;
use std::time::Duration;

/// Maximum number of characters from an HTTP error body included in error
/// messages. Prevents large or potentially sensitive server responses from
/// propagating verbatim through error chains and log sinks.
const MAX_ERROR_BODY_LEN: usize = 200;

// ── Adapter contract ──────────────────────────────────────────────────────────

/// Uniform generate contract implemented by every backend.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identity used in registry ordering and response metadata.
    fn id(&self) -> ProviderId;

    /// `true` for the always-available local backend — it is called without
    /// a retry loop and is preferred when no override is configured.
    fn is_local(&self) -> bool {
        self.id() == ProviderId::Local
    }

    /// `true` when the adapter has the credentials/endpoint it needs.
    /// Unconfigured adapters are skipped by the failover engine.
    fn is_configured(&self) -> bool;

    /// Run one generation call against the backend.
    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError>;
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default()
        })
        .clone()
}

/// Transport-level failures (refused connection, DNS, timeout) all mean the
/// backend is not reachable right now.
fn map_transport_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Unavailable(e.to_string())
}

/// Truncate raw error bodies to avoid leaking large or sensitive payloads.
/// Char-based so a multi-byte UTF-8 boundary cannot cause a panic.
fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LEN {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{truncated}…[truncated]")
    } else {
        body.to_string()
    }
}

/// Parse a rate-limit wait hint from a `Retry-After` header value or from a
/// textual pattern like "retry in 5 s" / "retry after 30 seconds" inside
/// the error body.
pub fn parse_retry_after(header: Option<&str>, body: &str) -> Option<u64> {
    if let Some(h) = header {
        if let Ok(secs) = h.trim().parse::<u64>() {
            return Some(secs);
        }
    }
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"(?i)retry[ _-]?(?:in|after)[:\s]*(\d+)\s*s(?:ec(?:ond)?s?)?")
            .expect("static regex")
    });
    re.captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

/// Shared status → error mapping applied after each adapter's own
/// special cases.
fn map_http_status(status: u16, retry_after: Option<&str>, body: &str) -> ProviderError {
    match status {
        404 => ProviderError::NotFound(truncate_body(body)),
        429 => ProviderError::RateLimited {
            retry_after_secs: parse_retry_after(retry_after, body),
        },
        s if s >= 500 => ProviderError::Unavailable(format!("server error {s}: {}", truncate_body(body))),
        s => ProviderError::InvalidResponse(format!("HTTP {s}: {}", truncate_body(body))),
    }
}

/// Enforce the non-empty-text success invariant shared by all adapters.
fn finalize_text(text: String) -> Result<String, ProviderError> {
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        Err(ProviderError::InvalidResponse(
            "backend returned empty text".to_string(),
        ))
    } else {
        Ok(trimmed)
    }
}

async fn read_error_parts(response: reqwest::Response) -> (u16, Option<String>, String) {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "(unreadable body)".to_string());
    (status, retry_after, body)
}

// ── Local adapter (Ollama-compatible) ─────────────────────────────────────────

/// Local inference backend speaking the Ollama generate API.
/// Always configured — needs no API key.
pub struct LocalAdapter {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl LocalAdapter {
    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            base_url: config.local_base_url.trim_end_matches('/').to_string(),
            default_model: config.local_model.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Local
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let model = request
            .options
            .model_id
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.options.temperature,
                "num_predict": request.options.max_tokens,
            },
        });
        if let Some(system) = &request.options.system_prompt {
            body["system"] = serde_json::Value::String(system.clone());
        }

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let (status, retry_after, body) = read_error_parts(response).await;
            // Ollama reports an unknown model as 404 with "model ... not found".
            return Err(map_http_status(status, retry_after.as_deref(), &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let text = json
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let finish_reason = match json.get("done_reason").and_then(|v| v.as_str()) {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };
        let tokens_used = json
            .get("eval_count")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);

        Ok(InferenceResponse {
            text: finalize_text(text)?,
            provider_id: ProviderId::Local,
            model_id: model,
            tokens_used,
            finish_reason,
        })
    }
}

// ── OpenAI-compatible adapter ─────────────────────────────────────────────────

pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("OPENAI_API_KEY not set".to_string()))?;

        let model = request
            .options
            .model_id
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let mut messages = Vec::new();
        if let Some(system) = &request.options.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.options.max_tokens,
            "temperature": request.options.temperature,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let (status, retry_after, body) = read_error_parts(response).await;
            if body.contains("content_filter") || body.contains("content_policy") {
                return Err(ProviderError::Blocked);
            }
            return Err(map_http_status(status, retry_after.as_deref(), &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let choice = json
            .pointer("/choices/0")
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;

        let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
            Some("length") => FinishReason::Length,
            Some("content_filter") => return Err(ProviderError::Blocked),
            _ => FinishReason::Stop,
        };
        let text = choice
            .pointer("/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let tokens_used = json
            .pointer("/usage/total_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);

        Ok(InferenceResponse {
            text: finalize_text(text)?,
            provider_id: ProviderId::OpenAi,
            model_id: model,
            tokens_used,
            finish_reason,
        })
    }
}

// ── Anthropic adapter ─────────────────────────────────────────────────────────

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AnthropicAdapter {
    const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            base_url: config.anthropic_base_url.trim_end_matches('/').to_string(),
            api_key: config.anthropic_api_key.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("ANTHROPIC_API_KEY not set".to_string()))?;

        let model = request
            .options
            .model_id
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": request.options.max_tokens,
            "temperature": request.options.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.options.system_prompt {
            body["system"] = serde_json::Value::String(system.clone());
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("content-type", "application/json")
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let (status, retry_after, body) = read_error_parts(response).await;
            return Err(map_http_status(status, retry_after.as_deref(), &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let finish_reason = match json.get("stop_reason").and_then(|v| v.as_str()) {
            Some("max_tokens") => FinishReason::Length,
            Some("refusal") => return Err(ProviderError::Blocked),
            _ => FinishReason::Stop,
        };

        let text = json
            .get("content")
            .and_then(|v| v.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let input_tokens = json.pointer("/usage/input_tokens").and_then(|v| v.as_u64());
        let output_tokens = json.pointer("/usage/output_tokens").and_then(|v| v.as_u64());
        let tokens_used = match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some((i + o) as u32),
            _ => None,
        };

        Ok(InferenceResponse {
            text: finalize_text(text)?,
            provider_id: ProviderId::Anthropic,
            model_id: model,
            tokens_used,
            finish_reason,
        })
    }
}

// ── Gemini adapter ────────────────────────────────────────────────────────────

pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiAdapter {
    const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            api_key: config.gemini_api_key.clone(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("GEMINI_API_KEY not set".to_string()))?;

        let model = request
            .options
            .model_id
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let mut body = serde_json::json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.options.temperature,
                "maxOutputTokens": request.options.max_tokens,
            },
        });
        if let Some(system) = &request.options.system_prompt {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, api_key
        );
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let (status, retry_after, body) = read_error_parts(response).await;
            return Err(map_http_status(status, retry_after.as_deref(), &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let candidate = json
            .pointer("/candidates/0")
            .ok_or_else(|| ProviderError::InvalidResponse("no candidates in response".to_string()))?;

        let finish_reason = match candidate.get("finishReason").and_then(|v| v.as_str()) {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("PROHIBITED_CONTENT") => return Err(ProviderError::Blocked),
            _ => FinishReason::Stop,
        };

        let text = candidate
            .pointer("/content/parts")
            .and_then(|v| v.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let tokens_used = json
            .pointer("/usageMetadata/totalTokenCount")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);

        Ok(InferenceResponse {
            text: finalize_text(text)?,
            provider_id: ProviderId::Gemini,
            model_id: model,
            tokens_used,
            finish_reason,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
