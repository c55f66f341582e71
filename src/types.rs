//! Shared types and data structures for the inference router.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

// ── Providers ─────────────────────────────────────────────────────────────────

/// Identity of a configured inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    /// Always-available local backend (Ollama-compatible).
    Local,
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderId {
    /// Stable lowercase label used in config, logs, and response metadata.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderId::Local => "local",
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    Blocked,
}

// ── Inference request / response ──────────────────────────────────────────────

/// Generation options accompanying a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOptions {
    pub max_tokens: u32,
    /// Sampling temperature, clamped to `[0, 2]` at build time.
    pub temperature: f32,
    /// Backend-specific model override; each adapter supplies its default
    /// when absent.
    pub model_id: Option<String>,
    pub system_prompt: Option<String>,
    pub stream: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            model_id: None,
            system_prompt: None,
            stream: false,
        }
    }
}

/// A fully assembled generation request. Immutable once built — construct
/// via [`InferenceRequest::builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub options: InferenceOptions,
}

impl InferenceRequest {
    pub fn builder(prompt: impl Into<String>) -> InferenceRequestBuilder {
        InferenceRequestBuilder {
            prompt: prompt.into(),
            options: InferenceOptions::default(),
        }
    }
}

/// Consuming builder for [`InferenceRequest`].
#[derive(Debug, Clone)]
pub struct InferenceRequestBuilder {
    prompt: String,
    options: InferenceOptions,
}

impl InferenceRequestBuilder {
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.options.model_id = Some(model_id.into());
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.options.stream = stream;
        self
    }

    pub fn build(self) -> InferenceRequest {
        InferenceRequest {
            prompt: self.prompt,
            options: self.options,
        }
    }
}

/// Successful generation result from one adapter.
///
/// Invariant: `text` is trimmed and non-empty — adapters return
/// `ProviderError::InvalidResponse` instead of an empty success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    pub provider_id: ProviderId,
    pub model_id: String,
    pub tokens_used: Option<u32>,
    pub finish_reason: FinishReason,
}

// ── Knowledge / retrieval ─────────────────────────────────────────────────────

/// Importance tier assigned to stored knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// One unit of prior knowledge: a past exchange or externally retrieved
/// content. Append-only — entries are never deleted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub content: String,
    pub category: String,
    pub tags: BTreeSet<String>,
    pub priority: Priority,
    /// Assigned fresh at query time; not a stored property.
    pub relevance_score: f32,
    pub created_at: SystemTime,
}

/// Retrieval output for one query. Created fresh per query; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagResult {
    /// Ordered by descending `relevance_score`.
    pub entries: Vec<KnowledgeEntry>,
    pub total_relevance: f32,
    pub categories: BTreeSet<String>,
    pub query: String,
    pub processing_time_ms: u64,
}

impl RagResult {
    /// Empty result for a disabled or failed retrieval path.
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Self::default()
        }
    }
}

// ── Query classification ──────────────────────────────────────────────────────

/// Broad category of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    Greeting,
    Simple,
    Knowledge,
    Complex,
}

/// Target model size selected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSize {
    Tiny,
    Medium,
    Large,
}

/// Which pipeline stages to run for a message. Pure function of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryProfile {
    pub query_type: QueryType,
    pub use_retrieval: bool,
    pub use_reasoning_annotation: bool,
    pub model_size: ModelSize,
}

// ── External interface (transport layer contract) ─────────────────────────────

/// Inbound request handed over by the (excluded) transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub mode: Option<String>,
}

/// Diagnostic metadata attached to every chat response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: Option<String>,
    pub response_time_ms: u64,
    pub rag_results: Option<usize>,
    pub confidence: Option<f32>,
    pub provider: Option<String>,
    pub cache_hit: Option<bool>,
    /// Seconds the caller should wait before retrying, when the primary
    /// failure was a provider rate limit.
    pub retry_after_secs: Option<u64>,
}

/// Outbound response handed back to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    pub metadata: ResponseMetadata,
    pub error: Option<String>,
}

// ── Session state ─────────────────────────────────────────────────────────────

/// One completed exchange within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_message: String,
    pub response_text: String,
    pub timestamp: SystemTime,
}

/// In-memory per-session turn history for the running process.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub turns: Vec<ConversationTurn>,
    pub turn_count: usize,
}

impl Session {
    /// Creates a new empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn and trims the buffer to the most recent entries.
    pub fn add_turn(&mut self, turn: ConversationTurn) {
        self.turn_count += 1;
        self.turns.push(turn);
        // Prevent unbounded memory growth
        if self.turns.len() > crate::config::MAX_SESSION_TURNS {
            self.turns.remove(0);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
