//! Request orchestration pipeline.
//!
//! Control flow per message: admit (validation + rate limit) → classify →
//! retrieve → annotate → assemble prompt → cache lookup → generate with
//! failover → cache store → respond. Retrieval and annotation failures
//! degrade gracefully; only `AllProvidersFailed` surfaces to the caller,
//! and even then the response text falls back to retrieved content or the
//! reasoning trace when either exists.

use crate::{
    cache::{CacheKey, ResponseCache},
    classifier,
    config::{Config, CACHE_CAPACITY, CACHE_TTL_SECS, MAX_MESSAGE_LENGTH},
    embedding::EmbeddingGenerator,
    error::RouterError,
    failover::FailoverEngine,
    knowledge::KnowledgeStore,
    ratelimit::{RateLimiter, RateLimits},
    reasoning::{self, ReasoningTrace},
    types::*,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer clearly and concisely. \
     When context is provided, prefer it over prior knowledge and say when it is insufficient.";

const GREETING_REPLY: &str = "Hello! How can I help you today?";

// ── Pipeline struct ───────────────────────────────────────────────────────────

/// Core service object holding all subsystem components. Construct once at
/// process start with [`Pipeline::new`], inject into request handlers, and
/// call [`Pipeline::shutdown`] on exit.
pub struct Pipeline {
    engine: FailoverEngine,
    knowledge: KnowledgeStore,
    cache: ResponseCache,
    limiter: RateLimiter,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Pipeline {
    /// Initialise all components from `config`.
    ///
    /// A single [`EmbeddingGenerator`] is shared between the knowledge
    /// store's write and query paths via `Arc`.
    pub fn new(config: &Config) -> Self {
        let embedding = Arc::new(EmbeddingGenerator::new(
            config.embedding_service_url.as_deref(),
        ));
        let knowledge = KnowledgeStore::new(Arc::clone(&embedding), config.vector_store_url.as_deref());
        let engine = FailoverEngine::from_config(config);
        info!(providers = ?engine.configured_ids(), "pipeline initialised");
        Self {
            engine,
            knowledge,
            cache: ResponseCache::new(CACHE_CAPACITY, Duration::from_secs(CACHE_TTL_SECS)),
            limiter: RateLimiter::new(RateLimits::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Test constructor with injected failover engine and in-memory
    /// retrieval. Available in all build profiles so integration tests in
    /// `tests/` can drive the full pipeline against mock adapters.
    pub fn with_engine(engine: FailoverEngine) -> Self {
        let embedding = Arc::new(EmbeddingGenerator::new(None));
        Self {
            engine,
            knowledge: KnowledgeStore::new(embedding, None),
            cache: ResponseCache::new(CACHE_CAPACITY, Duration::from_secs(CACHE_TTL_SECS)),
            limiter: RateLimiter::new(RateLimits::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Drop process-local state. Cache and rate-limiter tables are not
    /// required to survive restarts, so this only releases memory.
    pub fn shutdown(&self) {
        self.cache.clear();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("pipeline shut down");
    }

    /// Knowledge store handle, for seeding content outside the chat flow.
    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    // ── Request entry point ───────────────────────────────────────────────────

    /// Execute one full conversation turn. Never panics and never returns
    /// `Err` — every failure is mapped into a structured [`ChatResponse`].
    pub async fn handle(&self, request: ChatRequest) -> ChatResponse {
        let started = Instant::now();

        // Admission: validation and per-user budget, before any stage runs.
        if let Err(e) = self.step_admit(&request) {
            return failure_response(e, started);
        }

        let message = request.message.trim().to_string();
        let profile = classifier::classify(&message);
        debug!(?profile, "query classified");

        // Greetings bypass retrieval, annotation, and providers entirely.
        if profile.query_type == QueryType::Greeting {
            return self.respond_canned(&request, &message, started);
        }

        let rag = if profile.use_retrieval {
            self.knowledge.retrieve(&message).await
        } else {
            RagResult::empty(&message)
        };
        let rag_count = profile.use_retrieval.then(|| rag.entries.len());

        let trace = profile
            .use_reasoning_annotation
            .then(|| reasoning::annotate(&message, &profile, &rag));

        let inference = assemble_request(&message, &profile, &rag, trace.as_ref());
        let cache_key = CacheKey::new(
            &inference.prompt,
            inference.options.model_id.as_deref(),
            inference.options.temperature,
            inference.options.system_prompt.as_deref(),
            profile.use_retrieval,
        );

        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("cache hit");
            // A hit is still a completed exchange — it gets recorded like
            // a freshly generated one.
            self.knowledge.add_exchange(&message, &cached.text).await;
            let mut response =
                self.success_response(&request, &message, &cached, rag_count, trace.as_ref(), started);
            response.metadata.cache_hit = Some(true);
            return response;
        }

        match self.engine.generate(&inference).await {
            Ok(generated) => {
                // Only complete responses are cached — a failed or abandoned
                // call never leaves a partial entry behind.
                self.cache.put(cache_key, generated.clone());
                if let Some(tokens) = generated.tokens_used {
                    self.limiter.record_tokens(&request.user_id, tokens);
                }
                self.knowledge.add_exchange(&message, &generated.text).await;
                let mut response =
                    self.success_response(&request, &message, &generated, rag_count, trace.as_ref(), started);
                response.metadata.cache_hit = Some(false);
                response
            }
            Err(e) => {
                warn!(error = %e, "generation failed after failover");
                self.degraded_response(&request, &message, e, &rag, trace.as_ref(), started)
            }
        }
    }

    // ── Steps ─────────────────────────────────────────────────────────────────

    fn step_admit(&self, request: &ChatRequest) -> Result<(), RouterError> {
        if request.message.trim().is_empty() {
            return Err(RouterError::InputValidation(
                "message cannot be empty".to_string(),
            ));
        }
        if request.message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(RouterError::InputValidation(format!(
                "message exceeds {MAX_MESSAGE_LENGTH} characters"
            )));
        }
        if request.user_id.trim().is_empty() {
            return Err(RouterError::InputValidation(
                "user_id cannot be empty".to_string(),
            ));
        }
        self.limiter.check_request(&request.user_id)
    }

    fn respond_canned(
        &self,
        request: &ChatRequest,
        message: &str,
        started: Instant,
    ) -> ChatResponse {
        self.record_turn(request, message, GREETING_REPLY);
        ChatResponse {
            success: true,
            response: GREETING_REPLY.to_string(),
            metadata: ResponseMetadata {
                response_time_ms: started.elapsed().as_millis() as u64,
                ..ResponseMetadata::default()
            },
            error: None,
        }
    }

    fn success_response(
        &self,
        request: &ChatRequest,
        message: &str,
        generated: &InferenceResponse,
        rag_count: Option<usize>,
        trace: Option<&ReasoningTrace>,
        started: Instant,
    ) -> ChatResponse {
        self.record_turn(request, message, &generated.text);
        ChatResponse {
            success: true,
            response: generated.text.clone(),
            metadata: ResponseMetadata {
                model: Some(generated.model_id.clone()),
                response_time_ms: started.elapsed().as_millis() as u64,
                rag_results: rag_count,
                confidence: trace.map(|t| t.overall_confidence),
                provider: Some(generated.provider_id.label().to_string()),
                cache_hit: None,
                retry_after_secs: None,
            },
            error: None,
        }
    }

    /// Terminal-failure path: surface the error, but derive a best-effort
    /// textual answer from retrieved content or the reasoning trace when
    /// either exists.
    fn degraded_response(
        &self,
        request: &ChatRequest,
        message: &str,
        error: RouterError,
        rag: &RagResult,
        trace: Option<&ReasoningTrace>,
        started: Instant,
    ) -> ChatResponse {
        let retry_after_secs = error.retry_after();
        let response_text = compose_degraded_answer(rag, trace);
        if !response_text.is_empty() {
            self.record_turn(request, message, &response_text);
        }
        ChatResponse {
            success: false,
            response: response_text,
            metadata: ResponseMetadata {
                response_time_ms: started.elapsed().as_millis() as u64,
                rag_results: Some(rag.entries.len()),
                confidence: trace.map(|t| t.overall_confidence),
                retry_after_secs,
                ..ResponseMetadata::default()
            },
            error: Some(error.to_string()),
        }
    }

    fn record_turn(&self, request: &ChatRequest, message: &str, reply: &str) {
        let key = request
            .session_id
            .clone()
            .unwrap_or_else(|| request.user_id.clone());
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.entry(key).or_default().add_turn(ConversationTurn {
            user_message: message.to_string(),
            response_text: reply.to_string(),
            timestamp: SystemTime::now(),
        });
    }

    /// Number of turns recorded for a session, for diagnostics and tests.
    pub fn session_turns(&self, session_key: &str) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_key)
            .map(|s| s.turn_count)
            .unwrap_or(0)
    }
}

// ── Prompt assembly ───────────────────────────────────────────────────────────

/// Map a model-size tier to a generation budget.
fn budget_for(size: ModelSize) -> (u32, f32) {
    match size {
        ModelSize::Tiny => (128, 0.5),
        ModelSize::Medium => (512, 0.7),
        ModelSize::Large => (1024, 0.7),
    }
}

/// Build the immutable inference request: retrieved context first, then
/// the reasoning annotation as guidance, then the user message.
fn assemble_request(
    message: &str,
    profile: &QueryProfile,
    rag: &RagResult,
    trace: Option<&ReasoningTrace>,
) -> InferenceRequest {
    let (max_tokens, temperature) = budget_for(profile.model_size);

    let mut context_parts: Vec<String> = Vec::new();
    for entry in &rag.entries {
        context_parts.push(entry.content.clone());
    }
    if let Some(trace) = trace {
        context_parts.push(trace.as_prompt_context());
    }

    let prompt = if context_parts.is_empty() {
        message.to_string()
    } else {
        format!(
            "Context:\n{}\n\nUser: {}",
            context_parts.join("\n---\n"),
            message
        )
    };

    InferenceRequest::builder(prompt)
        .max_tokens(max_tokens)
        .temperature(temperature)
        .system_prompt(SYSTEM_PROMPT)
        .build()
}

/// Best-effort answer when every provider failed: top retrieved entries
/// first, else the strategy line of the reasoning trace, else empty.
fn compose_degraded_answer(rag: &RagResult, trace: Option<&ReasoningTrace>) -> String {
    if !rag.entries.is_empty() {
        let snippets: Vec<&str> = rag
            .entries
            .iter()
            .take(3)
            .map(|e| e.content.as_str())
            .collect();
        return format!(
            "I could not reach a language model right now, but here is the most relevant \
             information I have on record:\n\n{}",
            snippets.join("\n---\n")
        );
    }
    if let Some(trace) = trace {
        return format!(
            "I could not reach a language model right now. Based on a first analysis of \
             your question:\n\n{}",
            trace.as_prompt_context()
        );
    }
    String::new()
}

fn failure_response(error: RouterError, started: Instant) -> ChatResponse {
    ChatResponse {
        success: false,
        response: String::new(),
        metadata: ResponseMetadata {
            response_time_ms: started.elapsed().as_millis() as u64,
            retry_after_secs: error.retry_after(),
            ..ResponseMetadata::default()
        },
        error: Some(error.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
