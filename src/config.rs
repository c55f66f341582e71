//! Configuration loading from environment variables via dotenvy.
//! No values are ever hardcoded here.

use crate::error::RouterError;

/// Runtime configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the local inference backend — sourced from `LOCAL_BASE_URL`.
    /// The local backend needs no API key and is the default preferred provider.
    pub local_base_url: String,
    /// Default model on the local backend — sourced from `LOCAL_MODEL`.
    pub local_model: String,

    /// OpenAI-compatible API key — sourced from `OPENAI_API_KEY` (optional).
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible base URL — sourced from `OPENAI_BASE_URL`.
    pub openai_base_url: String,

    /// Anthropic API key — sourced from `ANTHROPIC_API_KEY` (optional).
    pub anthropic_api_key: Option<String>,
    /// Anthropic base URL — sourced from `ANTHROPIC_BASE_URL`.
    pub anthropic_base_url: String,

    /// Gemini API key — sourced from `GEMINI_API_KEY` (optional).
    pub gemini_api_key: Option<String>,
    /// Gemini base URL — sourced from `GEMINI_BASE_URL`.
    pub gemini_base_url: String,

    /// Explicit preferred-provider override — sourced from `PREFERRED_PROVIDER`.
    /// Valid values: `local` | `openai` | `anthropic` | `gemini`.
    pub preferred_provider: Option<String>,

    /// Remote embedding service URL — sourced from `EMBEDDING_SERVICE_URL`.
    /// Absence triggers the deterministic local fallback, never an error.
    pub embedding_service_url: Option<String>,
    /// Remote vector store URL — sourced from `VECTOR_STORE_URL`.
    /// Absence disables remote retrieval; the store degrades to in-memory.
    pub vector_store_url: Option<String>,
}

/// Load configuration purely from already-set environment variables.
///
/// Does **not** call `dotenvy::dotenv()` — useful in tests that need to
/// control the env precisely via [`std::env::set_var`] / [`std::env::remove_var`].
///
/// # Errors
/// Returns [`RouterError::Config`] if a set variable holds an invalid value.
pub fn load_config_from_env() -> Result<Config, RouterError> {
    let local_base_url = std::env::var("LOCAL_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:11434".to_string());

    let local_model =
        std::env::var("LOCAL_MODEL").unwrap_or_else(|_| "llama3.2:3b".to_string());

    let openai_api_key = non_empty_var("OPENAI_API_KEY");
    let openai_base_url = std::env::var("OPENAI_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com".to_string());

    let anthropic_api_key = non_empty_var("ANTHROPIC_API_KEY");
    let anthropic_base_url = std::env::var("ANTHROPIC_BASE_URL")
        .unwrap_or_else(|_| "https://api.anthropic.com".to_string());

    let gemini_api_key = non_empty_var("GEMINI_API_KEY");
    let gemini_base_url = std::env::var("GEMINI_BASE_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());

    let preferred_provider = std::env::var("PREFERRED_PROVIDER").ok().filter(|v| {
        matches!(v.as_str(), "local" | "openai" | "anthropic" | "gemini")
    });
    if let Ok(v) = std::env::var("PREFERRED_PROVIDER") {
        if !v.is_empty() && preferred_provider.is_none() {
            return Err(RouterError::Config(format!(
                "PREFERRED_PROVIDER must be one of local|openai|anthropic|gemini, got '{v}'"
            )));
        }
    }

    let embedding_service_url = non_empty_var("EMBEDDING_SERVICE_URL");
    let vector_store_url = non_empty_var("VECTOR_STORE_URL");

    for (name, url) in [
        ("LOCAL_BASE_URL", Some(&local_base_url)),
        ("OPENAI_BASE_URL", Some(&openai_base_url)),
        ("ANTHROPIC_BASE_URL", Some(&anthropic_base_url)),
        ("GEMINI_BASE_URL", Some(&gemini_base_url)),
        ("EMBEDDING_SERVICE_URL", embedding_service_url.as_ref()),
        ("VECTOR_STORE_URL", vector_store_url.as_ref()),
    ] {
        if let Some(url) = url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(RouterError::Config(format!(
                    "{name} must start with http:// or https://"
                )));
            }
        }
    }

    Ok(Config {
        local_base_url,
        local_model,
        openai_api_key,
        openai_base_url,
        anthropic_api_key,
        anthropic_base_url,
        gemini_api_key,
        gemini_base_url,
        preferred_provider,
        embedding_service_url,
        vector_store_url,
    })
}

/// Load configuration from the environment (`.env` + system env vars).
///
/// Loads `.env` via `dotenvy` first (ignoring errors if the file is absent),
/// then delegates to [`load_config_from_env`].
pub fn load_config() -> Result<Config, RouterError> {
    // Load .env if present; ignore the error — variables may already be set externally.
    let _ = dotenvy::dotenv();
    load_config_from_env()
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ── Pipeline constants ─────────────────────────────────────────────────────

/// Embedding dimension shared by the remote service and the local fallback.
pub const EMBEDDING_DIM: usize = 384;

/// Input text is capped at this many characters before local embedding.
pub const EMBEDDING_MAX_CHARS: usize = 8000;

/// Maximum allowed length (characters) of an inbound chat message.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Response cache capacity (entries). Oldest-by-recency evicted beyond this.
pub const CACHE_CAPACITY: usize = 100;

/// Response cache TTL in seconds — kept short so answers stay fresh.
pub const CACHE_TTL_SECS: u64 = 30;

/// Number of retrieval results injected into the prompt.
pub const RETRIEVAL_TOP_K: usize = 5;

/// Additional attempts after the first failed call to the preferred adapter.
pub const MAX_RETRIES: u32 = 2;

/// Base delay for exponential retry backoff (`base * 2^(attempt-1)`).
pub const BACKOFF_BASE_MS: u64 = 500;

/// Cap on every outbound HTTP call. A timeout is treated as `Unavailable`.
pub const REQUEST_TIMEOUT_SECS: u64 = 8;

/// Per-user request budget per sliding window.
pub const RATE_LIMIT_REQUESTS_PER_MIN: u32 = 30;

/// Per-user token budget per sliding window.
pub const RATE_LIMIT_TOKENS_PER_MIN: u32 = 20_000;

/// Sliding-window length for the per-user rate limiter.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Maximum number of conversation turns kept per in-memory session.
pub const MAX_SESSION_TURNS: usize = 50;
