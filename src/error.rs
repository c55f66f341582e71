//! Error taxonomy for the inference router.
//!
//! Two layers: [`ProviderError`] describes a single adapter call and drives
//! the failover engine's retry/fallback decisions; [`RouterError`] is the
//! unified error propagated through the pipeline.

use thiserror::Error;

/// Failure modes of a single provider adapter call.
///
/// The failover engine inspects these variants to decide between retrying,
/// falling back, or aborting with a wait hint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Connection refused, DNS failure, or request timeout — backend not running.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The requested model does not exist on this backend.
    #[error("model not found: {0}")]
    NotFound(String),

    /// Backend rate limit hit. `retry_after_secs` is parsed from structured
    /// error metadata or a textual "retry in N s" pattern when present.
    #[error("rate limited (retry after {retry_after_secs:?} s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The backend answered but the payload was empty or malformed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Provider-side content filtering rejected the request.
    #[error("blocked by provider content filter")]
    Blocked,
}

impl ProviderError {
    /// Transient errors are retried by the failover engine; the rest cause
    /// an immediate fallback (or, for a rate limit with a wait hint, an
    /// immediate abort that surfaces the hint).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_)
                | ProviderError::InvalidResponse(_)
                | ProviderError::RateLimited {
                    retry_after_secs: None
                }
        )
    }

    /// Wait hint in seconds, if the provider supplied one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Unified error type propagated through every pipeline stage.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input validation error: {0}")]
    InputValidation(String),

    /// Embedding service or vector store absent/failing. Always recovered
    /// from inside the pipeline — retrieval degrades to empty, never fatal.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Every configured adapter failed. Carries the *preferred* adapter's
    /// original error, not the last fallback's — callers reason about the
    /// primary failure.
    #[error("All providers failed (preferred: {source})")]
    AllProvidersFailed {
        #[source]
        source: ProviderError,
    },

    /// Per-user request/token budget exhausted for the current window.
    /// Carries the seconds until the window resets so callers can surface
    /// a machine-readable wait hint.
    #[error("Rate limit exceeded: window resets in {retry_after_secs} s")]
    UserRateLimited { retry_after_secs: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    /// Wait hint in seconds — from the provider when an `AllProvidersFailed`
    /// wraps a rate limit, or from the user budget window.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            RouterError::AllProvidersFailed { source } => source.retry_after(),
            RouterError::UserRateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
