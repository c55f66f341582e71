//! Tests for [`inference_router::config`]
//!
//! Env-var tests use a process-wide `Mutex` to run serially even under the
//! default multi-threaded test harness (`cargo test`).

use inference_router::config::{
    load_config_from_env, BACKOFF_BASE_MS, CACHE_CAPACITY, CACHE_TTL_SECS, EMBEDDING_DIM,
    MAX_MESSAGE_LENGTH, MAX_RETRIES, RATE_LIMIT_REQUESTS_PER_MIN, RATE_LIMIT_TOKENS_PER_MIN,
    RATE_LIMIT_WINDOW_SECS, RETRIEVAL_TOP_K,
};
use std::sync::{Mutex, MutexGuard};

// ── Serialiser ────────────────────────────────────────────────────────────────

static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Helper: guard that restores env vars on drop ──────────────────────────────

struct EnvGuard {
    key: &'static str,
    original: Option<String>,
}

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        let original = std::env::var(key).ok();
        std::env::set_var(key, value);
        Self { key, original }
    }

    fn remove(key: &'static str) -> Self {
        let original = std::env::var(key).ok();
        std::env::remove_var(key);
        Self { key, original }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.original {
            Some(v) => std::env::set_var(self.key, v),
            None => std::env::remove_var(self.key),
        }
    }
}

fn clear_all() -> Vec<EnvGuard> {
    [
        "LOCAL_BASE_URL",
        "LOCAL_MODEL",
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "ANTHROPIC_API_KEY",
        "ANTHROPIC_BASE_URL",
        "GEMINI_API_KEY",
        "GEMINI_BASE_URL",
        "PREFERRED_PROVIDER",
        "EMBEDDING_SERVICE_URL",
        "VECTOR_STORE_URL",
    ]
    .into_iter()
    .map(EnvGuard::remove)
    .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// No variables set at all is a valid configuration — the local backend
/// needs no key and every cloud provider is simply unconfigured.
#[test]
fn test_load_config_succeeds_with_no_vars() {
    let _lock = lock_env();
    let _guards = clear_all();

    let cfg = load_config_from_env().expect("bare environment must load");
    assert_eq!(cfg.local_base_url, "http://localhost:11434");
    assert_eq!(cfg.local_model, "llama3.2:3b");
    assert!(cfg.openai_api_key.is_none());
    assert!(cfg.anthropic_api_key.is_none());
    assert!(cfg.gemini_api_key.is_none());
    assert!(cfg.preferred_provider.is_none());
    assert!(cfg.embedding_service_url.is_none());
    assert!(cfg.vector_store_url.is_none());
}

/// Default cloud base URLs are https.
#[test]
fn test_default_base_urls_are_https() {
    let _lock = lock_env();
    let _guards = clear_all();

    let cfg = load_config_from_env().expect("bare environment must load");
    assert!(cfg.openai_base_url.starts_with("https://"));
    assert!(cfg.anthropic_base_url.starts_with("https://"));
    assert!(cfg.gemini_base_url.starts_with("https://"));
}

/// Set variables override defaults.
#[test]
fn test_env_vars_override_defaults() {
    let _lock = lock_env();
    let _guards = clear_all();
    let _url = EnvGuard::set("LOCAL_BASE_URL", "http://127.0.0.1:9999");
    let _model = EnvGuard::set("LOCAL_MODEL", "test-model");
    let _key = EnvGuard::set("ANTHROPIC_API_KEY", "test-mock-key-not-real");

    let cfg = load_config_from_env().expect("expected Ok");
    assert_eq!(cfg.local_base_url, "http://127.0.0.1:9999");
    assert_eq!(cfg.local_model, "test-model");
    assert_eq!(cfg.anthropic_api_key.as_deref(), Some("test-mock-key-not-real"));
}

/// Empty API keys are treated as absent, not as credentials.
#[test]
fn test_empty_api_key_is_absent() {
    let _lock = lock_env();
    let _guards = clear_all();
    let _key = EnvGuard::set("OPENAI_API_KEY", "");

    let cfg = load_config_from_env().expect("expected Ok");
    assert!(cfg.openai_api_key.is_none());
}

/// Base URLs must start with http:// or https://.
#[test]
fn test_invalid_base_url_rejected() {
    let _lock = lock_env();
    let _guards = clear_all();
    let _url = EnvGuard::set("OPENAI_BASE_URL", "ftp://bad-url.example");

    let result = load_config_from_env();
    assert!(result.is_err(), "Expected error for ftp:// URL");
    let msg = result.unwrap_err().to_string();
    assert!(
        msg.contains("http://") || msg.contains("https://"),
        "Error should mention http/https requirement, got: {msg}"
    );
}

/// PREFERRED_PROVIDER accepts only the four known labels.
#[test]
fn test_preferred_provider_validated() {
    let _lock = lock_env();
    let _guards = clear_all();

    {
        let _p = EnvGuard::set("PREFERRED_PROVIDER", "anthropic");
        let cfg = load_config_from_env().expect("valid provider must load");
        assert_eq!(cfg.preferred_provider.as_deref(), Some("anthropic"));
    }
    {
        let _p = EnvGuard::set("PREFERRED_PROVIDER", "skynet");
        let result = load_config_from_env();
        assert!(result.is_err(), "Expected error for unknown provider");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("PREFERRED_PROVIDER"), "got: {msg}");
    }
}

/// Optional service URLs are validated when present.
#[test]
fn test_service_urls_validated_when_set() {
    let _lock = lock_env();
    let _guards = clear_all();
    let _emb = EnvGuard::set("EMBEDDING_SERVICE_URL", "localhost:8080");

    assert!(load_config_from_env().is_err(), "scheme-less URL must be rejected");
}

/// Constants have the expected values.
#[test]
fn test_constants_have_expected_values() {
    assert_eq!(EMBEDDING_DIM, 384);
    assert_eq!(MAX_MESSAGE_LENGTH, 1000);
    assert_eq!(CACHE_CAPACITY, 100);
    assert_eq!(CACHE_TTL_SECS, 30);
    assert_eq!(RETRIEVAL_TOP_K, 5);
    assert_eq!(MAX_RETRIES, 2);
    assert_eq!(BACKOFF_BASE_MS, 500);
    assert_eq!(RATE_LIMIT_REQUESTS_PER_MIN, 30);
    assert_eq!(RATE_LIMIT_TOKENS_PER_MIN, 20_000);
    assert_eq!(RATE_LIMIT_WINDOW_SECS, 60);
}
