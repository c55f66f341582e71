//! Provider failover engine — preferred-adapter selection, bounded retry
//! with exponential backoff, and ordered fallback across the registry.
//!
//! Decision rules:
//! - The preferred adapter is the explicit override when configured, else
//!   the first configured adapter in registry priority order (local first).
//! - The local backend is called once, no retry loop — it either answers
//!   or it doesn't.
//! - A `RateLimited` error carrying a wait hint aborts the whole request
//!   immediately and surfaces the hint; provider guidance is never
//!   silently retried past.
//! - Other transient errors are retried up to `max_retries` extra attempts
//!   with `base * 2^(attempt-1)` backoff, local to this request.
//! - After the preferred adapter fails, every other configured adapter
//!   gets one attempt, in registry order. The first success wins.
//! - When everything fails, the *preferred* adapter's original error is
//!   propagated — callers reason about the primary failure.

use crate::{
    config::{Config, BACKOFF_BASE_MS, MAX_RETRIES},
    error::{ProviderError, RouterError},
    providers::{
        AnthropicAdapter, GeminiAdapter, LocalAdapter, OpenAiAdapter, ProviderAdapter,
    },
    types::{InferenceRequest, InferenceResponse, ProviderId},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ordered set of configured adapters plus the preferred-order policy.
pub struct FailoverEngine {
    /// Declared priority order; the local backend conventionally comes first.
    registry: Vec<Arc<dyn ProviderAdapter>>,
    preferred_override: Option<ProviderId>,
    max_retries: u32,
    backoff_base: Duration,
}

impl FailoverEngine {
    /// Build the engine from explicit adapters. `registry` order is the
    /// declared priority order used for preference and fallback.
    pub fn new(
        registry: Vec<Arc<dyn ProviderAdapter>>,
        preferred_override: Option<ProviderId>,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            registry,
            preferred_override,
            max_retries,
            backoff_base,
        }
    }

    /// Standard registry from configuration: local first, then the cloud
    /// backends in declared priority order.
    pub fn from_config(config: &Config) -> Self {
        let registry: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(LocalAdapter::new(config)),
            Arc::new(OpenAiAdapter::new(config)),
            Arc::new(AnthropicAdapter::new(config)),
            Arc::new(GeminiAdapter::new(config)),
        ];
        let preferred_override = config.preferred_provider.as_deref().and_then(|p| match p {
            "local" => Some(ProviderId::Local),
            "openai" => Some(ProviderId::OpenAi),
            "anthropic" => Some(ProviderId::Anthropic),
            "gemini" => Some(ProviderId::Gemini),
            _ => None,
        });
        Self::new(
            registry,
            preferred_override,
            MAX_RETRIES,
            Duration::from_millis(BACKOFF_BASE_MS),
        )
    }

    /// The adapter a request will be tried against first: the explicit
    /// override when it names a configured adapter, else the first
    /// configured adapter in registry order.
    pub fn preferred(&self) -> Option<&Arc<dyn ProviderAdapter>> {
        if let Some(id) = self.preferred_override {
            if let Some(adapter) = self
                .registry
                .iter()
                .find(|a| a.id() == id && a.is_configured())
            {
                return Some(adapter);
            }
        }
        self.registry.iter().find(|a| a.is_configured())
    }

    /// Identities of all configured adapters, in priority order.
    pub fn configured_ids(&self) -> Vec<ProviderId> {
        self.registry
            .iter()
            .filter(|a| a.is_configured())
            .map(|a| a.id())
            .collect()
    }

    /// Run one generation request through the failover policy.
    pub async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, RouterError> {
        let preferred = self
            .preferred()
            .ok_or_else(|| RouterError::Config("no configured providers".to_string()))?;

        let primary_error = match self.call_with_retries(preferred.as_ref(), request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        // Provider guidance: a concrete wait hint aborts without fallback.
        if primary_error.retry_after().is_some() {
            return Err(RouterError::AllProvidersFailed {
                source: primary_error,
            });
        }

        warn!(
            provider = %preferred.id(),
            error = %primary_error,
            "preferred provider failed — falling back"
        );

        for adapter in &self.registry {
            if adapter.id() == preferred.id() || !adapter.is_configured() {
                continue;
            }
            match adapter.generate(request).await {
                Ok(response) => {
                    debug!(provider = %adapter.id(), "fallback provider succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(provider = %adapter.id(), error = %e, "fallback provider failed");
                }
            }
        }

        // Propagate the preferred adapter's error, not the last fallback's.
        Err(RouterError::AllProvidersFailed {
            source: primary_error,
        })
    }

    /// Call one adapter, retrying transient failures with exponential
    /// backoff. The local backend gets exactly one attempt.
    async fn call_with_retries(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ProviderError> {
        if adapter.is_local() {
            return adapter.generate(request).await;
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match adapter.generate(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    // A wait hint or a non-transient error ends the loop at once.
                    if e.retry_after().is_some() || !e.is_transient() {
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        return Err(e);
                    }
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    debug!(
                        provider = %adapter.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider error — backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FinishReason;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockAdapter {
        id: ProviderId,
        configured: bool,
        outcome: Result<String, ProviderError>,
        calls: AtomicUsize,
    }

    impl MockAdapter {
        fn ok(id: ProviderId, text: &str) -> Arc<Self> {
            Arc::new(Self {
                id,
                configured: true,
                outcome: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: ProviderId, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                id,
                configured: true,
                outcome: Err(error),
                calls: AtomicUsize::new(0),
            })
        }

        fn unconfigured(id: ProviderId) -> Arc<Self> {
            Arc::new(Self {
                id,
                configured: false,
                outcome: Err(ProviderError::Unavailable("unconfigured".to_string())),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn generate(
            &self,
            request: &InferenceRequest,
        ) -> Result<InferenceResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(text) => Ok(InferenceResponse {
                    text: text.clone(),
                    provider_id: self.id,
                    model_id: request
                        .options
                        .model_id
                        .clone()
                        .unwrap_or_else(|| "mock".to_string()),
                    tokens_used: Some(1),
                    finish_reason: FinishReason::Stop,
                }),
                Err(e) => Err(e.clone()),
            }
        }
    }

    fn engine(adapters: Vec<Arc<dyn ProviderAdapter>>) -> FailoverEngine {
        FailoverEngine::new(adapters, None, 2, Duration::from_millis(1))
    }

    fn request() -> InferenceRequest {
        InferenceRequest::builder("test prompt").build()
    }

    #[tokio::test]
    async fn preferred_is_first_configured() {
        let unconfigured = MockAdapter::unconfigured(ProviderId::Local);
        let cloud = MockAdapter::ok(ProviderId::OpenAi, "cloud answer");
        let engine = engine(vec![unconfigured, cloud]);
        assert_eq!(engine.preferred().unwrap().id(), ProviderId::OpenAi);
    }

    #[tokio::test]
    async fn override_wins_when_configured() {
        let local = MockAdapter::ok(ProviderId::Local, "local");
        let cloud = MockAdapter::ok(ProviderId::Anthropic, "cloud");
        let engine = FailoverEngine::new(
            vec![local, cloud],
            Some(ProviderId::Anthropic),
            2,
            Duration::from_millis(1),
        );
        assert_eq!(engine.preferred().unwrap().id(), ProviderId::Anthropic);
        let response = engine.generate(&request()).await.unwrap();
        assert_eq!(response.provider_id, ProviderId::Anthropic);
    }

    #[tokio::test]
    async fn rate_limit_hint_aborts_without_fallback() {
        let limited = MockAdapter::failing(
            ProviderId::OpenAi,
            ProviderError::RateLimited {
                retry_after_secs: Some(5),
            },
        );
        let fallback = MockAdapter::ok(ProviderId::Anthropic, "should not run");
        let engine = engine(vec![limited.clone(), fallback.clone()]);

        let err = engine.generate(&request()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(5));
        assert_eq!(limited.call_count(), 1, "no retries past provider guidance");
        assert_eq!(fallback.call_count(), 0, "fallback must not be invoked");
    }

    #[tokio::test]
    async fn transient_errors_retried_then_fallback() {
        let flaky = MockAdapter::failing(
            ProviderId::OpenAi,
            ProviderError::Unavailable("down".to_string()),
        );
        let fallback = MockAdapter::ok(ProviderId::Gemini, "rescued");
        let engine = engine(vec![flaky.clone(), fallback.clone()]);

        let response = engine.generate(&request()).await.unwrap();
        assert_eq!(response.text, "rescued");
        assert_eq!(response.provider_id, ProviderId::Gemini);
        // 1 initial + 2 retries, never more.
        assert_eq!(flaky.call_count(), 3);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn local_preferred_gets_single_attempt() {
        let local = MockAdapter::failing(
            ProviderId::Local,
            ProviderError::Unavailable("not running".to_string()),
        );
        let cloud = MockAdapter::ok(ProviderId::OpenAi, "cloud answer");
        let engine = engine(vec![local.clone(), cloud.clone()]);

        let response = engine.generate(&request()).await.unwrap();
        assert_eq!(response.provider_id, ProviderId::OpenAi);
        assert_eq!(local.call_count(), 1, "local backend is never retried");
    }

    #[tokio::test]
    async fn non_retryable_error_falls_back_immediately() {
        let missing = MockAdapter::failing(
            ProviderId::OpenAi,
            ProviderError::NotFound("no such model".to_string()),
        );
        let fallback = MockAdapter::ok(ProviderId::Anthropic, "ok");
        let engine = engine(vec![missing.clone(), fallback]);

        let response = engine.generate(&request()).await.unwrap();
        assert_eq!(response.provider_id, ProviderId::Anthropic);
        assert_eq!(missing.call_count(), 1);
    }

    #[tokio::test]
    async fn all_fail_propagates_original_error() {
        let primary = MockAdapter::failing(
            ProviderId::Local,
            ProviderError::Unavailable("primary down".to_string()),
        );
        let secondary = MockAdapter::failing(
            ProviderId::OpenAi,
            ProviderError::NotFound("secondary 404".to_string()),
        );
        let engine = engine(vec![primary, secondary.clone()]);

        match engine.generate(&request()).await.unwrap_err() {
            RouterError::AllProvidersFailed { source } => {
                assert!(
                    matches!(source, ProviderError::Unavailable(ref m) if m == "primary down"),
                    "must carry the preferred adapter's error, got {source:?}"
                );
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
        assert_eq!(secondary.call_count(), 1, "every other adapter attempts once");
    }

    #[tokio::test]
    async fn unconfigured_adapters_skipped_in_fallback() {
        let primary = MockAdapter::failing(
            ProviderId::Local,
            ProviderError::Unavailable("down".to_string()),
        );
        let skipped = MockAdapter::unconfigured(ProviderId::OpenAi);
        let rescue = MockAdapter::ok(ProviderId::Gemini, "ok");
        let engine = engine(vec![primary, skipped.clone(), rescue]);

        let response = engine.generate(&request()).await.unwrap();
        assert_eq!(response.provider_id, ProviderId::Gemini);
        assert_eq!(skipped.call_count(), 0);
    }

    #[tokio::test]
    async fn no_configured_providers_is_config_error() {
        let engine = engine(vec![
            MockAdapter::unconfigured(ProviderId::OpenAi) as Arc<dyn ProviderAdapter>
        ]);
        assert!(matches!(
            engine.generate(&request()).await.unwrap_err(),
            RouterError::Config(_)
        ));
    }

    #[tokio::test]
    async fn rate_limit_without_hint_is_retried() {
        let limited = MockAdapter::failing(
            ProviderId::OpenAi,
            ProviderError::RateLimited {
                retry_after_secs: None,
            },
        );
        let fallback = MockAdapter::ok(ProviderId::Gemini, "ok");
        let engine = engine(vec![limited.clone(), fallback]);

        let response = engine.generate(&request()).await.unwrap();
        assert_eq!(response.provider_id, ProviderId::Gemini);
        assert_eq!(limited.call_count(), 3, "hint-less rate limit counts as transient");
    }
}
