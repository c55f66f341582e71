//! Per-user sliding-window rate limiting.
//!
//! Fixed-size counters per user, reset when the window expires. Guards
//! both requests/minute and tokens/minute; a blocked user is rejected
//! before any pipeline stage runs. Interior `Mutex` gives a `&self` API
//! safe for concurrent request handlers.

use crate::error::RouterError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    started_at: Instant,
    requests: u32,
    tokens: u32,
}

/// Request and token budgets enforced per user per window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub requests_per_window: u32,
    pub tokens_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_window: crate::config::RATE_LIMIT_REQUESTS_PER_MIN,
            tokens_per_window: crate::config::RATE_LIMIT_TOKENS_PER_MIN,
            window: Duration::from_secs(crate::config::RATE_LIMIT_WINDOW_SECS),
        }
    }
}

/// Process-local per-user rate limiter.
pub struct RateLimiter {
    limits: RateLimits,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one request for `user_id`, or reject with the seconds left in
    /// the current window. Must be called before any pipeline stage.
    pub fn check_request(&self, user_id: &str) -> Result<(), RouterError> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(user_id.to_string()).or_insert_with(|| Window {
            started_at: Instant::now(),
            requests: 0,
            tokens: 0,
        });

        if window.started_at.elapsed() >= self.limits.window {
            window.started_at = Instant::now();
            window.requests = 0;
            window.tokens = 0;
        }

        if window.requests >= self.limits.requests_per_window
            || window.tokens >= self.limits.tokens_per_window
        {
            let remaining = self
                .limits
                .window
                .saturating_sub(window.started_at.elapsed());
            return Err(RouterError::UserRateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        window.requests += 1;
        Ok(())
    }

    /// Charge consumed tokens against the user's current window.
    pub fn record_tokens(&self, user_id: &str, tokens: u32) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(window) = windows.get_mut(user_id) {
            window.tokens = window.tokens.saturating_add(tokens);
        }
    }

    /// Remaining request budget for diagnostics.
    pub fn remaining_requests(&self, user_id: &str) -> u32 {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        match windows.get(user_id) {
            Some(w) if w.started_at.elapsed() < self.limits.window => {
                self.limits.requests_per_window.saturating_sub(w.requests)
            }
            _ => self.limits.requests_per_window,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
