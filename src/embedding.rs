//! Embedding generation — remote service when configured, deterministic
//! local fallback otherwise.
//!
//! [`EmbeddingGenerator::embed`] never fails: any remote error (network,
//! non-2xx, malformed payload) is logged and the call degrades to the local
//! hash-based embedding, which preserves the 384-dim interface and is fully
//! deterministic for testability.

use crate::config::{EMBEDDING_DIM, EMBEDDING_MAX_CHARS, REQUEST_TIMEOUT_SECS};
use std::collections::HashMap;
use std::time::Duration;

// ── Backend enum ────────────────────────────────────────────────────────────

enum EmbeddingBackend {
    /// Deterministic local embedding — correct dimensions, no learned semantics.
    Local,
    /// Remote embedding service (`POST <url>/embed`).
    Remote { client: reqwest::Client, url: String },
}

// ── Public struct ────────────────────────────────────────────────────────────

/// Text → 384-dim L2-normalised vector.
pub struct EmbeddingGenerator {
    backend: EmbeddingBackend,
}

impl EmbeddingGenerator {
    /// Create a generator. `service_url` enables the remote backend; `None`
    /// selects the local fallback directly.
    pub fn new(service_url: Option<&str>) -> Self {
        let backend = match service_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                    .build()
                    .unwrap_or_default();
                tracing::info!("embedding service configured at {}", url);
                EmbeddingBackend::Remote {
                    client,
                    url: url.trim_end_matches('/').to_string(),
                }
            }
            None => {
                tracing::info!("no embedding service configured — using local fallback");
                EmbeddingBackend::Local
            }
        };
        Self { backend }
    }

    /// Returns `true` when no remote service is configured.
    pub fn is_fallback(&self) -> bool {
        matches!(self.backend, EmbeddingBackend::Local)
    }

    /// Embed a single text. Never fails — remote errors degrade to the
    /// local fallback.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match &self.backend {
            EmbeddingBackend::Local => local_embed(text),
            EmbeddingBackend::Remote { client, url } => {
                match remote_embed(client, url, text).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("remote embedding failed ({}); using local fallback", e);
                        local_embed(text)
                    }
                }
            }
        }
    }

    /// Embed multiple texts; items are processed independently.
    pub async fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await);
        }
        out
    }
}

// ── Remote backend ───────────────────────────────────────────────────────────

async fn remote_embed(
    client: &reqwest::Client,
    url: &str,
    text: &str,
) -> Result<Vec<f32>, String> {
    let response = client
        .post(format!("{url}/embed"))
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .map_err(|e| format!("request: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("status {status}"));
    }

    let body: serde_json::Value = response.json().await.map_err(|e| format!("body: {e}"))?;
    let vector: Vec<f32> = body
        .get("embedding")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "missing 'embedding' array".to_string())?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vector.len() != EMBEDDING_DIM {
        return Err(format!(
            "expected {} dims, got {}",
            EMBEDDING_DIM,
            vector.len()
        ));
    }
    Ok(vector)
}

// ── Local fallback ───────────────────────────────────────────────────────────

/// Deterministic local embedding.
///
/// Scatters word-level, character-n-gram, and positional features over a
/// 384-dim vector, injects three scalar length features, and L2-normalises.
/// Calling this twice with the same text yields bit-identical vectors.
pub fn local_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    let normalized: String = text
        .trim()
        .to_lowercase()
        .chars()
        .take(EMBEDDING_MAX_CHARS)
        .collect();

    let words: Vec<&str> = normalized.split_whitespace().collect();
    let chars: Vec<char> = normalized.chars().collect();

    // Word features: each distinct word scattered at three hash positions,
    // weighted by log-damped frequency.
    let mut frequencies: HashMap<&str, u32> = HashMap::new();
    for w in &words {
        *frequencies.entry(w).or_insert(0) += 1;
    }
    for (word, freq) in &frequencies {
        let h = text_hash(word);
        let weight = (1.0 + f64::from(*freq)).ln();
        for i in 0u64..3 {
            let idx = ((h + i * 7919) % EMBEDDING_DIM as u64) as usize;
            vector[idx] += (weight * (h as f64 * (i + 1) as f64 * 0.1).sin()) as f32;
        }
    }

    // Character n-gram features for n in {2, 3}.
    for n in 2usize..=3 {
        if chars.len() < n {
            continue;
        }
        for window in chars.windows(n) {
            let gram: String = window.iter().collect();
            let h = text_hash(&gram);
            let idx = ((h + (n as u64) * 1000) % EMBEDDING_DIM as u64) as usize;
            vector[idx] += (0.5 * (h as f64 * 0.1).cos()) as f32;
        }
    }

    // Positional character features.
    for (i, c) in chars.iter().enumerate() {
        let idx = (*c as u64 * (i as u64 + 1)) % EMBEDDING_DIM as u64;
        vector[idx as usize] += (0.3 / (1.0 + 0.01 * i as f64)) as f32;
    }

    // Scalar features at fixed indices.
    let word_count = words.len();
    let avg_word_len = if word_count > 0 {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / word_count as f64
    } else {
        0.0
    };
    vector[0] = ((1.0 + chars.len() as f64).ln() / 10.0) as f32;
    vector[1] = ((1.0 + word_count as f64).ln() / 10.0) as f32;
    vector[2] = (avg_word_len * 0.1) as f32;

    normalize(&vector)
}

/// 32-bit polynomial string hash (`h = h*31 + char`), taken as absolute value.
fn text_hash(s: &str) -> u64 {
    let mut h: i32 = 0;
    for c in s.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    u64::from(h.unsigned_abs())
}

/// L2-normalise a vector; returns it unchanged when the magnitude is 0.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
