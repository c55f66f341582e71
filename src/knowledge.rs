//! Knowledge store — append-only prior-interaction storage with semantic
//! retrieval.
//!
//! Backed by a remote vector-store service when configured, else an
//! in-memory list searched with the bounded-heap top-K index. Retrieval is
//! always non-fatal: every failure path logs a warning and yields an empty
//! [`RagResult`], never an error.

use crate::{
    config::{REQUEST_TIMEOUT_SECS, RETRIEVAL_TOP_K},
    embedding::EmbeddingGenerator,
    similarity,
    types::{KnowledgeEntry, Priority, RagResult},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

// ── Remote wire format ────────────────────────────────────────────────────────

/// Metadata payload stored alongside each vector in the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMetadata {
    content: String,
    category: String,
    tags: BTreeSet<String>,
    priority: Priority,
    created_at_secs: u64,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    metadata: EntryMetadata,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    matches: Vec<QueryMatch>,
}

// ── Storage backend ───────────────────────────────────────────────────────────

enum StoreBackend {
    /// Remote vector-store service (`POST /upsert`, `POST /query`).
    Remote { client: reqwest::Client, url: String },
    /// In-memory (entry, vector) list with local cosine top-K.
    InMemory(Mutex<Vec<(KnowledgeEntry, Vec<f32>)>>),
}

// ── Public struct ─────────────────────────────────────────────────────────────

/// Append-only store of prior interactions and retrieved content.
pub struct KnowledgeStore {
    embedding: Arc<EmbeddingGenerator>,
    backend: StoreBackend,
}

impl KnowledgeStore {
    /// Initialise the store with a shared embedding generator.
    ///
    /// `vector_store_url` enables the remote backend; `None` selects the
    /// in-memory backend.
    pub fn new(embedding: Arc<EmbeddingGenerator>, vector_store_url: Option<&str>) -> Self {
        let backend = match vector_store_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                    .build()
                    .unwrap_or_default();
                tracing::info!("vector store configured at {}", url);
                StoreBackend::Remote {
                    client,
                    url: url.trim_end_matches('/').to_string(),
                }
            }
            None => {
                tracing::info!("no vector store configured — using in-memory knowledge store");
                StoreBackend::InMemory(Mutex::new(Vec::new()))
            }
        };
        Self { embedding, backend }
    }

    /// Returns `true` when running without a remote vector store.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.backend, StoreBackend::InMemory(_))
    }

    /// Number of locally held entries (0 for the remote backend, which owns
    /// its own counts).
    pub fn local_len(&self) -> usize {
        match &self.backend {
            StoreBackend::InMemory(entries) => {
                entries.lock().unwrap_or_else(|e| e.into_inner()).len()
            }
            StoreBackend::Remote { .. } => 0,
        }
    }

    // ── Store ─────────────────────────────────────────────────────────────────

    /// Append one knowledge entry. Failures are logged and swallowed —
    /// storage is best-effort and never blocks the pipeline.
    pub async fn add_entry(
        &self,
        content: &str,
        category: &str,
        tags: BTreeSet<String>,
        priority: Priority,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let vector = self.embedding.embed(content).await;
        let entry = KnowledgeEntry {
            id: id.clone(),
            content: content.to_string(),
            category: category.to_string(),
            tags,
            priority,
            relevance_score: 0.0,
            created_at: SystemTime::now(),
        };

        match &self.backend {
            StoreBackend::InMemory(entries) => {
                entries
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push((entry, vector));
            }
            StoreBackend::Remote { client, url } => {
                let metadata = EntryMetadata {
                    content: entry.content.clone(),
                    category: entry.category.clone(),
                    tags: entry.tags.clone(),
                    priority: entry.priority,
                    created_at_secs: unix_secs(entry.created_at),
                };
                let body = serde_json::json!({
                    "id": id,
                    "vector": vector,
                    "metadata": metadata,
                });
                let result = client.post(format!("{url}/upsert")).json(&body).send().await;
                match result {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(entry_id = %id, "knowledge entry upserted");
                    }
                    Ok(resp) => {
                        warn!("vector store upsert failed: status {}", resp.status());
                    }
                    Err(e) => {
                        warn!("vector store upsert failed: {}", e);
                    }
                }
            }
        }
        id
    }

    /// Record one completed user/assistant exchange.
    pub async fn add_exchange(&self, user_message: &str, assistant_reply: &str) -> String {
        let content = format!("User: {user_message}\nAssistant: {assistant_reply}");
        self.add_entry(&content, "conversation", BTreeSet::new(), Priority::Medium)
            .await
    }

    // ── Retrieve ──────────────────────────────────────────────────────────────

    /// Retrieve the entries most relevant to `query`, ordered by descending
    /// relevance. Any backend failure degrades to an empty result.
    pub async fn retrieve(&self, query: &str) -> RagResult {
        let started = Instant::now();
        let query_vector = self.embedding.embed(query).await;

        let mut entries = match &self.backend {
            StoreBackend::InMemory(stored) => {
                let candidates: Vec<(KnowledgeEntry, Vec<f32>)> = stored
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                similarity::top_k(&query_vector, candidates, RETRIEVAL_TOP_K)
                    .into_iter()
                    .map(|(mut entry, score)| {
                        entry.relevance_score = score;
                        entry
                    })
                    .collect()
            }
            StoreBackend::Remote { client, url } => {
                match remote_query(client, url, &query_vector, RETRIEVAL_TOP_K).await {
                    Ok(matches) => matches,
                    Err(e) => {
                        warn!("vector store query failed (degrading to empty): {}", e);
                        Vec::new()
                    }
                }
            }
        };

        entries.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        let total_relevance = entries.iter().map(|e| e.relevance_score).sum();
        let categories = entries.iter().map(|e| e.category.clone()).collect();

        RagResult {
            entries,
            total_relevance,
            categories,
            query: query.to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

async fn remote_query(
    client: &reqwest::Client,
    url: &str,
    vector: &[f32],
    top_k: usize,
) -> Result<Vec<KnowledgeEntry>, String> {
    let body = serde_json::json!({
        "vector": vector,
        "top_k": top_k,
        "filter": serde_json::Value::Null,
    });
    let response = client
        .post(format!("{url}/query"))
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("request: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("status {status}"));
    }

    let parsed: QueryResponse = response.json().await.map_err(|e| format!("body: {e}"))?;
    Ok(parsed
        .matches
        .into_iter()
        .map(|m| KnowledgeEntry {
            id: m.id,
            content: m.metadata.content,
            category: m.metadata.category,
            tags: m.metadata.tags,
            priority: m.metadata.priority,
            relevance_score: m.score,
            created_at: UNIX_EPOCH + Duration::from_secs(m.metadata.created_at_secs),
        })
        .collect())
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> KnowledgeStore {
        KnowledgeStore::new(Arc::new(EmbeddingGenerator::new(None)), None)
    }

    #[tokio::test]
    async fn add_and_retrieve_in_memory() {
        let store = make_store();
        store
            .add_entry(
                "Rust ownership rules prevent data races",
                "programming",
                BTreeSet::new(),
                Priority::High,
            )
            .await;
        store
            .add_entry(
                "Pasta should be cooked al dente",
                "cooking",
                BTreeSet::new(),
                Priority::Low,
            )
            .await;
        assert_eq!(store.local_len(), 2);

        let result = store.retrieve("rust ownership and borrowing").await;
        assert!(!result.entries.is_empty());
        assert_eq!(result.query, "rust ownership and borrowing");
        // Descending relevance order.
        for pair in result.entries.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
    }

    #[tokio::test]
    async fn retrieve_from_empty_store_is_empty() {
        let store = make_store();
        let result = store.retrieve("anything").await;
        assert!(result.entries.is_empty());
        assert_eq!(result.total_relevance, 0.0);
        assert!(result.categories.is_empty());
    }

    #[tokio::test]
    async fn add_exchange_records_conversation_category() {
        let store = make_store();
        store.add_exchange("what is rust?", "A systems language.").await;
        let result = store.retrieve("what is rust?").await;
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].category, "conversation");
        assert!(result.entries[0].content.contains("what is rust?"));
        assert!(result.categories.contains("conversation"));
    }

    #[tokio::test]
    async fn total_relevance_is_sum_of_scores() {
        let store = make_store();
        store
            .add_entry("alpha beta gamma", "a", BTreeSet::new(), Priority::Medium)
            .await;
        store
            .add_entry("delta epsilon zeta", "b", BTreeSet::new(), Priority::Medium)
            .await;
        let result = store.retrieve("alpha beta").await;
        let sum: f32 = result.entries.iter().map(|e| e.relevance_score).sum();
        assert!((result.total_relevance - sum).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unreachable_remote_store_degrades_to_empty() {
        let store = KnowledgeStore::new(
            Arc::new(EmbeddingGenerator::new(None)),
            Some("http://localhost:19997"),
        );
        assert!(!store.is_in_memory());
        let result = store.retrieve("degrade me").await;
        assert!(result.entries.is_empty());
    }
}
