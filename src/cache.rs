//! Bounded TTL response cache keyed by a normalized request fingerprint.
//!
//! O(1) `get`/`put` via a hash map into an intrusive doubly linked list
//! stored in a slab (`Vec` of nodes with index links — no pointer juggling).
//! Eviction is by age (TTL) and by recency (least-recently-used dropped
//! first once capacity is exceeded). Interior `Mutex` gives the store a
//! `&self` API safe for concurrent request handlers.

use crate::types::InferenceResponse;
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ── Cache key ────────────────────────────────────────────────────────────────

/// Deterministic digest of the request fields that affect the answer.
///
/// Two logically identical requests always produce the same key: the model
/// id defaults to `"default"`, the temperature is rounded to 2 decimals,
/// and an absent system prompt hashes as the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        prompt: &str,
        model_id: Option<&str>,
        temperature: f32,
        system_prompt: Option<&str>,
        enrich: bool,
    ) -> Self {
        let mut hasher = Sha3_256::new();
        // Unit separator between fields so field boundaries cannot collide.
        hasher.update(prompt.as_bytes());
        hasher.update([0x1f]);
        hasher.update(model_id.unwrap_or("default").as_bytes());
        hasher.update([0x1f]);
        hasher.update(format!("{:.2}", temperature).as_bytes());
        hasher.update([0x1f]);
        hasher.update(system_prompt.unwrap_or("").as_bytes());
        hasher.update([0x1f]);
        hasher.update([u8::from(enrich)]);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hex digest, stable across processes.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Internal LRU structure ───────────────────────────────────────────────────

struct Node {
    key: CacheKey,
    response: InferenceResponse,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab-backed doubly linked list: `head` is most recent, `tail` least.
struct LruState {
    map: HashMap<CacheKey, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    stats: CacheStats,
}

/// Hit/miss/eviction counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl LruState {
    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("detach of vacant slot");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.nodes[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(p) = self.nodes[n].as_mut() {
                    p.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.nodes[h].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn remove(&mut self, idx: usize) -> Option<Node> {
        self.detach(idx);
        let node = self.nodes[idx].take()?;
        self.map.remove(&node.key);
        self.free.push(idx);
        Some(node)
    }
}

// ── Public cache ─────────────────────────────────────────────────────────────

/// Bounded, TTL-based LRU cache of successful inference responses.
pub struct ResponseCache {
    state: Mutex<LruState>,
    capacity: usize,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a cache holding at most `capacity` entries, each valid for `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LruState {
                map: HashMap::with_capacity(capacity),
                nodes: Vec::with_capacity(capacity),
                free: Vec::new(),
                head: None,
                tail: None,
                stats: CacheStats::default(),
            }),
            capacity,
            ttl,
        }
    }

    /// Look up a response. A hit bumps recency; an expired entry is removed
    /// and reported as a miss. The returned response is unaltered — the
    /// caller flags the hit in its own metadata.
    pub fn get(&self, key: &CacheKey) -> Option<InferenceResponse> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let idx = match state.map.get(key) {
            Some(&idx) => idx,
            None => {
                state.stats.misses += 1;
                return None;
            }
        };

        let expired = state.nodes[idx]
            .as_ref()
            .is_some_and(|n| n.inserted_at.elapsed() > self.ttl);
        if expired {
            state.remove(idx);
            state.stats.misses += 1;
            return None;
        }

        state.detach(idx);
        state.push_front(idx);
        state.stats.hits += 1;
        state.nodes[idx].as_ref().map(|n| n.response.clone())
    }

    /// Insert a response, replacing any existing entry for the key and
    /// evicting the least-recently-used entry when over capacity.
    pub fn put(&self, key: CacheKey, response: InferenceResponse) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(&idx) = state.map.get(&key) {
            state.detach(idx);
            state.push_front(idx);
            if let Some(node) = state.nodes[idx].as_mut() {
                node.response = response;
                node.inserted_at = Instant::now();
            }
            return;
        }

        if state.map.len() >= self.capacity {
            if let Some(tail) = state.tail {
                state.remove(tail);
                state.stats.evictions += 1;
            }
        }

        let node = Node {
            key: key.clone(),
            response,
            inserted_at: Instant::now(),
            prev: None,
            next: None,
        };
        let idx = match state.free.pop() {
            Some(idx) => {
                state.nodes[idx] = Some(node);
                idx
            }
            None => {
                state.nodes.push(Some(node));
                state.nodes.len() - 1
            }
        };
        state.map.insert(key, idx);
        state.push_front(idx);
    }

    /// Current number of live entries (expired entries still count until
    /// touched by `get`).
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).stats
    }

    /// Drop every entry, keeping the counters.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.map.clear();
        state.nodes.clear();
        state.free.clear();
        state.head = None;
        state.tail = None;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, ProviderId};

    fn response(text: &str) -> InferenceResponse {
        InferenceResponse {
            text: text.to_string(),
            provider_id: ProviderId::Local,
            model_id: "test-model".to_string(),
            tokens_used: Some(7),
            finish_reason: FinishReason::Stop,
        }
    }

    fn key(prompt: &str) -> CacheKey {
        CacheKey::new(prompt, None, 0.7, None, false)
    }

    #[test]
    fn key_equality_requires_all_fields_equal() {
        let base = CacheKey::new("p", Some("m"), 0.70, Some("s"), true);
        assert_eq!(base, CacheKey::new("p", Some("m"), 0.70, Some("s"), true));
        assert_ne!(base, CacheKey::new("q", Some("m"), 0.70, Some("s"), true));
        assert_ne!(base, CacheKey::new("p", Some("n"), 0.70, Some("s"), true));
        assert_ne!(base, CacheKey::new("p", Some("m"), 0.90, Some("s"), true));
        assert_ne!(base, CacheKey::new("p", Some("m"), 0.70, Some("t"), true));
        assert_ne!(base, CacheKey::new("p", Some("m"), 0.70, Some("s"), false));
    }

    #[test]
    fn key_rounds_temperature_to_two_decimals() {
        let a = CacheKey::new("p", None, 0.701, None, false);
        let b = CacheKey::new("p", None, 0.699, None, false);
        let c = CacheKey::new("p", None, 0.71, None, false);
        assert_eq!(a, b, "0.701 and 0.699 both round to 0.70");
        assert_ne!(a, c);
    }

    #[test]
    fn key_defaults_for_absent_fields() {
        assert_eq!(
            CacheKey::new("p", None, 0.5, None, false),
            CacheKey::new("p", Some("default"), 0.5, Some(""), false),
        );
    }

    #[test]
    fn get_miss_then_hit() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let k = key("hello");
        assert!(cache.get(&k).is_none());

        cache.put(k.clone(), response("world"));
        let hit = cache.get(&k).expect("expected a hit");
        assert_eq!(hit.text, "world");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn capacity_plus_one_evicts_exactly_lru() {
        let cache = ResponseCache::new(3, Duration::from_secs(60));
        cache.put(key("a"), response("a"));
        cache.put(key("b"), response("b"));
        cache.put(key("c"), response("c"));

        // Touch "a" so "b" becomes the least recently used.
        assert!(cache.get(&key("a")).is_some());

        cache.put(key("d"), response("d"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&key("b")).is_none(), "LRU entry must be evicted");
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert!(cache.get(&key("d")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_within_ttl_never_evicts_itself() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        let k = key("fresh");
        cache.put(k.clone(), response("v"));
        for _ in 0..10 {
            assert!(cache.get(&k).is_some());
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_after_ttl_expiry_misses_and_removes() {
        let cache = ResponseCache::new(2, Duration::from_millis(0));
        let k = key("stale");
        cache.put(k.clone(), response("v"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.len(), 0, "expired entry must be removed on get");
    }

    #[test]
    fn put_same_key_replaces_without_growth() {
        let cache = ResponseCache::new(5, Duration::from_secs(60));
        let k = key("same");
        cache.put(k.clone(), response("v1"));
        cache.put(k.clone(), response("v2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&k).unwrap().text, "v2");
    }

    #[test]
    fn hit_does_not_alter_response_content() {
        let cache = ResponseCache::new(5, Duration::from_secs(60));
        let k = key("content");
        let original = response("untouched");
        cache.put(k.clone(), original.clone());
        assert_eq!(cache.get(&k).unwrap(), original);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = ResponseCache::new(5, Duration::from_secs(60));
        cache.put(key("x"), response("x"));
        cache.put(key("y"), response("y"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key("x")).is_none());
    }

    #[test]
    fn slab_slot_reuse_after_eviction() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        for i in 0..20 {
            cache.put(key(&format!("k{i}")), response(&format!("v{i}")));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("k19")).is_some());
        assert!(cache.get(&key("k18")).is_some());
    }
}
