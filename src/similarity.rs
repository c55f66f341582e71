//! Cosine-similarity top-K search over (payload, vector) pairs.
//!
//! Uses a bounded min-heap of size `k`: memory stays O(k) and time
//! O(n log k) regardless of candidate count. Ties are broken by insertion
//! order (earlier candidates win), and the output is fully sorted
//! descending regardless of internal heap order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Cosine similarity `dot / (|a| |b|)`, defined as 0 when either magnitude
/// is 0 or the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ── Bounded min-heap item ────────────────────────────────────────────────────

/// Heap entry ordered so that `BinaryHeap::peek` exposes the *weakest*
/// candidate: lowest score first, and among equal scores the latest
/// insertion — evicting it preserves earlier candidates on ties.
struct HeapItem<P> {
    score: f32,
    seq: usize,
    payload: P,
}

impl<P> PartialEq for HeapItem<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P> Eq for HeapItem<P> {}

impl<P> PartialOrd for HeapItem<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for HeapItem<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both fields: BinaryHeap is a max-heap, we want the
        // min-score (and, on ties, max-seq) element on top.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

// ── Top-K search ─────────────────────────────────────────────────────────────

/// Return the `k` candidates most similar to `query`, sorted descending by
/// cosine similarity. Output length is `min(k, candidate count)`.
pub fn top_k<P, V, I>(query: &[f32], candidates: I, k: usize) -> Vec<(P, f32)>
where
    V: AsRef<[f32]>,
    I: IntoIterator<Item = (P, V)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<HeapItem<P>> = BinaryHeap::with_capacity(k + 1);

    for (seq, (payload, vector)) in candidates.into_iter().enumerate() {
        let score = cosine_similarity(query, vector.as_ref());
        if heap.len() < k {
            heap.push(HeapItem { score, seq, payload });
        } else if let Some(weakest) = heap.peek() {
            // Replace only on strictly greater similarity — equal scores
            // keep the earlier candidate.
            if score > weakest.score {
                heap.pop();
                heap.push(HeapItem { score, seq, payload });
            }
        }
    }

    let mut items: Vec<HeapItem<P>> = heap.into_vec();
    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.seq.cmp(&b.seq))
    });
    items
        .into_iter()
        .map(|item| (item.payload, item.score))
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_self_similarity_is_one() {
        let v = vec![0.3, -0.7, 1.2, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_dims_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn top_k_sorted_descending() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            ("diagonal", vec![1.0, 1.0]),
            ("aligned", vec![2.0, 0.0]),
            ("orthogonal", vec![0.0, 1.0]),
            ("opposite", vec![-1.0, 0.0]),
        ];
        let results = top_k(&query, candidates, 4);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].0, "aligned");
        assert_eq!(results[1].0, "diagonal");
        assert_eq!(results[2].0, "orthogonal");
        assert_eq!(results[3].0, "opposite");
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn top_k_bounds_output_length() {
        let query = vec![1.0, 0.0];
        let candidates: Vec<(usize, Vec<f32>)> =
            (0..100).map(|i| (i, vec![i as f32, 1.0])).collect();
        assert_eq!(top_k(&query, candidates.clone(), 7).len(), 7);
        assert_eq!(top_k(&query, candidates, 500).len(), 100);
    }

    #[test]
    fn top_k_zero_k_is_empty() {
        let results = top_k::<&str, Vec<f32>, _>(&[1.0], vec![("a", vec![1.0])], 0);
        assert!(results.is_empty());
    }

    #[test]
    fn top_k_ties_keep_insertion_order() {
        let query = vec![1.0, 0.0];
        // All candidates identical — similarity ties across the board.
        let candidates = vec![
            ("first", vec![1.0, 0.0]),
            ("second", vec![1.0, 0.0]),
            ("third", vec![1.0, 0.0]),
        ];
        let results = top_k(&query, candidates, 2);
        assert_eq!(results[0].0, "first");
        assert_eq!(results[1].0, "second");
    }

    #[test]
    fn top_k_equal_score_does_not_evict_earlier() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            ("kept", vec![3.0, 0.0]),
            ("late_tie", vec![5.0, 0.0]), // same cosine as "kept"
        ];
        let results = top_k(&query, candidates, 1);
        assert_eq!(results[0].0, "kept");
    }
}
