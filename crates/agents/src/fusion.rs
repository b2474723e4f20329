//! Score fusion - combines vector-similarity and graph-proximity rankings
//!
//! Each input ranking is min-max normalized independently over its own
//! candidate set, then combined as a weighted sum. Ties are broken by raw
//! vector score, then lexicographic id, so output order is deterministic
//! for any input.

use std::collections::HashMap;

/// One fused candidate with its raw per-signal components
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: String,
    /// Weighted sum of the normalized signals
    pub score: f32,
    /// Raw vector-similarity score, if present in that ranking
    pub vector_score: Option<f32>,
    /// Raw graph-proximity score, if present in that ranking
    pub graph_score: Option<f32>,
}

/// Fuse two rankings into one ordered, deduplicated candidate list.
///
/// A candidate absent from one ranking receives 0 for that term. Empty
/// inputs produce an empty output. The result is truncated to `top_k`.
pub fn fuse(
    vector_ranking: &[(String, f32)],
    graph_ranking: &[(String, f32)],
    vector_weight: f32,
    graph_weight: f32,
    top_k: usize,
) -> Vec<FusedCandidate> {
    let vector_best = best_per_id(vector_ranking);
    let graph_best = best_per_id(graph_ranking);

    let vector_norm = min_max_normalize(&vector_best);
    let graph_norm = min_max_normalize(&graph_best);

    let mut candidates: Vec<FusedCandidate> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (id, _) in vector_best.iter().chain(graph_best.iter()) {
        if seen.contains_key(id.as_str()) {
            continue;
        }

        let vector_term = vector_norm.get(id.as_str()).copied().unwrap_or(0.0);
        let graph_term = graph_norm.get(id.as_str()).copied().unwrap_or(0.0);

        candidates.push(FusedCandidate {
            id: id.clone(),
            score: vector_weight * vector_term + graph_weight * graph_term,
            vector_score: vector_best.iter().find(|(v, _)| v == id).map(|(_, s)| *s),
            graph_score: graph_best.iter().find(|(v, _)| v == id).map(|(_, s)| *s),
        });
        seen.insert(id.as_str(), candidates.len());
    }

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| {
                // Tie-break (a): higher raw vector score first
                let a_vec = a.vector_score.unwrap_or(f32::NEG_INFINITY);
                let b_vec = b.vector_score.unwrap_or(f32::NEG_INFINITY);
                b_vec.total_cmp(&a_vec)
            })
            // Tie-break (b): lexicographic id
            .then_with(|| a.id.cmp(&b.id))
    });

    candidates.truncate(top_k);
    candidates
}

/// Deduplicate a ranking by id, keeping the best score per id.
/// Preserves first-occurrence order for deterministic iteration.
fn best_per_id(ranking: &[(String, f32)]) -> Vec<(String, f32)> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<&str, f32> = HashMap::new();

    for (id, score) in ranking {
        match best.get_mut(id.as_str()) {
            Some(existing) => {
                if *score > *existing {
                    *existing = *score;
                }
            }
            None => {
                best.insert(id.as_str(), *score);
                order.push(id.clone());
            }
        }
    }

    order
        .into_iter()
        .map(|id| {
            let score = best[id.as_str()];
            (id, score)
        })
        .collect()
}

/// Min-max normalize scores to [0, 1] over the candidate set present in
/// the ranking. A degenerate range (single element, or all scores equal)
/// normalizes to 1.0 to avoid division by zero.
fn min_max_normalize(ranking: &[(String, f32)]) -> HashMap<&str, f32> {
    let mut normalized = HashMap::with_capacity(ranking.len());
    if ranking.is_empty() {
        return normalized;
    }

    let min = ranking.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = ranking
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    for (id, score) in ranking {
        let value = if range > 0.0 { (score - min) / range } else { 1.0 };
        normalized.insert(id.as_str(), value);
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking(pairs: &[(&str, f32)]) -> Vec<(String, f32)> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[test]
    fn test_empty_inputs_yield_empty_output() {
        let fused = fuse(&[], &[], 0.5, 0.5, 10);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_tie_broken_by_raw_vector_score() {
        // vector [(e1,0.9),(e2,0.5)], graph [(e1,0.3),(e3,0.9)]
        // normalized vector: e1=1.0, e2=0.0; graph: e1=0.0, e3=1.0
        // fused at (0.5,0.5): e1=0.5, e2=0.0, e3=0.5
        let vector = ranking(&[("e1", 0.9), ("e2", 0.5)]);
        let graph = ranking(&[("e1", 0.3), ("e3", 0.9)]);

        let fused = fuse(&vector, &graph, 0.5, 0.5, 10);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].id, "e1");
        assert!((fused[0].score - 0.5).abs() < 1e-6);
        assert_eq!(fused[1].id, "e3");
        assert!((fused[1].score - 0.5).abs() < 1e-6);
        assert_eq!(fused[2].id, "e2");
        assert!((fused[2].score - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_fusion_at_full_vector_weight_preserves_order() {
        let vector = ranking(&[("a", 0.9), ("b", 0.7), ("c", 0.2)]);

        let fused = fuse(&vector, &vector, 1.0, 0.0, 10);

        let ids: Vec<&str> = fused.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_single_element_ranking_normalizes_to_one() {
        let vector = ranking(&[("only", 42.0)]);
        let fused = fuse(&vector, &[], 0.6, 0.4, 10);

        assert_eq!(fused.len(), 1);
        // 0.6 * 1.0 + 0.4 * 0.0
        assert!((fused[0].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_monotonic_in_weights() {
        let vector = ranking(&[("x", 0.8), ("y", 0.2)]);
        let graph = ranking(&[("x", 0.5), ("z", 0.9)]);

        let score_at = |w_v: f32| {
            fuse(&vector, &graph, w_v, 1.0 - w_v, 10)
                .into_iter()
                .find(|c| c.id == "x")
                .unwrap()
                .score
        };

        // x has vector norm 1.0 and graph norm 0.0; raising the vector
        // weight must not decrease its fused score
        let mut previous = score_at(0.0);
        for step in 1..=10 {
            let current = score_at(step as f32 / 10.0);
            assert!(current >= previous - 1e-6);
            previous = current;
        }
    }

    #[test]
    fn test_dedup_keeps_best_score_per_ranking() {
        let vector = ranking(&[("dup", 0.3), ("dup", 0.9), ("other", 0.6)]);
        let fused = fuse(&vector, &[], 1.0, 0.0, 10);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "dup");
        assert_eq!(fused[0].vector_score, Some(0.9));
    }

    #[test]
    fn test_truncation_to_top_k() {
        let vector = ranking(&[("a", 0.9), ("b", 0.8), ("c", 0.7), ("d", 0.6)]);
        let fused = fuse(&vector, &[], 1.0, 0.0, 2);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[1].id, "b");
    }

    #[test]
    fn test_final_tie_break_is_lexicographic() {
        // Identical scores in both rankings; absent from graph entirely
        let vector = ranking(&[("beta", 0.5), ("alpha", 0.5)]);
        let fused = fuse(&vector, &[], 1.0, 0.0, 10);

        assert_eq!(fused[0].id, "alpha");
        assert_eq!(fused[1].id, "beta");
    }
}
