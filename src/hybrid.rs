//! C8: combines dense and sparse result lists with adaptive alpha weighting.

use std::collections::HashMap;

use crate::capabilities::vector_index::SearchHit;
use crate::chunker::Chunk;
use crate::sparse::SparseHit;

const SEMANTIC_PHRASES: &[&str] = &["how to", "explain", "implement", "pattern", "example"];

#[derive(Debug, Clone)]
pub struct CombinedHit {
    pub chunk: Chunk,
    pub score: f32,
    pub dense_score: f32,
    pub sparse_score: f32,
}

fn looks_semantic(query: &str) -> bool {
    let lower = query.to_lowercase();
    SEMANTIC_PHRASES.iter().any(|p| lower.contains(p))
}

/// camelCase / snake_case / PascalCase / `name()` / dotted-path shaped query.
fn looks_identifier_shaped(query: &str) -> bool {
    let q = query.trim();
    if q.contains(' ') || q.is_empty() {
        return false;
    }
    let has_call = q.ends_with("()");
    let has_snake = q.contains('_');
    let has_dotted = q.contains('.') && !q.contains(' ');
    let has_camel_or_pascal = q.chars().any(|c| c.is_uppercase()) && q.chars().next().map(|c| c.is_alphabetic()).unwrap_or(false) && q.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '(' || c == ')' || c == '.');
    has_call || has_snake || has_dotted || has_camel_or_pascal
}

/// Adaptive alpha: base config alpha, +0.1 for semantic-looking queries
/// (cap 1.0), -0.2 for identifier-shaped queries (floor 0.0).
pub fn adaptive_alpha(base_alpha: f32, query: &str) -> f32 {
    let mut alpha = base_alpha;
    if looks_semantic(query) {
        alpha = (alpha + 0.1).min(1.0);
    }
    if looks_identifier_shaped(query) {
        alpha = (alpha - 0.2).max(0.0);
    }
    alpha
}

fn normalize(scores: &HashMap<String, f32>) -> HashMap<String, f32> {
    let max = scores.values().cloned().fold(0.0f32, f32::max).max(0.01);
    scores.iter().map(|(k, v)| (k.clone(), v / max)).collect()
}

/// Combine dense results (always present) with optional sparse results.
/// Each list is max-normalized independently (floor 0.01), then every id in
/// the union gets `alpha*dense + (1-alpha)*sparse` using 0 for the missing
/// side. Passes dense through unchanged when sparse is absent.
pub fn combine(query: &str, base_alpha: f32, dense: Vec<SearchHit>, sparse: Option<Vec<SparseHit>>) -> Vec<CombinedHit> {
    let Some(sparse) = sparse else {
        return dense
            .into_iter()
            .filter_map(|hit| {
                serde_json::from_value::<Chunk>(hit.point.payload).ok().map(|chunk| CombinedHit {
                    chunk,
                    score: hit.score,
                    dense_score: hit.score,
                    sparse_score: 0.0,
                })
            })
            .collect();
    };

    let alpha = adaptive_alpha(base_alpha, query);

    let mut dense_chunks: HashMap<String, Chunk> = HashMap::new();
    let mut dense_scores: HashMap<String, f32> = HashMap::new();
    for hit in dense {
        if let Ok(chunk) = serde_json::from_value::<Chunk>(hit.point.payload) {
            dense_scores.insert(chunk.id.clone(), hit.score);
            dense_chunks.insert(chunk.id.clone(), chunk);
        }
    }

    let mut sparse_chunks: HashMap<String, Chunk> = HashMap::new();
    let mut sparse_scores: HashMap<String, f32> = HashMap::new();
    for hit in sparse {
        sparse_scores.insert(hit.chunk.id.clone(), hit.score as f32);
        sparse_chunks.insert(hit.chunk.id.clone(), hit.chunk);
    }

    let dense_norm = normalize(&dense_scores);
    let sparse_norm = normalize(&sparse_scores);

    let mut ids: Vec<String> = dense_norm.keys().chain(sparse_norm.keys()).cloned().collect();
    ids.sort();
    ids.dedup();

    let mut out: Vec<CombinedHit> = ids
        .into_iter()
        .filter_map(|id| {
            let chunk = dense_chunks.get(&id).or_else(|| sparse_chunks.get(&id))?.clone();
            let d = *dense_norm.get(&id).unwrap_or(&0.0);
            let s = *sparse_norm.get(&id).unwrap_or(&0.0);
            Some(CombinedHit {
                chunk,
                score: alpha * d + (1.0 - alpha) * s,
                dense_score: d,
                sparse_score: s,
            })
        })
        .collect();

    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_query_raises_alpha() {
        assert!(adaptive_alpha(0.7, "explain how the cache works") > 0.7);
    }

    #[test]
    fn identifier_shaped_query_lowers_alpha() {
        assert!(adaptive_alpha(0.7, "get_user_by_id") < 0.7);
    }

    #[test]
    fn plain_query_keeps_base_alpha() {
        assert_eq!(adaptive_alpha(0.7, "cache eviction policy"), 0.7);
    }

    #[test]
    fn alpha_is_clamped_to_bounds() {
        assert_eq!(adaptive_alpha(0.95, "explain how to implement a pattern"), 1.0);
        assert_eq!(adaptive_alpha(0.1, "snake_case_name()"), 0.0);
    }
}
