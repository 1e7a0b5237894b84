//! The wire-level `SearchResult` record: a chunk plus its ranking
//! provenance (dense/sparse/combined and, when reranking ran, rerankedScore).
//! Lives in its own module so both the cache (C6) and the query engine can
//! depend on it without a cycle.

use serde::Serialize;

use crate::chunker::Chunk;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridScore {
    pub dense: f32,
    pub sparse: f32,
    pub combined: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub chunk: Chunk,
    pub snippet: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_score: Option<HybridScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranked_score: Option<f32>,
}

/// `chunk.content`'s first 5 lines, with a trailing ellipsis if more remain.
pub fn build_snippet(content: &str) -> String {
    let mut lines = content.lines();
    let head: Vec<&str> = lines.by_ref().take(5).collect();
    let mut snippet = head.join("\n");
    if lines.next().is_some() {
        snippet.push_str("\n...");
    }
    snippet
}

/// Display string identifying where a chunk lives, e.g. `src/lib.rs:10-42`.
pub fn build_context(chunk: &Chunk) -> String {
    format!("{}:{}-{}", chunk.file_path, chunk.start_line, chunk.end_line)
}

/// I6: sort by `score` descending, ties broken by (`rerankedScore` desc,
/// `id` asc) for determinism.
pub fn sort_by_rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.reranked_score.partial_cmp(&a.reranked_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_after_five_lines() {
        let content = (0..8).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let snippet = build_snippet(&content);
        assert_eq!(snippet.lines().count(), 6);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn snippet_is_unchanged_when_five_lines_or_fewer() {
        let content = "line 0\nline 1";
        assert_eq!(build_snippet(content), content);
    }

    #[test]
    fn sort_breaks_ties_by_reranked_score_then_id() {
        fn result(id: &str, score: f32, reranked: Option<f32>) -> SearchResult {
            SearchResult {
                id: id.to_string(),
                score,
                chunk: crate::chunker::Chunk {
                    id: id.to_string(),
                    content: "x".repeat(100),
                    file_path: "a.rs".to_string(),
                    language: "rust".to_string(),
                    start_line: 1,
                    end_line: 1,
                    chunk_type: crate::chunker::ChunkType::Generic,
                    function_name: None,
                    class_name: None,
                    module_name: None,
                    content_hash: "h".to_string(),
                    metadata: crate::chunker::ChunkMetadata {
                        file_size: 1,
                        last_modified: 1,
                        extension: "rs".to_string(),
                        relative_path: "a.rs".to_string(),
                        is_test: false,
                        complexity: 1,
                        dependencies: vec![],
                        exports: vec![],
                        imports: vec![],
                        file_kind: "code".to_string(),
                    },
                },
                snippet: String::new(),
                context: String::new(),
                hybrid_score: None,
                reranked_score: reranked,
            }
        }

        let mut results = vec![result("z", 0.5, Some(0.5)), result("a", 0.5, Some(0.9)), result("b", 0.9, None)];
        sort_by_rank(&mut results);
        assert_eq!(results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["b", "a", "z"]);
    }
}
