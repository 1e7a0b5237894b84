//! Wires C2/C3/C6/C7/C8/C9/C10 together into the query-side pipeline that
//! backs the `search_*`/`codebase_search`/`get_code_context` tool methods.
//! C4 (indexing) is driven directly from `Indexer`; this module owns only
//! the read path.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{QueryMetadata, SearchCache};
use crate::capabilities::embedding::EmbeddingKind;
use crate::capabilities::vector_index::Filter;
use crate::capabilities::{EmbeddingCapability, RerankCapability, VectorIndexCapability};
use crate::chunker::{Chunk, ChunkType};
use crate::config::Config;
use crate::context::{self, ContextOptions, ContextResult};
use crate::errors::CoreResult;
use crate::hybrid::{self, CombinedHit};
use crate::search_result::{self, HybridScore, SearchResult};
use crate::sparse;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub cache_hit: bool,
    pub reranked: bool,
    pub confidence: f32,
    pub alpha_used: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub score_threshold: f32,
    pub language: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub file_path: Option<String>,
    pub prefer_implementation: bool,
    pub enable_hybrid: bool,
}

/// Turns a ranked `CombinedHit` into the wire-level `SearchResult`.
fn build_result(hit: CombinedHit, reranked_score: Option<f32>) -> SearchResult {
    let snippet = search_result::build_snippet(&hit.chunk.content);
    let context = search_result::build_context(&hit.chunk);
    SearchResult {
        id: hit.chunk.id.clone(),
        score: hit.score,
        snippet,
        context,
        hybrid_score: Some(HybridScore {
            dense: hit.dense_score,
            sparse: hit.sparse_score,
            combined: hit.score,
        }),
        reranked_score,
        chunk: hit.chunk,
    }
}

fn filter_for(opts: &SearchOptions) -> Filter {
    let mut f = Filter::new();
    if let Some(lang) = &opts.language {
        f.push(("language".to_string(), serde_json::json!(lang)));
    }
    if let Some(ct) = &opts.chunk_type {
        f.push(("chunkType".to_string(), serde_json::json!(ct.as_str())));
    }
    if let Some(fp) = &opts.file_path {
        f.push(("filePath".to_string(), serde_json::json!(fp)));
    }
    if opts.prefer_implementation {
        f.push(("fileKind".to_string(), serde_json::json!("code")));
    }
    f
}

pub struct SearchEngine {
    embedding: Arc<dyn EmbeddingCapability>,
    vector_index: Arc<dyn VectorIndexCapability>,
    reranker: Arc<dyn RerankCapability>,
    cache: Arc<SearchCache>,
    config: Config,
}

impl SearchEngine {
    pub fn new(embedding: Arc<dyn EmbeddingCapability>, vector_index: Arc<dyn VectorIndexCapability>, reranker: Arc<dyn RerankCapability>, cache: Arc<SearchCache>, config: Config) -> Self {
        Self {
            embedding,
            vector_index,
            reranker,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    pub fn vector_index(&self) -> &dyn VectorIndexCapability {
        self.vector_index.as_ref()
    }

    /// Cache lookup precedes any remote call; hybrid combination preserves
    /// the union-sort contract; the reranker's output permutation fully
    /// determines final ordering when enabled.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> CoreResult<SearchResponse> {
        let meta = QueryMetadata {
            text: query.to_string(),
            language: opts.language.clone(),
            chunk_type: opts.chunk_type.map(|c| c.as_str().to_string()),
            file_path: opts.file_path.clone(),
            limit: opts.limit,
            threshold: Some((opts.score_threshold * 1000.0) as i64),
        };

        if let Some(cached) = self.cache.get(&meta) {
            debug!(query, "search cache hit");
            return Ok(SearchResponse {
                results: cached,
                metadata: SearchMetadata {
                    cache_hit: true,
                    reranked: false,
                    confidence: 1.0,
                    alpha_used: self.config.retrieval.hybrid_search_alpha,
                },
            });
        }

        let filter = filter_for(opts);
        let query_vector = self.embedding.embed(&[query.to_string()], EmbeddingKind::Query).await?;
        let dense = self.vector_index.search(&query_vector[0], opts.limit.max(1) * 3, opts.score_threshold, &filter).await?;

        let sparse_hits = if opts.enable_hybrid {
            let post_filter = |c: &Chunk| {
                opts.language.as_deref().map(|l| l == c.language).unwrap_or(true)
                    && opts.chunk_type.map(|ct| ct == c.chunk_type).unwrap_or(true)
                    && opts.file_path.as_deref().map(|f| f == c.file_path).unwrap_or(true)
                    && (!opts.prefer_implementation || c.metadata.file_kind == "code")
            };
            Some(
                sparse::search_sparse(
                    self.vector_index.as_ref(),
                    query,
                    opts.limit.max(1) * 3,
                    Duration::from_millis(self.config.retrieval.keyword_search_timeout_ms),
                    self.config.retrieval.keyword_search_max_chunks,
                    &vec![],
                    post_filter,
                )
                .await?,
            )
        } else {
            None
        };

        let combined: Vec<CombinedHit> = hybrid::combine(query, self.config.retrieval.hybrid_search_alpha, dense, sparse_hits);
        let alpha_used = hybrid::adaptive_alpha(self.config.retrieval.hybrid_search_alpha, query);

        let (mut ranked, reranked, confidence) = self.maybe_rerank(query, combined, opts.limit).await?;
        search_result::sort_by_rank(&mut ranked);

        self.cache.put(meta, ranked.clone());

        Ok(SearchResponse {
            results: ranked,
            metadata: SearchMetadata {
                cache_hit: false,
                reranked,
                confidence,
                alpha_used,
            },
        })
    }

    /// Builds a `SearchResult` per hit, optionally rerank-ordered. When the
    /// reranker actually ran (`outcome.reranked`), each result's
    /// `rerankedScore` is a monotonically-decreasing score derived from its
    /// rank position; otherwise `rerankedScore` stays `None` so callers can
    /// distinguish "reranked" from "passthrough".
    async fn maybe_rerank(&self, query: &str, combined: Vec<CombinedHit>, limit: usize) -> CoreResult<(Vec<SearchResult>, bool, f32)> {
        if !self.config.retrieval.enable_llm_reranking || combined.is_empty() {
            let results = combined.into_iter().take(limit).map(|h| build_result(h, None)).collect();
            return Ok((results, false, 1.0));
        }

        let texts: Vec<String> = combined.iter().map(|h| h.chunk.content.clone()).collect();
        let timeout = Duration::from_millis(self.config.retrieval.llm_reranker_timeout_ms);
        let outcome = self.reranker.rerank(query, &texts, limit, timeout).await?;

        let total = outcome.ranked_indices.len().max(1);
        let results = outcome
            .ranked_indices
            .iter()
            .enumerate()
            .filter_map(|(pos, &i)| {
                combined.get(i).cloned().map(|hit| {
                    let reranked_score = outcome.reranked.then(|| (total - pos) as f32 / total as f32);
                    build_result(hit, reranked_score)
                })
            })
            .collect();
        Ok((results, outcome.reranked, outcome.confidence))
    }

    pub async fn assemble_context(&self, query: &str, opts: &SearchOptions, max_tokens: usize) -> CoreResult<ContextResult> {
        let response = self.search(query, opts).await?;
        let candidates: Vec<(Chunk, f32)> = response.results.into_iter().map(|r| (r.chunk, r.score)).collect();
        let context_opts = ContextOptions {
            max_tokens,
            reserved_tokens: self.config.retrieval.context_reserved_tokens,
            chars_per_token: self.config.retrieval.context_chars_per_token,
            group_gap_lines: self.config.retrieval.context_group_gap_lines,
            boost_types: true,
            languages_cap: None,
            max_files_per_type: None,
            recently_modified_files: Default::default(),
            open_files: Default::default(),
        };
        Ok(context::assemble(candidates, &context_opts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SearchCache;
    use crate::capabilities::embedding::InMemoryFakeEmbedding;
    use crate::capabilities::rerank::NoopReranker;
    use crate::capabilities::vector_index::{Distance, InMemoryFakeVectorIndex, Point, VectorIndexCapability};
    use crate::chunker::{Chunk, ChunkMetadata};
    use std::time::Duration;

    fn chunk(id: &str, file_path: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: format!("fn {id}() {{ body of {id} }}"),
            file_path: file_path.to_string(),
            language: "rust".to_string(),
            start_line: 1,
            end_line: 3,
            chunk_type: ChunkType::Function,
            function_name: Some(id.to_string()),
            class_name: None,
            module_name: None,
            content_hash: "h".to_string(),
            metadata: ChunkMetadata {
                file_size: 10,
                last_modified: 1,
                extension: "rs".to_string(),
                relative_path: file_path.to_string(),
                is_test: false,
                complexity: 1,
                dependencies: vec![],
                exports: vec![],
                imports: vec![],
                file_kind: "code".to_string(),
            },
        }
    }

    async fn build_engine() -> SearchEngine {
        let dim = 4;
        let vector_index = Arc::new(InMemoryFakeVectorIndex::default());
        vector_index.ensure_collection(dim, Distance::Cosine).await.unwrap();
        for id in ["a", "b"] {
            let c = chunk(id, &format!("{id}.rs"));
            let vector = vec![1.0, 0.0, 0.0, 0.0];
            vector_index.upsert(vec![Point::from_chunk(&c, vector).unwrap()], true).await.unwrap();
        }
        SearchEngine::new(
            Arc::new(InMemoryFakeEmbedding::new(dim)),
            vector_index,
            Arc::new(NoopReranker),
            Arc::new(SearchCache::new(10, Duration::from_secs(60))),
            Config::default(),
        )
    }

    #[tokio::test]
    async fn search_results_carry_hybrid_score_and_no_reranked_score_without_reranking() {
        let engine = build_engine().await;
        let opts = SearchOptions {
            limit: 5,
            score_threshold: 0.0,
            ..Default::default()
        };
        let resp = engine.search("find a function", &opts).await.unwrap();
        assert!(!resp.results.is_empty());
        for r in &resp.results {
            let hs = r.hybrid_score.as_ref().expect("dense-only search still reports a hybrid score");
            assert_eq!(hs.combined, r.score);
            assert_eq!(hs.sparse, 0.0);
            assert!(r.reranked_score.is_none());
        }
        assert!(!resp.metadata.reranked);
    }

    #[tokio::test]
    async fn search_results_are_sorted_by_score_descending() {
        let engine = build_engine().await;
        let opts = SearchOptions {
            limit: 5,
            score_threshold: 0.0,
            ..Default::default()
        };
        let resp = engine.search("find a function", &opts).await.unwrap();
        let scores: Vec<f32> = resp.results.iter().map(|r| r.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(scores, sorted);
    }
}
