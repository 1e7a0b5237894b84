use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{CoreError, CoreResult};

/// Indexing-time configuration: embedding/vector-DB endpoints, chunk sizing,
/// file discovery. Mirrors the configuration enumeration in the external
/// interfaces section of the design document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Required. Overridable by the `VOYAGE_API_KEY` environment variable.
    pub voyage_api_key: String,
    pub qdrant_url: String,
    /// Overridable by the `QDRANT_API_KEY` environment variable.
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,
    pub embedding_model: String,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_file_size: u64,
    pub exclude_patterns: Vec<String>,
    pub supported_extensions: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            voyage_api_key: String::new(),
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            collection_name: "codebase".to_string(),
            embedding_model: "voyage-code-3".to_string(),
            batch_size: 100,
            chunk_size: 800,
            chunk_overlap: 100,
            max_file_size: 1024 * 1024,
            exclude_patterns: default_exclude_patterns(),
            supported_extensions: default_supported_extensions(),
        }
    }
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/.cortexsearch/**",
        "**/*.lock",
        "**/*.min.js",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_supported_extensions() -> Vec<String> {
    ["rs", "ts", "tsx", "js", "jsx", "py", "md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Retrieval-time tuning: hybrid weighting, re-ranker, cache, context budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub hybrid_search_alpha: f32,
    pub enable_llm_reranking: bool,
    pub llm_reranker_model: String,
    /// Overridable by the `RERANKER_API_KEY` environment variable.
    pub llm_reranker_api_key: Option<String>,
    pub llm_reranker_base_url: Option<String>,
    pub llm_reranker_project_id: Option<String>,
    pub llm_reranker_timeout_ms: u64,
    pub keyword_search_timeout_ms: u64,
    pub keyword_search_max_chunks: usize,
    pub search_cache_ttl_secs: u64,
    pub search_cache_max_size: usize,
    pub context_window_size: usize,
    pub context_reserved_tokens: usize,
    pub context_chars_per_token: usize,
    pub context_group_gap_lines: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_search_alpha: 0.7,
            enable_llm_reranking: false,
            llm_reranker_model: "gpt-4o-mini".to_string(),
            llm_reranker_api_key: None,
            llm_reranker_base_url: None,
            llm_reranker_project_id: None,
            llm_reranker_timeout_ms: 25_000,
            keyword_search_timeout_ms: 10_000,
            keyword_search_max_chunks: 20_000,
            search_cache_ttl_secs: 300,
            search_cache_max_size: 500,
            context_window_size: 32_000,
            context_reserved_tokens: 2_000,
            context_chars_per_token: 4,
            context_group_gap_lines: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub queue_concurrency: usize,
    pub auto_restart: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 300,
            queue_concurrency: 1,
            auto_restart: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub watcher: WatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

impl Config {
    /// Load from `<repo_root>/.cortexsearch.json`, apply environment-variable
    /// secret overrides, then validate. Unlike a best-effort CLI config
    /// loader that silently falls back to defaults, missing-required /
    /// out-of-range values are fatal here (`CoreError::ConfigInvalid`):
    /// a misconfigured indexer silently corrupts the index rather than
    /// just producing a worse context slice.
    pub fn load(repo_root: &Path) -> CoreResult<Config> {
        let path = repo_root.join(".cortexsearch.json");
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Config>(&text)
                .map_err(|e| CoreError::ConfigInvalid(format!("{}: {e}", path.display())))?,
            Err(_) => Config::default(),
        };

        if let Ok(key) = std::env::var("VOYAGE_API_KEY") {
            cfg.indexing.voyage_api_key = key;
        }
        if let Ok(key) = std::env::var("QDRANT_API_KEY") {
            cfg.indexing.qdrant_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("RERANKER_API_KEY") {
            cfg.retrieval.llm_reranker_api_key = Some(key);
        }

        if let Some(base) = cfg.retrieval.llm_reranker_base_url.as_ref() {
            cfg.retrieval.llm_reranker_base_url = Some(normalize_base_url(base));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.indexing.voyage_api_key.trim().is_empty() {
            return Err(CoreError::ConfigInvalid(
                "voyageApiKey is required (set .cortexsearch.json or VOYAGE_API_KEY)".to_string(),
            ));
        }
        if !(100..=1000).contains(&self.indexing.chunk_size) {
            return Err(CoreError::ConfigInvalid(format!(
                "chunkSize must be in 100..=1000, got {}",
                self.indexing.chunk_size
            )));
        }
        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            return Err(CoreError::ConfigInvalid(format!(
                "chunkOverlap ({}) must be < chunkSize ({})",
                self.indexing.chunk_overlap, self.indexing.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_search_alpha) {
            return Err(CoreError::ConfigInvalid(format!(
                "hybridSearchAlpha must be in 0..=1, got {}",
                self.retrieval.hybrid_search_alpha
            )));
        }
        if self.retrieval.llm_reranker_timeout_ms < 5_000 {
            return Err(CoreError::ConfigInvalid(format!(
                "llmRerankerTimeoutMs must be >= 5000, got {}",
                self.retrieval.llm_reranker_timeout_ms
            )));
        }
        if let (Some(base), Some(project)) = (
            self.retrieval.llm_reranker_base_url.as_ref(),
            self.retrieval.llm_reranker_project_id.as_ref(),
        ) {
            // The normalized form always ends in exactly one `/v1`; a base URL
            // that already carries a conflicting path segment plus a project
            // id can't be reconciled — reject rather than guess which wins.
            if base.matches("/v1").count() > 1 && !project.is_empty() {
                return Err(CoreError::ConfigInvalid(
                    "llmRerankerBaseUrl already contains a path incompatible with llmRerankerProjectId".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requires_voyage_key() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn chunk_overlap_must_be_smaller_than_chunk_size() {
        let mut cfg = Config::default();
        cfg.indexing.voyage_api_key = "k".to_string();
        cfg.indexing.chunk_overlap = cfg.indexing.chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn normalizes_base_url_to_single_v1_suffix() {
        assert_eq!(normalize_base_url("https://api.example.com"), "https://api.example.com/v1");
        assert_eq!(normalize_base_url("https://api.example.com/v1"), "https://api.example.com/v1");
        assert_eq!(normalize_base_url("https://api.example.com/v1/"), "https://api.example.com/v1");
    }

    #[test]
    fn valid_config_passes() {
        let mut cfg = Config::default();
        cfg.indexing.voyage_api_key = "k".to_string();
        assert!(cfg.validate().is_ok());
    }
}
