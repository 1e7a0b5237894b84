//! C6: fingerprint-keyed LRU search cache with TTL expiry and
//! file/language invalidation.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::search_result::SearchResult;

const MAX_CACHEABLE_RESULTS: usize = 100;
const MIN_QUERY_LEN: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub text: String,
    pub language: Option<String>,
    pub chunk_type: Option<String>,
    pub file_path: Option<String>,
    pub limit: usize,
    pub threshold: Option<i64>,
}

struct Entry {
    results: Vec<SearchResult>,
    metadata: QueryMetadata,
    created_at: Instant,
}

/// Normalized 128-bit fingerprint of the cacheable query dimensions.
fn fingerprint(meta: &QueryMetadata) -> u128 {
    let key = format!(
        "{}|{}|{}|{}|{}|{}",
        meta.text.trim().to_lowercase(),
        meta.language.as_deref().unwrap_or(""),
        meta.chunk_type.as_deref().unwrap_or(""),
        meta.file_path.as_deref().unwrap_or(""),
        meta.limit,
        meta.threshold.map(|t| t.to_string()).unwrap_or_default(),
    );
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(bytes)
}

/// Skip caching when the query is too short, results are empty or too many,
/// or a `filePath` filter makes the query effectively one-off.
pub fn is_cacheable(meta: &QueryMetadata, result_count: usize) -> bool {
    meta.text.trim().chars().count() >= MIN_QUERY_LEN && result_count > 0 && result_count <= MAX_CACHEABLE_RESULTS && meta.file_path.is_none()
}

pub struct SearchCache {
    store: Mutex<LruCache<u128, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SearchCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            store: Mutex::new(LruCache::new(NonZeroUsize::new(max_size.max(1)).unwrap())),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, meta: &QueryMetadata) -> Option<Vec<SearchResult>> {
        let key = fingerprint(meta);
        let mut store = self.store.lock().expect("cache lock poisoned");
        if let Some(entry) = store.get(&key) {
            if entry.created_at.elapsed() > self.ttl {
                store.pop(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.results.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, meta: QueryMetadata, results: Vec<SearchResult>) {
        if !is_cacheable(&meta, results.len()) {
            return;
        }
        let key = fingerprint(&meta);
        let mut store = self.store.lock().expect("cache lock poisoned");
        store.put(
            key,
            Entry {
                results,
                metadata: meta,
                created_at: Instant::now(),
            },
        );
    }

    /// Evicts entries whose metadata names `path` or whose cached result
    /// list contains a chunk from `path`.
    pub fn invalidate_file(&self, path: &str) {
        let mut store = self.store.lock().expect("cache lock poisoned");
        let stale: Vec<u128> = store
            .iter()
            .filter(|(_, e)| e.metadata.file_path.as_deref() == Some(path) || e.results.iter().any(|r| r.chunk.file_path == path))
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            store.pop(&key);
        }
    }

    pub fn invalidate_language(&self, language: &str) {
        let mut store = self.store.lock().expect("cache lock poisoned");
        let stale: Vec<u128> = store.iter().filter(|(_, e)| e.metadata.language.as_deref() == Some(language)).map(|(k, _)| *k).collect();
        for key in stale {
            store.pop(&key);
        }
    }

    /// Evicts all entries and resets hit/miss counters (Open Question b:
    /// the simpler, single consistent behavior — clearing the cache also
    /// clears its statistics).
    pub fn clear(&self) {
        self.store.lock().expect("cache lock poisoned").clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Removes every TTL-expired entry regardless of recency; meant to be
    /// invoked from a periodic sweep task alongside lazy per-get expiry.
    pub fn sweep_expired(&self) {
        let mut store = self.store.lock().expect("cache lock poisoned");
        let stale: Vec<u128> = store.iter().filter(|(_, e)| e.created_at.elapsed() > self.ttl).map(|(k, _)| *k).collect();
        for key in stale {
            store.pop(&key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock().expect("cache lock poisoned");
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            size: store.len(),
            hit_rate: if hits + misses == 0 { 0.0 } else { hits as f64 / (hits + misses) as f64 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunk, ChunkMetadata, ChunkType};

    fn meta(text: &str, file_path: Option<&str>) -> QueryMetadata {
        QueryMetadata {
            text: text.to_string(),
            language: None,
            chunk_type: None,
            file_path: file_path.map(|s| s.to_string()),
            limit: 10,
            threshold: None,
        }
    }

    fn chunk(file_path: &str) -> Chunk {
        Chunk {
            id: "id".to_string(),
            content: "fn f() {}".to_string(),
            file_path: file_path.to_string(),
            language: "rust".to_string(),
            start_line: 1,
            end_line: 1,
            chunk_type: ChunkType::Function,
            function_name: None,
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

    fn search_result(file_path: &str) -> SearchResult {
        let c = chunk(file_path);
        SearchResult {
            id: c.id.clone(),
            score: 1.0,
            snippet: crate::search_result::build_snippet(&c.content),
            context: crate::search_result::build_context(&c),
            chunk: c,
            hybrid_score: None,
            reranked_score: None,
        }
    }

    #[test]
    fn short_queries_are_never_cached() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        cache.put(meta("ab", None), vec![search_result("a.rs")]);
        assert!(cache.get(&meta("ab", None)).is_none());
    }

    #[test]
    fn queries_with_file_path_filter_are_not_cached() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        cache.put(meta("auth flow", Some("a.rs")), vec![search_result("a.rs")]);
        assert!(cache.get(&meta("auth flow", Some("a.rs"))).is_none());
    }

    #[test]
    fn repeat_query_hits_cache() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        cache.put(meta("auth flow", None), vec![search_result("a.rs")]);
        assert!(cache.get(&meta("auth flow", None)).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn invalidate_file_evicts_entries_naming_or_containing_it() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        cache.put(meta("auth flow", None), vec![search_result("a.rs")]);
        assert!(cache.get(&meta("auth flow", None)).is_some());
        cache.invalidate_file("a.rs");
        assert!(cache.get(&meta("auth flow", None)).is_none());
    }

    #[test]
    fn expired_entries_are_lazily_evicted() {
        let cache = SearchCache::new(10, Duration::from_millis(1));
        cache.put(meta("auth flow", None), vec![search_result("a.rs")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&meta("auth flow", None)).is_none());
    }

    #[test]
    fn clear_resets_counters() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        cache.put(meta("auth flow", None), vec![search_result("a.rs")]);
        cache.get(&meta("auth flow", None));
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
    }
}
