//! C4: orchestrates scan -> chunk -> embed -> upsert, and owns per-file
//! index identity (add/change/remove/reindex/clear).

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

use crate::capabilities::embedding::EmbeddingKind;
use crate::capabilities::vector_index::{Distance, Point};
use crate::capabilities::{EmbeddingCapability, VectorIndexCapability};
use crate::chunker::{self, Chunk};
use crate::config::Config;
use crate::errors::{CoreError, CoreResult, ErrorSeverity};
use crate::scanner::{self, ScanOptions};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub file_path: String,
    pub code: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub files_scanned: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub chunks_indexed: u64,
    pub errors: Vec<FileError>,
}

/// Last-seen (lastModified) per file, keyed by relative path, enabling
/// `indexDirectory`'s resumability without re-scrolling the vector index.
#[derive(Default)]
struct SeenFiles(RwLock<HashMap<String, u64>>);

impl SeenFiles {
    fn unchanged(&self, rel_path: &str, last_modified: u64) -> bool {
        self.0.read().expect("seen-files lock poisoned").get(rel_path) == Some(&last_modified)
    }

    fn record(&self, rel_path: &str, last_modified: u64) {
        self.0.write().expect("seen-files lock poisoned").insert(rel_path.to_string(), last_modified);
    }

    fn forget(&self, rel_path: &str) {
        self.0.write().expect("seen-files lock poisoned").remove(rel_path);
    }

    fn clear(&self) {
        self.0.write().expect("seen-files lock poisoned").clear();
    }
}

pub struct Indexer {
    repo_root: PathBuf,
    config: Config,
    embedding: Box<dyn EmbeddingCapability>,
    vector_index: Box<dyn VectorIndexCapability>,
    seen: SeenFiles,
    dimension_checked: RwLock<bool>,
}

fn last_modified_secs(path: &Path) -> CoreResult<u64> {
    let meta = std::fs::metadata(path).map_err(|e| CoreError::NotFound(format!("{}: {e}", path.display())))?;
    let modified = meta.modified().map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
    Ok(modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl Indexer {
    pub fn new(repo_root: PathBuf, config: Config, embedding: Box<dyn EmbeddingCapability>, vector_index: Box<dyn VectorIndexCapability>) -> Self {
        Self {
            repo_root,
            config,
            embedding,
            vector_index,
            seen: SeenFiles::default(),
            dimension_checked: RwLock::new(false),
        }
    }

    fn rel_path(&self, abs_path: &Path) -> String {
        abs_path.strip_prefix(&self.repo_root).unwrap_or(abs_path).to_string_lossy().replace('\\', "/")
    }

    async fn ensure_dimension_checked(&self) -> CoreResult<()> {
        let already = *self.dimension_checked.read().expect("lock poisoned");
        if already {
            return Ok(());
        }
        self.vector_index.ensure_collection(self.embedding.dimension(), Distance::Cosine).await?;
        self.vector_index.ensure_payload_indexes().await?;
        *self.dimension_checked.write().expect("lock poisoned") = true;
        Ok(())
    }

    /// Read, chunk (C1), embed (C2), upsert (C3). For a previously-indexed
    /// path this removes existing points for that file before upserting the
    /// fresh set, so the operation is atomic at file granularity: a failure
    /// between remove and upsert surfaces here, and a later `reindex_file`
    /// repairs it because `force` skips the unchanged-mtime shortcut.
    pub async fn index_file(&self, abs_path: &Path, force: bool) -> CoreResult<Vec<Chunk>> {
        let rel_path = self.rel_path(abs_path);
        let last_modified = last_modified_secs(abs_path)?;

        if !force && self.seen.unchanged(&rel_path, last_modified) {
            return Ok(vec![]);
        }

        let source = std::fs::read_to_string(abs_path).map_err(|e| CoreError::ParseFailed(format!("{rel_path}: {e}")))?;
        let file_size = source.len() as u64;
        let chunks = chunker::chunk_file(&self.repo_root, abs_path, &source, file_size, last_modified);

        self.ensure_dimension_checked().await?;

        self.vector_index.delete_by_filter("filePath", json!(rel_path)).await?;

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedding.embed(&texts, EmbeddingKind::Document).await?;
            if vectors.len() != chunks.len() {
                return Err(CoreError::ParseFailed("embedding count did not match chunk count".to_string()));
            }
            let points: Vec<Point> = chunks
                .iter()
                .zip(vectors.into_iter())
                .map(|(c, v)| Point::from_chunk(c, v))
                .collect::<CoreResult<Vec<_>>>()?;
            self.vector_index.upsert(points, true).await?;
        }

        self.seen.record(&rel_path, last_modified);
        Ok(chunks)
    }

    /// Same as `index_file` but forces the remove-first step regardless of
    /// whether `lastModified` changed.
    pub async fn reindex_file(&self, abs_path: &Path) -> CoreResult<Vec<Chunk>> {
        self.index_file(abs_path, true).await
    }

    pub async fn remove_file(&self, abs_path: &Path) -> CoreResult<()> {
        let rel_path = self.rel_path(abs_path);
        self.vector_index.delete_by_filter("filePath", json!(rel_path)).await?;
        self.seen.forget(&rel_path);
        Ok(())
    }

    pub async fn clear_index(&self) -> CoreResult<()> {
        self.vector_index.ensure_collection(self.embedding.dimension(), Distance::Cosine).await?;
        let mut cursor = None;
        loop {
            let page = self.vector_index.scroll(&vec![], 256, cursor).await?;
            if page.points.is_empty() {
                break;
            }
            let ids: Vec<String> = page.points.iter().map(|p| p.id.clone()).collect();
            self.vector_index.delete_by_ids(&ids).await?;
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        self.seen.clear();
        Ok(())
    }

    pub async fn count_indexed_chunks(&self) -> CoreResult<u64> {
        let mut count = 0u64;
        let mut cursor = None;
        loop {
            let page = self.vector_index.scroll(&vec![], 512, cursor).await?;
            count += page.points.len() as u64;
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(count)
    }

    /// Walk `path` under the configured include/exclude rules and index each
    /// eligible file; resumable because unchanged `(filePath, lastModified)`
    /// pairs are skipped inside `index_file`.
    pub async fn index_directory(&self, path: &Path) -> CoreResult<IndexStats> {
        let opts = ScanOptions {
            repo_root: self.repo_root.clone(),
            target: path.to_path_buf(),
            max_file_bytes: self.config.indexing.max_file_size,
            exclude_patterns: self.config.indexing.exclude_patterns.clone(),
            supported_extensions: self.config.indexing.supported_extensions.clone(),
        };
        let entries = scanner::scan_workspace(&opts).map_err(|e| CoreError::NotFound(e.to_string()))?;

        let mut stats = IndexStats {
            files_scanned: entries.len() as u64,
            ..Default::default()
        };

        for entry in &entries {
            match self.index_file(&entry.abs_path, false).await {
                Ok(chunks) if chunks.is_empty() => {
                    stats.files_skipped += 1;
                }
                Ok(chunks) => {
                    stats.files_indexed += 1;
                    stats.chunks_indexed += chunks.len() as u64;
                }
                Err(e) => {
                    warn!(file = %entry.rel_path.display(), error = %e, "failed to index file");
                    stats.errors.push(FileError {
                        file_path: entry.rel_path.to_string_lossy().to_string(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                        severity: e.severity(),
                    });
                    if matches!(e, CoreError::ExternalUnavailable(_)) {
                        error!("vector index connection failure, aborting indexDirectory");
                        return Err(e);
                    }
                }
            }
        }

        info!(
            scanned = stats.files_scanned,
            indexed = stats.files_indexed,
            chunks = stats.chunks_indexed,
            errors = stats.errors.len(),
            "indexDirectory complete"
        );
        Ok(stats)
    }

    pub async fn get_stats(&self) -> CoreResult<IndexStats> {
        let chunks_indexed = self.count_indexed_chunks().await?;
        Ok(IndexStats {
            files_scanned: self.seen.0.read().expect("lock poisoned").len() as u64,
            files_indexed: self.seen.0.read().expect("lock poisoned").len() as u64,
            files_skipped: 0,
            chunks_indexed,
            errors: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{InMemoryFakeEmbedding, InMemoryFakeVectorIndex};
    use std::fs;

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.indexing.voyage_api_key = "k".to_string();
        cfg
    }

    #[tokio::test]
    async fn index_directory_counts_files_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from("fn alpha() {\n");
        for i in 0..40 {
            body.push_str(&format!("    let x{i} = {i};\n"));
        }
        body.push_str("}\n");
        fs::write(dir.path().join("a.rs"), &body).unwrap();

        let embedding = Box::new(InMemoryFakeEmbedding::new(8));
        let vector_index = Box::new(InMemoryFakeVectorIndex::default());
        let indexer = Indexer::new(dir.path().to_path_buf(), test_config(), embedding, vector_index);

        let stats = indexer.index_directory(Path::new(".")).await.unwrap();
        assert_eq!(stats.files_scanned, 1);
        assert_eq!(stats.files_indexed, 1);
        assert!(stats.chunks_indexed > 0);
    }

    #[tokio::test]
    async fn reindexing_unchanged_file_is_skipped_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let body = "x".repeat(300);
        fs::write(dir.path().join("a.rs"), format!("fn alpha() {{ let y = \"{body}\"; }}")).unwrap();

        let embedding = Box::new(InMemoryFakeEmbedding::new(8));
        let vector_index = Box::new(InMemoryFakeVectorIndex::default());
        let indexer = Indexer::new(dir.path().to_path_buf(), test_config(), embedding, vector_index);

        let abs = dir.path().join("a.rs");
        let first = indexer.index_file(&abs, false).await.unwrap();
        assert!(!first.is_empty());
        let second = indexer.index_file(&abs, false).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn remove_file_clears_its_points() {
        let dir = tempfile::tempdir().unwrap();
        let body = "x".repeat(300);
        fs::write(dir.path().join("a.rs"), format!("fn alpha() {{ let y = \"{body}\"; }}")).unwrap();

        let embedding = Box::new(InMemoryFakeEmbedding::new(8));
        let vector_index = Box::new(InMemoryFakeVectorIndex::default());
        let indexer = Indexer::new(dir.path().to_path_buf(), test_config(), embedding, vector_index);

        let abs = dir.path().join("a.rs");
        indexer.index_file(&abs, false).await.unwrap();
        assert!(indexer.count_indexed_chunks().await.unwrap() > 0);
        indexer.remove_file(&abs).await.unwrap();
        assert_eq!(indexer.count_indexed_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_index_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let body = "x".repeat(300);
        fs::write(dir.path().join("a.rs"), format!("fn alpha() {{ let y = \"{body}\"; }}")).unwrap();
        fs::write(dir.path().join("b.rs"), format!("fn beta() {{ let y = \"{body}\"; }}")).unwrap();

        let embedding = Box::new(InMemoryFakeEmbedding::new(8));
        let vector_index = Box::new(InMemoryFakeVectorIndex::default());
        let indexer = Indexer::new(dir.path().to_path_buf(), test_config(), embedding, vector_index);

        indexer.index_directory(Path::new(".")).await.unwrap();
        assert!(indexer.count_indexed_chunks().await.unwrap() > 0);
        indexer.clear_index().await.unwrap();
        assert_eq!(indexer.count_indexed_chunks().await.unwrap(), 0);
    }
}
