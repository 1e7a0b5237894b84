//! C7: keyword occurrence scorer. Scrolls the vector index accumulating
//! points until a time or count budget is exhausted, scoring each by raw
//! substring-occurrence count rather than a normalized score (Open
//! Question a: this raw-count behavior is preserved deliberately).

use std::time::{Duration, Instant};

use crate::capabilities::vector_index::Filter;
use crate::capabilities::VectorIndexCapability;
use crate::chunker::Chunk;
use crate::errors::CoreResult;

const SCROLL_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct SparseHit {
    pub chunk: Chunk,
    pub score: u32,
}

fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect()
}

fn occurrence_score(content: &str, tokens: &[String]) -> u32 {
    let lower = content.to_lowercase();
    tokens.iter().map(|t| lower.matches(t.as_str()).count() as u32).sum()
}

/// Scrolls the full collection (optionally pre-filtered) scoring each point
/// by raw keyword occurrence count, bounded by whichever of `timeout` /
/// `max_chunks` is hit first. Post-scoring filters (language, chunkType,
/// filePath, code-only) are applied after scanning.
pub async fn search_sparse(
    vector_index: &dyn VectorIndexCapability,
    query: &str,
    limit: usize,
    timeout: Duration,
    max_chunks: usize,
    scroll_filter: &Filter,
    post_filter: impl Fn(&Chunk) -> bool,
) -> CoreResult<Vec<SparseHit>> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Ok(vec![]);
    }

    let started = Instant::now();
    let mut scanned = 0usize;
    let mut hits = Vec::new();
    let mut cursor = None;

    loop {
        if started.elapsed() >= timeout || scanned >= max_chunks {
            break;
        }
        let remaining = max_chunks.saturating_sub(scanned).min(SCROLL_PAGE_SIZE);
        if remaining == 0 {
            break;
        }
        let page = vector_index.scroll(scroll_filter, remaining, cursor).await?;
        if page.points.is_empty() {
            break;
        }
        for point in &page.points {
            scanned += 1;
            if scanned > max_chunks {
                break;
            }
            let Ok(chunk) = serde_json::from_value::<Chunk>(point.payload.clone()) else {
                continue;
            };
            if !post_filter(&chunk) {
                continue;
            }
            let score = occurrence_score(&chunk.content, &tokens);
            if score > 0 {
                hits.push(SparseHit { chunk, score });
            }
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(limit);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::vector_index::Point;
    use crate::capabilities::{Distance, InMemoryFakeVectorIndex, VectorIndexCapability};
    use crate::chunker::{ChunkMetadata, ChunkType};

    fn chunk(file_path: &str, content: &str) -> Chunk {
        Chunk {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
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

    #[tokio::test]
    async fn scores_by_raw_occurrence_count() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        let a = chunk("a.rs", "fn authenticate() { authenticate_user(); }");
        let b = chunk("b.rs", "fn other() { }");
        idx.upsert(
            vec![Point::from_chunk(&a, vec![0.0; 4]).unwrap(), Point::from_chunk(&b, vec![0.0; 4]).unwrap()],
            true,
        )
        .await
        .unwrap();

        let hits = search_sparse(&idx, "authenticate", 10, Duration::from_secs(5), 10_000, &vec![], |_| true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "a.rs");
        assert_eq!(hits[0].score, 2);
    }

    #[tokio::test]
    async fn max_chunks_bounds_the_scan() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        let points: Vec<Point> = (0..5)
            .map(|i| Point::from_chunk(&chunk(&format!("f{i}.rs"), "needle needle"), vec![0.0; 4]).unwrap())
            .collect();
        idx.upsert(points, true).await.unwrap();

        let hits = search_sparse(&idx, "needle", 10, Duration::from_secs(5), 2, &vec![], |_| true).await.unwrap();
        assert!(hits.len() <= 2);
    }

    #[tokio::test]
    async fn empty_query_yields_no_hits() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        let hits = search_sparse(&idx, "   ", 10, Duration::from_secs(5), 1000, &vec![], |_| true).await.unwrap();
        assert!(hits.is_empty());
    }
}
