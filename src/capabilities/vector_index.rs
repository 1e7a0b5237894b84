//! C3: Vector Index Capability. Upsert/delete/search/scroll points carrying
//! a dense vector and a payload; supports payload-equality filters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

use crate::chunker::Chunk;
use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
}

/// Conjunction of field-equality predicates.
pub type Filter = Vec<(String, Value)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

impl Point {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> CoreResult<Point> {
        let mut payload = serde_json::to_value(chunk).map_err(|e| CoreError::ParseFailed(e.to_string()))?;
        if let Value::Object(ref mut map) = payload {
            map.remove("id");
        }
        Ok(Point {
            id: chunk.id.clone(),
            vector,
            payload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub point: Point,
    pub score: f32,
}

pub struct ScrollPage {
    pub points: Vec<Point>,
    pub next_cursor: Option<usize>,
}

fn payload_matches(payload: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(field, value)| payload.get(field).map(|v| v == value).unwrap_or(false))
}

#[async_trait]
pub trait VectorIndexCapability: Send + Sync {
    async fn ensure_collection(&self, dimension: usize, distance: Distance) -> CoreResult<()>;
    async fn ensure_payload_indexes(&self) -> CoreResult<()>;
    async fn upsert(&self, points: Vec<Point>, wait: bool) -> CoreResult<()>;
    async fn delete_by_filter(&self, field: &str, value: Value) -> CoreResult<u64>;
    async fn delete_by_ids(&self, ids: &[String]) -> CoreResult<u64>;
    async fn search(&self, vector: &[f32], limit: usize, score_threshold: f32, filter: &Filter) -> CoreResult<Vec<SearchHit>>;
    async fn scroll(&self, filter: &Filter, page_size: usize, cursor: Option<usize>) -> CoreResult<ScrollPage>;
    fn dimension(&self) -> Option<usize>;
}

const PAYLOAD_INDEX_FIELDS: &[&str] = &["chunkType", "language", "filePath", "fileKind"];

/// REST-backed capability speaking a Qdrant-shaped wire protocol:
/// `PUT /collections/{name}`, `PUT /collections/{name}/index`,
/// `PUT /collections/{name}/points`, `POST /collections/{name}/points/search`,
/// `POST /collections/{name}/points/scroll`, `POST /collections/{name}/points/delete`.
pub struct QdrantVectorIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    latencies: RwLock<Vec<Duration>>,
    dimension: RwLock<Option<usize>>,
}

const LATENCY_RING_CAP: usize = 256;

impl QdrantVectorIndex {
    pub fn new(base_url: String, api_key: Option<String>, collection: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            collection,
            latencies: RwLock::new(Vec::new()),
            dimension: RwLock::new(None),
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        let mut ring = self.latencies.write().expect("latency ring lock poisoned");
        ring.push(elapsed);
        if ring.len() > LATENCY_RING_CAP {
            ring.remove(0);
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    pub fn observability_latencies(&self) -> Vec<Duration> {
        self.latencies.read().expect("latency ring lock poisoned").clone()
    }

    /// `None` when the collection does not exist yet; `Some(size)` from the
    /// reported vector config otherwise.
    async fn fetch_existing_dimension(&self) -> CoreResult<Option<usize>> {
        let resp = self.request(self.client.get(self.url(""))).send().await.map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(CoreError::ExternalUnavailable(format!("getCollection failed: {}", resp.status())));
        }
        #[derive(Deserialize)]
        struct VectorsConfig {
            size: usize,
        }
        #[derive(Deserialize)]
        struct Params {
            vectors: VectorsConfig,
        }
        #[derive(Deserialize)]
        struct ConfigBody {
            params: Params,
        }
        #[derive(Deserialize)]
        struct CollectionInfo {
            config: ConfigBody,
        }
        #[derive(Deserialize)]
        struct RawResponse {
            result: CollectionInfo,
        }
        let parsed: RawResponse = resp.json().await.map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        Ok(Some(parsed.result.config.params.vectors.size))
    }

    async fn delete_collection(&self) -> CoreResult<()> {
        let resp = self.request(self.client.delete(self.url(""))).send().await.map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(CoreError::ExternalUnavailable(format!("deleteCollection failed: {}", resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndexCapability for QdrantVectorIndex {
    async fn ensure_collection(&self, dimension: usize, distance: Distance) -> CoreResult<()> {
        let started = Instant::now();

        if let Some(existing) = self.fetch_existing_dimension().await? {
            if existing == dimension {
                *self.dimension.write().expect("dimension lock poisoned") = Some(dimension);
                self.record_latency(started.elapsed());
                return Ok(());
            }
            info!(collection = %self.collection, existing, dimension, "dimension changed, recreating collection");
            self.delete_collection().await?;
        }

        let distance_name = match distance {
            Distance::Cosine => "Cosine",
        };
        let body = json!({ "vectors": { "size": dimension, "distance": distance_name } });
        let resp = self
            .request(self.client.put(self.url("")))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        self.record_latency(started.elapsed());
        if !resp.status().is_success() {
            return Err(CoreError::ExternalUnavailable(format!("ensureCollection failed: {}", resp.status())));
        }
        *self.dimension.write().expect("dimension lock poisoned") = Some(dimension);
        info!(collection = %self.collection, dimension, "collection ensured");
        Ok(())
    }

    async fn ensure_payload_indexes(&self) -> CoreResult<()> {
        for field in PAYLOAD_INDEX_FIELDS {
            let body = json!({ "field_name": field, "field_schema": "keyword" });
            let resp = self
                .request(self.client.put(self.url("/index")))
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
            if !resp.status().is_success() && resp.status().as_u16() != 409 {
                return Err(CoreError::ExternalUnavailable(format!(
                    "ensurePayloadIndexes({field}) failed: {}",
                    resp.status()
                )));
            }
        }
        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>, wait: bool) -> CoreResult<()> {
        if let Some(dim) = self.dimension() {
            for p in &points {
                if p.vector.len() != dim {
                    return Err(CoreError::DimensionMismatch { expected: dim, got: p.vector.len() });
                }
            }
        }
        for batch in points.chunks(256) {
            let body = json!({ "points": batch });
            let resp = self
                .request(self.client.put(self.url(&format!("/points?wait={wait}"))))
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(CoreError::ExternalUnavailable(format!("upsert failed: {}", resp.status())));
            }
        }
        Ok(())
    }

    async fn delete_by_filter(&self, field: &str, value: Value) -> CoreResult<u64> {
        let body = json!({ "filter": { "must": [{ "key": field, "match": { "value": value } }] } });
        let resp = self
            .request(self.client.post(self.url("/points/delete")))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CoreError::ExternalUnavailable(format!("deleteByFilter failed: {}", resp.status())));
        }
        Ok(0)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> CoreResult<u64> {
        let body = json!({ "points": ids });
        let resp = self
            .request(self.client.post(self.url("/points/delete")))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CoreError::ExternalUnavailable(format!("deleteByIds failed: {}", resp.status())));
        }
        Ok(ids.len() as u64)
    }

    async fn search(&self, vector: &[f32], limit: usize, score_threshold: f32, filter: &Filter) -> CoreResult<Vec<SearchHit>> {
        let started = Instant::now();
        let must: Vec<Value> = filter
            .iter()
            .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
            .collect();
        let body = json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
            "filter": { "must": must },
        });
        let resp = self
            .request(self.client.post(self.url("/points/search")))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        self.record_latency(started.elapsed());
        if !resp.status().is_success() {
            return Err(CoreError::ExternalUnavailable(format!("search failed: {}", resp.status())));
        }
        #[derive(Deserialize)]
        struct RawHit {
            id: Value,
            score: f32,
            payload: Value,
        }
        #[derive(Deserialize)]
        struct RawResponse {
            result: Vec<RawHit>,
        }
        let parsed: RawResponse = resp.json().await.map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        Ok(parsed
            .result
            .into_iter()
            .map(|h| SearchHit {
                point: Point {
                    id: h.id.as_str().unwrap_or_default().to_string(),
                    vector: vec![],
                    payload: h.payload,
                },
                score: h.score,
            })
            .collect())
    }

    async fn scroll(&self, filter: &Filter, page_size: usize, cursor: Option<usize>) -> CoreResult<ScrollPage> {
        let must: Vec<Value> = filter
            .iter()
            .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
            .collect();
        let mut body = json!({
            "limit": page_size,
            "with_payload": true,
            "filter": { "must": must },
        });
        if let Some(c) = cursor {
            body["offset"] = json!(c);
        }
        let resp = self
            .request(self.client.post(self.url("/points/scroll")))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CoreError::ExternalUnavailable(format!("scroll failed: {}", resp.status())));
        }
        #[derive(Deserialize)]
        struct RawPoint {
            id: Value,
            payload: Value,
        }
        #[derive(Deserialize)]
        struct RawResult {
            points: Vec<RawPoint>,
            next_page_offset: Option<usize>,
        }
        #[derive(Deserialize)]
        struct RawResponse {
            result: RawResult,
        }
        let parsed: RawResponse = resp.json().await.map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
        Ok(ScrollPage {
            points: parsed
                .result
                .points
                .into_iter()
                .map(|p| Point {
                    id: p.id.as_str().unwrap_or_default().to_string(),
                    vector: vec![],
                    payload: p.payload,
                })
                .collect(),
            next_cursor: parsed.result.next_page_offset,
        })
    }

    fn dimension(&self) -> Option<usize> {
        *self.dimension.read().expect("dimension lock poisoned")
    }
}

/// Brute-force in-memory fake used by tests and by `in-memory-fake` capability
/// wiring: exact-equality filters, cosine similarity over a `Vec<Point>`.
pub struct InMemoryFakeVectorIndex {
    points: RwLock<HashMap<String, Point>>,
    dimension: RwLock<Option<usize>>,
}

impl Default for InMemoryFakeVectorIndex {
    fn default() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            dimension: RwLock::new(None),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorIndexCapability for InMemoryFakeVectorIndex {
    async fn ensure_collection(&self, dimension: usize, _distance: Distance) -> CoreResult<()> {
        let mut current = self.dimension.write().expect("lock poisoned");
        if *current != Some(dimension) {
            self.points.write().expect("lock poisoned").clear();
            *current = Some(dimension);
        }
        Ok(())
    }

    async fn ensure_payload_indexes(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<Point>, _wait: bool) -> CoreResult<()> {
        let dim = *self.dimension.read().expect("lock poisoned");
        if let Some(dim) = dim {
            for p in &points {
                if p.vector.len() != dim {
                    return Err(CoreError::DimensionMismatch {
                        expected: dim,
                        got: p.vector.len(),
                    });
                }
            }
        }
        let mut store = self.points.write().expect("lock poisoned");
        for p in points {
            store.insert(p.id.clone(), p);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, field: &str, value: Value) -> CoreResult<u64> {
        let mut store = self.points.write().expect("lock poisoned");
        let before = store.len();
        store.retain(|_, p| !payload_matches(&p.payload, &vec![(field.to_string(), value.clone())]));
        Ok((before - store.len()) as u64)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> CoreResult<u64> {
        let mut store = self.points.write().expect("lock poisoned");
        let mut count = 0u64;
        for id in ids {
            if store.remove(id).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn search(&self, vector: &[f32], limit: usize, score_threshold: f32, filter: &Filter) -> CoreResult<Vec<SearchHit>> {
        let store = self.points.read().expect("lock poisoned");
        let mut hits: Vec<SearchHit> = store
            .values()
            .filter(|p| payload_matches(&p.payload, filter))
            .map(|p| SearchHit {
                point: p.clone(),
                score: cosine(vector, &p.vector),
            })
            .filter(|h| h.score >= score_threshold)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(&self, filter: &Filter, page_size: usize, cursor: Option<usize>) -> CoreResult<ScrollPage> {
        let store = self.points.read().expect("lock poisoned");
        let mut matching: Vec<&Point> = store.values().filter(|p| payload_matches(&p.payload, filter)).collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        let start = cursor.unwrap_or(0);
        let end = (start + page_size).min(matching.len());
        let points = matching[start.min(matching.len())..end].iter().map(|p| (*p).clone()).collect();
        let next_cursor = if end < matching.len() { Some(end) } else { None };
        Ok(ScrollPage { points, next_cursor })
    }

    fn dimension(&self) -> Option<usize> {
        *self.dimension.read().expect("lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>, file_path: &str) -> Point {
        Point {
            id: id.to_string(),
            vector,
            payload: json!({ "filePath": file_path }),
        }
    }

    #[tokio::test]
    async fn ensure_collection_twice_with_same_dimension_is_noop() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        idx.upsert(vec![point("a", vec![1.0, 0.0, 0.0, 0.0], "a.rs")], false).await.unwrap();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        assert_eq!(idx.search(&[1.0, 0.0, 0.0, 0.0], 10, 0.0, &vec![]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_collection_with_new_dimension_recreates_and_drops_data() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        idx.upsert(vec![point("a", vec![1.0, 0.0, 0.0, 0.0], "a.rs")], false).await.unwrap();
        idx.ensure_collection(8, Distance::Cosine).await.unwrap();
        assert_eq!(idx.search(&[1.0; 8], 10, 0.0, &vec![]).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_vectors() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(4, Distance::Cosine).await.unwrap();
        let err = idx.upsert(vec![point("a", vec![1.0, 0.0], "a.rs")], false).await.unwrap_err();
        assert_eq!(err.code(), "dimension_mismatch");
    }

    #[tokio::test]
    async fn delete_by_filter_removes_points_for_a_file() {
        let idx = InMemoryFakeVectorIndex::default();
        idx.ensure_collection(2, Distance::Cosine).await.unwrap();
        idx.upsert(vec![point("a", vec![1.0, 0.0], "a.rs"), point("b", vec![0.0, 1.0], "b.rs")], false)
            .await
            .unwrap();
        idx.delete_by_filter("filePath", json!("a.rs")).await.unwrap();
        let remaining = idx.scroll(&vec![], 100, None).await.unwrap();
        assert_eq!(remaining.points.len(), 1);
        assert_eq!(remaining.points[0].id, "b");
    }
}
