//! C2: Embedding Capability. Produces dense vectors for strings; the
//! configured model name determines the dimension.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Document,
    Query,
}

impl EmbeddingKind {
    fn wire_value(self) -> &'static str {
        match self {
            EmbeddingKind::Document => "document",
            EmbeddingKind::Query => "query",
        }
    }
}

/// Fixed model -> dimension table: the configured model implies its dimension.
fn model_dimensions() -> &'static HashMap<&'static str, usize> {
    static TABLE: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("voyage-code-3", 1024),
            ("voyage-code-2", 1536),
            ("voyage-3", 1024),
            ("voyage-3-lite", 512),
        ])
    })
}

pub fn dimension_for_model(model: &str) -> Option<usize> {
    model_dimensions().get(model).copied()
}

#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    /// Batched embedding call. The capability asserts `dimension()` matches
    /// every returned vector before returning, per I2; a transport failure
    /// propagates to the caller rather than half-indexing.
    async fn embed(&self, texts: &[String], kind: EmbeddingKind) -> CoreResult<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
    fn model(&self) -> &str;
}

/// Remote capability speaking the Voyage-style embeddings wire format:
/// POST `{input, model, input_type, truncation:true, output_dimension:D}`
/// -> `{data:[{embedding:[...]}]}`.
pub struct VoyageEmbeddingCapability {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

impl VoyageEmbeddingCapability {
    pub fn new(api_key: String, model: String, batch_size: usize) -> CoreResult<Self> {
        let dimension = dimension_for_model(&model)
            .ok_or_else(|| CoreError::ConfigInvalid(format!("unknown embeddingModel `{model}`")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_base: "https://api.voyageai.com/v1/embeddings".to_string(),
            api_key,
            model,
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    async fn embed_batch(&self, batch: &[String], kind: EmbeddingKind) -> CoreResult<Vec<Vec<f32>>> {
        let body = json!({
            "input": batch,
            "model": self.model,
            "input_type": kind.wire_value(),
            "truncation": true,
            "output_dimension": self.dimension,
        });

        let mut attempt = 0u32;
        loop {
            let resp = self
                .client
                .post(&self.api_base)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) if r.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= 3 {
                        return Err(CoreError::RateLimited("embedding provider rate limit exceeded".to_string()));
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                    continue;
                }
                Ok(r) if r.status().is_success() => {
                    let parsed: EmbeddingResponse = r
                        .json()
                        .await
                        .map_err(|e| CoreError::ExternalUnavailable(format!("malformed embedding response: {e}")))?;
                    let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
                    for v in &vectors {
                        if v.len() != self.dimension {
                            return Err(CoreError::DimensionMismatch {
                                expected: self.dimension,
                                got: v.len(),
                            });
                        }
                    }
                    return Ok(vectors);
                }
                Ok(r) => {
                    return Err(CoreError::ExternalUnavailable(format!("embedding provider returned {}", r.status())));
                }
                Err(e) if attempt < 2 => {
                    attempt += 1;
                    warn!(error = %e, attempt, "embedding request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                    continue;
                }
                Err(e) => return Err(CoreError::ExternalUnavailable(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl EmbeddingCapability for VoyageEmbeddingCapability {
    async fn embed(&self, texts: &[String], kind: EmbeddingKind) -> CoreResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch_len = batch.len(), "embedding batch");
            out.extend(self.embed_batch(batch, kind).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Deterministic in-memory fake for tests: hashes each string into a fixed
/// dimension so identical input always yields an identical vector.
pub struct InMemoryFakeEmbedding {
    dimension: usize,
    model: String,
}

impl InMemoryFakeEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "fake-embedding".to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingCapability for InMemoryFakeEmbedding {
    async fn embed(&self, texts: &[String], _kind: EmbeddingKind) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| fake_vector(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn fake_vector(text: &str, dimension: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let mut out = Vec::with_capacity(dimension);
    let mut seed = Sha256::digest(text.as_bytes()).to_vec();
    while out.len() < dimension {
        seed = Sha256::digest(&seed).to_vec();
        for byte in &seed {
            if out.len() == dimension {
                break;
            }
            out.push((*byte as f32 / 255.0) * 2.0 - 1.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_embedding_is_deterministic_and_dimensioned() {
        let cap = InMemoryFakeEmbedding::new(32);
        let a = cap.embed(&["hello".to_string()], EmbeddingKind::Document).await.unwrap();
        let b = cap.embed(&["hello".to_string()], EmbeddingKind::Document).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 32);
    }

    #[test]
    fn known_models_have_a_dimension() {
        assert_eq!(dimension_for_model("voyage-code-3"), Some(1024));
        assert_eq!(dimension_for_model("not-a-model"), None);
    }
}
