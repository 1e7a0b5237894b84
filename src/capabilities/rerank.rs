//! C9: Re-ranker. Given a query and an ordered list of candidate texts,
//! returns a re-ordering (and a confidence) or passes through unchanged.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::errors::CoreResult;

#[derive(Debug, Clone)]
pub struct RerankOutcome {
    /// Indices into the input `candidates` slice, best-first.
    pub ranked_indices: Vec<usize>,
    pub confidence: f32,
    pub reranked: bool,
}

impl RerankOutcome {
    fn identity(len: usize, confidence: f32, reranked: bool) -> Self {
        Self {
            ranked_indices: (0..len).collect(),
            confidence,
            reranked,
        }
    }
}

#[async_trait]
pub trait RerankCapability: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[String], max_results: usize, timeout: Duration) -> CoreResult<RerankOutcome>;
}

/// Disabled-state passthrough (`enableLlmReranking: false`).
pub struct NoopReranker;

#[async_trait]
impl RerankCapability for NoopReranker {
    async fn rerank(&self, _query: &str, candidates: &[String], max_results: usize, _timeout: Duration) -> CoreResult<RerankOutcome> {
        let mut outcome = RerankOutcome::identity(candidates.len(), 1.0, false);
        outcome.ranked_indices.truncate(max_results.max(1).min(candidates.len().max(1)));
        Ok(outcome)
    }
}

/// OpenAI-chat-compatible reranker: builds a single prompt asking the model
/// to return `{"rankedIndices":[...]}` over the candidate list, enforces the
/// caller's timeout, and falls back to input order with confidence 0.5 on
/// timeout or malformed output (never fails the overall search).
pub struct RemoteReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    project_id: Option<String>,
}

impl RemoteReranker {
    pub fn new(base_url: String, api_key: String, model: String, project_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            project_id,
        }
    }

    fn build_prompt(query: &str, candidates: &[String]) -> String {
        let mut prompt = format!(
            "Query: {query}\n\nRank the following candidates from most to least relevant. \
             Respond with ONLY a JSON object of the form {{\"rankedIndices\": [..]}} listing \
             every candidate index exactly once, most relevant first.\n\n"
        );
        for (i, c) in candidates.iter().enumerate() {
            prompt.push_str(&format!("[{i}] {}\n", truncate(c, 400)));
        }
        prompt
    }

    fn parse_ranked_indices(text: &str, candidate_count: usize) -> Option<Vec<usize>> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
        let raw = value.get("rankedIndices")?.as_array()?;
        let mut indices: Vec<usize> = raw.iter().filter_map(|v| v.as_u64()).map(|v| v as usize).filter(|&i| i < candidate_count).collect();
        indices.dedup();
        if indices.is_empty() {
            return None;
        }
        for i in 0..candidate_count {
            if !indices.contains(&i) {
                indices.push(i);
            }
        }
        Some(indices)
    }

    async fn call(&self, query: &str, candidates: &[String]) -> CoreResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": Self::build_prompt(query, candidates) }],
            "temperature": 0.0,
        });
        let mut req = self.client.post(format!("{}/chat/completions", self.base_url)).bearer_auth(&self.api_key).json(&body);
        if let Some(project) = &self.project_id {
            req = req.header("OpenAI-Project", project);
        }
        let resp = req.send().await.map_err(|e| crate::errors::CoreError::ExternalUnavailable(e.to_string()))?;
        let value: Value = resp.json().await.map_err(|e| crate::errors::CoreError::ExternalUnavailable(e.to_string()))?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| crate::errors::CoreError::ParseFailed("reranker response missing message content".to_string()))
    }
}

#[async_trait]
impl RerankCapability for RemoteReranker {
    async fn rerank(&self, query: &str, candidates: &[String], max_results: usize, timeout: Duration) -> CoreResult<RerankOutcome> {
        if candidates.is_empty() {
            return Ok(RerankOutcome::identity(0, 1.0, false));
        }
        let fallback = || RerankOutcome::identity(candidates.len(), 0.5, false);

        let result = tokio::time::timeout(timeout, self.call(query, candidates)).await;
        let outcome = match result {
            Err(_) => {
                warn!("reranker timed out, falling back to input order");
                fallback()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "reranker call failed, falling back to input order");
                fallback()
            }
            Ok(Ok(text)) => match Self::parse_ranked_indices(&text, candidates.len()) {
                Some(indices) => RerankOutcome {
                    ranked_indices: indices,
                    confidence: 0.9,
                    reranked: true,
                },
                None => {
                    warn!("reranker returned unparsable output, falling back to input order");
                    fallback()
                }
            },
        };
        let mut outcome = outcome;
        outcome.ranked_indices.truncate(max_results.max(1).min(candidates.len()));
        Ok(outcome)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "…"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reranker_preserves_input_order() {
        let cap = NoopReranker;
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outcome = cap.rerank("q", &candidates, 10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(outcome.ranked_indices, vec![0, 1, 2]);
        assert!(!outcome.reranked);
    }

    #[tokio::test]
    async fn noop_reranker_truncates_to_max_results() {
        let cap = NoopReranker;
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outcome = cap.rerank("q", &candidates, 2, Duration::from_millis(100)).await.unwrap();
        assert_eq!(outcome.ranked_indices, vec![0, 1]);
    }

    #[test]
    fn parse_ranked_indices_fills_in_missing_with_remainder() {
        let parsed = RemoteReranker::parse_ranked_indices("noise {\"rankedIndices\": [2, 0]} trailing", 3).unwrap();
        assert_eq!(parsed, vec![2, 0, 1]);
    }

    #[test]
    fn parse_ranked_indices_rejects_malformed_json() {
        assert!(RemoteReranker::parse_ranked_indices("not json at all", 3).is_none());
    }
}
