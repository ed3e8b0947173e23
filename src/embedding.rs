//! Embedding generation with chunking, rate limiting, and retry.
//!
//! [`EmbeddingClient`] turns text into fixed-dimension f32 vectors by
//! calling an OpenAI-style embeddings endpoint. Every provider request
//! first claims a slot from the shared [`RateLimiter`]; transient failures
//! (429, 5xx, network errors) are retried with exponential backoff
//! (1s → 2s → 4s); other 4xx responses fail immediately.
//!
//! Inputs longer than the chunk token budget are split losslessly, each
//! chunk embedded, and the chunk vectors mean-pooled back into one vector
//! per input.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::split_text;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::ratelimit::RateLimiter;

pub struct EmbeddingClient {
    config: EmbeddingConfig,
    chunk_max_tokens: usize,
    /// Expected vector dimension; provider responses are validated
    /// against it so a misconfigured model fails loudly.
    dims: usize,
    limiter: Arc<RateLimiter>,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(
        embedding: &EmbeddingConfig,
        chunking: &ChunkingConfig,
        dims: usize,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(embedding.timeout_secs))
            .build()?;

        Ok(Self {
            config: embedding.clone(),
            chunk_max_tokens: chunking.max_tokens,
            dims,
            limiter,
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Embed a single query text into one vector.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("text to embed must not be empty");
        }

        let chunks = split_text(text, self.chunk_max_tokens);
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            vectors.extend(self.call_provider(batch).await?);
        }

        Ok(mean_pool(&vectors))
    }

    /// Embed a list of texts, returning one `Result` per input in order.
    ///
    /// The returned list is a sparse mapping: an entry fails only if its
    /// own provider calls exhausted retries. Callers decide whether a
    /// partial failure fails the enclosing job.
    pub async fn embed_each(&self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_query(text).await);
        }
        results
    }

    /// One provider request for a batch of chunk texts, with rate-limit
    /// acquisition and retry/backoff per attempt.
    async fn call_provider(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.config.is_enabled() {
            bail!("Embedding provider is disabled");
        }
        let model = self
            .config
            .model
            .as_ref()
            .context("embedding.model required")?;

        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();

        let body = serde_json::json!({
            "model": model,
            "input": inputs,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;

            let resp = self
                .client
                .post(&self.config.endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = parse_provider_response(&json, inputs.len(), self.dims)?;
                        return Ok(vectors);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "embedding provider error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embedding provider error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

/// Parse an OpenAI-style embeddings response.
///
/// `data[].embedding` must be a well-typed numeric array of the expected
/// dimension. Anything else (objects with numeric keys, mixed types,
/// truncated vectors) is a validation error, never coerced.
fn parse_provider_response(
    json: &serde_json::Value,
    expected_count: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .context("invalid embedding response: missing data array")?;

    if data.len() != expected_count {
        bail!(
            "invalid embedding response: expected {} embeddings, got {}",
            expected_count,
            data.len()
        );
    }

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .context("invalid embedding response: embedding is not an array")?;

        let mut vec = Vec::with_capacity(embedding.len());
        for v in embedding {
            let f = v
                .as_f64()
                .context("invalid embedding response: non-numeric element")?;
            vec.push(f as f32);
        }

        if vec.len() != dims {
            bail!(
                "invalid embedding response: dimension {} does not match expected {}",
                vec.len(),
                dims
            );
        }

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Average a set of equal-length vectors into one. A single vector is
/// returned unchanged.
fn mean_pool(vectors: &[Vec<f32>]) -> Vec<f32> {
    match vectors {
        [] => Vec::new(),
        [only] => only.clone(),
        many => {
            let dims = many[0].len();
            let mut out = vec![0.0f32; dims];
            for v in many {
                for (acc, x) in out.iter_mut().zip(v.iter()) {
                    *acc += x;
                }
            }
            let n = many.len() as f32;
            for acc in &mut out {
                *acc /= n;
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_client(endpoint: String, dims: usize, max_retries: u32) -> EmbeddingClient {
        let embedding = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            endpoint,
            batch_size: 64,
            max_retries,
            timeout_secs: 5,
        };
        let chunking = ChunkingConfig { max_tokens: 7000 };
        let limiter = Arc::new(RateLimiter::new(1000, Duration::from_secs(60)));
        EmbeddingClient::new(&embedding, &chunking, dims, limiter).unwrap()
    }

    #[test]
    fn test_parse_valid_response() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2, 0.3]},
                {"embedding": [0.4, 0.5, 0.6]},
            ]
        });
        let vecs = parse_provider_response(&json, 2, 3).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0].len(), 3);
    }

    #[test]
    fn test_parse_rejects_object_shaped_embedding() {
        let json = serde_json::json!({
            "data": [{"embedding": {"0": 0.1, "1": 0.2}}]
        });
        let err = parse_provider_response(&json, 1, 2).unwrap_err();
        assert!(err.to_string().contains("not an array"));
    }

    #[test]
    fn test_parse_rejects_wrong_dimension() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, 0.2]}]
        });
        assert!(parse_provider_response(&json, 1, 3).is_err());
    }

    #[test]
    fn test_parse_rejects_non_numeric_element() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, "oops"]}]
        });
        assert!(parse_provider_response(&json, 1, 2).is_err());
    }

    #[test]
    fn test_mean_pool() {
        let pooled = mean_pool(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(pooled, vec![0.5, 0.5]);

        let single = mean_pool(&[vec![3.0, 4.0]]);
        assert_eq!(single, vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_retries_transient_failure_then_succeeds() {
        let server = MockServer::start_async().await;

        let fail = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(500).body("upstream hiccup");
            })
            .await;

        // First attempt hits the 500 mock; after one deletion the retry
        // sees the success mock.
        let client = test_client(server.url("/v1/embeddings"), 2, 3);

        let handle = tokio::spawn(async move { client.embed_query("hello").await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        fail.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(serde_json::json!({"data": [{"embedding": [0.1, 0.2]}]}));
            })
            .await;

        let vec = handle.await.unwrap().unwrap();
        assert_eq!(vec, vec![0.1f32, 0.2]);
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(400).body("bad model");
            })
            .await;

        let client = test_client(server.url("/v1/embeddings"), 2, 3);
        let err = client.embed_query("hello").await.unwrap_err();
        assert!(err.to_string().contains("400"));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let client = test_client("http://127.0.0.1:1/unused".to_string(), 2, 0);
        assert!(client.embed_query("   ").await.is_err());
    }
}
