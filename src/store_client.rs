//! HTTP client for the vector store service.
//!
//! Bulk writes are chunked into fixed-size sub-batches to bound request
//! size; every call is retried with exponential backoff on transient
//! failures. When a sub-batch fails after retries the whole bulk call
//! aborts and the error reports how many sub-batches had already
//! succeeded, so the caller can fail the enclosing job for redelivery.

use serde_json::json;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::models::{
    BuildIndexRequest, StoreHit, StoreSearchRequest, StoreSearchResponse, VectorRecord,
};
use crate::store::StoreError;

/// Outcome of a successful bulk add.
#[derive(Debug, Clone, Copy)]
pub struct BulkAddReport {
    pub sub_batches: usize,
    pub records_written: usize,
}

pub struct StoreClient {
    base_url: String,
    client: reqwest::Client,
    bulk_batch_size: usize,
    max_retries: u32,
}

impl StoreClient {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Fatal(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            bulk_batch_size: config.bulk_batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    /// Insert a single record via `POST /add`.
    pub async fn add(&self, record: &VectorRecord, upsert: bool) -> Result<(), StoreError> {
        let mut body = serde_json::to_value(record).map_err(|e| StoreError::Fatal(e.to_string()))?;
        body["upsert"] = json!(upsert);
        self.post_with_retry("/add", &body).await?;
        Ok(())
    }

    /// Insert records via `POST /bulk-add`, in sub-batches of the
    /// configured size (reference: 20).
    pub async fn bulk_add(
        &self,
        records: &[VectorRecord],
        upsert: bool,
    ) -> Result<BulkAddReport, StoreError> {
        let total_batches = records.len().div_ceil(self.bulk_batch_size);
        let mut sub_batches_ok = 0usize;
        let mut records_written = 0usize;

        for batch in records.chunks(self.bulk_batch_size) {
            let body = json!({ "records": batch, "upsert": upsert });

            if let Err(err) = self.post_with_retry("/bulk-add", &body).await {
                return Err(StoreError::Fatal(format!(
                    "bulk add aborted at sub-batch {}/{} ({} records written): {}",
                    sub_batches_ok + 1,
                    total_batches,
                    records_written,
                    err
                )));
            }

            sub_batches_ok += 1;
            records_written += batch.len();
        }

        Ok(BulkAddReport {
            sub_batches: sub_batches_ok,
            records_written,
        })
    }

    /// Text search; the store embeds the query itself.
    pub async fn search_text(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let req = StoreSearchRequest {
            query: Some(query.to_string()),
            query_embedding: None,
            limit: Some(limit),
        };
        self.search(&req).await
    }

    /// Search with a precomputed query embedding.
    pub async fn search_vector(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let req = StoreSearchRequest {
            query: None,
            query_embedding: Some(embedding.to_vec()),
            limit: Some(limit),
        };
        self.search(&req).await
    }

    async fn search(&self, req: &StoreSearchRequest) -> Result<Vec<StoreHit>, StoreError> {
        let body = serde_json::to_value(req).map_err(|e| StoreError::Fatal(e.to_string()))?;
        let response = self.post_with_retry("/search", &body).await?;
        let parsed: StoreSearchResponse = serde_json::from_value(response)
            .map_err(|e| StoreError::Fatal(format!("malformed search response: {}", e)))?;
        Ok(parsed.results)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let url = format!("{}/count", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
        json.get("count")
            .and_then(|c| c.as_i64())
            .ok_or_else(|| StoreError::Fatal("malformed count response".to_string()))
    }

    pub async fn build_index(&self, req: &BuildIndexRequest) -> Result<(), StoreError> {
        let body = serde_json::to_value(req).map_err(|e| StoreError::Fatal(e.to_string()))?;
        self.post_with_retry("/build-index", &body).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<(), StoreError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// POST with retry/backoff. 5xx and network errors retry up to the
    /// configured cap (1s → 2s → 4s); 4xx responses are validation
    /// errors and fail immediately.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err: Option<StoreError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| StoreError::Fatal(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    if status.is_server_error() {
                        last_err = Some(StoreError::Unavailable(format!(
                            "store error {}: {}",
                            status,
                            error_message(&body_text)
                        )));
                        continue;
                    }

                    // 4xx — client error, never retried
                    return Err(StoreError::Validation(format!(
                        "store rejected {}: {}",
                        path,
                        error_message(&body_text)
                    )));
                }
                Err(e) => {
                    last_err = Some(StoreError::Unavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| StoreError::Unavailable("store call failed after retries".into())))
    }
}

/// Pull the message out of an `{error: {code, message}}` body, falling
/// back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer, batch_size: usize) -> StoreClient {
        let config = StoreConfig {
            db_path: "/tmp/unused.sqlite".into(),
            base_url: server.base_url(),
            dims: 2,
            bulk_batch_size: batch_size,
            max_retries: 1,
            timeout_secs: 5,
        };
        StoreClient::new(&config).unwrap()
    }

    fn record(id: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            content_type: MediaKind::Image,
            title: None,
            embedding: vec![0.1, 0.2],
            searchable_text: None,
            content_hash: None,
            references: None,
            last_updated: 0,
        }
    }

    #[tokio::test]
    async fn test_bulk_add_sub_batches_of_twenty() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/bulk-add");
                then.status(200).json_body(serde_json::json!({"added": 0}));
            })
            .await;

        let client = client_for(&server, 20);
        let records: Vec<VectorRecord> = (0..45).map(|i| record(&format!("r{}", i))).collect();

        let report = client.bulk_add(&records, true).await.unwrap();
        assert_eq!(report.sub_batches, 3);
        assert_eq!(report.records_written, 45);
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn test_bulk_add_reports_progress_on_failure() {
        let server = MockServer::start_async().await;
        // Every call fails; with max_retries=1 the first sub-batch aborts
        // the bulk operation.
        server
            .mock_async(|when, then| {
                when.method(POST).path("/bulk-add");
                then.status(500).body("boom");
            })
            .await;

        let client = client_for(&server, 2);
        let records: Vec<VectorRecord> = (0..4).map(|i| record(&format!("r{}", i))).collect();

        let err = client.bulk_add(&records, true).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("sub-batch 1/2"), "unexpected error: {}", msg);
        assert!(msg.contains("0 records written"));
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/add");
                then.status(400).json_body(serde_json::json!({
                    "error": {"code": "bad_request", "message": "embedding dimension 3 does not match schema dimension 2"}
                }));
            })
            .await;

        let client = client_for(&server, 20);
        let err = client.add(&record("x"), false).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(err.to_string().contains("dimension"));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        let config = StoreConfig {
            db_path: "/tmp/unused.sqlite".into(),
            // Nothing listens here.
            base_url: "http://127.0.0.1:9".to_string(),
            dims: 2,
            bulk_batch_size: 20,
            max_retries: 0,
            timeout_secs: 1,
        };
        let client = StoreClient::new(&config).unwrap();
        let err = client.search_text("anything", 5).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
