//! SQLite-backed vector record storage.
//!
//! The store enforces a fixed embedding dimension on every write, keeps
//! exactly one live row per record id, and answers nearest-neighbor
//! queries by brute-force cosine distance over the stored vectors.
//!
//! Vector encoding helpers:
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//! - [`cosine_similarity`] — similarity between two vectors

use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::models::{BuildIndexRequest, MediaKind, StoreHit, VectorRecord};

/// Error taxonomy for store operations.
///
/// Callers branch on the variant: validation errors are never retried,
/// unavailability is transient and retryable, fatal errors are surfaced
/// immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input (wrong vector dimension, empty query, bad payload).
    #[error("validation error: {0}")]
    Validation(String),
    /// The backend cannot be reached; eligible for retry.
    #[error("search backend unavailable: {0}")]
    Unavailable(String),
    /// Permanent storage failure (corrupted table, schema mismatch).
    #[error("store error: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Fatal(other.to_string()),
        }
    }
}

/// Persistence and nearest-neighbor search over [`VectorRecord`]s.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    dims: usize,
}

impl VectorStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Create the schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_records (
                id TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                title TEXT,
                embedding BLOB NOT NULL,
                searchable_text TEXT,
                content_hash TEXT,
                references_json TEXT,
                last_updated INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vector_records_type ON vector_records(content_type)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                column_name TEXT PRIMARY KEY,
                metric TEXT NOT NULL,
                partitions INTEGER NOT NULL,
                built_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn validate(&self, record: &VectorRecord) -> Result<(), StoreError> {
        if record.id.trim().is_empty() {
            return Err(StoreError::Validation("record id must not be empty".into()));
        }
        if record.embedding.len() != self.dims {
            return Err(StoreError::Validation(format!(
                "embedding dimension {} does not match schema dimension {}",
                record.embedding.len(),
                self.dims
            )));
        }
        Ok(())
    }

    /// Insert a single record. With `upsert`, any existing row with the
    /// same id is removed first, inside one transaction.
    pub async fn add(&self, record: &VectorRecord, upsert: bool) -> Result<(), StoreError> {
        self.bulk_add(std::slice::from_ref(record), upsert).await
    }

    /// Insert multiple records atomically. All records are validated
    /// before anything is written; a dimension mismatch rejects the whole
    /// call without touching the table.
    pub async fn bulk_add(&self, records: &[VectorRecord], upsert: bool) -> Result<(), StoreError> {
        for record in records {
            self.validate(record)?;
        }

        let mut tx = self.pool.begin().await?;

        for record in records {
            if upsert {
                sqlx::query("DELETE FROM vector_records WHERE id = ?")
                    .bind(&record.id)
                    .execute(&mut *tx)
                    .await?;
            }

            let references_json = record
                .references
                .as_ref()
                .map(|v| v.to_string());

            sqlx::query(
                r#"
                INSERT INTO vector_records
                    (id, content_type, title, embedding, searchable_text, content_hash, references_json, last_updated)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(record.content_type.as_str())
            .bind(&record.title)
            .bind(vec_to_blob(&record.embedding))
            .bind(&record.searchable_text)
            .bind(&record.content_hash)
            .bind(references_json)
            .bind(record.last_updated)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                // Duplicate primary key on a plain add is a client error.
                sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Validation(
                    format!("record {} already exists (use upsert)", record.id),
                ),
                other => StoreError::from(other),
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Nearest-neighbor search: up to `limit` rows ordered by ascending
    /// cosine distance. The query vector must match the schema dimension.
    pub async fn search(
        &self,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        if query_vec.len() != self.dims {
            return Err(StoreError::Validation(format!(
                "query embedding dimension {} does not match schema dimension {}",
                query_vec.len(),
                self.dims
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT id, content_type, title, embedding, searchable_text, references_json
            FROM vector_records
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<StoreHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let distance = 1.0 - f64::from(cosine_similarity(query_vec, &vec));

                let content_type: String = row.get("content_type");
                let references_json: Option<String> = row.get("references_json");

                StoreHit {
                    id: row.get("id"),
                    content_type: MediaKind::parse(&content_type).unwrap_or(MediaKind::Text),
                    title: row.get("title"),
                    distance,
                    searchable_text: row.get("searchable_text"),
                    references: references_json
                        .and_then(|s| serde_json::from_str(&s).ok()),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);

        Ok(hits)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Record (or replace) the index configuration for the vector column.
    /// Idempotent: repeated calls replace the prior entry.
    pub async fn build_index(&self, req: &BuildIndexRequest) -> Result<(), StoreError> {
        match req.metric.as_str() {
            "cosine" | "l2" | "dot" => {}
            other => {
                return Err(StoreError::Validation(format!(
                    "unknown index metric: {}",
                    other
                )))
            }
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO index_meta (column_name, metric, partitions, built_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(column_name) DO UPDATE SET
                metric = excluded.metric,
                partitions = excluded.partitions,
                built_at = excluded.built_at
            "#,
        )
        .bind(&req.column)
        .bind(&req.metric)
        .bind(i64::from(req.partitions))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Returns `0.0` for empty or
/// mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            content_type: MediaKind::Audio,
            title: Some(format!("title-{}", id)),
            embedding,
            searchable_text: Some("some text".to_string()),
            content_hash: None,
            references: None,
            last_updated: 1700000000,
        }
    }

    async fn open_store(dims: usize) -> VectorStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = VectorStore::new(pool, dims);
        store.migrate().await.unwrap();
        store
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = open_store(4).await;
        let err = store.add(&record("a1", vec![0.1, 0.2]), false).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_id() {
        let store = open_store(2).await;
        store
            .add(&record("a1", vec![1.0, 0.0]), true)
            .await
            .unwrap();
        store
            .add(&record("a1", vec![0.0, 1.0]), true)
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        // The replacement row won.
        let hits = store.search(&[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn test_plain_add_rejects_duplicate_id() {
        let store = open_store(2).await;
        store
            .add(&record("a1", vec![1.0, 0.0]), false)
            .await
            .unwrap();
        let err = store.add(&record("a1", vec![1.0, 0.0]), false).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bulk_add_atomic_on_bad_record() {
        let store = open_store(2).await;
        let records = vec![
            record("a1", vec![1.0, 0.0]),
            record("a2", vec![0.5]), // wrong dimension
        ];
        let err = store.bulk_add(&records, true).await;
        assert!(matches!(err, Err(StoreError::Validation(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let store = open_store(2).await;
        store
            .bulk_add(
                &[
                    record("far", vec![0.0, 1.0]),
                    record("near", vec![1.0, 0.05]),
                    record("exact", vec![1.0, 0.0]),
                ],
                true,
            )
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "exact");
        assert_eq!(hits[1].id, "near");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_build_index_idempotent() {
        let store = open_store(2).await;
        let req = BuildIndexRequest::default();
        store.build_index(&req).await.unwrap();
        store.build_index(&req).await.unwrap();

        let bad = BuildIndexRequest {
            metric: "hamming".to_string(),
            ..BuildIndexRequest::default()
        };
        assert!(matches!(
            store.build_index(&bad).await,
            Err(StoreError::Validation(_))
        ));
    }
}
