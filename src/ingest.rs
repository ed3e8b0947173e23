//! Ingestion orchestration: normalize → embed → upsert.
//!
//! Drives one or many [`ContentItem`]s through embedding and into the
//! vector store, choosing the single-record `add` path for exactly one
//! record and the sub-batched `bulk-add` path for more. Items whose
//! embedding failed are excluded from the persisted set and reported
//! upward so the caller can fail the enclosing job for redelivery.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::embedding::EmbeddingClient;
use crate::models::{ContentItem, VectorRecord};
use crate::store_client::StoreClient;

/// Counters for one orchestration call.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub written: usize,
    /// Items skipped because they normalized to blank text.
    pub skipped: usize,
    /// Ids whose embedding failed after retries.
    pub failed: Vec<String>,
}

/// Embed and persist a set of content items.
///
/// Returns `Err` when any item could not be embedded or the store write
/// failed; successfully embedded items are still persisted first, so a
/// redelivered job only re-does idempotent work.
pub async fn ingest_items(
    embedder: &EmbeddingClient,
    store: &StoreClient,
    items: &[ContentItem],
    upsert: bool,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    // Blank text cannot be embedded and would fail every redelivery.
    let (embeddable, blank): (Vec<&ContentItem>, Vec<&ContentItem>) = items
        .iter()
        .partition(|item| !item.combined_text.trim().is_empty());

    for item in &blank {
        warn!(id = %item.id, "skipping item with blank combined text");
        report.skipped += 1;
    }

    if embeddable.is_empty() {
        return Ok(report);
    }

    let texts: Vec<String> = embeddable
        .iter()
        .map(|item| item.combined_text.clone())
        .collect();
    let results = embedder.embed_each(&texts).await;

    let now = chrono::Utc::now().timestamp();
    let mut records = Vec::with_capacity(embeddable.len());

    for (item, result) in embeddable.iter().zip(results) {
        match result {
            Ok(embedding) => records.push(build_record(item, embedding, now)),
            Err(err) => {
                warn!(id = %item.id, error = %err, "embedding failed");
                report.failed.push(item.id.clone());
            }
        }
    }

    match records.as_slice() {
        [] => {}
        [single] => store.add(single, upsert).await?,
        many => {
            let bulk = store.bulk_add(many, upsert).await?;
            debug_assert_eq!(bulk.records_written, many.len());
        }
    }
    report.written = records.len();

    if !report.failed.is_empty() {
        bail!(
            "embedding failed for {} of {} items ({} written): [{}]",
            report.failed.len(),
            items.len(),
            report.written,
            report.failed.join(", ")
        );
    }

    Ok(report)
}

fn build_record(item: &ContentItem, embedding: Vec<f32>, now: i64) -> VectorRecord {
    let mut hasher = Sha256::new();
    hasher.update(item.combined_text.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let references = match &item.metadata {
        serde_json::Value::Object(map) if map.is_empty() => None,
        other => Some(other.clone()),
    };

    VectorRecord {
        id: item.id.clone(),
        content_type: item.media,
        title: item.title.clone(),
        embedding,
        searchable_text: Some(item.combined_text.clone()),
        content_hash: Some(content_hash),
        references,
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;

    fn item(id: &str, text: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            title: None,
            media: MediaKind::Audio,
            combined_text: text.to_string(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    #[test]
    fn test_build_record_hashes_text() {
        let a = build_record(&item("a1", "same text"), vec![0.0; 3], 100);
        let b = build_record(&item("a1", "same text"), vec![1.0; 3], 200);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.searchable_text.as_deref(), Some("same text"));
        assert!(a.references.is_none());
    }

    #[test]
    fn test_build_record_carries_metadata() {
        let mut it = item("a2", "text");
        it.metadata = serde_json::json!({"tags": ["lofi"]});
        let record = build_record(&it, vec![0.0; 3], 100);
        assert_eq!(record.references.unwrap()["tags"][0], "lofi");
    }
}
