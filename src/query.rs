//! Query-time search path: embed → nearest neighbors → filter → group.
//!
//! The store is oversampled (`limit * 2` raw neighbors) to leave room for
//! post-filtering, distances are converted to `[0, 1]` similarity scores,
//! and the final flat list is grouped into overlapping `media` / `text` /
//! `all` views. Grouping never removes an item from the flat list.

use crate::models::{
    MediaKind, SearchFilters, SearchResult, StoreHit, UnifiedSearchRequest, UnifiedSearchResponse,
};
use crate::store::StoreError;
use crate::store_client::StoreClient;

/// Characters kept in the result preview.
const PREVIEW_CHARS: usize = 240;

/// Run a unified search against a remote vector store service.
///
/// A store that cannot be reached surfaces as
/// [`StoreError::Unavailable`] so callers can distinguish "search is
/// down" from "no results".
pub async fn unified_search(
    store: &StoreClient,
    req: &UnifiedSearchRequest,
) -> Result<UnifiedSearchResponse, StoreError> {
    if req.query.trim().is_empty() {
        return Err(StoreError::Validation("query must not be empty".into()));
    }

    // Oversample: post-filters may discard neighbors.
    let hits = store.search_text(&req.query, req.limit * 2).await?;
    Ok(postprocess(hits, &req.filters, req.limit))
}

/// Score, filter, sort, truncate, and group raw store hits.
pub fn postprocess(
    hits: Vec<StoreHit>,
    filters: &SearchFilters,
    limit: usize,
) -> UnifiedSearchResponse {
    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .map(hit_to_result)
        .filter(|r| matches_filters(r, filters))
        .collect();

    let total_results = results.len();

    // Deterministic: score desc, then id asc.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);

    let media: Vec<SearchResult> = results
        .iter()
        .filter(|r| r.content_type.is_media())
        .cloned()
        .collect();
    let text: Vec<SearchResult> = results
        .iter()
        .filter(|r| r.content_type == MediaKind::Text)
        .cloned()
        .collect();

    let count = results.len();
    UnifiedSearchResponse {
        media,
        text,
        all: results,
        total_results,
        count,
    }
}

fn hit_to_result(hit: StoreHit) -> SearchResult {
    // Cosine distance → similarity, clamped into [0, 1].
    let score = (1.0 - hit.distance).clamp(0.0, 1.0);

    let preview = hit
        .searchable_text
        .as_deref()
        .map(|t| t.chars().take(PREVIEW_CHARS).collect::<String>())
        .unwrap_or_default();

    SearchResult {
        id: hit.id,
        content_type: hit.content_type,
        title: hit.title,
        score,
        metadata: hit.references.unwrap_or(serde_json::Value::Null),
        preview,
    }
}

fn matches_filters(result: &SearchResult, filters: &SearchFilters) -> bool {
    if let Some(kind) = filters.kind {
        if result.content_type != kind {
            return false;
        }
    }

    if let Some(subtype) = &filters.subtype {
        let value = result.metadata.get("subtype").and_then(|v| v.as_str());
        if value != Some(subtype.as_str()) {
            return false;
        }
    }

    if !filters.tags.is_empty() {
        let haystack = label_values(&result.metadata);
        for wanted in &filters.tags {
            let wanted = wanted.to_lowercase();
            if !haystack.iter().any(|label| label.contains(&wanted)) {
                return false;
            }
        }
    }

    if filters.date_from.is_some() || filters.date_to.is_some() {
        let Some(created_at) = result.metadata.get("created_at").and_then(|v| v.as_i64())
        else {
            // No creation timestamp means the record cannot satisfy a
            // date-range filter.
            return false;
        };
        if let Some(from) = filters.date_from {
            if created_at < from {
                return false;
            }
        }
        if let Some(to) = filters.date_to {
            if created_at > to {
                return false;
            }
        }
    }

    true
}

/// Lowercased label and tag strings from the metadata blob.
fn label_values(metadata: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    for key in ["labels", "tags"] {
        if let Some(values) = metadata.get(key).and_then(|v| v.as_array()) {
            out.extend(
                values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_lowercase()),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, kind: MediaKind, distance: f64, metadata: serde_json::Value) -> StoreHit {
        StoreHit {
            id: id.to_string(),
            content_type: kind,
            title: None,
            distance,
            searchable_text: Some(format!("text for {}", id)),
            references: Some(metadata),
        }
    }

    #[test]
    fn test_scores_sorted_non_increasing_and_truncated() {
        let hits: Vec<StoreHit> = (0..25)
            .map(|i| {
                hit(
                    &format!("r{:02}", i),
                    MediaKind::Image,
                    f64::from(i) * 0.03,
                    serde_json::json!({}),
                )
            })
            .collect();

        let resp = postprocess(hits, &SearchFilters::default(), 10);
        assert_eq!(resp.all.len(), 10);
        assert_eq!(resp.count, 10);
        assert_eq!(resp.total_results, 25);
        for pair in resp.all.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_score_clamped_to_unit_interval() {
        let hits = vec![
            hit("neg", MediaKind::Image, 1.8, serde_json::json!({})),
            hit("pos", MediaKind::Image, 0.0, serde_json::json!({})),
        ];
        let resp = postprocess(hits, &SearchFilters::default(), 10);
        for r in &resp.all {
            assert!((0.0..=1.0).contains(&r.score));
        }
    }

    #[test]
    fn test_kind_filter() {
        let hits = vec![
            hit("img", MediaKind::Image, 0.1, serde_json::json!({})),
            hit("doc", MediaKind::Text, 0.1, serde_json::json!({})),
        ];
        let filters = SearchFilters {
            kind: Some(MediaKind::Text),
            ..SearchFilters::default()
        };
        let resp = postprocess(hits, &filters, 10);
        assert_eq!(resp.all.len(), 1);
        assert_eq!(resp.all[0].id, "doc");
    }

    #[test]
    fn test_tag_substring_filter() {
        let hits = vec![
            hit(
                "match",
                MediaKind::Audio,
                0.1,
                serde_json::json!({"tags": ["Synthwave", "retro"]}),
            ),
            hit(
                "nomatch",
                MediaKind::Audio,
                0.1,
                serde_json::json!({"tags": ["jazz"]}),
            ),
        ];
        let filters = SearchFilters {
            tags: vec!["synth".to_string()],
            ..SearchFilters::default()
        };
        let resp = postprocess(hits, &filters, 10);
        assert_eq!(resp.all.len(), 1);
        assert_eq!(resp.all[0].id, "match");
    }

    #[test]
    fn test_date_range_filter() {
        let hits = vec![
            hit(
                "old",
                MediaKind::Video,
                0.1,
                serde_json::json!({"created_at": 1000}),
            ),
            hit(
                "new",
                MediaKind::Video,
                0.1,
                serde_json::json!({"created_at": 5000}),
            ),
            hit("undated", MediaKind::Video, 0.1, serde_json::json!({})),
        ];
        let filters = SearchFilters {
            date_from: Some(2000),
            date_to: Some(9000),
            ..SearchFilters::default()
        };
        let resp = postprocess(hits, &filters, 10);
        assert_eq!(resp.all.len(), 1);
        assert_eq!(resp.all[0].id, "new");
    }

    #[test]
    fn test_groups_overlap_and_preserve_all() {
        let hits = vec![
            hit("song", MediaKind::Audio, 0.1, serde_json::json!({})),
            hit("doc", MediaKind::Text, 0.2, serde_json::json!({})),
            hit("frame", MediaKind::Keyframe, 0.3, serde_json::json!({})),
        ];
        let resp = postprocess(hits, &SearchFilters::default(), 10);

        assert_eq!(resp.all.len(), 3);
        assert_eq!(resp.media.len(), 2);
        assert_eq!(resp.text.len(), 1);
        // Every grouped item is still present in the flat list.
        for r in resp.media.iter().chain(resp.text.iter()) {
            assert!(resp.all.iter().any(|a| a.id == r.id));
        }
    }

    #[test]
    fn test_preview_truncated() {
        let mut h = hit("long", MediaKind::Text, 0.1, serde_json::json!({}));
        h.searchable_text = Some("x".repeat(1000));
        let resp = postprocess(vec![h], &SearchFilters::default(), 10);
        assert_eq!(resp.all[0].preview.chars().count(), 240);
    }
}
