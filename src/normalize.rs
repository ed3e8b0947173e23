//! Asset normalization: domain records become searchable [`ContentItem`]s.
//!
//! `combined_text` is assembled in a fixed order — title first, then the
//! kind-specific free text, then descriptive label arrays — skipping blank
//! fields. The functions here are pure and total; identical input always
//! produces identical output, which is what makes re-ingestion idempotent
//! at the text level.

use serde_json::{json, Map, Value};

use crate::models::{AssetRecord, ContentItem, MediaKind};

/// Normalize a domain asset into a [`ContentItem`].
pub fn normalize_asset(asset: &AssetRecord) -> ContentItem {
    let mut parts: Vec<&str> = Vec::new();

    if let Some(title) = &asset.title {
        push_part(&mut parts, title);
    }

    // Kind-specific free text, in a fixed order.
    match asset.media {
        MediaKind::Audio => {
            if let Some(t) = &asset.transcript {
                push_part(&mut parts, t);
            }
            if let Some(l) = &asset.lyrics {
                push_part(&mut parts, l);
            }
            if let Some(p) = &asset.prompt {
                push_part(&mut parts, p);
            }
        }
        MediaKind::Image | MediaKind::Video | MediaKind::Keyframe => {
            if let Some(p) = &asset.prompt {
                push_part(&mut parts, p);
            }
        }
        MediaKind::Text => {
            if let Some(p) = &asset.prompt {
                push_part(&mut parts, p);
            }
        }
    }

    // Descriptive label arrays, each joined by whitespace.
    let labels = join_nonblank(&asset.labels);
    if !labels.is_empty() {
        parts.push(&labels);
    }
    let tags = join_nonblank(&asset.tags);
    if !tags.is_empty() {
        parts.push(&tags);
    }

    ContentItem {
        id: asset.id.clone(),
        title: asset.title.clone(),
        media: asset.media,
        combined_text: parts.join("\n"),
        metadata: build_metadata(asset),
    }
}

/// Normalize a raw text document fetched from source control.
pub fn normalize_document(id: &str, title: Option<&str>, body: &str) -> ContentItem {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(t) = title {
        push_part(&mut parts, t);
    }
    push_part(&mut parts, body);

    ContentItem {
        id: id.to_string(),
        title: title.map(|t| t.to_string()),
        media: MediaKind::Text,
        combined_text: parts.join("\n"),
        metadata: Value::Object(Map::new()),
    }
}

fn push_part<'a>(parts: &mut Vec<&'a str>, s: &'a str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed);
    }
}

fn join_nonblank(values: &[String]) -> String {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Metadata carried into the record's `references` blob. Only fields
/// actually present on the asset are included.
fn build_metadata(asset: &AssetRecord) -> Value {
    let mut map = Map::new();

    if let Some(url) = &asset.storage_url {
        map.insert("storage_url".to_string(), json!(url));
    }
    if !asset.labels.is_empty() {
        map.insert("labels".to_string(), json!(asset.labels));
    }
    if !asset.tags.is_empty() {
        map.insert("tags".to_string(), json!(asset.tags));
    }
    if let Some(created_at) = asset.created_at {
        map.insert("created_at".to_string(), json!(created_at));
    }
    if let Some(artist) = &asset.artist {
        map.insert("artist".to_string(), json!(artist));
    }
    if let Some(album) = &asset.album {
        map.insert("album".to_string(), json!(album));
    }
    if let Some(bpm) = asset.bpm {
        map.insert("bpm".to_string(), json!(bpm));
    }
    if let Some(tc) = &asset.tempo_category {
        map.insert("tempo_category".to_string(), json!(tc));
        // Tempo category doubles as the media subtype for audio filters.
        map.insert("subtype".to_string(), json!(tc));
    }

    Value::Object(map)
}
