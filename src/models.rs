//! Core data models used throughout mediadex.
//!
//! These types represent the assets, queue jobs, vector records, and search
//! results that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};

/// The media kind of a source asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Text,
    Keyframe,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Text => "text",
            MediaKind::Keyframe => "keyframe",
        }
    }

    /// True for kinds whose results belong in the `media` group of a
    /// unified search response (everything except plain text documents).
    pub fn is_media(&self) -> bool {
        !matches!(self, MediaKind::Text)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            "text" => Some(MediaKind::Text),
            "keyframe" => Some(MediaKind::Keyframe),
            _ => None,
        }
    }
}

impl Default for MediaKind {
    fn default() -> Self {
        MediaKind::Text
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw asset record as returned by the asset API (or assembled from a
/// direct storage fetch). Input to the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    #[serde(default)]
    pub media: MediaKind,
    #[serde(default)]
    pub title: Option<String>,
    /// Whisper transcript for audio assets.
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
    /// Generation prompt, when the asset was produced by a model.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Descriptive labels for visual media (scene, objects, style).
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub tempo_category: Option<String>,
    /// Unix timestamp of asset creation, used by date-range filters.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub storage_url: Option<String>,
}

/// Normalized, searchable representation of an asset prior to embedding.
///
/// Transient: built per ingestion call and discarded once its
/// [`VectorRecord`] has been produced.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: String,
    pub title: Option<String>,
    pub media: MediaKind,
    /// Deterministically assembled searchable text. Identical asset input
    /// always yields identical text, which keeps re-ingestion idempotent.
    pub combined_text: String,
    /// Opaque metadata carried into the record's `references` blob
    /// (storage URLs, tags, creation timestamp, audio analysis fields).
    pub metadata: serde_json::Value,
}

/// The persisted unit: one row per asset id in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub content_type: MediaKind,
    #[serde(default)]
    pub title: Option<String>,
    /// Fixed-dimension f32 embedding. Length is validated against the
    /// store's configured dimension on every write.
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub searchable_text: Option<String>,
    /// SHA-256 of the combined text, reserved for change detection.
    #[serde(default)]
    pub content_hash: Option<String>,
    /// JSON metadata blob (tags, storage URLs, created_at, ...).
    #[serde(default)]
    pub references: Option<serde_json::Value>,
    pub last_updated: i64,
}

/// A queue message requesting ingestion of one asset.
///
/// Field names follow the wire format produced by the enqueuing side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub asset_id: String,
    pub media_type: MediaKind,
    /// Why ingestion was requested. Only recognized stages are processed;
    /// see [`JobStage`].
    pub stage: String,
    pub requested_at: i64,
    /// Repository-relative path of the raw document (text jobs only).
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// The closed set of recognized ingestion stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    /// First-time indexing of an asset.
    InitialLoad,
    /// Re-indexing after the asset changed.
    Refresh,
    /// Re-indexing after labeling finished and enriched the asset.
    LabelComplete,
}

impl JobStage {
    /// Parse a wire-format stage string. Unknown stages return `None`
    /// and the worker skips the message without error.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial_load" => Some(JobStage::InitialLoad),
            "refresh" => Some(JobStage::Refresh),
            "label_complete" => Some(JobStage::LabelComplete),
            _ => None,
        }
    }
}

// ============ Vector store wire types ============

/// Body of `POST /add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequest {
    #[serde(flatten)]
    pub record: VectorRecord,
    /// When set, any existing row with the same id is removed first.
    #[serde(default)]
    pub upsert: bool,
}

/// Body of `POST /bulk-add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAddRequest {
    pub records: Vec<VectorRecord>,
    #[serde(default)]
    pub upsert: bool,
}

/// Body of `POST /search`. Exactly one of `query` / `query_embedding`
/// must be provided; text queries are embedded by the store itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One nearest-neighbor hit as returned by the store, ordered by
/// ascending distance. Score conversion happens in the query path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHit {
    pub id: String,
    pub content_type: MediaKind,
    #[serde(default)]
    pub title: Option<String>,
    /// Cosine distance (1 − cosine similarity); lower is more similar.
    pub distance: f64,
    #[serde(default)]
    pub searchable_text: Option<String>,
    #[serde(default)]
    pub references: Option<serde_json::Value>,
}

/// Body of the `POST /search` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSearchResponse {
    pub results: Vec<StoreHit>,
}

/// Body of `POST /create-index` / `POST /build-index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildIndexRequest {
    #[serde(default = "default_index_column")]
    pub column: String,
    #[serde(default = "default_index_metric")]
    pub metric: String,
    #[serde(default = "default_index_partitions")]
    pub partitions: u32,
}

fn default_index_column() -> String {
    "embedding".to_string()
}
fn default_index_metric() -> String {
    "cosine".to_string()
}
fn default_index_partitions() -> u32 {
    256
}

impl Default for BuildIndexRequest {
    fn default() -> Self {
        Self {
            column: default_index_column(),
            metric: default_index_metric(),
            partitions: default_index_partitions(),
        }
    }
}

// ============ Unified search types ============

/// Filters applied after the nearest-neighbor lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Exact media-kind match against the record's content type.
    #[serde(default)]
    pub kind: Option<MediaKind>,
    /// Exact match against the `subtype` field of the references blob.
    #[serde(default)]
    pub subtype: Option<String>,
    /// Substring matches against the record's label/tag arrays.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Inclusive Unix-timestamp range against `created_at` in references.
    #[serde(default)]
    pub date_from: Option<i64>,
    #[serde(default)]
    pub date_to: Option<i64>,
}

/// Body of `POST /query` (the unified search endpoint).
#[derive(Debug, Clone, Deserialize)]
pub struct UnifiedSearchRequest {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default, flatten)]
    pub filters: SearchFilters,
}

fn default_search_limit() -> usize {
    10
}

/// A scored search result returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content_type: MediaKind,
    #[serde(default)]
    pub title: Option<String>,
    /// Similarity in `[0, 1]`; higher is more relevant.
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Truncated excerpt of the searchable text.
    pub preview: String,
}

/// Grouped result sets for the unified search endpoint. Groups overlap;
/// `all` always contains the full flat result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSearchResponse {
    pub media: Vec<SearchResult>,
    pub text: Vec<SearchResult>,
    pub all: Vec<SearchResult>,
    pub total_results: usize,
    pub count: usize,
}
