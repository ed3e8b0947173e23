//! Queue-driven ingestion worker.
//!
//! [`process_batch`] is the stateless handler the queue runtime invokes
//! with a batch of [`IngestionJob`] messages. Per message it validates the
//! stage, de-duplicates within the batch, fetches the source content
//! (keyframes try a direct storage fetch before falling back to the asset
//! API), normalizes, and hands off to the ingestion orchestrator with
//! upsert semantics.
//!
//! Failures are never swallowed: if any message in the batch could not be
//! completed, the batch returns `Err` so the queue's at-least-once
//! redelivery owns the retry. Idempotent upserts make redelivery safe.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SourcesConfig;
use crate::embedding::EmbeddingClient;
use crate::ingest::ingest_items;
use crate::models::{AssetRecord, IngestionJob, JobStage, MediaKind};
use crate::normalize::{normalize_asset, normalize_document};
use crate::store_client::StoreClient;

/// Source-content retrieval seam. The worker only depends on this trait;
/// tests substitute fakes.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch an asset record from the domain asset API.
    async fn fetch_asset(&self, asset_id: &str) -> Result<AssetRecord>;

    /// Fast path for keyframes: read the record straight from object
    /// storage, bypassing the asset API.
    async fn fetch_keyframe_direct(&self, asset_id: &str) -> Result<AssetRecord>;

    /// Fetch a raw text document by repository path and git ref.
    async fn fetch_document(&self, source_path: &str, git_ref: Option<&str>) -> Result<String>;
}

/// HTTP implementation of [`AssetFetcher`] against the configured
/// source endpoints.
pub struct HttpAssetFetcher {
    config: SourcesConfig,
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new(config: &SourcesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch_asset(&self, asset_id: &str) -> Result<AssetRecord> {
        let base = self
            .config
            .asset_api
            .as_ref()
            .context("sources.asset_api not configured")?;
        let url = format!("{}/assets/{}", base.trim_end_matches('/'), asset_id);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let asset = response.json::<AssetRecord>().await?;
        Ok(asset)
    }

    async fn fetch_keyframe_direct(&self, asset_id: &str) -> Result<AssetRecord> {
        let base = self
            .config
            .storage_base
            .as_ref()
            .context("sources.storage_base not configured")?;
        let url = format!("{}/keyframes/{}.json", base.trim_end_matches('/'), asset_id);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let asset = response.json::<AssetRecord>().await?;
        Ok(asset)
    }

    async fn fetch_document(&self, source_path: &str, git_ref: Option<&str>) -> Result<String> {
        let base = self
            .config
            .docs_base
            .as_ref()
            .context("sources.docs_base not configured")?;
        let url = format!(
            "{}/{}/{}",
            base.trim_end_matches('/'),
            git_ref.unwrap_or("main"),
            source_path.trim_start_matches('/')
        );

        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Everything one batch invocation needs. Holds no cross-invocation
/// state; all durable state lives in the vector store.
pub struct WorkerContext {
    pub fetcher: Box<dyn AssetFetcher>,
    pub embedder: EmbeddingClient,
    pub store: StoreClient,
}

/// Counters for one batch invocation.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped_stage: usize,
    pub skipped_duplicate: usize,
    /// `(asset_id, error)` pairs for messages that could not complete.
    pub failed: Vec<(String, String)>,
}

/// Process one batch of queue messages sequentially.
///
/// Returns `Err` when any message failed, after attempting every message
/// in the batch — redelivered messages that already succeeded are
/// harmless thanks to idempotent upserts.
pub async fn process_batch(ctx: &WorkerContext, jobs: &[IngestionJob]) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for job in jobs {
        if JobStage::parse(&job.stage).is_none() {
            info!(asset_id = %job.asset_id, stage = %job.stage, "skipping unrecognized stage");
            report.skipped_stage += 1;
            continue;
        }

        if !seen.insert(job.asset_id.as_str()) {
            info!(asset_id = %job.asset_id, "skipping duplicate asset in batch");
            report.skipped_duplicate += 1;
            continue;
        }

        match process_job(ctx, job).await {
            Ok(()) => report.processed += 1,
            Err(err) => {
                warn!(asset_id = %job.asset_id, error = %err, "ingestion failed");
                report.failed.push((job.asset_id.clone(), err.to_string()));
            }
        }
    }

    if !report.failed.is_empty() {
        let ids: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
        bail!(
            "{} of {} messages failed ({} processed): [{}]",
            report.failed.len(),
            jobs.len(),
            report.processed,
            ids.join(", ")
        );
    }

    Ok(report)
}

async fn process_job(ctx: &WorkerContext, job: &IngestionJob) -> Result<()> {
    let item = match job.media_type {
        MediaKind::Text => {
            let source_path = job
                .source_path
                .as_deref()
                .context("text job missing sourcePath")?;
            let body = ctx
                .fetcher
                .fetch_document(source_path, job.git_ref.as_deref())
                .await
                .with_context(|| format!("fetching document {}", source_path))?;
            normalize_document(&job.asset_id, job.title.as_deref(), &body)
        }
        MediaKind::Keyframe => {
            let asset = match ctx.fetcher.fetch_keyframe_direct(&job.asset_id).await {
                Ok(asset) => asset,
                Err(err) => {
                    info!(
                        asset_id = %job.asset_id,
                        error = %err,
                        "direct keyframe fetch failed, falling back to asset API"
                    );
                    ctx.fetcher
                        .fetch_asset(&job.asset_id)
                        .await
                        .with_context(|| format!("fetching keyframe {} via fallback", job.asset_id))?
                }
            };
            normalize_asset(&asset)
        }
        _ => {
            let asset = ctx
                .fetcher
                .fetch_asset(&job.asset_id)
                .await
                .with_context(|| format!("fetching asset {}", job.asset_id))?;
            normalize_asset(&asset)
        }
    };

    // Every queue-driven ingestion upserts so redelivery stays idempotent.
    ingest_items(&ctx.embedder, &ctx.store, &[item], true).await?;
    Ok(())
}
