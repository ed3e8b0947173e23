//! # Mediadex CLI (`mdx`)
//!
//! The `mdx` binary is the operational interface for the Mediadex
//! pipeline: database initialization, the vector store service, batch
//! ingestion, and search.
//!
//! ## Usage
//!
//! ```bash
//! mdx --config ./config/mdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdx init` | Create the SQLite database and run schema migrations |
//! | `mdx serve` | Start the vector store HTTP service |
//! | `mdx worker <batch.json>` | Process a batch of ingestion jobs |
//! | `mdx search "<query>"` | Unified search with filters and grouping |
//! | `mdx count` | Print the number of indexed records |
//! | `mdx build-index` | (Re)build the vector index |
//! | `mdx health` | Check that the store service is reachable |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! mdx init --config ./config/mdx.toml
//!
//! # Start the store service (keep running)
//! mdx serve --config ./config/mdx.toml
//!
//! # Drain a batch of queued ingestion jobs
//! mdx worker ./batch.json --config ./config/mdx.toml
//!
//! # Search audio assets tagged synthwave, newest first
//! mdx search "sunset drive" --kind audio --tag synthwave
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mediadex::config::{self, Config};
use mediadex::embedding::EmbeddingClient;
use mediadex::models::{
    BuildIndexRequest, IngestionJob, MediaKind, SearchFilters, UnifiedSearchRequest,
};
use mediadex::ratelimit::RateLimiter;
use mediadex::store::VectorStore;
use mediadex::store_client::StoreClient;
use mediadex::worker::{HttpAssetFetcher, WorkerContext};
use mediadex::{db, query, server, worker};

/// Mediadex CLI — an ingestion and vector-search pipeline for mixed
/// media libraries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mdx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mdx",
    about = "Mediadex — an ingestion and vector-search pipeline for mixed media libraries",
    version,
    long_about = "Mediadex normalizes media assets and documents into searchable text, embeds \
    that text through a rate-limited provider client, and persists fixed-dimension vectors in a \
    SQLite-backed store exposed over HTTP, with a batch worker for at-least-once ingestion."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/mdx.toml`. All store, embedding, rate-limit,
    /// and source settings are read from this file.
    #[arg(long, global = true, default_value = "./config/mdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the vector store tables.
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Start the vector store HTTP service.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// add / bulk-add / search / query / count / health endpoints.
    Serve,

    /// Process a batch of ingestion jobs from a JSON file.
    ///
    /// The file holds an array of queue messages. Jobs with unrecognized
    /// stages are skipped, duplicate asset ids within the batch are
    /// deduplicated, and the command exits non-zero if any job failed so
    /// the enclosing queue consumer redelivers the batch.
    Worker {
        /// Path to a JSON file containing an array of ingestion jobs.
        batch: PathBuf,
    },

    /// Search indexed records.
    ///
    /// Embeds the query through the store service, applies any filters,
    /// and prints results grouped into media and text sections.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Restrict to one media kind: `image`, `video`, `audio`, `text`,
        /// or `keyframe`.
        #[arg(long)]
        kind: Option<String>,

        /// Restrict to a metadata subtype (e.g., a tempo category).
        #[arg(long)]
        subtype: Option<String>,

        /// Require a tag/label substring match (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only return records created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only return records created on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,
    },

    /// Print the number of indexed records.
    Count,

    /// (Re)build the vector index.
    BuildIndex,

    /// Check that the store service is reachable.
    Health,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            run_init(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            init_tracing();
            server::run_server(&cfg).await?;
        }
        Commands::Worker { batch } => {
            init_tracing();
            run_worker(&cfg, &batch).await?;
        }
        Commands::Search {
            query,
            limit,
            kind,
            subtype,
            tags,
            since,
            until,
        } => {
            run_search(&cfg, &query, limit, kind, subtype, tags, since, until).await?;
        }
        Commands::Count => {
            let store = StoreClient::new(&cfg.store)?;
            println!("{}", store.count().await?);
        }
        Commands::BuildIndex => {
            let store = StoreClient::new(&cfg.store)?;
            store.build_index(&BuildIndexRequest::default()).await?;
            println!("Index built.");
        }
        Commands::Health => {
            let store = StoreClient::new(&cfg.store)?;
            store.health().await?;
            println!("Store is healthy.");
        }
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.store.db_path).await?;
    let store = VectorStore::new(pool, cfg.store.dims);
    store.migrate().await?;
    Ok(())
}

async fn run_worker(cfg: &Config, batch_path: &std::path::Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(batch_path)
        .with_context(|| format!("Failed to read batch file: {}", batch_path.display()))?;
    let jobs: Vec<IngestionJob> =
        serde_json::from_str(&content).with_context(|| "Failed to parse batch file")?;

    let limiter = std::sync::Arc::new(RateLimiter::new(
        cfg.rate_limit.max_requests,
        std::time::Duration::from_secs(cfg.rate_limit.window_secs),
    ));
    let ctx = WorkerContext {
        fetcher: Box::new(HttpAssetFetcher::new(&cfg.sources)?),
        embedder: EmbeddingClient::new(&cfg.embedding, &cfg.chunking, cfg.store.dims, limiter)?,
        store: StoreClient::new(&cfg.store)?,
    };

    let report = worker::process_batch(&ctx, &jobs).await?;
    println!(
        "Processed {} job(s) ({} skipped by stage, {} duplicate(s)).",
        report.processed, report.skipped_stage, report.skipped_duplicate
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    cfg: &Config,
    query: &str,
    limit: usize,
    kind: Option<String>,
    subtype: Option<String>,
    tags: Vec<String>,
    since: Option<String>,
    until: Option<String>,
) -> anyhow::Result<()> {
    let kind = match kind {
        Some(k) => Some(
            MediaKind::parse(&k)
                .with_context(|| format!("unknown media kind '{}' (expected image, video, audio, text, or keyframe)", k))?,
        ),
        None => None,
    };

    let req = UnifiedSearchRequest {
        query: query.to_string(),
        limit,
        filters: SearchFilters {
            kind,
            subtype,
            tags,
            date_from: since.as_deref().map(parse_date).transpose()?,
            date_to: until.as_deref().map(parse_date).transpose()?,
        },
    };

    let store = StoreClient::new(&cfg.store)?;
    let resp = query::unified_search(&store, &req).await?;

    if resp.all.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!(
        "{} result(s) of {} matching record(s):\n",
        resp.count, resp.total_results
    );
    for (i, r) in resp.all.iter().enumerate() {
        let title = r.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.3}] {} ({}, {})", i + 1, r.score, title, r.id, r.content_type);
        if !r.preview.is_empty() {
            println!("   {}", r.preview.replace('\n', " "));
        }
    }
    if !resp.media.is_empty() || !resp.text.is_empty() {
        println!("\n{} media, {} text", resp.media.len(), resp.text.len());
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` date into a Unix timestamp at midnight UTC.
fn parse_date(s: &str) -> anyhow::Result<i64> {
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}' (expected YYYY-MM-DD)", s))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("invalid time construction")?;
    Ok(midnight.and_utc().timestamp())
}
