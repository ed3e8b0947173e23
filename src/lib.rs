//! # Mediadex
//!
//! An asynchronous ingestion and vector-search pipeline for mixed media
//! libraries.
//!
//! Mediadex turns media assets (audio, images, video, keyframes) and text
//! documents into normalized text, embeds that text through a rate-limited
//! provider client, and persists fixed-dimension vectors in a SQLite-backed
//! store exposed over HTTP. A worker drains ingestion jobs in batches with
//! at-least-once semantics, and a unified query path post-filters and groups
//! nearest-neighbor results for callers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Ingestion    │──▶│  Normalize +  │──▶│ Vector store │
//! │ jobs (batch) │   │  chunk+embed  │   │ HTTP service │
//! └──────────────┘   └───────────────┘   └──────┬───────┘
//!                                               │
//!                            ┌──────────────────┤
//!                            ▼                  ▼
//!                       ┌─────────┐       ┌──────────┐
//!                       │   CLI   │       │  /query  │
//!                       │  (mdx)  │       │ clients  │
//!                       └─────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mdx init                      # create the vector database
//! mdx serve                     # start the vector store service
//! mdx worker batch.json         # process a batch of ingestion jobs
//! mdx search "synthwave sunset" --kind audio
//! mdx count
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and wire formats |
//! | [`chunk`] | Token-bounded lossless text splitting |
//! | [`ratelimit`] | Rolling-window request rate limiter |
//! | [`embedding`] | Embedding provider client with retry/backoff |
//! | [`normalize`] | Asset/document to searchable-text normalization |
//! | [`store`] | SQLite vector store |
//! | [`store_client`] | HTTP client for the store service |
//! | [`server`] | Vector store HTTP service |
//! | [`ingest`] | Ingestion orchestration (add vs. bulk-add) |
//! | [`worker`] | Batch ingestion worker |
//! | [`query`] | Unified search: filter + group |
//! | [`db`] | Database connection |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod query;
pub mod ratelimit;
pub mod server;
pub mod store;
pub mod store_client;
pub mod worker;
