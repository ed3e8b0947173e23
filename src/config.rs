use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite database path (service side).
    pub db_path: PathBuf,
    /// Base URL of the running store service (client side).
    #[serde(default = "default_store_url")]
    pub base_url: String,
    /// Fixed embedding dimension D. Every write is validated against it.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Sub-batch size for bulk-add calls.
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,
    #[serde(default = "default_store_retries")]
    pub max_retries: u32,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_url() -> String {
    "http://127.0.0.1:7431".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_bulk_batch_size() -> usize {
    20
}
fn default_store_retries() -> u32 {
    3
}
fn default_store_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Provider endpoint. Defaults to the OpenAI embeddings API; tests
    /// point this at a local mock server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Maximum texts per provider request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            endpoint: default_endpoint(),
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token budget per embedding request; longer text is split.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    7000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Maximum provider requests per rolling window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_requests() -> u32 {
    500
}
fn default_window_secs() -> u64 {
    60
}

/// Endpoints the worker fetches source content from.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    /// Domain asset API base URL (e.g. `https://app.example.com/api`).
    #[serde(default)]
    pub asset_api: Option<String>,
    /// Direct object-storage base URL for keyframe fast-path fetches.
    #[serde(default)]
    pub storage_base: Option<String>,
    /// Raw-document host for text jobs (path + git ref appended).
    #[serde(default)]
    pub docs_base: Option<String>,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.store.dims == 0 {
        anyhow::bail!("store.dims must be > 0");
    }
    if config.store.bulk_batch_size == 0 {
        anyhow::bail!("store.bulk_batch_size must be > 0");
    }
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.rate_limit.max_requests == 0 {
        anyhow::bail!("rate_limit.max_requests must be > 0");
    }
    if config.rate_limit.window_secs == 0 {
        anyhow::bail!("rate_limit.window_secs must be > 0");
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse(
            r#"
            [store]
            db_path = "/tmp/mdx.sqlite"

            [server]
            bind = "127.0.0.1:7431"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.store.dims, 1536);
        assert_eq!(cfg.store.bulk_batch_size, 20);
        assert_eq!(cfg.chunking.max_tokens, 7000);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let err = parse(
            r#"
            [store]
            db_path = "/tmp/mdx.sqlite"

            [server]
            bind = "127.0.0.1:7431"

            [embedding]
            provider = "openai"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse(
            r#"
            [store]
            db_path = "/tmp/mdx.sqlite"

            [server]
            bind = "127.0.0.1:7431"

            [embedding]
            provider = "cohere"
            model = "embed-v3"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
