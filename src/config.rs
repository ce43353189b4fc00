use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variables that override values from the config file.
pub const ENV_OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
pub const ENV_OLLAMA_CHAT_MODEL: &str = "OLLAMA_CHAT_MODEL";
pub const ENV_OLLAMA_EMBED_MODEL: &str = "OLLAMA_EMBED_MODEL";
pub const ENV_CHROMA_URL: &str = "CHROMA_URL";
pub const ENV_CHROMA_COLLECTION_NAME: &str = "CHROMA_COLLECTION_NAME";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL the client commands (`chat`, `ask`) talk to.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_url: default_api_url(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_api_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default)]
    pub chat_model: String,
    #[serde(default)]
    pub embed_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Timeout for embedding and health requests. `0` disables it; the
    /// chat stream itself never times out.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            chat_model: String::new(),
            embed_model: String::new(),
            temperature: default_temperature(),
            timeout_secs: 0,
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChromaConfig {
    #[serde(default = "default_chroma_url")]
    pub url: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            url: default_chroma_url(),
            collection: String::new(),
            tenant: default_tenant(),
            database: default_database(),
        }
    }
}

fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_tenant() -> String {
    "default_tenant".to_string()
}
fn default_database() -> String {
    "default_database".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_max_token_limit")]
    pub max_token_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_token_limit: default_max_token_limit(),
        }
    }
}

fn default_max_token_limit() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Config {
    /// Build a configuration from defaults and environment variables only.
    ///
    /// Used when no config file exists; [`validate`] still requires the
    /// models and collection to be provided.
    pub fn from_env_only() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override file values with any set environment variables.
    ///
    /// `lookup` is injected so tests do not have to mutate the process
    /// environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_OLLAMA_BASE_URL) {
            self.ollama.base_url = v;
        }
        if let Some(v) = non_empty(ENV_OLLAMA_CHAT_MODEL) {
            self.ollama.chat_model = v;
        }
        if let Some(v) = non_empty(ENV_OLLAMA_EMBED_MODEL) {
            self.ollama.embed_model = v;
        }
        if let Some(v) = non_empty(ENV_CHROMA_URL) {
            self.chroma.url = v;
        }
        if let Some(v) = non_empty(ENV_CHROMA_COLLECTION_NAME) {
            self.chroma.collection = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ollama.chat_model.trim().is_empty() {
            anyhow::bail!("ollama.chat_model must be set (or {})", ENV_OLLAMA_CHAT_MODEL);
        }
        if self.ollama.embed_model.trim().is_empty() {
            anyhow::bail!(
                "ollama.embed_model must be set (or {})",
                ENV_OLLAMA_EMBED_MODEL
            );
        }
        if self.chroma.collection.trim().is_empty() {
            anyhow::bail!(
                "chroma.collection must be set (or {})",
                ENV_CHROMA_COLLECTION_NAME
            );
        }
        if !(0.0..=2.0).contains(&self.ollama.temperature) {
            anyhow::bail!("ollama.temperature must be in [0.0, 2.0]");
        }
        if self.retrieval.k == 0 {
            anyhow::bail!("retrieval.k must be >= 1");
        }
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.memory.max_token_limit == 0 {
            anyhow::bail!("memory.max_token_limit must be > 0");
        }
        Ok(())
    }
}

/// Load, apply environment overrides, and validate the configuration.
///
/// A missing file falls back to [`Config::from_env_only`].
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Config::from_env_only().with_context(|| {
            format!(
                "Config file {} not found and environment is incomplete",
                path.display()
            )
        });
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parse TOML config text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}
