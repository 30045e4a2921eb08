#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::queue::QueueConfig;

/// Environment variable overriding the base directory.
pub const BASE_DIR_ENV: &str = "RECIPE_VAULT_HOME";

const DEFAULT_DIR_NAME: &str = ".recipe-vault";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Language-model provider. An empty model name leaves enrichment unconfigured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub summary_model: String,
    pub embedding_dimension: u32,
    pub request_timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embedding_model: "nomic-embed-text:latest".to_string(),
            summary_model: "llama3.2:latest".to_string(),
            embedding_dimension: 768,
            request_timeout_seconds: 60,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessorConfig {
    pub poll_interval_ms: u64,
    pub pipeline_timeout_seconds: u64,
    /// Leading tokens of a recipe sent for embedding, at roughly four characters per token.
    pub embed_token_budget: usize,
    pub stuck_after_seconds: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            pipeline_timeout_seconds: 120,
            embed_token_budget: 6000,
            stuck_after_seconds: 600,
        }
    }
}

impl ProcessorConfig {
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_seconds)
    }

    #[inline]
    pub fn stuck_after(&self) -> chrono::Duration {
        i64::try_from(self.stuck_after_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueSettings {
    pub retention_days: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

impl From<&QueueSettings> for QueueConfig {
    #[inline]
    fn from(settings: &QueueSettings) -> Self {
        Self {
            retention_days: settings.retention_days,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Minimum cosine similarity for a vector hit to be returned.
    pub similarity_threshold: f32,
    pub query_timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            similarity_threshold: 0.3,
            query_timeout_seconds: 10,
        }
    }
}

impl SearchConfig {
    #[inline]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: '{0}' (cannot be blank or padded with whitespace)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid request timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidRequestTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid poll interval: {0} (must be at least 100 ms)")]
    InvalidPollInterval(u64),
    #[error("Invalid pipeline timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidPipelineTimeout(u64),
    #[error("Invalid embedding token budget: {0} (must be between 256 and 131072)")]
    InvalidTokenBudget(usize),
    #[error("Invalid stuck item threshold: {0} (must be at least 1 second)")]
    InvalidStuckThreshold(u64),
    #[error("Invalid queue retention: {0} (must be between 1 and 365 days)")]
    InvalidRetention(u32),
    #[error("Invalid search limit: {0} (must be between 1 and 100)")]
    InvalidSearchLimit(usize),
    #[error("Invalid similarity threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid query timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidQueryTimeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default base directory: `$RECIPE_VAULT_HOME`, else `~/.recipe-vault`.
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(BASE_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when the file is missing.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_processor()?;

        if !(1..=365).contains(&self.queue.retention_days) {
            return Err(ConfigError::InvalidRetention(self.queue.retention_days));
        }

        let search = &self.search;
        if !(1..=100).contains(&search.default_limit) {
            return Err(ConfigError::InvalidSearchLimit(search.default_limit));
        }
        if !(0.0..=1.0).contains(&search.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                search.similarity_threshold,
            ));
        }
        if !(1..=300).contains(&search.query_timeout_seconds) {
            return Err(ConfigError::InvalidQueryTimeout(
                search.query_timeout_seconds,
            ));
        }

        Ok(())
    }

    fn validate_processor(&self) -> Result<(), ConfigError> {
        let processor = &self.processor;

        if processor.poll_interval_ms < 100 {
            return Err(ConfigError::InvalidPollInterval(processor.poll_interval_ms));
        }

        if !(1..=3600).contains(&processor.pipeline_timeout_seconds) {
            return Err(ConfigError::InvalidPipelineTimeout(
                processor.pipeline_timeout_seconds,
            ));
        }

        if !(256..=131_072).contains(&processor.embed_token_budget) {
            return Err(ConfigError::InvalidTokenBudget(processor.embed_token_budget));
        }

        if processor.stuck_after_seconds == 0 {
            return Err(ConfigError::InvalidStuckThreshold(
                processor.stuck_after_seconds,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("recipes.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::from(&self.queue)
    }
}

fn validate_model_name(model: &str) -> Result<(), ConfigError> {
    // Empty means "not configured"; the processor refuses to start in that case.
    if !model.is_empty() && model.trim() != model {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }
    Ok(())
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        validate_model_name(&self.embedding_model)?;
        validate_model_name(&self.summary_model)?;

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.request_timeout_seconds) {
            return Err(ConfigError::InvalidRequestTimeout(
                self.request_timeout_seconds,
            ));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        let url = Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str.clone()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl(url_str));
        }
        Ok(url)
    }

    /// Both models are named, so enrichment can run.
    pub fn is_configured(&self) -> bool {
        !self.embedding_model.trim().is_empty() && !self.summary_model.trim().is_empty()
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.ollama_url()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        validate_model_name(&model)?;
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_summary_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        validate_model_name(&model)?;
        self.summary_model = model;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}
