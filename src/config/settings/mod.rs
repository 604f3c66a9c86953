
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::RagError;
use crate::database::Metric;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSION;
use crate::namespace::{Namespace, resolve_namespace};

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const PINECONE_API_KEY_VAR: &str = "PINECONE_API_KEY";
pub const PINECONE_INDEX_VAR: &str = "PINECONE_INDEX";
pub const PINECONE_ENV_VAR: &str = "PINECONE_ENV";
/// Overrides the configuration directory
pub const HOME_VAR: &str = "EIKEN_RAG_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub embedding_dimension: u32,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 30,
            retry_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Pinecone,
    Lancedb,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: Backend,
    pub metric: Metric,
    pub control_url: String,
    pub cloud: String,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Pinecone,
            metric: Metric::Cosine,
            control_url: "https://api.pinecone.io".to_string(),
            cloud: "aws".to_string(),
            timeout_secs: 30,
        }
    }
}

/// What to do with a row whose embedding call fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnEmbedError {
    /// Stop ingesting the file; the pending batch is discarded
    #[default]
    Abort,
    /// Log the row and carry on with the next one
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub on_embed_error: OnEmbedError,
    pub sources: Vec<IngestSource>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            on_embed_error: OnEmbedError::Abort,
            sources: Vec::new(),
        }
    }
}

/// A CSV file and the (level, mode) partition its rows belong to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSource {
    pub path: PathBuf,
    pub level: String,
    pub mode: String,
}

impl IngestSource {
    #[inline]
    pub fn namespace(&self) -> crate::Result<Namespace> {
        resolve_namespace(&self.level, &self.mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// Secrets and the index name, read from the environment rather than the config file.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub openai_api_key: String,
    pub index_name: String,
    pub pinecone_api_key: Option<String>,
    pub pinecone_environment: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"***")
            .field("index_name", &self.index_name)
            .field("pinecone_api_key", &self.pinecone_api_key.as_ref().map(|_| "***"))
            .field("pinecone_environment", &self.pinecone_environment)
            .finish()
    }
}

impl Credentials {
    /// Read credentials for `backend` from the process environment.
    ///
    /// Every missing variable is reported at once in [`RagError::ConfigMissing`].
    #[inline]
    pub fn from_env(backend: Backend) -> crate::Result<Self> {
        Self::from_lookup(backend, |name| env::var(name).ok())
    }

    /// Like [`Credentials::from_env`] but with an injectable lookup.
    #[inline]
    pub fn from_lookup<F>(backend: Backend, lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut required = vec![OPENAI_API_KEY_VAR, PINECONE_INDEX_VAR];
        if backend == Backend::Pinecone {
            required.extend([PINECONE_API_KEY_VAR, PINECONE_ENV_VAR]);
        }

        let missing: Vec<String> = required
            .into_iter()
            .filter(|&name| read(name).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(RagError::ConfigMissing(missing));
        }

        Ok(Self {
            openai_api_key: read(OPENAI_API_KEY_VAR).unwrap_or_default(),
            index_name: read(PINECONE_INDEX_VAR).unwrap_or_default(),
            pinecone_api_key: read(PINECONE_API_KEY_VAR),
            pinecone_environment: read(PINECONE_ENV_VAR),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid cloud: {0:?} (cannot be empty)")]
    InvalidCloud(String),
    #[error("Invalid ingest source {}: {reason}", .path.display())]
    InvalidSource { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
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

    /// `$EIKEN_RAG_HOME`, or `~/.eiken-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = env::var_os(HOME_VAR).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir()
            .map(|home| home.join(".eiken-rag"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.vector_store.validate()?;
        self.ingest.validate()?;

        if !(1..=100).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Directory holding the local LanceDB tables
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn openai_url(&self) -> Result<Url, ConfigError> {
        self.openai.base_url()
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        validate_timeout(self.timeout_secs)?;

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_http_url(&self.base_url)
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        parse_http_url(&base_url)?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_chat_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.chat_model = model;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }

    pub fn set_retry_attempts(&mut self, attempts: u32) -> Result<(), ConfigError> {
        if !(1..=10).contains(&attempts) {
            return Err(ConfigError::InvalidRetryAttempts(attempts));
        }
        self.retry_attempts = attempts;
        Ok(())
    }
}

impl VectorStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == Backend::Pinecone {
            parse_http_url(&self.control_url)?;
            if self.cloud.trim().is_empty() {
                return Err(ConfigError::InvalidCloud(self.cloud.clone()));
            }
        }
        validate_timeout(self.timeout_secs)
    }

    pub fn control_url(&self) -> Result<Url, ConfigError> {
        parse_http_url(&self.control_url)
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        for source in &self.sources {
            if let Err(e) = source.namespace() {
                return Err(ConfigError::InvalidSource {
                    path: source.path.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}

impl RetrievalConfig {
    pub fn set_top_k(&mut self, top_k: usize) -> Result<(), ConfigError> {
        if !(1..=100).contains(&top_k) {
            return Err(ConfigError::InvalidTopK(top_k));
        }
        self.top_k = top_k;
        Ok(())
    }
}

fn parse_http_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl(value.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(value.to_string()));
    }
    Ok(url)
}

fn validate_timeout(timeout_secs: u64) -> Result<(), ConfigError> {
    if !(1..=600).contains(&timeout_secs) {
        return Err(ConfigError::InvalidTimeout(timeout_secs));
    }
    Ok(())
}
