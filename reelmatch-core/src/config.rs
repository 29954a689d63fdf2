use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

/// Store-imposed ceilings the batch settings are validated against.
pub const STORE_MAX_TOP_K: usize = 10_000;
pub const STORE_MAX_FETCH_BATCH: usize = 100;
pub const STORE_MAX_DELETE_BATCH: usize = 1_000;

#[derive(Debug, Deserialize, Clone)]
pub struct ReelmatchConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// "pinecone" or "memory"
    pub backend: String,
    #[serde(default)]
    pub index_host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl StoreConfig {
    /// API key from the file, falling back to `PINECONE_API_KEY`.
    pub fn resolved_api_key(&self) -> String {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("PINECONE_API_KEY").ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// "twelvelabs"
    pub backend: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_option")]
    pub embedding_option: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ProviderConfig {
    /// API key from the file, falling back to `TWELVE_LABS_API_KEY`.
    pub fn resolved_api_key(&self) -> String {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("TWELVE_LABS_API_KEY").ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BatchingConfig {
    pub upsert: usize,
    pub fetch: usize,
    pub delete: usize,
    pub query_page: usize,
    pub max_top_k: usize,
    pub max_delete_passes: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            upsert: 5,
            fetch: 100,
            delete: 1_000,
            query_page: 1_000,
            max_top_k: 1_000,
            max_delete_passes: 1,
        }
    }
}

impl BatchingConfig {
    /// Reject zero sizes and sizes above what the store accepts per call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("upsert", self.upsert, usize::MAX),
            ("fetch", self.fetch, STORE_MAX_FETCH_BATCH),
            ("delete", self.delete, STORE_MAX_DELETE_BATCH),
            ("query_page", self.query_page, STORE_MAX_TOP_K),
            ("max_top_k", self.max_top_k, STORE_MAX_TOP_K),
            ("max_delete_passes", self.max_delete_passes, usize::MAX),
        ];
        for (name, value, ceiling) in checks {
            if value == 0 || value > ceiling {
                return Err(ConfigError::Message(format!(
                    "batching.{} must be between 1 and {}, got {}",
                    name, ceiling, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub text_top_k: usize,
    pub seed_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            text_top_k: 10,
            seed_top_k: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub request_deadline_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
            request_deadline_seconds: 120,
        }
    }
}

fn default_dimension() -> usize {
    1024
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_api_version() -> String {
    "2025-01".to_string()
}

fn default_embedding_option() -> String {
    "visual-text".to_string()
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl ReelmatchConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("REELMATCH").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.batching.validate()?;
        Ok(config)
    }

    /// Parse an inline TOML document (no environment overrides).
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.batching.validate()?;
        Ok(config)
    }
}
