//! Settings configuration loaded from TOML files.
//!
//! This module handles non-sensitive configuration stored in TOML format
//! in the XDG config directory (~/.config/tom/config.toml).

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tier::ModelTier;

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# tom configuration file
# Located at: ~/.config/tom/config.toml
#
# This file contains non-sensitive configuration.
# The LLM API key is loaded from the environment:
#   - TOM_LLM_API_KEY (falls back to OPENAI_API_KEY)

[llm]
base_url = "https://api.openai.com/v1"
default_tier = "balanced"
timeout_seconds = 120

[llm.models]
fast = "gpt-4o-mini"
balanced = "gpt-4o"
best = "gpt-4.1"

[embedding]
url = "http://127.0.0.1:11434"
model = "qwen3-embedding:8b"
# dim = 4096  # Probed from the embedding server if not set
batch = 32
timeout_seconds = 60

[store]
# db_path = "/var/lib/tom/graph.sqlite3"
collection = "tom"
timeout_ms = 10000
page_size = 100

[ingest]
min_importance = 0.0
extract_relations = true
concurrency = 1
extension = "txt"

[logging]
level = "info"
"#;

/// Settings loaded from TOML configuration file.
///
/// Every section is optional; missing values are filled in when the
/// settings are resolved into a [`GraphSettings`](super::GraphSettings).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Structured extraction model settings
    #[serde(default)]
    pub llm: LlmSettings,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Vector store settings
    #[serde(default)]
    pub store: StoreSettings,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub ingest: IngestSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// LLM (structured extraction) configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LlmSettings {
    /// Base URL of an OpenAI-compatible API
    pub base_url: Option<String>,

    /// Tier used when a caller does not pick one
    pub default_tier: Option<ModelTier>,

    /// Request timeout in seconds
    pub timeout_seconds: Option<u64>,

    /// Model id per tier
    #[serde(default)]
    pub models: TierModelSettings,
}

/// Model ids keyed by tier
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TierModelSettings {
    pub fast: Option<String>,
    pub balanced: Option<String>,
    pub best: Option<String>,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EmbeddingSettings {
    /// Embedding provider base URL
    pub url: Option<String>,

    /// Embedding model name
    pub model: Option<String>,

    /// Embedding dimension (if known)
    pub dim: Option<usize>,

    /// Embedding batch size
    pub batch: Option<usize>,

    /// Request timeout in seconds
    pub timeout_seconds: Option<u64>,
}

/// Vector store configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreSettings {
    /// Optional override for the SQLite database path
    pub db_path: Option<String>,

    /// Collection holding entity and relation points
    pub collection: Option<String>,

    /// Per-call timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Scroll page size
    pub page_size: Option<usize>,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngestSettings {
    /// Entities scored below this importance are not stored
    pub min_importance: Option<f32>,

    /// Run the relation extraction pass
    pub extract_relations: Option<bool>,

    /// Number of files ingested at once by `ingest-dir`
    pub concurrency: Option<usize>,

    /// File extension picked up by `ingest-dir`
    pub extension: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the default configuration file.
    ///
    /// Creates the file with defaults if it does not exist yet.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Get the configuration file path.
    ///
    /// Uses XDG config directory: `~/.config/tom/config.toml`
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("TOM_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("tom");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }
}
