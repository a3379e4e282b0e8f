//! Configuration management for tom.
//!
//! This module provides a unified configuration system that separates
//! secrets (from environment variables) from settings (from TOML files).
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `TOM_LLM_API_KEY` - API key for the structured extraction model
//!   (falls back to `OPENAI_API_KEY`)
//!
//! ## Settings (TOML File)
//! Located at `~/.config/tom/config.toml`:
//! ```toml
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! default_tier = "balanced"
//!
//! [embedding]
//! url = "http://127.0.0.1:11434"
//! model = "qwen3-embedding:8b"
//!
//! [store]
//! collection = "tom"
//!
//! [logging]
//! level = "info"
//! ```

pub mod graph;
mod secrets;
mod settings;

pub use graph::{GraphSettings, IngestDefaults, TierModels};
pub use secrets::{Secrets, SecretsError};
pub use settings::{
    EmbeddingSettings, IngestSettings, LlmSettings, LoggingSettings, Settings, SettingsError,
    StoreSettings, TierModelSettings,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Embedding batch size must be at least 1")]
    InvalidEmbeddingBatch,

    #[error("Collection name must not be empty")]
    EmptyCollection,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// This loads:
    /// 1. Secrets from environment variables
    /// 2. Settings from TOML file (creating defaults if needed)
    pub fn load() -> Result<Self, ConfigError> {
        load_dotenv();
        let secrets = Secrets::from_env()?;
        let settings = Settings::load()?;
        let config = Self { secrets, settings };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.embedding.batch == Some(0) {
            return Err(ConfigError::InvalidEmbeddingBatch);
        }
        if self
            .settings
            .store
            .collection
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(ConfigError::EmptyCollection);
        }
        Ok(())
    }

    /// Resolved settings for the graph engine.
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings::from(&self.settings)
    }

    /// Get the LLM API key (if configured).
    pub fn llm_api_key(&self) -> Option<&str> {
        self.secrets.llm_api_key.as_deref()
    }

    /// Configured log level.
    pub fn log_level(&self) -> &str {
        &self.settings.logging.level
    }
}

/// Load .env file if it exists (for development convenience).
///
/// This is called automatically by `Config::load()` but is also
/// exported for use in other contexts.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut settings = Settings::default();
        settings.embedding.batch = Some(0);
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEmbeddingBatch)
        ));
    }

    #[test]
    fn test_validate_rejects_blank_collection() {
        let mut settings = Settings::default();
        settings.store.collection = Some("  ".to_string());
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCollection)));
    }

    #[test]
    fn test_graph_settings_and_accessors() {
        let mut settings = Settings::default();
        settings.store.collection = Some("clinical".to_string());
        let config = Config {
            secrets: Secrets {
                llm_api_key: Some("sk-test".to_string()),
            },
            settings,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.graph_settings().collection, "clinical");
        assert_eq!(config.llm_api_key(), Some("sk-test"));
        assert_eq!(config.log_level(), "info");
    }
}
