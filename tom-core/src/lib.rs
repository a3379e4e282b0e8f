//! Shared configuration for the TOM knowledge graph.

pub mod config;
pub mod tier;

// Config re-exports
pub use config::{
    Config, ConfigError, EmbeddingSettings, GraphSettings, IngestDefaults, IngestSettings,
    LlmSettings, LoggingSettings, Secrets, SecretsError, Settings, SettingsError, StoreSettings,
    TierModels, load_dotenv,
};
pub use tier::ModelTier;
