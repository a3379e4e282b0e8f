//! Knowledge graph configuration types.
//!
//! These types define the resolved (non-optional) settings used by
//! `tom-graph`. They are created from the user-facing TOML structs via
//! `From<&Settings>`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::settings::{IngestSettings, Settings};
use crate::tier::ModelTier;

/// Resolved graph engine settings (all values filled with defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default)]
    pub llm_models: TierModels,
    #[serde(default)]
    pub default_tier: ModelTier,
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_dim: Option<usize>,
    #[serde(default = "default_embedding_batch")]
    pub embedding_batch: usize,
    #[serde(default = "default_embedding_timeout_seconds")]
    pub embedding_timeout_seconds: u64,
    /// Override the SQLite database location. Primarily for testing.
    #[serde(default)]
    pub db_path_override: Option<PathBuf>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub ingest: IngestDefaults,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            llm_base_url: default_llm_base_url(),
            llm_models: TierModels::default(),
            default_tier: ModelTier::default(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
            embedding_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            embedding_dim: None,
            embedding_batch: default_embedding_batch(),
            embedding_timeout_seconds: default_embedding_timeout_seconds(),
            db_path_override: None,
            collection: default_collection(),
            store_timeout_ms: default_store_timeout_ms(),
            page_size: default_page_size(),
            ingest: IngestDefaults::default(),
        }
    }
}

/// Model id per [`ModelTier`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierModels {
    pub fast: String,
    pub balanced: String,
    pub best: String,
}

impl TierModels {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Balanced => &self.balanced,
            ModelTier::Best => &self.best,
        }
    }
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            fast: "gpt-4o-mini".to_string(),
            balanced: "gpt-4o".to_string(),
            best: "gpt-4.1".to_string(),
        }
    }
}

/// Resolved ingestion knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestDefaults {
    /// Entities with a lower importance are pruned before upsert.
    #[serde(default)]
    pub min_importance: f32,
    #[serde(default = "default_extract_relations")]
    pub extract_relations: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for IngestDefaults {
    fn default() -> Self {
        Self {
            min_importance: 0.0,
            extract_relations: default_extract_relations(),
            concurrency: default_concurrency(),
            extension: default_extension(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    120
}

fn default_embedding_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_embedding_model() -> String {
    "qwen3-embedding:8b".to_string()
}

fn default_embedding_batch() -> usize {
    32
}

fn default_embedding_timeout_seconds() -> u64 {
    60
}

fn default_collection() -> String {
    "tom".to_string()
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> usize {
    100
}

fn default_extract_relations() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_extension() -> String {
    "txt".to_string()
}

impl From<&Settings> for GraphSettings {
    fn from(value: &Settings) -> Self {
        let mut settings = GraphSettings::default();

        if let Some(url) = &value.llm.base_url {
            settings.llm_base_url = url.clone();
        }
        if let Some(tier) = value.llm.default_tier {
            settings.default_tier = tier;
        }
        if let Some(seconds) = value.llm.timeout_seconds {
            settings.llm_timeout_seconds = seconds;
        }
        if let Some(model) = &value.llm.models.fast {
            settings.llm_models.fast = model.clone();
        }
        if let Some(model) = &value.llm.models.balanced {
            settings.llm_models.balanced = model.clone();
        }
        if let Some(model) = &value.llm.models.best {
            settings.llm_models.best = model.clone();
        }

        if let Some(url) = &value.embedding.url {
            settings.embedding_url = url.clone();
        }
        if let Some(model) = &value.embedding.model {
            settings.embedding_model = model.clone();
        }
        if let Some(dim) = value.embedding.dim {
            settings.embedding_dim = Some(dim);
        }
        if let Some(batch) = value.embedding.batch {
            settings.embedding_batch = batch.max(1);
        }
        if let Some(seconds) = value.embedding.timeout_seconds {
            settings.embedding_timeout_seconds = seconds;
        }

        if let Some(path) = &value.store.db_path {
            settings.db_path_override = Some(PathBuf::from(path));
        }
        if let Some(collection) = &value.store.collection {
            settings.collection = collection.clone();
        }
        if let Some(ms) = value.store.timeout_ms {
            settings.store_timeout_ms = ms;
        }
        if let Some(page_size) = value.store.page_size {
            settings.page_size = page_size.max(1);
        }

        apply_ingest_overrides(&mut settings.ingest, &value.ingest);
        settings
    }
}

fn apply_ingest_overrides(ingest: &mut IngestDefaults, overrides: &IngestSettings) {
    if let Some(min_importance) = overrides.min_importance {
        ingest.min_importance = min_importance.clamp(0.0, 1.0);
    }
    if let Some(extract_relations) = overrides.extract_relations {
        ingest.extract_relations = extract_relations;
    }
    if let Some(concurrency) = overrides.concurrency {
        ingest.concurrency = concurrency.max(1);
    }
    if let Some(extension) = &overrides.extension {
        ingest.extension = extension.trim_start_matches('.').to_string();
    }
}
