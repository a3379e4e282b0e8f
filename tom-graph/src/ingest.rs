//! Text and directory ingestion.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tom_core::{GraphSettings, ModelTier};
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::embeddings::Embedder;
use crate::errors::{GraphError, GraphResult};
use crate::extract::Extractor;
use crate::models::{Entity, ExtractedEntity, Node, NodeVectors, Relation};
use crate::store::StoreAdapter;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub tier: ModelTier,
    /// Entities scored below this are pruned before relation extraction.
    pub min_importance: f32,
    pub extract_relations: bool,
    /// Files processed at once by [`IngestPipeline::ingest_directory`].
    pub concurrency: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            tier: ModelTier::default(),
            min_importance: 0.0,
            extract_relations: true,
            concurrency: 1,
        }
    }
}

impl From<&GraphSettings> for IngestOptions {
    fn from(settings: &GraphSettings) -> Self {
        Self {
            tier: settings.default_tier,
            min_importance: settings.ingest.min_importance,
            extract_relations: settings.ingest.extract_relations,
            concurrency: settings.ingest.concurrency.max(1),
        }
    }
}

/// Ids written by one `ingest_text` call.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IngestSummary {
    pub entities: Vec<String>,
    pub relations: Vec<String>,
    /// Entities pruned by `min_importance`.
    pub dropped: usize,
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileReport {
    pub file: PathBuf,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub entities: usize,
    pub relations: usize,
}

/// Extract, embed, upsert.
#[derive(Clone)]
pub struct IngestPipeline {
    extractor: Extractor,
    embedder: Arc<dyn Embedder>,
    store: StoreAdapter,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(
        extractor: Extractor,
        embedder: Arc<dyn Embedder>,
        store: StoreAdapter,
        options: IngestOptions,
    ) -> Self {
        Self {
            extractor,
            embedder,
            store,
            options,
        }
    }

    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn ingest_text(&self, text: &str) -> GraphResult<IngestSummary> {
        if text.trim().is_empty() {
            return Ok(IngestSummary::default());
        }
        let tier = self.options.tier;

        let extracted = self.extractor.extract_entities(text, tier).await?;
        let total = extracted.len();
        let kept: Vec<ExtractedEntity> = extracted
            .into_iter()
            .filter(|e| e.importance >= self.options.min_importance)
            .collect();
        let dropped = total - kept.len();

        let relations: Vec<Relation> = if self.options.extract_relations {
            self.extractor
                .extract_relations(text, &kept, tier)
                .await?
                .iter()
                .map(|r| r.to_relation())
                .collect()
        } else {
            Vec::new()
        };

        let entities: Vec<Entity> = kept.iter().map(ExtractedEntity::to_entity).collect();
        let entity_vectors = self
            .embed_pairs(
                entities.iter().map(|e| e.eid.clone()).collect(),
                entities
                    .iter()
                    .map(|e| format!("{}: {}", e.category.label(), e.eid))
                    .collect(),
            )
            .await?;
        let relation_vectors = self
            .embed_pairs(
                relations.iter().map(|r| r.name.clone()).collect(),
                relations.iter().map(|r| r.rid.clone()).collect(),
            )
            .await?;

        let summary = IngestSummary {
            entities: entities.iter().map(|e| e.eid.clone()).collect(),
            relations: relations.iter().map(|r| r.rid.clone()).collect(),
            dropped,
        };

        self.store
            .upsert_nodes(
                entities
                    .into_iter()
                    .map(Node::Entity)
                    .zip(entity_vectors)
                    .collect(),
            )
            .await?;
        self.store
            .upsert_nodes(
                relations
                    .into_iter()
                    .map(Node::Relation)
                    .zip(relation_vectors)
                    .collect(),
            )
            .await?;

        info!(
            entities = summary.entities.len(),
            relations = summary.relations.len(),
            dropped,
            "Ingested text"
        );
        Ok(summary)
    }

    /// Ingest every `*.<ext>` file directly inside `dir`, in name order.
    ///
    /// Per-file failures are reported, not raised. Only a directory that
    /// cannot be listed fails the whole call.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub async fn ingest_directory(&self, dir: &Path, ext: &str) -> GraphResult<Vec<FileReport>> {
        let files = list_files(dir, ext)?;
        info!(files = files.len(), "Ingesting directory");

        let reports = futures::stream::iter(files)
            .map(|path| self.ingest_file(path))
            .buffered(self.options.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let failed = reports.iter().filter(|r| !r.ok).count();
        if failed > 0 {
            warn!(failed, total = reports.len(), "Some files failed to ingest");
        }
        Ok(reports)
    }

    async fn ingest_file(&self, path: PathBuf) -> FileReport {
        let result = match tokio::fs::read_to_string(&path).await {
            Ok(text) => self.ingest_text(&text).await,
            Err(e) => Err(GraphError::Io(e)),
        };

        match result {
            Ok(summary) => FileReport {
                file: path,
                ok: true,
                error: None,
                entities: summary.entities.len(),
                relations: summary.relations.len(),
            },
            Err(e) => {
                warn!(file = %path.display(), error = %e, "File ingestion failed");
                FileReport {
                    file: path,
                    ok: false,
                    error: Some(e.to_string()),
                    entities: 0,
                    relations: 0,
                }
            }
        }
    }

    /// One embedding call per vector space.
    async fn embed_pairs(
        &self,
        primary: Vec<String>,
        secondary: Vec<String>,
    ) -> GraphResult<Vec<NodeVectors>> {
        if primary.is_empty() {
            return Ok(Vec::new());
        }
        let primary_vecs = self.embedder.embed_batch(&primary).await?;
        let secondary_vecs = self.embedder.embed_batch(&secondary).await?;
        if primary_vecs.len() != primary.len() || secondary_vecs.len() != secondary.len() {
            return Err(GraphError::Embedding(format!(
                "expected {} vectors per field, got {} and {}",
                primary.len(),
                primary_vecs.len(),
                secondary_vecs.len()
            )));
        }
        primary_vecs
            .into_iter()
            .zip(secondary_vecs)
            .map(|(p, s)| NodeVectors::new(p, s))
            .collect()
    }
}

fn list_files(dir: &Path, ext: &str) -> GraphResult<Vec<PathBuf>> {
    let ext = ext.trim_start_matches('.');
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == ext);
        if matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn list_files_is_flat_sorted_and_dot_insensitive() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.txt"), "b").unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::write(temp.path().join("c.md"), "c").unwrap();
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("nested").join("d.txt"), "d").unwrap();

        let names = |files: Vec<PathBuf>| -> Vec<String> {
            files
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(names(list_files(temp.path(), "txt").unwrap()), ["a.txt", "b.txt"]);
        assert_eq!(names(list_files(temp.path(), ".txt").unwrap()), ["a.txt", "b.txt"]);
        assert_eq!(names(list_files(temp.path(), "md").unwrap()), ["c.md"]);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = list_files(&temp.path().join("absent"), "txt").unwrap_err();
        assert!(matches!(err, GraphError::Io(_)));
    }

    #[test]
    fn options_follow_settings() {
        let mut settings = GraphSettings::default();
        settings.ingest.min_importance = 0.3;
        settings.ingest.concurrency = 0;
        settings.default_tier = ModelTier::Best;
        let options = IngestOptions::from(&settings);
        assert_eq!(options.tier, ModelTier::Best);
        assert_eq!(options.min_importance, 0.3);
        assert_eq!(options.concurrency, 1);
    }
}
