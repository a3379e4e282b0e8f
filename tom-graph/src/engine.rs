use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tom_core::{Config, GraphSettings};

use crate::embeddings::{Embedder, EmbeddingClient};
use crate::errors::{GraphError, GraphResult};
use crate::extract::Extractor;
use crate::ingest::{FileReport, IngestOptions, IngestPipeline, IngestSummary};
use crate::llm::{OpenAiCompatibleClient, StructuredLlm};
use crate::models::{Entity, Relation, Scored, VectorField};
use crate::paths::graph_db_path;
use crate::query::QueryEngine;
use crate::store::{SqliteVectorStore, StoreAdapter, VectorStore};

const DIMENSION_PROBE: &str = "dimension probe";

/// Ingestion and queries over one collection, with collaborators built once.
#[derive(Clone)]
pub struct GraphEngine {
    settings: GraphSettings,
    embedder: Arc<dyn Embedder>,
    store: StoreAdapter,
    pipeline: IngestPipeline,
    query: QueryEngine,
}

impl GraphEngine {
    /// Wire the engine from explicit collaborators and create the collection.
    ///
    /// When `embedding_dim` is unset the dimension is probed with one
    /// embedding call.
    pub async fn open(
        settings: GraphSettings,
        llm: Arc<dyn StructuredLlm>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> GraphResult<Self> {
        let dim = match settings.embedding_dim {
            Some(dim) => dim,
            None => embedder.embed(DIMENSION_PROBE).await?.len(),
        };
        if dim == 0 {
            return Err(GraphError::Embedding(
                "embedding dimension is zero".to_string(),
            ));
        }

        let adapter = StoreAdapter::new(
            store,
            settings.collection.clone(),
            dim,
            Duration::from_millis(settings.store_timeout_ms),
        );
        adapter.init().await?;

        let pipeline = IngestPipeline::new(
            Extractor::new(llm),
            embedder.clone(),
            adapter.clone(),
            IngestOptions::from(&settings),
        );
        let query = QueryEngine::with_page_size(adapter.clone(), settings.page_size);

        tracing::info!(
            collection = %settings.collection,
            dim,
            "Graph engine ready"
        );
        Ok(Self {
            settings,
            embedder,
            store: adapter,
            pipeline,
            query,
        })
    }

    /// SQLite store, OpenAI-compatible LLM and `/api/embed` embedder.
    pub async fn open_default(config: &Config) -> GraphResult<Self> {
        Self::open_sqlite(config.graph_settings(), config.llm_api_key()).await
    }

    /// Like [`GraphEngine::open_default`], with already resolved settings.
    pub async fn open_sqlite(settings: GraphSettings, api_key: Option<&str>) -> GraphResult<Self> {
        let path = graph_db_path(&settings)?;
        let store = SqliteVectorStore::open(&path).await?;
        let llm = OpenAiCompatibleClient::from_settings(&settings, api_key.map(str::to_string))?;
        let embedder = EmbeddingClient::new(&settings)?;
        tracing::debug!(db = %path.display(), "Opening graph store");
        Self::open(settings, Arc::new(llm), Arc::new(embedder), Arc::new(store)).await
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn store(&self) -> &StoreAdapter {
        &self.store
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub async fn ingest_text(&self, text: &str) -> GraphResult<IngestSummary> {
        self.pipeline.ingest_text(text).await
    }

    /// `ext` defaults to the configured ingest extension.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        ext: Option<&str>,
    ) -> GraphResult<Vec<FileReport>> {
        let ext = ext.unwrap_or(&self.settings.ingest.extension);
        self.pipeline.ingest_directory(dir, ext).await
    }

    /// Embed `text` and search entities on `field`.
    pub async fn search_entities(
        &self,
        text: &str,
        field: VectorField,
        limit: usize,
    ) -> GraphResult<Vec<Scored<Entity>>> {
        let vector = self.embedder.embed(text).await?;
        self.query
            .semantic_search_entities(field, &vector, limit)
            .await
    }

    /// Embed `text` and search relations on `field`.
    pub async fn search_relations(
        &self,
        text: &str,
        field: VectorField,
        limit: usize,
    ) -> GraphResult<Vec<Scored<Relation>>> {
        let vector = self.embedder.embed(text).await?;
        self.query
            .semantic_search_relations(field, &vector, limit)
            .await
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
