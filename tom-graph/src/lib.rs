//! TOM: a typed knowledge graph built from free text.
//!
//! Text is turned into categorized entities and named relations by a
//! structured LLM pass, each node gets two embeddings, and everything lands
//! in one vector collection that the query engine reads back.

pub mod embeddings;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod filter;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod paths;
pub mod query;
pub mod store;

pub use embeddings::{Embedder, EmbeddingClient};
pub use engine::GraphEngine;
pub use errors::{GraphError, GraphResult};
pub use extract::Extractor;
pub use filter::{Condition, Filter};
pub use ingest::{FileReport, IngestOptions, IngestPipeline, IngestSummary};
pub use llm::{LlmError, OpenAiCompatibleClient, StructuredLlm};
pub use models::{
    Category, Entity, ExtractedEntity, ExtractedRelation, Node, NodeKind, NodeVectors, Point,
    PointVectors, Relation, Scored, VectorField,
};
pub use query::{QueryEngine, TraversalOptions, TraversalStep};
pub use store::{MemoryVectorStore, SqliteVectorStore, StoreAdapter, VectorStore};
pub use tom_core::{GraphSettings, ModelTier};
