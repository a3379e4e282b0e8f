//! Shared fixtures for integration tests: a scripted LLM, a deterministic
//! embedder, and a store wrapper that counts calls.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use tom_graph::models::{Point, ScoredPoint};
use tom_graph::store::{
    CollectionConfig, MemoryVectorStore, ScrollPage, ScrollRequest, SearchRequest, StoreAdapter,
    VectorStore,
};
use tom_graph::{
    Embedder, GraphEngine, GraphResult, GraphSettings, LlmError, ModelTier, StructuredLlm,
};

pub const DIM: usize = 128;

/// One canned answer, chosen when the prompt contains `needle`.
struct Script {
    needle: String,
    entities: Result<Value, String>,
    relations: Value,
}

/// LLM stub that answers from scripts keyed by a substring of the text.
///
/// Entity and relation passes are told apart by the schema's top-level
/// property. Unmatched prompts get empty lists.
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<Vec<Script>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, needle: &str, entities: Value, relations: Value) {
        self.scripts.lock().unwrap().push(Script {
            needle: needle.to_string(),
            entities: Ok(entities),
            relations,
        });
    }

    pub fn fail_on(&self, needle: &str, message: &str) {
        self.scripts.lock().unwrap().push(Script {
            needle: needle.to_string(),
            entities: Err(message.to_string()),
            relations: json!({"relations": []}),
        });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StructuredLlm for ScriptedLlm {
    async fn structured_prompt(
        &self,
        prompt: &str,
        schema: &Value,
        _tier: ModelTier,
    ) -> Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let wants_relations = schema["properties"].get("relations").is_some();
        let scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.iter().find(|s| prompt.contains(&s.needle)) else {
            return Ok(if wants_relations {
                json!({"relations": []})
            } else {
                json!({"entities": []})
            });
        };
        if wants_relations {
            return Ok(script.relations.clone());
        }
        script.entities.clone().map_err(|message| LlmError::Api {
            status: 500,
            message,
        })
    }
}

/// Bag-of-words hashing embedder: texts sharing words land close together.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    // Constant component keeps every vector non-zero.
    vector[DIM - 1] = 0.1;
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % (DIM as u64 - 1)) as usize] += 1.0;
    }
    vector
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> GraphResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| hash_embed(text)).collect())
    }
}

/// Delegating store that counts calls per primitive.
pub struct CountingStore {
    inner: MemoryVectorStore,
    pub scrolls: AtomicUsize,
    pub retrieves: AtomicUsize,
    pub searches: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryVectorStore::new(),
            scrolls: AtomicUsize::new(0),
            retrieves: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
        })
    }

    pub fn scrolls(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }

    pub fn retrieves(&self) -> usize {
        self.retrieves.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VectorStore for CountingStore {
    async fn ensure_collection(&self, name: &str, config: &CollectionConfig) -> GraphResult<bool> {
        self.inner.ensure_collection(name, config).await
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> GraphResult<()> {
        self.inner.upsert(collection, points).await
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
        with_vectors: bool,
    ) -> GraphResult<Vec<Point>> {
        self.retrieves.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(collection, ids, with_vectors).await
    }

    async fn scroll(&self, collection: &str, request: ScrollRequest) -> GraphResult<ScrollPage> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        self.inner.scroll(collection, request).await
    }

    async fn search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> GraphResult<Vec<ScoredPoint>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(collection, request).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// An initialized adapter over a counting memory store.
pub async fn counting_adapter(dim: usize) -> (StoreAdapter, Arc<CountingStore>) {
    let store = CountingStore::new();
    let adapter = StoreAdapter::new(store.clone(), "tom", dim, Duration::from_secs(5));
    adapter.init().await.expect("init collection");
    (adapter, store)
}

pub fn test_settings() -> GraphSettings {
    GraphSettings {
        embedding_dim: Some(DIM),
        ..Default::default()
    }
}

/// Engine over in-memory collaborators.
pub async fn memory_engine(
    settings: GraphSettings,
    llm: Arc<ScriptedLlm>,
) -> (GraphEngine, Arc<CountingStore>, Arc<HashEmbedder>) {
    let store = CountingStore::new();
    let embedder = HashEmbedder::new();
    let engine = GraphEngine::open(settings, llm, embedder.clone(), store.clone())
        .await
        .expect("open engine");
    (engine, store, embedder)
}

/// Entity rows in the shape the extractor expects.
pub fn entities(rows: &[(&str, Option<&str>, f64)]) -> Value {
    json!({
        "entities": rows
            .iter()
            .map(|(name, category, importance)| {
                json!({"name": name, "category": category, "importance": importance})
            })
            .collect::<Vec<_>>()
    })
}

pub fn relations(rows: &[(&str, &str, &str)]) -> Value {
    json!({
        "relations": rows
            .iter()
            .map(|(source, relation, target)| {
                json!({"source": source, "relation": relation, "target": target})
            })
            .collect::<Vec<_>>()
    })
}
