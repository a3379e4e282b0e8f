//! Vector store seam and the adapter that owns the TOM collection.
//!
//! [`VectorStore`] is the collaborator contract (collection creation plus
//! upsert/retrieve/scroll/search). [`StoreAdapter`] binds one store to one
//! collection, validates requests, and applies the per-call timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{GraphError, GraphResult};
use crate::filter::Filter;
use crate::models::{Node, NodeVectors, Point, ScoredPoint, VectorField};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Similarity metric of a named vector field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Score is `1 - cosine distance`.
    Cosine,
    /// Score is the negated L2 distance.
    Euclid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorParams {
    pub size: usize,
    pub distance: Distance,
}

/// Collection layout: one entry per named vector field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionConfig {
    pub vectors: BTreeMap<String, VectorParams>,
}

impl CollectionConfig {
    /// The TOM layout: `primary` and `secondary`, both cosine, size `dim`.
    pub fn dual(dim: usize) -> Self {
        let vectors = VectorField::ALL
            .into_iter()
            .map(|field| {
                (
                    field.as_str().to_string(),
                    VectorParams {
                        size: dim,
                        distance: Distance::Cosine,
                    },
                )
            })
            .collect();
        Self { vectors }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrollRequest {
    pub filter: Option<Filter>,
    pub limit: usize,
    /// Inclusive point id to resume from.
    pub offset: Option<String>,
    pub with_vectors: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<Point>,
    /// First id of the next page; `None` on the last page.
    pub next_page_offset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector_name: String,
    pub vector: Vec<f32>,
    pub filter: Option<Filter>,
    pub limit: usize,
    pub with_vectors: bool,
}

/// Vector-native point store.
///
/// Implementations must make `upsert` last-write-wins per point id and
/// order `scroll` pages by point id.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if needed. Returns `true` when it was created.
    async fn ensure_collection(&self, name: &str, config: &CollectionConfig) -> GraphResult<bool>;

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> GraphResult<()>;

    /// Points for the ids that exist, in request order.
    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
        with_vectors: bool,
    ) -> GraphResult<Vec<Point>>;

    async fn scroll(&self, collection: &str, request: ScrollRequest) -> GraphResult<ScrollPage>;

    /// Points ranked by similarity, best first.
    async fn search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> GraphResult<Vec<ScoredPoint>>;

    /// Release connections. Later calls fail with `StoreUnavailable`.
    async fn close(&self) {}
}

/// One collection on one store, with timeouts and request validation.
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn VectorStore>,
    collection: String,
    dim: usize,
    timeout: Duration,
}

impl std::fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("collection", &self.collection)
            .field("dim", &self.dim)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StoreAdapter {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        dim: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            dim,
            timeout,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Create the dual-vector collection if it does not exist.
    pub async fn init(&self) -> GraphResult<()> {
        let config = CollectionConfig::dual(self.dim);
        let created = self
            .timed(
                "ensure_collection",
                self.store.ensure_collection(&self.collection, &config),
            )
            .await?;
        if created {
            tracing::info!(
                collection = %self.collection,
                dim = self.dim,
                "Created collection"
            );
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    /// Upsert one typed node with its two vectors.
    pub async fn upsert_node(&self, node: Node, vectors: NodeVectors) -> GraphResult<()> {
        self.upsert_nodes(vec![(node, vectors)]).await
    }

    pub async fn upsert_nodes(&self, nodes: Vec<(Node, NodeVectors)>) -> GraphResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let points = nodes
            .into_iter()
            .map(|(node, vectors)| {
                self.check_dim(vectors.dim())?;
                node.into_point(vectors)
            })
            .collect::<GraphResult<Vec<_>>>()?;
        self.upsert(points).await
    }

    pub async fn upsert(&self, points: Vec<Point>) -> GraphResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        debug!(count = points.len(), "upsert points");
        self.timed("upsert", self.store.upsert(&self.collection, points))
            .await
    }

    pub async fn retrieve(&self, ids: &[String], with_vectors: bool) -> GraphResult<Vec<Point>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.timed(
            "retrieve",
            self.store.retrieve(&self.collection, ids, with_vectors),
        )
        .await
    }

    pub async fn scroll(
        &self,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> GraphResult<ScrollPage> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let request = ScrollRequest {
            filter: filter.cloned(),
            limit: limit.max(1),
            offset,
            with_vectors: false,
        };
        self.timed("scroll", self.store.scroll(&self.collection, request))
            .await
    }

    pub async fn search(
        &self,
        field: VectorField,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> GraphResult<Vec<ScoredPoint>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        self.check_dim(vector.len())?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let request = SearchRequest {
            vector_name: field.as_str().to_string(),
            vector: vector.to_vec(),
            filter: filter.cloned(),
            limit,
            with_vectors: false,
        };
        self.timed("search", self.store.search(&self.collection, request))
            .await
    }

    fn check_dim(&self, actual: usize) -> GraphResult<()> {
        if actual != self.dim {
            return Err(GraphError::EmbeddingDimMismatch {
                expected: self.dim,
                actual,
            });
        }
        Ok(())
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = GraphResult<T>>,
    ) -> GraphResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::StoreTimeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Cosine distance in [0, 2]; zero vectors are maximally distant.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Convert a backend distance into a "higher is closer" score.
pub(crate) fn distance_to_score(distance: Distance, value: f32) -> f32 {
    match distance {
        Distance::Cosine => 1.0 - value,
        Distance::Euclid => -value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Entity};

    struct SlowStore;

    #[async_trait::async_trait]
    impl VectorStore for SlowStore {
        async fn ensure_collection(&self, _: &str, _: &CollectionConfig) -> GraphResult<bool> {
            Ok(false)
        }

        async fn upsert(&self, _: &str, _: Vec<Point>) -> GraphResult<()> {
            Ok(())
        }

        async fn retrieve(&self, _: &str, _: &[String], _: bool) -> GraphResult<Vec<Point>> {
            Ok(Vec::new())
        }

        async fn scroll(&self, _: &str, _: ScrollRequest) -> GraphResult<ScrollPage> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ScrollPage::default())
        }

        async fn search(&self, _: &str, _: SearchRequest) -> GraphResult<Vec<ScoredPoint>> {
            Ok(Vec::new())
        }
    }

    fn slow_adapter() -> StoreAdapter {
        StoreAdapter::new(Arc::new(SlowStore), "tom", 2, Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let err = slow_adapter().scroll(None, 10, None).await.unwrap_err();
        assert!(matches!(
            err,
            GraphError::StoreTimeout {
                operation: "scroll",
                timeout_ms: 50
            }
        ));
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected_before_dispatch() {
        let filter = Filter::must([crate::filter::Condition::matches("a.b", "x")]);
        let err = slow_adapter()
            .scroll(Some(&filter), 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let adapter = slow_adapter();
        let err = adapter
            .search(VectorField::Primary, &[1.0, 2.0, 3.0], None, 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::EmbeddingDimMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let node = Node::Entity(Entity {
            eid: "fever".to_string(),
            category: Category::Symptom,
            importance: None,
        });
        let vectors = NodeVectors::new(vec![1.0], vec![1.0]).unwrap();
        assert!(adapter.upsert_node(node, vectors).await.is_err());
    }

    #[tokio::test]
    async fn empty_retrieve_skips_the_store() {
        let ids: Vec<String> = Vec::new();
        assert!(slow_adapter().retrieve(&ids, false).await.unwrap().is_empty());
    }

    #[test]
    fn distances() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert!((l2_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(distance_to_score(Distance::Cosine, 0.25), 0.75);
        assert_eq!(distance_to_score(Distance::Euclid, 2.0), -2.0);
    }
}
