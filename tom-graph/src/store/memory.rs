use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::errors::{GraphError, GraphResult};
use crate::models::{Point, PointVectors, ScoredPoint};

use super::{
    CollectionConfig, Distance, ScrollPage, ScrollRequest, SearchRequest, VectorStore,
    cosine_distance, distance_to_score, l2_distance,
};

struct Collection {
    config: CollectionConfig,
    points: BTreeMap<String, Point>,
}

/// Process-local store with brute-force search.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
    closed: AtomicBool,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in `collection` (0 when absent).
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    fn check_open(&self) -> GraphResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GraphError::StoreUnavailable(
                "memory store is closed".to_string(),
            ));
        }
        Ok(())
    }
}

fn missing(collection: &str) -> GraphError {
    GraphError::StoreUnavailable(format!("collection {collection} does not exist"))
}

fn strip_vectors(point: &Point, with_vectors: bool) -> Point {
    Point {
        id: point.id.clone(),
        payload: point.payload.clone(),
        vectors: if with_vectors {
            point.vectors.clone()
        } else {
            None
        },
    }
}

#[async_trait::async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, name: &str, config: &CollectionConfig) -> GraphResult<bool> {
        self.check_open()?;
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(name) {
            if &existing.config != config {
                return Err(GraphError::CollectionMismatch(format!(
                    "collection {name} exists with a different vector layout"
                )));
            }
            return Ok(false);
        }
        collections.insert(
            name.to_string(),
            Collection {
                config: config.clone(),
                points: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> GraphResult<()> {
        self.check_open()?;
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        for mut point in points {
            point.vectors = point.vectors.map(PointVectors::into_named);
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
        with_vectors: bool,
    ) -> GraphResult<Vec<Point>> {
        self.check_open()?;
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(ids
            .iter()
            .filter_map(|id| target.points.get(id))
            .map(|point| strip_vectors(point, with_vectors))
            .collect())
    }

    async fn scroll(&self, collection: &str, request: ScrollRequest) -> GraphResult<ScrollPage> {
        self.check_open()?;
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        let start = match &request.offset {
            Some(offset) => Bound::Included(offset.clone()),
            None => Bound::Unbounded,
        };
        let mut matching = target
            .points
            .range((start, Bound::Unbounded))
            .map(|(_, point)| point)
            .filter(|point| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|filter| filter.matches(&point.payload))
            });

        let points: Vec<Point> = matching
            .by_ref()
            .take(request.limit)
            .map(|point| strip_vectors(point, request.with_vectors))
            .collect();
        let next_page_offset = matching.next().map(|point| point.id.clone());

        Ok(ScrollPage {
            points,
            next_page_offset,
        })
    }

    async fn search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> GraphResult<Vec<ScoredPoint>> {
        self.check_open()?;
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        let params = target
            .config
            .vectors
            .get(&request.vector_name)
            .ok_or_else(|| {
                GraphError::CollectionMismatch(format!(
                    "collection {collection} has no vector named {}",
                    request.vector_name
                ))
            })?;

        let mut hits: Vec<ScoredPoint> = target
            .points
            .values()
            .filter(|point| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|filter| filter.matches(&point.payload))
            })
            .filter_map(|point| {
                let vector = point.vectors.as_ref()?.get_named(&request.vector_name)?;
                let distance = match params.distance {
                    Distance::Cosine => cosine_distance(vector, &request.vector),
                    Distance::Euclid => l2_distance(vector, &request.vector),
                };
                Some(ScoredPoint {
                    point: strip_vectors(point, request.with_vectors),
                    score: distance_to_score(params.distance, distance),
                })
            })
            .collect();

        // Ties fall back to id order so results are stable.
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.point.id.cmp(&b.point.id))
        });
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
