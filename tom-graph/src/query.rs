//! Read-side operations composed from the store adapter primitives.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::instrument;

use crate::errors::{GraphError, GraphResult};
use crate::filter::{Condition, Filter};
use crate::models::{
    Category, Entity, NodeKind, Point, Relation, Scored, VectorField, normalize_eid,
    normalize_relation_name,
};
use crate::store::StoreAdapter;

/// Page size used by [`QueryEngine::scroll_all`] unless overridden.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub max_depth: usize,
    /// Follow only relations with this (normalized) name.
    pub relation: Option<String>,
    pub max_nodes: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            relation: None,
            max_nodes: 100,
        }
    }
}

/// One entity reached by [`QueryEngine::traverse`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraversalStep {
    pub entity: Entity,
    pub depth: usize,
    /// Relation followed to reach this entity; `None` for the start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<Relation>,
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: StoreAdapter,
    page_size: usize,
}

impl QueryEngine {
    pub fn new(store: StoreAdapter) -> Self {
        Self::with_page_size(store, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: StoreAdapter, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Every point matching `filter`, fetched page by page.
    #[instrument(skip(self, filter))]
    pub async fn scroll_all(&self, filter: &Filter) -> GraphResult<Vec<Point>> {
        let mut points = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .store
                .scroll(Some(filter), self.page_size, offset)
                .await?;
            points.extend(page.points);
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        tracing::debug!(count = points.len(), "scroll complete");
        Ok(points)
    }

    async fn entities_where(&self, filter: &Filter) -> GraphResult<Vec<Entity>> {
        self.scroll_all(filter)
            .await?
            .iter()
            .map(Entity::try_from)
            .collect()
    }

    async fn relations_where(&self, filter: &Filter) -> GraphResult<Vec<Relation>> {
        self.scroll_all(filter)
            .await?
            .iter()
            .map(Relation::try_from)
            .collect()
    }

    pub async fn get_all_entities(&self) -> GraphResult<Vec<Entity>> {
        self.entities_where(&Filter::kind(NodeKind::Entity)).await
    }

    pub async fn get_all_relations(&self) -> GraphResult<Vec<Relation>> {
        self.relations_where(&Filter::kind(NodeKind::Relation)).await
    }

    pub async fn get_entities_by_category(&self, category: Category) -> GraphResult<Vec<Entity>> {
        self.entities_where(&Filter::entities_in(category)).await
    }

    /// Outgoing edges of `source_eid`.
    pub async fn get_relations_for_entity(&self, source_eid: &str) -> GraphResult<Vec<Relation>> {
        let source_eid = normalize_eid(source_eid);
        let filter =
            Filter::kind(NodeKind::Relation).and(Condition::matches("source_eid", source_eid));
        self.relations_where(&filter).await
    }

    /// Incoming edges of `dest_eid`.
    pub async fn get_incoming_relations(&self, dest_eid: &str) -> GraphResult<Vec<Relation>> {
        let dest_eid = normalize_eid(dest_eid);
        let filter =
            Filter::kind(NodeKind::Relation).and(Condition::matches("dest_eid", dest_eid));
        self.relations_where(&filter).await
    }

    /// Exact lookup; `eid` is normalized the way extraction stores it.
    pub async fn get_entity(&self, eid: &str) -> GraphResult<Entity> {
        let eid = normalize_eid(eid);
        let points = self.store.retrieve(std::slice::from_ref(&eid), false).await?;
        let point = points
            .first()
            .ok_or_else(|| GraphError::NotFound(format!("entity {eid}")))?;
        Entity::try_from(point)
    }

    /// Entities closest to `eid` in the identity space, excluding itself.
    #[instrument(skip(self))]
    pub async fn find_nearest_entities_by_entity(
        &self,
        eid: &str,
        limit: usize,
    ) -> GraphResult<Vec<Scored<Entity>>> {
        let eid = normalize_eid(eid);
        let points = self.store.retrieve(std::slice::from_ref(&eid), true).await?;
        let source = points
            .first()
            .ok_or_else(|| GraphError::NotFound(format!("entity {eid}")))?;
        let vector = source
            .vectors
            .as_ref()
            .and_then(|v| v.get(VectorField::Primary))
            .ok_or_else(|| {
                GraphError::InvalidPayload(format!("entity {eid} has no primary vector"))
            })?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let filter =
            Filter::kind(NodeKind::Entity).and_not(Condition::matches("eid", eid.as_str()));
        self.search_typed(VectorField::Primary, vector, &filter, limit)
            .await
    }

    /// Targets of `source_eid -[relation_name]-> *` that exist in the store.
    #[instrument(skip(self))]
    pub async fn find_connected_entities(
        &self,
        source_eid: &str,
        relation_name: &str,
    ) -> GraphResult<Vec<Entity>> {
        let filter = Filter::kind(NodeKind::Relation)
            .and(Condition::matches("source_eid", normalize_eid(source_eid)))
            .and(Condition::matches("name", normalize_relation_name(relation_name)));
        let relations = self.relations_where(&filter).await?;

        let mut seen = HashSet::new();
        let dest_ids: Vec<String> = relations
            .into_iter()
            .map(|r| r.dest_eid)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if dest_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.store
            .retrieve(&dest_ids, false)
            .await?
            .iter()
            .map(Entity::try_from)
            .collect()
    }

    pub async fn semantic_search_entities(
        &self,
        field: VectorField,
        query: &[f32],
        limit: usize,
    ) -> GraphResult<Vec<Scored<Entity>>> {
        self.search_typed(field, query, &Filter::kind(NodeKind::Entity), limit)
            .await
    }

    pub async fn semantic_search_relations(
        &self,
        field: VectorField,
        query: &[f32],
        limit: usize,
    ) -> GraphResult<Vec<Scored<Relation>>> {
        self.search_typed(field, query, &Filter::kind(NodeKind::Relation), limit)
            .await
    }

    /// Match against entity names.
    pub async fn semantic_search_entities_by_identity(
        &self,
        query: &[f32],
        limit: usize,
    ) -> GraphResult<Vec<Scored<Entity>>> {
        self.semantic_search_entities(VectorField::Primary, query, limit)
            .await
    }

    /// Match against `"<category>: <eid>"` context.
    pub async fn semantic_search_entities_by_context(
        &self,
        query: &[f32],
        limit: usize,
    ) -> GraphResult<Vec<Scored<Entity>>> {
        self.semantic_search_entities(VectorField::Secondary, query, limit)
            .await
    }

    pub async fn semantic_search_relations_by_name(
        &self,
        query: &[f32],
        limit: usize,
    ) -> GraphResult<Vec<Scored<Relation>>> {
        self.semantic_search_relations(VectorField::Primary, query, limit)
            .await
    }

    pub async fn semantic_search_relations_by_id(
        &self,
        query: &[f32],
        limit: usize,
    ) -> GraphResult<Vec<Scored<Relation>>> {
        self.semantic_search_relations(VectorField::Secondary, query, limit)
            .await
    }

    async fn search_typed<T>(
        &self,
        field: VectorField,
        query: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> GraphResult<Vec<Scored<T>>>
    where
        T: for<'a> TryFrom<&'a Point, Error = GraphError>,
    {
        self.store
            .search(field, query, Some(filter), limit)
            .await?
            .into_iter()
            .map(|hit| -> GraphResult<Scored<T>> {
                Ok(Scored {
                    item: T::try_from(&hit.point)?,
                    score: hit.score,
                })
            })
            .collect()
    }

    /// Breadth-first walk over outgoing relations from `start_eid`.
    #[instrument(skip(self, options), fields(max_depth = options.max_depth))]
    pub async fn traverse(
        &self,
        start_eid: &str,
        options: &TraversalOptions,
    ) -> GraphResult<Vec<TraversalStep>> {
        let start = self.get_entity(start_eid).await?;
        let relation = options.relation.as_deref().map(normalize_relation_name);

        let mut visited: HashSet<String> = HashSet::from([start.eid.clone()]);
        let mut steps = vec![TraversalStep {
            entity: start.clone(),
            depth: 0,
            via: None,
        }];
        let mut frontier: VecDeque<String> = VecDeque::from([start.eid]);

        for depth in 1..=options.max_depth {
            if frontier.is_empty() || steps.len() >= options.max_nodes {
                break;
            }

            let mut edges = Vec::new();
            while let Some(eid) = frontier.pop_front() {
                for edge in self.get_relations_for_entity(&eid).await? {
                    if relation.as_ref().is_none_or(|name| &edge.name == name)
                        && !visited.contains(&edge.dest_eid)
                    {
                        edges.push(edge);
                    }
                }
            }

            let mut pending: Vec<Relation> = Vec::new();
            for edge in edges {
                if visited.insert(edge.dest_eid.clone()) {
                    pending.push(edge);
                }
            }
            if pending.is_empty() {
                break;
            }

            let ids: Vec<String> = pending.iter().map(|r| r.dest_eid.clone()).collect();
            let found = self.store.retrieve(&ids, false).await?;
            for point in &found {
                if steps.len() >= options.max_nodes {
                    break;
                }
                let entity = Entity::try_from(point)?;
                let via = pending.iter().find(|r| r.dest_eid == entity.eid).cloned();
                frontier.push_back(entity.eid.clone());
                steps.push(TraversalStep {
                    entity,
                    depth,
                    via,
                });
            }
        }

        Ok(steps)
    }
}
