use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use libsqlite3_sys::{SQLITE_OK, sqlite3, sqlite3_api_routines, sqlite3_auto_extension};
use serde_json::Value;
use sqlite_vec::sqlite3_vec_init;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::errors::{GraphError, GraphResult};
use crate::filter::{Filter, SqlBind};
use crate::models::{Point, PointVectors, ScoredPoint};

use super::{
    CollectionConfig, Distance, ScrollPage, ScrollRequest, SearchRequest, VectorStore,
    distance_to_score,
};

static SQLITE_VEC_INIT_RC: OnceLock<i32> = OnceLock::new();

/// Keeps `IN (...)` lists well under SQLite's bind limit.
const RETRIEVE_CHUNK: usize = 500;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Points persisted in a local SQLite file; similarity via sqlite-vec
/// distance functions over JSON-encoded vectors.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn open(db_path: &Path) -> GraphResult<Self> {
        init_sqlite_vec_once()?;
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous = NORMAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA cache_size = -64000")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(store_err)?;

        sqlx::migrate!("./migrations/graph").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn collection_config(&self, name: &str) -> GraphResult<Option<CollectionConfig>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT config_json FROM collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(GraphError::from))
            .transpose()
    }

    async fn require_collection(&self, name: &str) -> GraphResult<CollectionConfig> {
        self.collection_config(name).await?.ok_or_else(|| {
            GraphError::StoreUnavailable(format!("collection {name} does not exist"))
        })
    }
}

fn init_sqlite_vec_once() -> GraphResult<()> {
    let rc = *SQLITE_VEC_INIT_RC.get_or_init(|| unsafe {
        type SqliteVecInitFn =
            unsafe extern "C" fn(*mut sqlite3, *mut *const i8, *const sqlite3_api_routines) -> i32;

        sqlite3_auto_extension(Some(std::mem::transmute::<*const (), SqliteVecInitFn>(
            sqlite3_vec_init as *const (),
        )))
    });

    if rc == SQLITE_OK {
        Ok(())
    } else {
        Err(GraphError::SqliteVec(format!(
            "sqlite-vec init failed with code {rc}"
        )))
    }
}

/// Connection-level failures surface as `StoreUnavailable`.
fn store_err(err: sqlx::Error) -> GraphError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            GraphError::StoreUnavailable(err.to_string())
        }
        sqlx::Error::Io(io) => GraphError::StoreUnavailable(io.to_string()),
        other => GraphError::Sqlx(other),
    }
}

fn bind_filter<'q>(mut query: SqliteQuery<'q>, binds: Vec<SqlBind>) -> SqliteQuery<'q> {
    for bind in binds {
        query = match bind {
            SqlBind::Text(value) => query.bind(value),
            SqlBind::Integer(value) => query.bind(value),
        };
    }
    query
}

fn filter_sql(filter: Option<&Filter>) -> GraphResult<(String, Vec<SqlBind>)> {
    match filter {
        Some(filter) => filter.to_sql(),
        None => Ok(("1".to_string(), Vec::new())),
    }
}

fn vectors_column(with_vectors: bool) -> &'static str {
    if with_vectors { "vectors" } else { "NULL" }
}

fn row_to_point(row: &SqliteRow) -> GraphResult<Point> {
    let id: String = row.try_get("id")?;
    let payload: String = row.try_get("payload")?;
    let vectors: Option<String> = row.try_get("vectors")?;

    let payload = match serde_json::from_str::<Value>(&payload)? {
        Value::Object(map) => map,
        other => {
            return Err(GraphError::InvalidPayload(format!(
                "point {id} payload is not an object: {other}"
            )));
        }
    };
    let vectors = vectors
        .map(|json| serde_json::from_str::<PointVectors>(&json))
        .transpose()?;

    Ok(Point {
        id,
        payload,
        vectors,
    })
}

#[async_trait::async_trait]
impl VectorStore for SqliteVectorStore {
    async fn ensure_collection(&self, name: &str, config: &CollectionConfig) -> GraphResult<bool> {
        if let Some(existing) = self.collection_config(name).await? {
            if &existing != config {
                return Err(GraphError::CollectionMismatch(format!(
                    "collection {name} exists with a different vector layout"
                )));
            }
            return Ok(false);
        }

        sqlx::query("INSERT INTO collections (name, config_json, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(serde_json::to_string(config)?)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(true)
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> GraphResult<()> {
        self.require_collection(collection).await?;
        let now = Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for point in points {
            let vectors = point
                .vectors
                .map(PointVectors::into_named)
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                "INSERT INTO points (collection, id, payload, vectors, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET
                   payload = excluded.payload,
                   vectors = excluded.vectors,
                   updated_at = excluded.updated_at",
            )
            .bind(collection)
            .bind(&point.id)
            .bind(serde_json::to_string(&point.payload)?)
            .bind(vectors)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
        with_vectors: bool,
    ) -> GraphResult<Vec<Point>> {
        self.require_collection(collection).await?;

        let mut found: HashMap<String, Point> = HashMap::new();
        for chunk in ids.chunks(RETRIEVE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, payload, {} AS vectors FROM points
                 WHERE collection = ? AND id IN ({placeholders})",
                vectors_column(with_vectors)
            );
            let mut query = sqlx::query(&sql).bind(collection);
            for id in chunk {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await.map_err(store_err)? {
                let point = row_to_point(&row)?;
                found.insert(point.id.clone(), point);
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn scroll(&self, collection: &str, request: ScrollRequest) -> GraphResult<ScrollPage> {
        self.require_collection(collection).await?;
        let (where_sql, binds) = filter_sql(request.filter.as_ref())?;
        let sql = format!(
            "SELECT id, payload, {} AS vectors FROM points
             WHERE collection = ? AND (? IS NULL OR id >= ?) AND ({where_sql})
             ORDER BY id
             LIMIT ?",
            vectors_column(request.with_vectors)
        );

        let query = sqlx::query(&sql)
            .bind(collection)
            .bind(request.offset.clone())
            .bind(request.offset.clone());
        // One extra row tells us where the next page starts.
        let query = bind_filter(query, binds).bind(request.limit as i64 + 1);
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut points = rows
            .iter()
            .map(row_to_point)
            .collect::<GraphResult<Vec<_>>>()?;
        let next_page_offset = if points.len() > request.limit {
            points.pop().map(|point| point.id)
        } else {
            None
        };

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
        let config = self.require_collection(collection).await?;
        let params = config.vectors.get(&request.vector_name).ok_or_else(|| {
            GraphError::CollectionMismatch(format!(
                "collection {collection} has no vector named {}",
                request.vector_name
            ))
        })?;
        let distance_fn = match params.distance {
            Distance::Cosine => "vec_distance_cosine",
            Distance::Euclid => "vec_distance_l2",
        };
        let (where_sql, binds) = filter_sql(request.filter.as_ref())?;
        let path = format!("$.{}", request.vector_name);

        let sql = format!(
            "SELECT id, payload, {} AS vectors,
                    {distance_fn}(json_extract(vectors, ?), ?) AS distance
             FROM points
             WHERE collection = ? AND json_extract(vectors, ?) IS NOT NULL AND ({where_sql})
             ORDER BY distance ASC, id ASC
             LIMIT ?",
            vectors_column(request.with_vectors)
        );

        let query = sqlx::query(&sql)
            .bind(path.clone())
            .bind(serde_json::to_string(&request.vector)?)
            .bind(collection)
            .bind(path);
        let query = bind_filter(query, binds).bind(request.limit as i64);
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;

        rows.iter()
            .map(|row| -> GraphResult<ScoredPoint> {
                let distance: f64 = row.try_get("distance")?;
                Ok(ScoredPoint {
                    point: row_to_point(row)?,
                    score: distance_to_score(params.distance, distance as f32),
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use crate::models::NodeKind;
    use crate::store::MemoryVectorStore;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteVectorStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&temp.path().join("graph.sqlite3"))
            .await
            .unwrap();
        (temp, store)
    }

    fn point(id: &str, kind: &str, primary: [f32; 2]) -> Point {
        let payload = match json!({"kind": kind, "eid": id, "category": "organ"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        Point {
            id: id.to_string(),
            payload,
            vectors: Some(
                serde_json::from_value(json!({"primary": primary, "secondary": primary}))
                    .unwrap(),
            ),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_and_scroll_orders_by_id() {
        let (_temp, store) = open_temp().await;
        store
            .ensure_collection("tom", &CollectionConfig::dual(2))
            .await
            .unwrap();
        store
            .upsert(
                "tom",
                vec![
                    point("lung", "entity", [1.0, 0.0]),
                    point("heart", "entity", [0.0, 1.0]),
                    point("r", "relation", [0.5, 0.5]),
                ],
            )
            .await
            .unwrap();
        let mut replacement = point("lung", "entity", [0.0, 1.0]);
        replacement
            .payload
            .insert("category".to_string(), json!("organ_system"));
        store.upsert("tom", vec![replacement]).await.unwrap();

        let page = store
            .scroll(
                "tom",
                ScrollRequest {
                    filter: Some(Filter::kind(NodeKind::Entity)),
                    limit: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.points[0].id, "heart");
        assert_eq!(page.next_page_offset.as_deref(), Some("lung"));

        let rest = store
            .scroll(
                "tom",
                ScrollRequest {
                    filter: Some(Filter::kind(NodeKind::Entity)),
                    limit: 10,
                    offset: page.next_page_offset,
                    with_vectors: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(rest.points.len(), 1);
        assert_eq!(rest.points[0].payload["category"], json!("organ_system"));
        assert!(rest.next_page_offset.is_none());
    }

    #[tokio::test]
    async fn search_uses_named_vector() {
        let (_temp, store) = open_temp().await;
        store
            .ensure_collection("tom", &CollectionConfig::dual(2))
            .await
            .unwrap();
        store
            .upsert(
                "tom",
                vec![
                    point("lung", "entity", [1.0, 0.0]),
                    point("heart", "entity", [0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "tom",
                SearchRequest {
                    vector_name: "primary".to_string(),
                    vector: vec![0.1, 0.9],
                    filter: None,
                    limit: 5,
                    with_vectors: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].point.id, "heart");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].point.vectors.is_some());
    }

    #[tokio::test]
    async fn collection_layout_is_checked() {
        let (_temp, store) = open_temp().await;
        assert!(store
            .ensure_collection("tom", &CollectionConfig::dual(2))
            .await
            .unwrap());
        assert!(!store
            .ensure_collection("tom", &CollectionConfig::dual(2))
            .await
            .unwrap());
        assert!(matches!(
            store
                .ensure_collection("tom", &CollectionConfig::dual(3))
                .await,
            Err(GraphError::CollectionMismatch(_))
        ));
    }

    #[tokio::test]
    async fn closed_pool_is_unavailable() {
        let (_temp, store) = open_temp().await;
        store.close().await;
        assert!(matches!(
            store.retrieve("tom", &["lung".to_string()], false).await,
            Err(GraphError::StoreUnavailable(_))
        ));
    }

    async fn ids_matching(store: &dyn VectorStore, filter: Filter) -> Vec<String> {
        store
            .scroll(
                "tom",
                ScrollRequest {
                    filter: Some(filter),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .points
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    /// Typed matches and flat vectors behave alike on every backend.
    async fn check_shared_semantics(store: &dyn VectorStore) {
        store
            .ensure_collection("tom", &CollectionConfig::dual(2))
            .await
            .unwrap();
        let mut flagged = point("lung", "entity", [1.0, 0.0]);
        flagged.payload.insert("flag".to_string(), json!(true));
        let mut counted = point("heart", "entity", [0.0, 1.0]);
        counted.payload.insert("flag".to_string(), json!(1));
        let mut flat = point("kidney", "entity", [1.0, 0.0]);
        flat.vectors = Some(PointVectors::Single(vec![0.6, 0.8]));
        store
            .upsert("tom", vec![flagged, counted, flat])
            .await
            .unwrap();

        let is_true = Filter::must([Condition::matches("flag", true)]);
        assert_eq!(ids_matching(store, is_true).await, ["lung"]);
        let is_one = Filter::must([Condition::matches("flag", 1_i64)]);
        assert_eq!(ids_matching(store, is_one).await, ["heart"]);
        let not_true = Filter::default().and_not(Condition::matches("flag", true));
        assert_eq!(ids_matching(store, not_true).await, ["heart", "kidney"]);

        let hits = store
            .search(
                "tom",
                SearchRequest {
                    vector_name: "primary".to_string(),
                    vector: vec![0.6, 0.8],
                    filter: None,
                    limit: 1,
                    with_vectors: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].point.id, "kidney");
        assert!(matches!(
            hits[0].point.vectors,
            Some(PointVectors::Named(_))
        ));
    }

    #[tokio::test]
    async fn backends_agree_on_typed_matches_and_flat_vectors() {
        let (_temp, store) = open_temp().await;
        check_shared_semantics(&store).await;
        check_shared_semantics(&MemoryVectorStore::new()).await;
    }
}
