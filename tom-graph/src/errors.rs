#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store call `{operation}` timed out after {timeout_ms} ms")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid point payload: {0}")]
    InvalidPayload(String),
    #[error("collection mismatch: {0}")]
    CollectionMismatch(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimMismatch { expected: usize, actual: usize },
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("missing data directory")]
    MissingDataDir,
    #[error("sqlite-vec initialization error: {0}")]
    SqliteVec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;
