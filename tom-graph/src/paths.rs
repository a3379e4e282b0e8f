use std::path::PathBuf;

use tom_core::GraphSettings;

use crate::errors::{GraphError, GraphResult};

pub const GRAPH_DB_FILE: &str = "graph.sqlite3";

pub fn data_root() -> GraphResult<PathBuf> {
    if let Ok(override_dir) = std::env::var("TOM_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let dir = dirs::data_dir().ok_or(GraphError::MissingDataDir)?;
    Ok(dir.join("tom"))
}

pub fn graph_db_path(settings: &GraphSettings) -> GraphResult<PathBuf> {
    if let Some(path) = &settings.db_path_override {
        return Ok(path.clone());
    }
    Ok(data_root()?.join(GRAPH_DB_FILE))
}
