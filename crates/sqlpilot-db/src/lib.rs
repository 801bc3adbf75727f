pub mod backend;
pub mod split;

use std::path::Path;

use sqlpilot_core::error::{Result, SqlPilotError};

pub use backend::SqliteBackend;
pub use split::split_statements;

/// Read a hand-written schema description, used instead of introspection.
pub fn load_schema_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        SqlPilotError::Config(format!("schema file {}: {}", path.display(), e))
    })?;
    if text.trim().is_empty() {
        return Err(SqlPilotError::Config(format!(
            "schema file {} is empty",
            path.display()
        )));
    }
    Ok(text.trim().to_string())
}
