use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::debug;

use sqlpilot_core::error::{AdapterError, AdapterResult, Result, SqlPilotError};
use sqlpilot_core::traits::SqlBackend;
use sqlpilot_core::types::QueryRows;

/// SQLite-backed statement executor.
///
/// Every statement runs on its own; there is no transaction spanning
/// several statements.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    read_only: bool,
}

impl SqliteBackend {
    /// Open the database at `path`.
    ///
    /// In read-only mode the file must already exist and is opened with
    /// `SQLITE_OPEN_READ_ONLY`; otherwise it is created when missing.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let conn = if read_only {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SqlPilotError::Database(format!("Failed to create db directory: {}", e))
                    })?;
                }
            }
            Connection::open(path)
        }
        .map_err(|e| SqlPilotError::Database(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), read_only, "SQLite backend opened");
        Ok(Self {
            conn: Mutex::new(conn),
            read_only,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(read_only: bool) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| SqlPilotError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            read_only,
        })
    }

    /// Run a setup script, bypassing the read-only guard.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SqlPilotError::Database(e.to_string()))?;
        conn.execute_batch(sql)
            .map_err(|e| SqlPilotError::Database(e.to_string()))
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn run_statement(&self, sql: &str, max_rows: usize) -> AdapterResult<QueryRows> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AdapterError::failed(e.to_string()))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AdapterError::failed(e.to_string()))?;

        if self.read_only && !stmt.readonly() {
            return Err(AdapterError::failed(
                "attempt to write a readonly database: only read statements are allowed",
            ));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        if columns.is_empty() {
            let affected = stmt
                .execute([])
                .map_err(|e| AdapterError::failed(e.to_string()))?;
            return Ok(QueryRows {
                columns,
                rows: Vec::new(),
                affected: Some(affected),
                total_rows: 0,
            });
        }

        let width = columns.len();
        let mut rows = Vec::new();
        let mut total_rows = 0;
        let mut cursor = stmt
            .query([])
            .map_err(|e| AdapterError::failed(e.to_string()))?;
        while let Some(row) = cursor
            .next()
            .map_err(|e| AdapterError::failed(e.to_string()))?
        {
            total_rows += 1;
            // Past the cap rows are only counted.
            if rows.len() >= max_rows {
                continue;
            }
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                let cell = row
                    .get_ref(i)
                    .map_err(|e| AdapterError::failed(e.to_string()))?;
                cells.push(to_json(cell));
            }
            rows.push(cells);
        }

        Ok(QueryRows {
            columns,
            rows,
            affected: None,
            total_rows,
        })
    }

    fn schema_text(&self) -> std::result::Result<String, rusqlite::Error> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| rusqlite::Error::InvalidQuery)?;

        let mut tables = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names: Vec<String> = tables
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut columns =
            conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let mut foreign = conn.prepare(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;

        let mut out = Vec::new();
        for name in &names {
            out.push(format!("Table: {name}"));
            let cols = columns.query_map([name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for col in cols {
                let (col, ty, pk) = col?;
                let ty = if ty.is_empty() { "ANY".to_string() } else { ty };
                if pk > 0 {
                    out.push(format!("  - {col} {ty} (primary key)"));
                } else {
                    out.push(format!("  - {col} {ty}"));
                }
            }
            let fks = foreign.query_map([name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;
            for fk in fks {
                let (from, table, to) = fk?;
                let to = to.unwrap_or_else(|| "rowid".to_string());
                out.push(format!("  - {from} references {table}.{to}"));
            }
            out.push(String::new());
        }

        Ok(out.join("\n").trim_end().to_string())
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

impl SqlBackend for SqliteBackend {
    fn run(&self, statement: &str, max_rows: usize) -> BoxFuture<'_, AdapterResult<QueryRows>> {
        let statement = statement.to_string();
        Box::pin(async move {
            let result = self.run_statement(&statement, max_rows);
            match &result {
                Ok(rows) => debug!(
                    kept = rows.rows.len(),
                    total = rows.total_rows,
                    "Statement executed"
                ),
                Err(e) => debug!(error = %e, "Statement failed"),
            }
            result
        })
    }

    fn describe_schema(&self) -> BoxFuture<'_, AdapterResult<String>> {
        Box::pin(async move {
            self.schema_text()
                .map_err(|e| AdapterError::failed(format!("schema introspection failed: {e}")))
        })
    }
}
