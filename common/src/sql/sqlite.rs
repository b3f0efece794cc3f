use crate::error::{Nl2SqlError, Result};
use crate::schema::CatalogInspector;
use crate::sql::{RowSet, SqlExecutor};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const DEFAULT_MAX_ROWS: usize = 500;
const MAIN_DATABASE: &str = "main";

/// sqlite backend serving both query execution and catalog inspection.
///
/// the connection is opened read-only and guarded by a mutex; every call runs
/// on the blocking pool so the async pipeline never stalls on disk io.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    max_rows: usize,
}

impl SqliteDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        tracing::info!("opened sqlite database {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Nl2SqlError::Sql("sqlite connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Nl2SqlError::Sql(format!("task join error: {}", e)))?
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
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

fn database_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.into_iter().filter(|n| n != "temp").collect())
}

fn tables_in(conn: &Connection, database: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name FROM {}.sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
        quote_identifier(database)
    ))?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tables)
}

/// split `db.table` when the qualifier names an attached database
fn split_qualified(conn: &Connection, table: &str) -> Result<(String, String)> {
    if let Some((qualifier, name)) = table.split_once('.') {
        if database_names(conn)?.iter().any(|db| db == qualifier) {
            return Ok((qualifier.to_string(), name.to_string()));
        }
    }
    Ok((MAIN_DATABASE.to_string(), table.to_string()))
}

#[async_trait]
impl SqlExecutor for SqliteDatabase {
    fn dialect_name(&self) -> &str {
        "sqlite"
    }

    async fn check(&self, query: &str) -> Result<()> {
        let query = query.to_string();

        self.with_connection(move |conn| {
            if query.trim().is_empty() {
                return Err(Nl2SqlError::Sql("query is empty".to_string()));
            }
            let stmt = conn.prepare(&query)?;
            if !stmt.readonly() {
                return Err(Nl2SqlError::Sql(
                    "statement would modify the database".to_string(),
                ));
            }
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, query), fields(query_len = query.len()))]
    async fn execute(&self, query: &str) -> Result<RowSet> {
        let query = query.to_string();
        let max_rows = self.max_rows;

        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&query)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(|c| c.to_string())
                .collect();
            let column_count = columns.len();

            let mut out = RowSet::new(columns, Vec::new());
            let mut rows = stmt.query([])?;

            while let Some(row) = rows.next()? {
                if out.rows.len() >= max_rows {
                    out.truncated = true;
                    break;
                }
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    cells.push(cell_to_json(row.get_ref(i)?));
                }
                out.rows.push(cells);
            }

            tracing::debug!(rows = out.rows.len(), truncated = out.truncated, "query returned");
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl CatalogInspector for SqliteDatabase {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut all = Vec::new();
            for database in database_names(conn)? {
                for table in tables_in(conn, &database)? {
                    if database == MAIN_DATABASE {
                        all.push(table);
                    } else {
                        all.push(format!("{}.{}", database, table));
                    }
                }
            }
            all.sort();
            Ok(all)
        })
        .await
    }

    async fn get_table_schema(&self, table_name: &str) -> Result<String> {
        let table_name = table_name.to_string();

        self.with_connection(move |conn| {
            let (database, table) = split_qualified(conn, &table_name)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT sql FROM {}.sqlite_master WHERE name = ?1",
                quote_identifier(&database)
            ))?;
            let ddl: Option<String> = stmt
                .query_map(params![table], |row| row.get::<_, Option<String>>(0))?
                .next()
                .transpose()?
                .flatten();

            ddl.ok_or_else(|| Nl2SqlError::Sql(format!("no such table: {}", table_name)))
        })
        .await
    }
}
