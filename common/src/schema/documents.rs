use crate::error::Result;
use crate::schema::{CatalogInspector, TableDocument};
use crate::sql::SqlExecutor;

fn sample_query(dialect: &str, table: &str, rows: usize) -> String {
    match dialect.to_lowercase().as_str() {
        "mssql" => format!("SELECT TOP {} * FROM {}", rows, table),
        "oracle" => format!("SELECT * FROM {} WHERE ROWNUM <= {}", table, rows),
        _ => format!("SELECT * FROM {} LIMIT {}", table, rows),
    }
}

/// one document per catalog table: ddl, a few sample rows and a usage hint.
///
/// sample rows are best effort. a table whose schema can't be read is skipped.
#[tracing::instrument(skip(catalog, executor))]
pub async fn build_schema_documents(
    catalog: &dyn CatalogInspector,
    executor: &dyn SqlExecutor,
    sample_rows: usize,
) -> Result<Vec<TableDocument>> {
    let tables = catalog.list_tables().await?;
    tracing::info!("building schema documents for {} tables", tables.len());

    let mut documents = Vec::with_capacity(tables.len());
    let mut failed = 0usize;

    for table in &tables {
        let details = match catalog.get_table_schema(table).await {
            Ok(details) => details,
            Err(e) => {
                tracing::error!(table = %table, "failed to read schema: {}", e);
                failed += 1;
                continue;
            }
        };

        let sample_info = if sample_rows == 0 {
            String::new()
        } else {
            let query = sample_query(executor.dialect_name(), table, sample_rows);
            match executor.execute(&query).await {
                Ok(rows) => format!(
                    "\n\nSample Data (first {} rows):\n{}",
                    sample_rows, rows
                ),
                Err(e) => format!("\n\nSample data not available: {}", e),
            }
        };

        let description = format!(
            "Table: {table}\n\n\
             Schema_Details:\n{details}{sample_info}\n\n\
             This table can be queried to answer questions about {topic}.",
            table = table,
            details = details,
            sample_info = sample_info,
            topic = table.replace('_', " "),
        );

        documents.push(
            TableDocument::new(table.clone(), description)
                .with_metadata("source", "database_schema")
                .with_metadata("type", "table_schema")
                .with_metadata("db_type", executor.dialect_name()),
        );
    }

    tracing::info!(
        succeeded = documents.len(),
        failed,
        "schema documents built"
    );
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqliteDatabase;
    use rusqlite::Connection;

    #[test]
    fn test_sample_query_dialects() {
        assert_eq!(sample_query("mssql", "Sales.Customer", 3), "SELECT TOP 3 * FROM Sales.Customer");
        assert_eq!(sample_query("oracle", "emp", 3), "SELECT * FROM emp WHERE ROWNUM <= 3");
        assert_eq!(sample_query("sqlite", "order_items", 2), "SELECT * FROM order_items LIMIT 2");
    }

    #[tokio::test]
    async fn test_build_documents_from_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE order_items (id INTEGER, sku TEXT);
             INSERT INTO order_items VALUES (1, 'A-1'), (2, 'B-2');",
        )
        .unwrap();
        let db = SqliteDatabase::from_connection(conn);

        let docs = build_schema_documents(&db, &db, 1).await.unwrap();

        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.table_name, "order_items");
        assert!(doc.description.contains("CREATE TABLE order_items"));
        assert!(doc.description.contains("Sample Data (first 1 rows):\n[(1, 'A-1')]"));
        assert!(doc.description.contains("questions about order items"));
        assert_eq!(doc.metadata["db_type"], "sqlite");
    }
}
