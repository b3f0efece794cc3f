pub mod documents;
pub mod index;
pub mod resolver;

pub use documents::build_schema_documents;
pub use index::VectorSchemaIndex;
pub use resolver::{Resolution, SchemaResolver, ALL_TABLES_KEYWORDS};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// one table's description as stored in, and returned by, the schema index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    pub table_name: String,
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TableDocument {
    pub fn new(table_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// semantic lookup from a phrase to ranked table descriptions
#[async_trait]
pub trait SchemaIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<TableDocument>>;
}

/// live database metadata
#[async_trait]
pub trait CatalogInspector: Send + Sync {
    /// table identifiers, qualified as `namespace.table` where the backend has namespaces
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn get_table_schema(&self, table_name: &str) -> Result<String>;
}
