use crate::error::{Nl2SqlError, Result};
use crate::llm::LlmGateway;
use crate::monitor::RunMonitor;
use crate::pipeline::prompt::table_selection_prompt;
use crate::pipeline::Stage;
use crate::schema::{CatalogInspector, SchemaIndex, TableDocument};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// phrases that ask for the whole catalog instead of a subset
pub const ALL_TABLES_KEYWORDS: [&str; 7] = [
    "all tables",
    "every table",
    "each table",
    "list tables",
    "show tables",
    "what tables",
    "available tables",
];

/// tables and schema text chosen for one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub relevant_tables: Vec<String>,
    pub schema_context: String,
    pub schema_name: Option<String>,
    /// true when the tables came from the schema index rather than the catalog
    pub from_index: bool,
}

/// result of one of the two discovery tasks
enum Discovery {
    Semantic(Vec<TableDocument>),
    Catalog(Vec<String>),
}

pub fn wants_all_tables(question: &str) -> bool {
    let lowered = question.to_lowercase();
    ALL_TABLES_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// text before the first `.` of the first qualified table name
pub fn detect_namespace(tables: &[String]) -> Option<String> {
    tables
        .iter()
        .find(|t| t.contains('.'))
        .and_then(|t| t.split('.').next())
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
}

fn render_context<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    entries
        .into_iter()
        .map(|(table, description)| format!("\n=== Schema for {} ===\n{}", table, description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// keep the names the model picked that actually exist, in catalog order
fn filter_selection(answer: &str, catalog: &[String]) -> Vec<String> {
    let picked: HashSet<&str> = answer
        .split(',')
        .map(|name| name.trim().trim_matches('`').trim_matches('"'))
        .filter(|name| !name.is_empty())
        .collect();

    catalog
        .iter()
        .filter(|t| picked.contains(t.as_str()))
        .cloned()
        .collect()
}

/// picks the tables a question needs. the schema index and the live catalog are
/// queried together; index hits take priority over the catalog.
pub struct SchemaResolver {
    index: Arc<dyn SchemaIndex>,
    catalog: Arc<dyn CatalogInspector>,
    llm: Arc<dyn LlmGateway>,
    k: usize,
}

impl SchemaResolver {
    pub fn new(
        index: Arc<dyn SchemaIndex>,
        catalog: Arc<dyn CatalogInspector>,
        llm: Arc<dyn LlmGateway>,
        k: usize,
    ) -> Self {
        Self {
            index,
            catalog,
            llm,
            k,
        }
    }

    /// run both discovery paths and wait for both. a failed or panicked task
    /// leaves its path empty without touching the other one.
    async fn discover(&self, question: &str) -> (Vec<TableDocument>, Vec<String>) {
        let mut join_set = JoinSet::new();

        let index = Arc::clone(&self.index);
        let query = question.to_string();
        let k = self.k;
        join_set.spawn(
            async move {
                match index.search(&query, k).await {
                    Ok(docs) => Discovery::Semantic(docs),
                    Err(e) => {
                        tracing::warn!("schema index search failed: {}", e);
                        Discovery::Semantic(Vec::new())
                    }
                }
            }
            .instrument(tracing::info_span!("semantic_search", k)),
        );

        let catalog = Arc::clone(&self.catalog);
        join_set.spawn(
            async move {
                match catalog.list_tables().await {
                    Ok(tables) => Discovery::Catalog(tables),
                    Err(e) => {
                        tracing::warn!("catalog enumeration failed: {}", e);
                        Discovery::Catalog(Vec::new())
                    }
                }
            }
            .instrument(tracing::info_span!("catalog_listing")),
        );

        let mut semantic = Vec::new();
        let mut catalog = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Discovery::Semantic(docs)) => semantic = docs,
                Ok(Discovery::Catalog(tables)) => catalog = tables,
                Err(e) => tracing::error!("discovery task join error: {}", e),
            }
        }

        (semantic, catalog)
    }

    #[tracing::instrument(skip(self, monitor))]
    pub async fn resolve(&self, question: &str, monitor: &dyn RunMonitor) -> Result<Resolution> {
        let (semantic, catalog) = self.discover(question).await;

        tracing::info!(
            semantic_hits = semantic.len(),
            catalog_tables = catalog.len(),
            "discovery finished"
        );

        if !semantic.is_empty() {
            return Ok(Self::from_semantic(semantic, &catalog));
        }

        if catalog.is_empty() {
            return Err(Nl2SqlError::NoTablesFound);
        }

        self.from_catalog(question, catalog, monitor).await
    }

    fn from_semantic(hits: Vec<TableDocument>, catalog: &[String]) -> Resolution {
        let mut seen = HashSet::new();
        let docs: Vec<TableDocument> = hits
            .into_iter()
            .filter(|d| seen.insert(d.table_name.clone()))
            .collect();

        let relevant_tables: Vec<String> = docs.iter().map(|d| d.table_name.clone()).collect();
        let schema_name = detect_namespace(&relevant_tables).or_else(|| detect_namespace(catalog));
        let schema_context = render_context(
            docs.iter()
                .map(|d| (d.table_name.as_str(), d.description.as_str())),
        );

        tracing::info!(tables = ?relevant_tables, "using schema index results");

        Resolution {
            relevant_tables,
            schema_context,
            schema_name,
            from_index: true,
        }
    }

    async fn from_catalog(
        &self,
        question: &str,
        catalog: Vec<String>,
        monitor: &dyn RunMonitor,
    ) -> Result<Resolution> {
        let selected = if wants_all_tables(question) {
            tracing::info!("question asks for all tables");
            catalog.clone()
        } else {
            self.select_tables(question, &catalog, monitor).await?
        };

        let mut fetched = Vec::with_capacity(selected.len());
        for table in &selected {
            match self.catalog.get_table_schema(table).await {
                Ok(details) => fetched.push((table.clone(), details)),
                Err(e) => tracing::warn!(table = %table, "dropping table, schema fetch failed: {}", e),
            }
        }

        if fetched.is_empty() {
            return Err(Nl2SqlError::SchemaUnavailable(selected.join(", ")));
        }

        let relevant_tables: Vec<String> = fetched.iter().map(|(t, _)| t.clone()).collect();
        let schema_name = detect_namespace(&relevant_tables).or_else(|| detect_namespace(&catalog));
        let schema_context = render_context(fetched.iter().map(|(t, d)| (t.as_str(), d.as_str())));

        tracing::info!(tables = ?relevant_tables, "using catalog tables");

        Ok(Resolution {
            relevant_tables,
            schema_context,
            schema_name,
            from_index: false,
        })
    }

    /// one completion picks a subset; an empty pick falls back to the full list
    async fn select_tables(
        &self,
        question: &str,
        catalog: &[String],
        monitor: &dyn RunMonitor,
    ) -> Result<Vec<String>> {
        let completion = self
            .llm
            .complete(&table_selection_prompt(catalog, question))
            .await?;
        if let Some(usage) = completion.usage {
            monitor.on_llm_call(
                Stage::SchemaResolution,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
        }

        let selected = filter_selection(&completion.text, catalog);
        if selected.is_empty() {
            tracing::warn!(
                answer = %completion.text.trim(),
                "model picked no known tables, using the whole catalog"
            );
            return Ok(catalog.to_vec());
        }
        Ok(selected)
    }
}
