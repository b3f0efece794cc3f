use crate::error::{Nl2SqlError, Result};
use crate::llm::LlmGateway;
use crate::schema::{CatalogInspector, SchemaIndex};
use crate::sql::SqlExecutor;
use std::sync::Arc;

/// the four backends a pipeline talks to. cheap to clone; runs share the
/// backends but nothing else.
#[derive(Clone)]
pub struct PipelineContext {
    pub llm: Arc<dyn LlmGateway>,
    pub index: Arc<dyn SchemaIndex>,
    pub catalog: Arc<dyn CatalogInspector>,
    pub executor: Arc<dyn SqlExecutor>,
}

impl PipelineContext {
    pub fn builder() -> PipelineContextBuilder {
        PipelineContextBuilder::default()
    }
}

#[derive(Default)]
pub struct PipelineContextBuilder {
    llm: Option<Arc<dyn LlmGateway>>,
    index: Option<Arc<dyn SchemaIndex>>,
    catalog: Option<Arc<dyn CatalogInspector>>,
    executor: Option<Arc<dyn SqlExecutor>>,
}

impl PipelineContextBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmGateway>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn index(mut self, index: Arc<dyn SchemaIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CatalogInspector>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn SqlExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<PipelineContext> {
        Ok(PipelineContext {
            llm: self.llm.ok_or_else(|| missing("llm gateway"))?,
            index: self.index.ok_or_else(|| missing("schema index"))?,
            catalog: self.catalog.ok_or_else(|| missing("catalog inspector"))?,
            executor: self.executor.ok_or_else(|| missing("sql executor"))?,
        })
    }
}

fn missing(what: &str) -> Nl2SqlError {
    Nl2SqlError::MissingBackend(what.to_string())
}
