//! Scripted in-memory backends for unit tests.

use crate::error::{Nl2SqlError, Result};
use crate::llm::{Completion, LlmGateway};
use crate::schema::{CatalogInspector, SchemaIndex, TableDocument};
use crate::sql::{RowSet, SqlExecutor};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// replies from a fixed queue and records every prompt it was sent
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Completion>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::default();
        for reply in replies {
            llm.push(reply);
        }
        llm
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(Completion::text(reply).with_usage(10, 5)));
    }

    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(Nl2SqlError::Llm(message.to_string())));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmGateway for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<Completion> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Nl2SqlError::Llm("no scripted reply left".to_string())))
    }
}

pub struct FakeIndex {
    hits: std::result::Result<Vec<TableDocument>, String>,
    pub calls: AtomicUsize,
}

impl FakeIndex {
    pub fn with_hits(hits: Vec<TableDocument>) -> Self {
        Self {
            hits: Ok(hits),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::with_hits(Vec::new())
    }

    pub fn failing(message: &str) -> Self {
        Self {
            hits: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SchemaIndex for FakeIndex {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<TableDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.hits {
            Ok(hits) => Ok(hits.iter().take(k).cloned().collect()),
            Err(e) => Err(Nl2SqlError::Index(e.clone())),
        }
    }
}

pub struct FakeCatalog {
    tables: std::result::Result<Vec<String>, String>,
    schemas: HashMap<String, String>,
    pub schema_calls: AtomicUsize,
}

impl FakeCatalog {
    /// every listed table gets a schema unless `without_schema` removes it
    pub fn with_tables(tables: &[&str]) -> Self {
        let schemas = tables
            .iter()
            .map(|t| (t.to_string(), format!("CREATE TABLE {} (id INT)", t)))
            .collect();
        Self {
            tables: Ok(tables.iter().map(|t| t.to_string()).collect()),
            schemas,
            schema_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            tables: Err(message.to_string()),
            schemas: HashMap::new(),
            schema_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_schema(mut self, table: &str) -> Self {
        self.schemas.remove(table);
        self
    }
}

#[async_trait]
impl CatalogInspector for FakeCatalog {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.tables.clone().map_err(Nl2SqlError::Sql)
    }

    async fn get_table_schema(&self, table_name: &str) -> Result<String> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .get(table_name)
            .cloned()
            .ok_or_else(|| Nl2SqlError::Sql(format!("no such table: {}", table_name)))
    }
}

/// checker and executor driven by queues; an empty queue means success
pub struct FakeExecutor {
    dialect: String,
    check_failures: Mutex<VecDeque<String>>,
    executions: Mutex<VecDeque<std::result::Result<RowSet, String>>>,
    pub check_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            dialect: "mssql".to_string(),
            check_failures: Mutex::new(VecDeque::new()),
            executions: Mutex::new(VecDeque::new()),
            check_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn then_check_fails(self, message: &str) -> Self {
        self.check_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
        self
    }

    pub fn then_rows(self, rows: RowSet) -> Self {
        self.executions.lock().unwrap().push_back(Ok(rows));
        self
    }

    pub fn then_execution_fails(self, message: &str) -> Self {
        self.executions
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn backend_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst) + self.execute_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for FakeExecutor {
    fn dialect_name(&self) -> &str {
        &self.dialect
    }

    async fn check(&self, _query: &str) -> Result<()> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        match self.check_failures.lock().unwrap().pop_front() {
            Some(message) => Err(Nl2SqlError::Sql(message)),
            None => Ok(()),
        }
    }

    async fn execute(&self, query: &str) -> Result<RowSet> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(query.to_string());
        match self.executions.lock().unwrap().pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(Nl2SqlError::Sql(message)),
            None => Ok(RowSet::default()),
        }
    }
}
