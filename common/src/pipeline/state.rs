use crate::sql::RowSet;
use serde::Serialize;
use std::fmt;

/// named steps of a run, as reported to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SchemaResolution,
    QueryGeneration,
    QueryValidation,
    QueryExecution,
    ErrorRecovery,
    ResultFormatting,
    ErrorResponse,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SchemaResolution => "schema_resolution",
            Stage::QueryGeneration => "query_generation",
            Stage::QueryValidation => "query_validation",
            Stage::QueryExecution => "query_execution",
            Stage::ErrorRecovery => "error_recovery",
            Stage::ResultFormatting => "result_formatting",
            Stage::ErrorResponse => "error_response",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Valid,
    Failed(String),
}

/// what the last execution attempt produced; rows and error can't coexist
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows(RowSet),
    Error(String),
}

/// which terminal state ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Answered,
    Failed,
}

/// mutable record threaded through one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    user_query: String,
    relevant_tables: Vec<String>,
    schema_context: String,
    schema_name: Option<String>,
    generated_sql: String,
    validation: ValidationStatus,
    execution: Option<ExecutionOutcome>,
    retry_count: usize,
    max_retries: usize,
    final_response: Option<String>,
    outcome: Option<RunOutcome>,
}

impl PipelineState {
    pub fn new(user_query: impl Into<String>, max_retries: usize) -> Self {
        Self {
            user_query: user_query.into(),
            relevant_tables: Vec::new(),
            schema_context: String::new(),
            schema_name: None,
            generated_sql: String::new(),
            validation: ValidationStatus::Pending,
            execution: None,
            retry_count: 0,
            max_retries,
            final_response: None,
            outcome: None,
        }
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn relevant_tables(&self) -> &[String] {
        &self.relevant_tables
    }

    pub fn schema_context(&self) -> &str {
        &self.schema_context
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    /// fixed for the rest of the run once resolution has filled it in
    pub(crate) fn set_schema(
        &mut self,
        relevant_tables: Vec<String>,
        schema_context: String,
        schema_name: Option<String>,
    ) {
        self.relevant_tables = relevant_tables;
        self.schema_context = schema_context;
        self.schema_name = schema_name;
    }

    pub fn generated_sql(&self) -> &str {
        &self.generated_sql
    }

    pub(crate) fn set_generated_sql(&mut self, sql: String) {
        self.generated_sql = sql;
    }

    pub fn validation_status(&self) -> &ValidationStatus {
        &self.validation
    }

    pub fn validation_error(&self) -> Option<&str> {
        match &self.validation {
            ValidationStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validation == ValidationStatus::Valid
    }

    pub fn set_validation(&mut self, status: ValidationStatus) {
        self.validation = status;
    }

    pub fn execution_result(&self) -> Option<&RowSet> {
        match &self.execution {
            Some(ExecutionOutcome::Rows(rows)) => Some(rows),
            _ => None,
        }
    }

    pub fn execution_error(&self) -> Option<&str> {
        match &self.execution {
            Some(ExecutionOutcome::Error(e)) => Some(e),
            _ => None,
        }
    }

    pub fn set_execution(&mut self, outcome: ExecutionOutcome) {
        self.execution = Some(outcome);
    }

    /// execution error if there is one, otherwise the validation error
    pub fn last_error(&self) -> Option<&str> {
        self.execution_error().or_else(|| self.validation_error())
    }

    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// consume one retry and reset both error slots for the next validation pass
    pub(crate) fn begin_retry(&mut self, corrected_sql: String) {
        debug_assert!(self.has_retry_budget());
        self.generated_sql = corrected_sql;
        self.retry_count += 1;
        self.validation = ValidationStatus::Pending;
        self.execution = None;
    }

    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    pub(crate) fn finish(&mut self, outcome: RunOutcome, response: String) {
        debug_assert!(self.final_response.is_none(), "final response set twice");
        self.outcome = Some(outcome);
        self.final_response = Some(response);
    }
}
