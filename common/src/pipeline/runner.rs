use crate::config::PipelineConfig;
use crate::error::Result;
use crate::monitor::RunMonitor;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::prompt::{
    apology_message, formatting_prompt, generation_prompt, recovery_prompt,
};
use crate::pipeline::state::{ExecutionOutcome, PipelineState, RunOutcome, Stage};
use crate::pipeline::validator::QueryValidator;
use crate::schema::SchemaResolver;
use crate::sql::strip_code_fences;

/// next state of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Resolve,
    Generate,
    Validate,
    Execute,
    Recover,
    Format,
    Fail,
}

/// where a validated (or rejected) candidate goes next
pub fn route_after_validation(state: &PipelineState) -> Step {
    if state.is_valid() {
        Step::Execute
    } else if state.has_retry_budget() {
        Step::Recover
    } else {
        Step::Fail
    }
}

/// where an executed candidate goes next
pub fn route_after_execution(state: &PipelineState) -> Step {
    if state.execution_result().is_some() {
        Step::Format
    } else if state.has_retry_budget() {
        Step::Recover
    } else {
        Step::Fail
    }
}

/// drives one question from schema resolution to a final response.
///
/// the only backward edge is recover -> validate, and every pass over it
/// consumes one retry, so the loop ends after at most `max_retries` repairs.
pub struct QueryPipeline {
    ctx: PipelineContext,
    config: PipelineConfig,
    resolver: SchemaResolver,
}

impl QueryPipeline {
    pub fn new(ctx: PipelineContext, config: PipelineConfig) -> Self {
        let resolver = SchemaResolver::new(
            ctx.index.clone(),
            ctx.catalog.clone(),
            ctx.llm.clone(),
            config.vector_search_k,
        );
        Self {
            ctx,
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// answer one question. retries exhausted still returns `Ok` with the
    /// apology as the final response; only unrecoverable or unexpected errors
    /// come back as `Err`.
    #[tracing::instrument(skip(self, monitor), fields(max_retries = self.config.max_retries))]
    pub async fn run(&self, question: &str, monitor: &dyn RunMonitor) -> Result<PipelineState> {
        let mut state = PipelineState::new(question, self.config.max_retries);
        monitor.on_run_start();

        match self.drive(&mut state, monitor).await {
            Ok(()) => {
                let answered = state.outcome() == Some(RunOutcome::Answered);
                monitor.on_run_end(answered);
                tracing::info!(
                    answered,
                    retries = state.retry_count(),
                    "pipeline finished"
                );
                Ok(state)
            }
            Err(e) => {
                monitor.on_run_end(false);
                tracing::error!("pipeline aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn drive(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) -> Result<()> {
        let mut step = Step::Resolve;
        loop {
            step = match step {
                Step::Resolve => {
                    self.resolve(state, monitor).await?;
                    Step::Generate
                }
                Step::Generate => {
                    self.generate(state, monitor).await?;
                    Step::Validate
                }
                Step::Validate => {
                    self.validate(state, monitor).await?;
                    route_after_validation(state)
                }
                Step::Execute => {
                    self.execute(state, monitor).await;
                    route_after_execution(state)
                }
                Step::Recover => {
                    self.recover(state, monitor).await?;
                    Step::Validate
                }
                Step::Format => {
                    self.format(state, monitor).await?;
                    return Ok(());
                }
                Step::Fail => {
                    self.fail(state, monitor);
                    return Ok(());
                }
            };
        }
    }

    /// one completion, with token usage forwarded to the monitor
    async fn ask(&self, stage: Stage, prompt: &str, monitor: &dyn RunMonitor) -> Result<String> {
        let completion = self.ctx.llm.complete(prompt).await?;
        if let Some(usage) = completion.usage {
            monitor.on_llm_call(stage, usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(completion.text)
    }

    async fn resolve(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) -> Result<()> {
        monitor.on_stage_start(Stage::SchemaResolution);
        let resolved = self.resolver.resolve(state.user_query(), monitor).await;
        monitor.on_stage_end(Stage::SchemaResolution, resolved.is_err());

        let resolution = resolved?;
        tracing::info!(
            from_index = resolution.from_index,
            tables = resolution.relevant_tables.len(),
            "schema resolved"
        );
        state.set_schema(
            resolution.relevant_tables,
            resolution.schema_context,
            resolution.schema_name,
        );
        Ok(())
    }

    async fn generate(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) -> Result<()> {
        monitor.on_stage_start(Stage::QueryGeneration);
        let prompt = generation_prompt(
            state.user_query(),
            state.schema_context(),
            state.schema_name(),
            self.ctx.executor.dialect_name(),
        );
        let raw = self.ask(Stage::QueryGeneration, &prompt, monitor).await;
        monitor.on_stage_end(Stage::QueryGeneration, raw.is_err());

        state.set_generated_sql(strip_code_fences(&raw?));
        tracing::info!(sql = %state.generated_sql(), "generated query");
        Ok(())
    }

    async fn validate(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) -> Result<()> {
        monitor.on_stage_start(Stage::QueryValidation);
        let validator = QueryValidator {
            executor: self.ctx.executor.as_ref(),
            llm: self.ctx.llm.as_ref(),
            monitor,
        };
        let status = match validator
            .validate(state.generated_sql(), state.user_query())
            .await
        {
            Ok(status) => status,
            Err(e) => {
                monitor.on_stage_end(Stage::QueryValidation, true);
                return Err(e);
            }
        };

        state.set_validation(status);
        let failed = !state.is_valid();
        if failed {
            monitor.on_validation_failure();
        }
        monitor.on_stage_end(Stage::QueryValidation, failed);
        Ok(())
    }

    /// backend errors land in the state; nothing here aborts the run
    async fn execute(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) {
        monitor.on_stage_start(Stage::QueryExecution);
        let outcome = match self.ctx.executor.execute(state.generated_sql()).await {
            Ok(rows) => {
                tracing::info!(rows = rows.len(), "query executed");
                ExecutionOutcome::Rows(rows)
            }
            Err(e) => {
                let message = e.into_detail();
                tracing::error!(error = %message, "query execution failed");
                monitor.on_execution_failure();
                ExecutionOutcome::Error(message)
            }
        };
        let failed = matches!(outcome, ExecutionOutcome::Error(_));
        state.set_execution(outcome);
        monitor.on_stage_end(Stage::QueryExecution, failed);
    }

    async fn recover(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) -> Result<()> {
        monitor.on_retry();
        monitor.on_stage_start(Stage::ErrorRecovery);

        let error = state.last_error().unwrap_or("Unknown error").to_string();
        tracing::warn!(
            attempt = state.retry_count() + 1,
            max_retries = state.max_retries(),
            error = %error,
            "attempting query recovery"
        );

        let prompt = recovery_prompt(
            state.generated_sql(),
            &error,
            state.user_query(),
            state.schema_context(),
            state.schema_name(),
            self.ctx.executor.dialect_name(),
        );
        let raw = self.ask(Stage::ErrorRecovery, &prompt, monitor).await;
        monitor.on_stage_end(Stage::ErrorRecovery, raw.is_err());

        let corrected = strip_code_fences(&raw?);
        tracing::info!(sql = %corrected, "recovered query");
        state.begin_retry(corrected);
        Ok(())
    }

    async fn format(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) -> Result<()> {
        monitor.on_stage_start(Stage::ResultFormatting);
        let rows = state.execution_result().cloned().unwrap_or_default();
        let prompt = formatting_prompt(state.user_query(), state.generated_sql(), &rows);
        let answer = self.ask(Stage::ResultFormatting, &prompt, monitor).await;
        monitor.on_stage_end(Stage::ResultFormatting, answer.is_err());

        state.finish(RunOutcome::Answered, answer?.trim().to_string());
        Ok(())
    }

    /// deterministic apology; no backend is touched
    fn fail(&self, state: &mut PipelineState, monitor: &dyn RunMonitor) {
        monitor.on_stage_start(Stage::ErrorResponse);
        let message = apology_message(state.user_query(), state.last_error());
        tracing::warn!(
            retries = state.retry_count(),
            "retries exhausted, returning apology"
        );
        state.finish(RunOutcome::Failed, message);
        monitor.on_stage_end(Stage::ErrorResponse, false);
    }
}
