pub mod metrics;

pub use metrics::{MetricsMonitor, MetricsSummary};

use crate::pipeline::Stage;

/// observation hooks for one pipeline run. implementations must never influence
/// control flow; every method is infallible.
pub trait RunMonitor: Send + Sync {
    fn on_run_start(&self) {}

    fn on_run_end(&self, _success: bool) {}

    fn on_stage_start(&self, stage: Stage);

    fn on_stage_end(&self, stage: Stage, error: bool);

    fn on_retry(&self);

    fn on_validation_failure(&self);

    fn on_execution_failure(&self);

    fn on_llm_call(&self, stage: Stage, prompt_tokens: u64, completion_tokens: u64);
}

/// monitor that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl RunMonitor for NoopMonitor {
    fn on_stage_start(&self, _stage: Stage) {}

    fn on_stage_end(&self, _stage: Stage, _error: bool) {}

    fn on_retry(&self) {}

    fn on_validation_failure(&self) {}

    fn on_execution_failure(&self) {}

    fn on_llm_call(&self, _stage: Stage, _prompt_tokens: u64, _completion_tokens: u64) {}
}
