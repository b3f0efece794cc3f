pub mod config;
pub mod error;
pub mod llm;
pub mod monitor;
pub mod pipeline;
pub mod schema;
pub mod sql;
pub mod tracing;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{LlmConfig, PipelineConfig};
pub use error::{Nl2SqlError, Result};
pub use monitor::{MetricsMonitor, NoopMonitor, RunMonitor};
pub use pipeline::{PipelineContext, PipelineState, QueryPipeline, RunOutcome};
