pub mod context;
pub mod prompt;
pub mod runner;
pub mod state;
pub mod validator;

pub use context::{PipelineContext, PipelineContextBuilder};
pub use runner::{route_after_execution, route_after_validation, QueryPipeline, Step};
pub use state::{ExecutionOutcome, PipelineState, RunOutcome, Stage, ValidationStatus};
pub use validator::{parse_semantic_verdict, QueryValidator};
