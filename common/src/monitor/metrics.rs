//! Per-run metrics recorder.
//!
//! Collects stage timings, failure counters and llm token usage for a single
//! pipeline run, then renders them as a serialisable summary that can be logged
//! or exported to a json file.

use crate::error::Result;
use crate::monitor::RunMonitor;
use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// USD per 1k prompt tokens
const PROMPT_COST_PER_1K: f64 = 0.0025;
/// USD per 1k completion tokens
const COMPLETION_COST_PER_1K: f64 = 0.01;

#[derive(Debug, Default)]
struct StageAccumulator {
    count: u32,
    total_secs: f64,
    errors: u32,
    last_secs: Option<f64>,
}

#[derive(Debug, Default)]
struct RunMetrics {
    started: Option<Instant>,
    total_secs: Option<f64>,
    success: bool,
    open_stages: HashMap<Stage, Instant>,
    stages: BTreeMap<Stage, StageAccumulator>,
    retries: u32,
    validation_failures: u32,
    execution_failures: u32,
    llm_calls: u32,
    prompt_tokens: u64,
    completion_tokens: u64,
    llm_cost: f64,
    llm_calls_per_stage: BTreeMap<Stage, u32>,
    steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub total_duration: f64,
    pub success: bool,
    pub retries: u32,
    pub validation_failures: u32,
    pub execution_failures: u32,
    pub total_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub executions: u32,
    pub total_time: f64,
    pub avg_time: f64,
    pub errors: u32,
    pub last_execution_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSummary {
    pub total_calls: u32,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost: f64,
    pub calls_per_stage: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub stage: String,
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub pipeline: PipelineSummary,
    pub stages: BTreeMap<String, StageSummary>,
    pub llm: LlmSummary,
    pub steps: Vec<StepRecord>,
}

/// `RunMonitor` that keeps everything in memory. use one per run, or call
/// `reset` before reusing it.
#[derive(Debug, Default)]
pub struct MetricsMonitor {
    inner: Mutex<RunMetrics>,
}

impl MetricsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunMetrics> {
        // a poisoned lock still holds usable counters
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn reset(&self) {
        *self.lock() = RunMetrics::default();
    }

    pub fn summary(&self) -> MetricsSummary {
        let m = self.lock();

        let total_duration = m
            .total_secs
            .or_else(|| m.started.map(|s| s.elapsed().as_secs_f64()))
            .unwrap_or(0.0);

        let stages = m
            .stages
            .iter()
            .map(|(stage, acc)| {
                let avg_time = if acc.count > 0 {
                    acc.total_secs / acc.count as f64
                } else {
                    0.0
                };
                (
                    stage.as_str().to_string(),
                    StageSummary {
                        executions: acc.count,
                        total_time: acc.total_secs,
                        avg_time,
                        errors: acc.errors,
                        last_execution_time: acc.last_secs,
                    },
                )
            })
            .collect();

        MetricsSummary {
            pipeline: PipelineSummary {
                total_duration,
                success: m.success,
                retries: m.retries,
                validation_failures: m.validation_failures,
                execution_failures: m.execution_failures,
                total_steps: m.steps.len(),
            },
            stages,
            llm: LlmSummary {
                total_calls: m.llm_calls,
                total_tokens: m.prompt_tokens + m.completion_tokens,
                prompt_tokens: m.prompt_tokens,
                completion_tokens: m.completion_tokens,
                estimated_cost: m.llm_cost,
                calls_per_stage: m
                    .llm_calls_per_stage
                    .iter()
                    .map(|(stage, n)| (stage.as_str().to_string(), *n))
                    .collect(),
            },
            steps: m.steps.clone(),
        }
    }

    /// write the summary as pretty json
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.summary())?;
        std::fs::write(path, json)?;
        tracing::info!(output = %path.display(), "metrics exported");
        Ok(())
    }

    pub fn log_summary(&self) {
        let s = self.summary();

        tracing::info!(
            duration_secs = %format!("{:.2}", s.pipeline.total_duration),
            success = s.pipeline.success,
            steps = s.pipeline.total_steps,
            retries = s.pipeline.retries,
            validation_failures = s.pipeline.validation_failures,
            execution_failures = s.pipeline.execution_failures,
            "pipeline metrics"
        );

        for (stage, m) in &s.stages {
            tracing::info!(
                "{}: {} exec, {:.3}s total, {:.3}s avg, {} errors",
                stage,
                m.executions,
                m.total_time,
                m.avg_time,
                m.errors
            );
        }

        if s.llm.total_tokens > 0 {
            tracing::info!(
                calls = s.llm.total_calls,
                prompt_tokens = s.llm.prompt_tokens,
                completion_tokens = s.llm.completion_tokens,
                estimated_cost = %format!("${:.4}", s.llm.estimated_cost),
                "llm usage"
            );
        } else {
            tracing::info!(calls = s.llm.total_calls, "llm usage (no token counts reported)");
        }

        for (i, step) in s.steps.iter().enumerate() {
            tracing::debug!("{}. {}: {:.3}s", i + 1, step.stage, step.duration);
        }
    }
}

impl RunMonitor for MetricsMonitor {
    fn on_run_start(&self) {
        let mut m = self.lock();
        *m = RunMetrics::default();
        m.started = Some(Instant::now());
    }

    fn on_run_end(&self, success: bool) {
        let mut m = self.lock();
        m.success = success;
        m.total_secs = m.started.map(|s| s.elapsed().as_secs_f64());
    }

    fn on_stage_start(&self, stage: Stage) {
        self.lock().open_stages.insert(stage, Instant::now());
    }

    fn on_stage_end(&self, stage: Stage, error: bool) {
        let mut m = self.lock();
        let duration = m
            .open_stages
            .remove(&stage)
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let acc = m.stages.entry(stage).or_default();
        acc.count += 1;
        acc.total_secs += duration;
        acc.last_secs = Some(duration);
        if error {
            acc.errors += 1;
        }

        m.steps.push(StepRecord {
            stage: stage.as_str().to_string(),
            duration,
            timestamp: Utc::now(),
        });
    }

    fn on_retry(&self) {
        self.lock().retries += 1;
    }

    fn on_validation_failure(&self) {
        self.lock().validation_failures += 1;
    }

    fn on_execution_failure(&self) {
        self.lock().execution_failures += 1;
    }

    fn on_llm_call(&self, stage: Stage, prompt_tokens: u64, completion_tokens: u64) {
        let mut m = self.lock();
        m.llm_calls += 1;
        m.prompt_tokens += prompt_tokens;
        m.completion_tokens += completion_tokens;
        m.llm_cost += prompt_tokens as f64 / 1000.0 * PROMPT_COST_PER_1K
            + completion_tokens as f64 / 1000.0 * COMPLETION_COST_PER_1K;
        *m.llm_calls_per_stage.entry(stage).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timing_and_errors() {
        let monitor = MetricsMonitor::new();
        monitor.on_run_start();
        monitor.on_stage_start(Stage::QueryValidation);
        monitor.on_stage_end(Stage::QueryValidation, true);
        monitor.on_stage_start(Stage::QueryValidation);
        monitor.on_stage_end(Stage::QueryValidation, false);
        monitor.on_run_end(true);

        let summary = monitor.summary();
        let validation = &summary.stages["query_validation"];
        assert_eq!(validation.executions, 2);
        assert_eq!(validation.errors, 1);
        assert_eq!(summary.pipeline.total_steps, 2);
        assert!(summary.pipeline.success);
    }

    #[test]
    fn test_llm_usage_and_cost() {
        let monitor = MetricsMonitor::new();
        monitor.on_llm_call(Stage::QueryGeneration, 1000, 1000);
        monitor.on_llm_call(Stage::QueryValidation, 0, 0);

        let llm = monitor.summary().llm;
        assert_eq!(llm.total_calls, 2);
        assert_eq!(llm.total_tokens, 2000);
        assert!((llm.estimated_cost - 0.0125).abs() < 1e-9);
        assert_eq!(llm.calls_per_stage["query_generation"], 1);
    }

    #[test]
    fn test_counters_and_reset() {
        let monitor = MetricsMonitor::new();
        monitor.on_retry();
        monitor.on_validation_failure();
        monitor.on_execution_failure();
        monitor.on_execution_failure();

        let p = monitor.summary().pipeline;
        assert_eq!((p.retries, p.validation_failures, p.execution_failures), (1, 1, 2));

        monitor.reset();
        let p = monitor.summary().pipeline;
        assert_eq!((p.retries, p.validation_failures, p.execution_failures), (0, 0, 0));
    }

    #[test]
    fn test_export_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("metrics.json");

        let monitor = MetricsMonitor::new();
        monitor.on_run_start();
        monitor.on_stage_start(Stage::SchemaResolution);
        monitor.on_stage_end(Stage::SchemaResolution, false);
        monitor.on_run_end(false);
        monitor.export(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: MetricsSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.steps[0].stage, "schema_resolution");
        assert!(!parsed.pipeline.success);
    }
}
