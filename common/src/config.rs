use crate::error::{Nl2SqlError, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_VECTOR_SEARCH_K: usize = 5;
const DEFAULT_METRICS_FILE: &str = "nl2sql_metrics.json";

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// settings that shape a single pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_retries: usize,
    pub vector_search_k: usize,
    pub enable_monitoring: bool,
    pub export_metrics: bool,
    pub metrics_file: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            vector_search_k: DEFAULT_VECTOR_SEARCH_K,
            enable_monitoring: true,
            export_metrics: true,
            metrics_file: PathBuf::from(DEFAULT_METRICS_FILE),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            max_retries: positive_var("MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            vector_search_k: positive_var("VECTOR_SEARCH_K")?
                .unwrap_or(defaults.vector_search_k),
            enable_monitoring: flag_var("ENABLE_MONITORING").unwrap_or(defaults.enable_monitoring),
            export_metrics: flag_var("EXPORT_METRICS").unwrap_or(defaults.export_metrics),
            metrics_file: non_empty_var("METRICS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.metrics_file),
        })
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Result<Self> {
        self.max_retries = require_positive("max_retries", max_retries)?;
        Ok(self)
    }

    pub fn with_vector_search_k(mut self, k: usize) -> Result<Self> {
        self.vector_search_k = require_positive("vector_search_k", k)?;
        Ok(self)
    }
}

/// connection settings for an openai-compatible endpoint, shared by the chat
/// gateway and the embedder
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: 0.0,
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let temperature = match non_empty_var("LLM_TEMPERATURE") {
            Some(raw) => raw.parse::<f32>().map_err(|e| {
                Nl2SqlError::Config(format!("LLM_TEMPERATURE must be a number: {}", e))
            })?,
            None => defaults.temperature,
        };

        Ok(Self {
            api_key: non_empty_var("OPENAI_API_KEY"),
            base_url: non_empty_var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: non_empty_var("OPENAI_MODEL").unwrap_or(defaults.model),
            embedding_model: non_empty_var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            temperature,
            timeout_secs: defaults.timeout_secs,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn flag_var(name: &str) -> Option<bool> {
    non_empty_var(name).map(|v| parse_flag(&v))
}

fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_lowercase();
    v == "1" || v == "true" || v == "yes"
}

fn positive_var(name: &str) -> Result<Option<usize>> {
    match non_empty_var(name) {
        Some(raw) => {
            let value = raw.trim().parse::<usize>().map_err(|e| {
                Nl2SqlError::Config(format!("{} must be a positive integer: {}", name, e))
            })?;
            require_positive(name, value).map(Some)
        }
        None => Ok(None),
    }
}

fn require_positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(Nl2SqlError::Config(format!(
            "{} must be a positive integer, got 0",
            name
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.vector_search_k, 5);
        assert_eq!(config.metrics_file, PathBuf::from("nl2sql_metrics.json"));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let result = PipelineConfig::default().with_max_retries(0);
        assert!(matches!(result, Err(Nl2SqlError::Config(_))));
    }

    #[test]
    fn test_overrides_apply() {
        let config = PipelineConfig::default()
            .with_max_retries(1)
            .and_then(|c| c.with_vector_search_k(8))
            .unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.vector_search_k, 8);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("off"));
    }

    #[test]
    fn test_llm_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert!(config.base_url.starts_with("https://"));
        assert_eq!(config.temperature, 0.0);
    }
}
