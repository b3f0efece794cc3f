//! Three-tier query validation.
//!
//! Tiers run in a fixed order and stop at the first failure:
//!
//! 1. keyword denylist, a plain substring scan
//! 2. the executor's own checker (prepare / explain without running)
//! 3. a semantic review by the model, parsed by [`parse_semantic_verdict`]
//!
//! Expected failures come back as `ValidationStatus::Failed`. An unreachable
//! model is an `Err`, never a failed validation.

use crate::error::Result;
use crate::llm::LlmGateway;
use crate::monitor::RunMonitor;
use crate::pipeline::prompt::validation_prompt;
use crate::pipeline::{Stage, ValidationStatus};
use crate::sql::{find_denied_keyword, SqlExecutor};

/// Read the model's free-text verdict.
///
/// The upper-cased response must contain `VALID`, must not start with `ERROR`
/// and must not contain `ERROR:` anywhere. A response carrying both markers,
/// such as `ERROR: missing limit, otherwise VALID`, is rejected. Any rejection
/// keeps the trimmed response as the reason.
pub fn parse_semantic_verdict(response: &str) -> ValidationStatus {
    let trimmed = response.trim();
    let upper = trimmed.to_uppercase();

    if upper.contains("VALID") && !upper.starts_with("ERROR") && !upper.contains("ERROR:") {
        ValidationStatus::Valid
    } else {
        ValidationStatus::Failed(trimmed.to_string())
    }
}

pub struct QueryValidator<'a> {
    pub executor: &'a dyn SqlExecutor,
    pub llm: &'a dyn LlmGateway,
    pub monitor: &'a dyn RunMonitor,
}

impl QueryValidator<'_> {
    #[tracing::instrument(skip(self, sql), fields(sql_len = sql.len()))]
    pub async fn validate(&self, sql: &str, question: &str) -> Result<ValidationStatus> {
        if let Some(keyword) = find_denied_keyword(sql) {
            tracing::error!(keyword, "query rejected by keyword denylist");
            return Ok(ValidationStatus::Failed(format!(
                "Query contains dangerous operation: {}",
                keyword
            )));
        }

        if let Err(e) = self.executor.check(sql).await {
            tracing::error!("query checker rejected the query: {}", e);
            return Ok(ValidationStatus::Failed(format!(
                "Query checker error: {}",
                e.into_detail()
            )));
        }

        let completion = self
            .llm
            .complete(&validation_prompt(sql, question, self.executor.dialect_name()))
            .await?;
        if let Some(usage) = completion.usage {
            self.monitor.on_llm_call(
                Stage::QueryValidation,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
        }

        let verdict = parse_semantic_verdict(&completion.text);
        match &verdict {
            ValidationStatus::Failed(reason) => {
                tracing::error!(reason = %reason, "semantic review rejected the query")
            }
            _ => tracing::info!("query passed all validation tiers"),
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::NoopMonitor;
    use crate::testing::{FakeExecutor, ScriptedLlm};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_verdict_valid() {
        assert_eq!(parse_semantic_verdict("VALID"), ValidationStatus::Valid);
        assert_eq!(parse_semantic_verdict("  valid\n"), ValidationStatus::Valid);
    }

    #[test]
    fn test_verdict_error_marker() {
        assert_eq!(
            parse_semantic_verdict("ERROR: missing join condition"),
            ValidationStatus::Failed("ERROR: missing join condition".to_string())
        );
    }

    #[test]
    fn test_verdict_with_both_markers_is_rejected() {
        assert!(matches!(
            parse_semantic_verdict("The query is VALID. ERROR: no row limit"),
            ValidationStatus::Failed(_)
        ));
        assert!(matches!(
            parse_semantic_verdict("error - otherwise valid"),
            ValidationStatus::Failed(_)
        ));
    }

    #[test]
    fn test_verdict_without_marker_is_rejected() {
        assert!(matches!(
            parse_semantic_verdict("Looks fine to me"),
            ValidationStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_denylist_short_circuits() {
        let executor = FakeExecutor::new();
        let llm = ScriptedLlm::new(["VALID"]);
        let validator = QueryValidator {
            executor: &executor,
            llm: &llm,
            monitor: &NoopMonitor,
        };

        let status = validator.validate("DROP TABLE x", "drop it").await.unwrap();

        assert_eq!(
            status,
            ValidationStatus::Failed("Query contains dangerous operation: DROP".to_string())
        );
        assert_eq!(executor.check_calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_checker_failure_skips_semantic_review() {
        let executor = FakeExecutor::new().then_check_fails("near \"SELEC\": syntax error");
        let llm = ScriptedLlm::new(["VALID"]);
        let validator = QueryValidator {
            executor: &executor,
            llm: &llm,
            monitor: &NoopMonitor,
        };

        let status = validator.validate("SELEC 1", "one").await.unwrap();

        match status {
            ValidationStatus::Failed(reason) => {
                assert!(reason.starts_with("Query checker error:"));
                assert!(reason.contains("syntax error"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_tiers_pass() {
        let executor = FakeExecutor::new();
        let llm = ScriptedLlm::new(["VALID"]);
        let validator = QueryValidator {
            executor: &executor,
            llm: &llm,
            monitor: &NoopMonitor,
        };

        let status = validator
            .validate("SELECT COUNT(*) FROM Sales.Customer", "how many customers?")
            .await
            .unwrap();

        assert_eq!(status, ValidationStatus::Valid);
        assert!(llm.prompts()[0].contains("SELECT COUNT(*) FROM Sales.Customer"));
        assert!(llm.prompts()[0].contains("mssql"));
    }

    #[tokio::test]
    async fn test_unreachable_model_propagates() {
        let executor = FakeExecutor::new();
        let llm = ScriptedLlm::default();
        llm.push_error("connection refused");
        let validator = QueryValidator {
            executor: &executor,
            llm: &llm,
            monitor: &NoopMonitor,
        };

        assert!(validator.validate("SELECT 1", "one").await.is_err());
    }
}
