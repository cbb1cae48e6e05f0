//! Hybrid fallback: hand an unresolvable task to a human.
//!
//! After all automated attempts are exhausted, the task transitions to the
//! review status and receives a structured comment summarizing what was
//! tried and why it failed. Both side effects are best-effort: a tracker
//! outage must not change the pipeline's result.

use std::sync::Arc;

use tracing::instrument;

use crate::artifacts::{ValidationResult, is_placeholder_issue};
use crate::config::store::{PromptStore, keys};
use crate::providers::tracker::WorkTracker;

const DEFAULT_COMMENT_TEMPLATE: &str = "\
AI agent could not complete this edit automatically.

Request: {request}
Iterations attempted: {iterations}
Models exercised: {models}

Outstanding issues:
{issues}

Please review and complete manually.";

pub struct HybridFallback {
    tracker: Arc<dyn WorkTracker>,
    store: Arc<dyn PromptStore>,
    review_status: String,
}

impl HybridFallback {
    pub fn new(
        tracker: Arc<dyn WorkTracker>,
        store: Arc<dyn PromptStore>,
        review_status: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            store,
            review_status: review_status.into(),
        }
    }

    /// Deduplicated issue list, each prefixed with the model that produced
    /// the failing image.
    pub fn format_issues(failed: &[ValidationResult]) -> String {
        let mut lines: Vec<String> = Vec::new();
        for result in failed.iter().filter(|r| !r.passed) {
            for issue in &result.issues {
                if is_placeholder_issue(issue) {
                    continue;
                }
                let line = format!("- [{}] {}", result.model_name, issue);
                if !lines.contains(&line) {
                    lines.push(line);
                }
            }
        }
        if lines.is_empty() {
            return "- Quality standards not met (specific issues not captured)".to_string();
        }
        lines.join("\n")
    }

    /// Transition the task to human review and post the summary comment.
    #[instrument(skip_all, fields(task_id, iterations = iterations_attempted))]
    pub async fn trigger_human_review(
        &self,
        task_id: &str,
        original_prompt: &str,
        iterations_attempted: u32,
        failed: &[ValidationResult],
    ) {
        let issues = Self::format_issues(failed);
        let mut models: Vec<&str> = Vec::new();
        for result in failed {
            if !models.contains(&result.model_name.as_str()) {
                models.push(&result.model_name);
            }
        }

        let template = self
            .store
            .document(keys::FALLBACK_COMMENT)
            .await
            .unwrap_or_else(|_| DEFAULT_COMMENT_TEMPLATE.to_string());
        let comment = template
            .replace("{request}", original_prompt)
            .replace("{iterations}", &iterations_attempted.to_string())
            .replace("{issues}", &issues)
            .replace("{models}", &models.join(", "));

        if let Err(err) = self.tracker.set_status(task_id, &self.review_status).await {
            tracing::error!(task_id, error = %err, "failed to set review status");
        }
        if let Err(err) = self.tracker.post_comment(task_id, &comment).await {
            tracing::error!(task_id, error = %err, "failed to post fallback comment");
        } else {
            tracing::info!(task_id, "hybrid fallback comment posted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_are_deduplicated_and_model_prefixed() {
        let failed = vec![
            ValidationResult::normalized("seedream-v4", false, 5, vec!["tint".into()], "", 8),
            ValidationResult::normalized("seedream-v4", false, 4, vec!["tint".into()], "", 8),
            ValidationResult::normalized("nano-banana", false, 5, vec!["tint".into()], "", 8),
        ];
        let formatted = HybridFallback::format_issues(&failed);
        assert_eq!(formatted.matches("- [seedream-v4] tint").count(), 1);
        assert!(formatted.contains("- [nano-banana] tint"));
    }

    #[test]
    fn empty_issue_sets_get_a_generic_line() {
        let failed = vec![ValidationResult::normalized("m", true, 9, vec![], "", 8)];
        assert!(HybridFallback::format_issues(&failed).contains("Quality standards not met"));
    }
}
