//! Smart retry policy: decide whether to retry and from which base image.
//!
//! A pure decision table over the last iteration's validation summary, the
//! request text, and the retry count. `Incremental` builds on the best
//! failed edit; `FullRestart` goes back to the original image.

use crate::artifacts::ValidationSummary;
use crate::types::{BaseImage, EditComplexity, RetryStrategy, ValidationConfidence};

/// Words counted as individual edit operations.
const OPERATION_KEYWORDS: [&str; 12] = [
    "move", "resize", "change", "add", "remove", "replace", "shift", "rotate", "flip", "crop",
    "scale", "adjust",
];

/// Qualifiers that mark a sweeping request.
const SWEEPING_QUALIFIERS: [&str; 9] = [
    "multiple",
    "several",
    "all",
    "entire",
    "whole",
    "everywhere",
    "throughout",
    "completely",
    "redesign",
];

/// Issue keywords that indicate structural damage to the image. Structural
/// damage means the edit is not worth building on.
const STRUCTURAL_KEYWORDS: [&str; 10] = [
    "distort",
    "warp",
    "corrupt",
    "damage",
    "quality loss",
    "blur",
    "artifact",
    "degrade",
    "merge",
    "pixel",
];

/// A retry decision with its supporting context.
#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub strategy: RetryStrategy,
    pub reason: String,
    /// Instruction block the next enhancement may attach; absent for
    /// terminal strategies.
    pub retry_prompt: Option<String>,
    /// Base image for the next attempt; absent for terminal strategies.
    pub base_image: Option<BaseImage>,
    pub issues_to_focus: Vec<String>,
}

/// The policy, parameterized by its thresholds.
#[derive(Clone, Debug)]
pub struct SmartRetry {
    max_retries: u32,
    incremental_threshold: f64,
    catastrophic_threshold: f64,
    pass_threshold: u8,
}

impl SmartRetry {
    pub fn new(
        max_retries: u32,
        incremental_threshold: f64,
        catastrophic_threshold: f64,
        pass_threshold: u8,
    ) -> Self {
        Self {
            max_retries,
            incremental_threshold,
            catastrophic_threshold,
            pass_threshold,
        }
    }

    /// Apply the decision table.
    pub fn decide(
        &self,
        summary: &ValidationSummary,
        request: &str,
        retry_count: u32,
    ) -> RetryDecision {
        if retry_count >= self.max_retries {
            return RetryDecision {
                strategy: RetryStrategy::GiveUp,
                reason: format!("max retries ({}) exceeded", self.max_retries),
                retry_prompt: None,
                base_image: None,
                issues_to_focus: summary.issues.clone(),
            };
        }

        if summary.passed && summary.avg_score >= self.pass_threshold as f64 {
            return RetryDecision {
                strategy: RetryStrategy::NoRetry,
                reason: format!("validation passed with score {:.1}/10", summary.avg_score),
                retry_prompt: None,
                base_image: None,
                issues_to_focus: vec![],
            };
        }

        if summary.avg_score < self.catastrophic_threshold {
            return self.full_restart("catastrophic damage detected", summary);
        }
        if summary.avg_score >= self.incremental_threshold {
            return self.incremental("score close to threshold, small adjustments needed", summary);
        }

        // Moderate failure: the call depends on what kind of edit this is
        // and what went wrong.
        let complexity = classify_complexity(request);
        if complexity == EditComplexity::Simple {
            return self.full_restart("simple edit should not fail this badly", summary);
        }
        if has_structural_damage(&summary.issues) {
            return self.full_restart("structural damage detected", summary);
        }
        if summary.confidence == ValidationConfidence::Low {
            return self.full_restart("low-confidence result, restart is safer", summary);
        }
        self.incremental("moderate issues in a complex edit", summary)
    }

    fn incremental(&self, reason: &str, summary: &ValidationSummary) -> RetryDecision {
        let issues_text = bullet_list(&summary.issues);
        let retry_prompt = format!(
            "RETRY - Incremental fix:\n\
             Previous attempt scored {:.1}/10. Close but not perfect.\n\n\
             Issues to fix:\n{issues_text}\n\
             Make ONLY the specific changes needed to fix the issues above.\n\
             Preserve everything else exactly as-is. Be surgical and precise.",
            summary.avg_score
        );
        RetryDecision {
            strategy: RetryStrategy::Incremental,
            reason: reason.to_string(),
            retry_prompt: Some(retry_prompt),
            base_image: Some(BaseImage::BestEdit),
            issues_to_focus: summary.issues.clone(),
        }
    }

    fn full_restart(&self, reason: &str, summary: &ValidationSummary) -> RetryDecision {
        let issues_text = bullet_list(&summary.issues);
        let retry_prompt = format!(
            "RETRY - Full restart:\n\
             Previous attempt scored {:.1}/10. Starting from the original image.\n\n\
             Critical issues from the previous attempt:\n{issues_text}\n\
             Pay special attention to the issues listed above.\n\
             Preserve logo and text quality exactly. Make ONLY the requested changes.",
            summary.avg_score
        );
        RetryDecision {
            strategy: RetryStrategy::FullRestart,
            reason: reason.to_string(),
            retry_prompt: Some(retry_prompt),
            base_image: Some(BaseImage::Original),
            issues_to_focus: summary.issues.clone(),
        }
    }
}

fn bullet_list(issues: &[String]) -> String {
    if issues.is_empty() {
        return "- (no specific issues captured)\n".to_string();
    }
    issues
        .iter()
        .map(|issue| format!("- {issue}\n"))
        .collect()
}

/// Classify request complexity from operation-verb count, sweeping
/// qualifiers, and word count.
pub fn classify_complexity(request: &str) -> EditComplexity {
    let lower = request.to_lowercase();
    let operation_count = OPERATION_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();
    let sweeping = SWEEPING_QUALIFIERS.iter().any(|kw| lower.contains(kw));
    let word_count = request.split_whitespace().count();

    if operation_count <= 1 && word_count < 15 && !sweeping {
        EditComplexity::Simple
    } else if operation_count <= 3 && word_count < 30 {
        EditComplexity::Moderate
    } else {
        EditComplexity::Complex
    }
}

fn has_structural_damage(issues: &[String]) -> bool {
    let joined = issues.join(" ").to_lowercase();
    STRUCTURAL_KEYWORDS.iter().any(|kw| joined.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidationConfidence;

    fn summary(avg: f64, passed: bool, issues: &[&str]) -> ValidationSummary {
        ValidationSummary {
            passed,
            avg_score: avg,
            confidence: ValidationConfidence::High,
            issues: issues.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn policy() -> SmartRetry {
        SmartRetry::new(5, 8.0, 5.0, 8)
    }

    #[test]
    fn gives_up_at_the_retry_budget() {
        let decision = policy().decide(&summary(6.0, false, &[]), "move the logo", 5);
        assert_eq!(decision.strategy, RetryStrategy::GiveUp);
        assert!(decision.base_image.is_none());
    }

    #[test]
    fn passes_need_no_retry() {
        let decision = policy().decide(&summary(9.0, true, &[]), "move the logo", 1);
        assert_eq!(decision.strategy, RetryStrategy::NoRetry);
    }

    #[test]
    fn catastrophic_scores_restart_from_the_original() {
        let decision = policy().decide(
            &summary(3.0, false, &["logo distortion"]),
            "move the logo left and change the headline and add a banner",
            1,
        );
        assert_eq!(decision.strategy, RetryStrategy::FullRestart);
        assert_eq!(decision.base_image, Some(BaseImage::Original));
    }

    #[test]
    fn near_misses_retry_incrementally_on_the_edit() {
        let decision = policy().decide(
            &summary(8.0, false, &["slight tint"]),
            "move the logo left and change the headline and add a banner",
            1,
        );
        assert_eq!(decision.strategy, RetryStrategy::Incremental);
        assert_eq!(decision.base_image, Some(BaseImage::BestEdit));
        assert!(decision.retry_prompt.unwrap().contains("slight tint"));
    }

    #[test]
    fn simple_edits_that_fail_moderately_restart() {
        let decision = policy().decide(&summary(6.0, false, &["off-center"]), "move the logo", 1);
        assert_eq!(decision.strategy, RetryStrategy::FullRestart);
    }

    #[test]
    fn structural_damage_restarts_even_for_complex_edits() {
        let request = "move the logo left and change the headline and add a banner and \
                       replace the product shot in the entire layout";
        let decision = policy().decide(&summary(6.0, false, &["text is warped"]), request, 1);
        assert_eq!(decision.strategy, RetryStrategy::FullRestart);
    }

    #[test]
    fn low_confidence_restarts() {
        let request = "move the logo left and change the headline and add a banner and \
                       replace the product shot in the entire layout";
        let mut s = summary(6.0, false, &["composition is off"]);
        s.confidence = ValidationConfidence::Low;
        let decision = policy().decide(&s, request, 1);
        assert_eq!(decision.strategy, RetryStrategy::FullRestart);
    }

    #[test]
    fn moderate_complex_failures_go_incremental() {
        let request = "move the logo left and change the headline and add a banner and \
                       replace the product shot in the entire layout";
        let decision = policy().decide(&summary(6.0, false, &["spacing is uneven"]), request, 1);
        assert_eq!(decision.strategy, RetryStrategy::Incremental);
    }

    #[test]
    fn complexity_classification() {
        assert_eq!(classify_complexity("move the logo"), EditComplexity::Simple);
        assert_eq!(
            classify_complexity("move the logo and change the text color"),
            EditComplexity::Moderate
        );
        assert_eq!(
            classify_complexity(
                "move the logo, resize the banner, change the headline, remove the watermark \
                 and replace the background"
            ),
            EditComplexity::Complex
        );
    }
}
