//! Pipeline artifacts: the typed records that flow between stages.
//!
//! Every stage consumes and produces plain data. An iteration pairs each
//! [`EnhancedPrompt`] with at most one [`GeneratedImage`] and each generated
//! image with exactly one [`ValidationResult`], keyed by `model_name`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ProcessStatus, ValidationConfidence, ValidationStatus};

/// A model-specific instruction produced by the prompt enhancer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedPrompt {
    /// Candidate image model this prompt targets.
    pub model_name: String,
    /// The user's request as it entered the enhancer.
    pub original: String,
    /// The expanded instruction handed to the image gateway.
    pub enhanced: String,
    pub when: DateTime<Utc>,
}

impl EnhancedPrompt {
    pub fn new(
        model_name: impl Into<String>,
        original: impl Into<String>,
        enhanced: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            original: original.into(),
            enhanced: enhanced.into(),
            when: Utc::now(),
        }
    }
}

/// One edited image returned by the image-editing gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    pub model_name: String,
    /// Downloaded output bytes.
    pub bytes: Vec<u8>,
    /// Stable, unauthenticated URL of the output.
    pub result_url: String,
    /// Primary source image the edit was applied to.
    pub source_url: String,
    /// The enhanced prompt the gateway actually received.
    pub prompt_used: String,
    pub when: DateTime<Utc>,
}

/// Verdict of a validator over one `(originals, edited, request)` tuple.
///
/// Invariants upheld by the constructors:
/// - `passed` agrees with `score >= pass_threshold` after normalization;
/// - a failing result always carries at least one issue string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Image model that produced the validated image.
    pub model_name: String,
    pub passed: bool,
    /// Normalized integer score in `0..=10`.
    pub score: u8,
    pub issues: Vec<String>,
    pub reasoning: String,
    pub status: ValidationStatus,
    pub when: DateTime<Utc>,
}

impl ValidationResult {
    /// Build a verdict from a raw `(pass_fail, score)` pair, forcing the
    /// pass flag to agree with the score side of any mismatch.
    pub fn normalized(
        model_name: impl Into<String>,
        claimed_pass: bool,
        score: u8,
        mut issues: Vec<String>,
        reasoning: impl Into<String>,
        pass_threshold: u8,
    ) -> Self {
        let score = score.min(10);
        let passed = score >= pass_threshold;
        if passed != claimed_pass {
            tracing::warn!(
                claimed = claimed_pass,
                score,
                pass_threshold,
                "validator pass/fail disagreed with score; keeping the score side"
            );
        }
        if passed {
            issues.retain(|i| !is_placeholder_issue(i));
        } else if issues.iter().all(|i| is_placeholder_issue(i)) {
            issues = vec!["validation failed but no specific issues were reported".into()];
        }
        Self {
            model_name: model_name.into(),
            passed,
            score,
            issues,
            reasoning: reasoning.into(),
            status: if passed {
                ValidationStatus::Pass
            } else {
                ValidationStatus::Fail
            },
            when: Utc::now(),
        }
    }

    /// A verdict for an unparseable validator reply. Never raised; the
    /// orchestrator sees it as a quality failure with a diagnostic issue.
    pub fn parse_error(model_name: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            passed: false,
            score: 0,
            issues: vec![issue.into()],
            reasoning: "validation response could not be parsed".into(),
            status: ValidationStatus::Error,
            when: Utc::now(),
        }
    }
}

pub(crate) fn is_placeholder_issue(issue: &str) -> bool {
    let trimmed = issue.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("no issues found")
}

/// Aggregate view of one iteration's validations, consumed by the
/// smart-retry policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationSummary {
    pub passed: bool,
    pub avg_score: f64,
    pub confidence: ValidationConfidence,
    pub issues: Vec<String>,
}

impl ValidationSummary {
    /// Summarize one iteration's verdicts.
    ///
    /// Confidence reflects score spread across models: a tight spread means
    /// the validators agree on how good (or bad) the attempt is.
    pub fn from_results(results: &[ValidationResult]) -> Self {
        if results.is_empty() {
            return Self {
                passed: false,
                avg_score: 0.0,
                confidence: ValidationConfidence::Low,
                issues: vec![],
            };
        }
        let avg_score =
            results.iter().map(|r| r.score as f64).sum::<f64>() / results.len() as f64;
        let min = results.iter().map(|r| r.score).min().unwrap_or(0);
        let max = results.iter().map(|r| r.score).max().unwrap_or(0);
        let confidence = match max - min {
            0..=1 => ValidationConfidence::High,
            2..=3 => ValidationConfidence::Medium,
            _ => ValidationConfidence::Low,
        };
        let mut issues: Vec<String> = Vec::new();
        for result in results.iter().filter(|r| !r.passed) {
            for issue in &result.issues {
                if !is_placeholder_issue(issue) && !issues.contains(issue) {
                    issues.push(issue.clone());
                }
            }
        }
        Self {
            passed: results.iter().any(|r| r.passed),
            avg_score,
            confidence,
            issues,
        }
    }
}

/// Per-iteration accounting, append-only within a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterationMetrics {
    pub iteration: u32,
    pub enhancements_successful: usize,
    pub generations_successful: usize,
    pub validations_passed: usize,
    pub best_score: u8,
    pub duration: Duration,
    pub errors: Vec<String>,
}

/// Terminal output of a pipeline run.
#[derive(Clone, Debug)]
pub struct ProcessResult {
    pub status: ProcessStatus,
    pub final_image: Option<GeneratedImage>,
    /// Number of iterations actually executed, in `1..=max_iterations`.
    pub iterations: u32,
    pub model_used: Option<String>,
    pub all_results: Vec<ValidationResult>,
    pub metrics: Vec<IterationMetrics>,
    pub error: Option<String>,
    pub processing_time: Duration,
}

/// Output of one refinement pass: a full enhance/generate/validate round
/// over the clean prompt.
#[derive(Clone, Debug)]
pub struct RefineOutcome {
    pub enhanced: Vec<EnhancedPrompt>,
    pub generated: Vec<GeneratedImage>,
    pub validated: Vec<ValidationResult>,
    /// The prompt the next iteration should use. Deliberately identical to
    /// the original request: validator feedback is logged and routed to the
    /// enhancer, never concatenated into the user-visible prompt.
    pub refined_prompt: String,
}
