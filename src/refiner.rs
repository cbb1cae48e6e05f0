//! Refinement and sequential decomposition.
//!
//! The refiner has two duties. After a failed iteration it aggregates
//! validator feedback for the next enhancement round and re-runs the full
//! pipeline on the untouched prompt. When the parallel loop keeps failing
//! on a compound request, it decomposes the request into atomic steps and
//! executes them in order, each step a bounded mini iteration loop whose
//! best passing output feeds the next step.
//!
//! Feedback never contaminates the prompt: the generator-visible prompt
//! text stays exactly what the user asked for.

use std::sync::Arc;

use tracing::instrument;

use crate::artifacts::{GeneratedImage, RefineOutcome, ValidationResult, is_placeholder_issue};
use crate::config::SequentialTokens;
use crate::enhancer::PromptEnhancer;
use crate::errors::PipelineError;
use crate::generator::ImageGenerator;
use crate::types::TaskType;
use crate::validator::Validate;

pub struct Refiner {
    enhancer: Arc<PromptEnhancer>,
    generator: Arc<ImageGenerator>,
    validator: Arc<dyn Validate>,
    tokens: SequentialTokens,
    max_step_attempts: u32,
}

impl Refiner {
    pub fn new(
        enhancer: Arc<PromptEnhancer>,
        generator: Arc<ImageGenerator>,
        validator: Arc<dyn Validate>,
        tokens: SequentialTokens,
        max_step_attempts: u32,
    ) -> Self {
        Self {
            enhancer,
            generator,
            validator,
            tokens,
            max_step_attempts: max_step_attempts.max(1),
        }
    }

    /// Collapse failed validations into a short feedback paragraph.
    ///
    /// The result is logged and routed to the next iteration's enhancer; it
    /// is never appended to the prompt itself.
    pub fn aggregate_feedback(failed: &[ValidationResult]) -> String {
        let mut unique: Vec<&str> = Vec::new();
        for result in failed.iter().filter(|r| !r.passed) {
            for issue in &result.issues {
                if !is_placeholder_issue(issue) && !unique.contains(&issue.as_str()) {
                    unique.push(issue);
                }
            }
        }
        if unique.is_empty() {
            return "Previous attempt had quality issues. Ensure all requirements are met."
                .to_string();
        }
        let mut feedback = String::from("Previous iteration failed with these issues:\n");
        for issue in unique {
            feedback.push_str("- ");
            feedback.push_str(issue);
            feedback.push('\n');
        }
        feedback.push_str("\nAddress ALL of these issues.");
        feedback
    }

    /// Split a compound request into atomic steps, each carrying the
    /// preservation clause. See [`decompose`].
    pub fn decompose(&self, request: &str) -> Vec<String> {
        decompose(request, &self.tokens)
    }

    /// One refinement pass: full enhance → generate → validate round over
    /// the clean prompt, so the orchestrator can short-circuit on a pass.
    #[instrument(skip_all)]
    pub async fn refine_with_feedback(
        &self,
        original_prompt: &str,
        source_url: &str,
        source_bytes: &[u8],
        failed: &[ValidationResult],
        aspect_ratio: Option<&str>,
    ) -> Result<RefineOutcome, PipelineError> {
        let feedback = Self::aggregate_feedback(failed);
        tracing::info!(feedback_len = feedback.len(), "feedback aggregated for refinement");

        // The prompt stays clean; improvement comes from re-rolling the
        // models, not from injecting validator vocabulary.
        let refined_prompt = original_prompt.to_string();

        let context = vec![source_bytes.to_vec()];
        let enhanced = self.enhancer.enhance_all(&refined_prompt, &context, None).await?;
        let generated = self
            .generator
            .generate_all(&enhanced, &[source_url.to_string()], aspect_ratio)
            .await?;
        let validated = self
            .validator
            .validate_all(&generated, &refined_prompt, &context, TaskType::Edit)
            .await?;

        tracing::info!(
            enhanced = enhanced.len(),
            generated = generated.len(),
            passed = validated.iter().filter(|v| v.passed).count(),
            "refinement round complete"
        );
        Ok(RefineOutcome {
            enhanced,
            generated,
            validated,
            refined_prompt,
        })
    }

    /// Execute decomposed steps in order. Step *k*'s best passing output is
    /// the sole input of step *k+1*; the first step starts from the
    /// original image.
    #[instrument(skip_all, fields(task_id, steps = steps.len()))]
    pub async fn execute_sequential(
        &self,
        steps: &[String],
        source_url: &str,
        source_bytes: &[u8],
        task_id: &str,
    ) -> Result<GeneratedImage, PipelineError> {
        let mut current_url = source_url.to_string();
        let mut current_bytes = source_bytes.to_vec();
        let mut last_passing: Option<GeneratedImage> = None;

        for (index, step) in steps.iter().enumerate() {
            let step_number = index + 1;
            tracing::info!(task_id, step_number, step = %step, "sequential step starting");

            let mut step_result: Option<GeneratedImage> = None;
            for attempt in 1..=self.max_step_attempts {
                match self
                    .run_step_attempt(step, &current_url, &current_bytes)
                    .await
                {
                    Ok(Some(best)) => {
                        tracing::info!(
                            task_id,
                            step_number,
                            attempt,
                            model = %best.model_name,
                            "sequential step passed"
                        );
                        step_result = Some(best);
                        break;
                    }
                    Ok(None) => {
                        tracing::warn!(task_id, step_number, attempt, "sequential step attempt failed");
                    }
                    Err(err) => {
                        tracing::error!(
                            task_id,
                            step_number,
                            attempt,
                            error = %err,
                            "sequential step attempt errored"
                        );
                    }
                }
            }

            let Some(best) = step_result else {
                tracing::error!(task_id, step_number, "sequential mode failed");
                return Err(PipelineError::SequentialStepFailed {
                    step: step_number,
                    attempts: self.max_step_attempts,
                });
            };

            current_url = best.result_url.clone();
            current_bytes = best.bytes.clone();
            last_passing = Some(best);
        }

        last_passing.ok_or(PipelineError::SequentialStepFailed {
            step: 0,
            attempts: self.max_step_attempts,
        })
    }

    /// One attempt of one step: the full mini loop over the current base
    /// image. `Ok(None)` means the attempt produced no passing result.
    async fn run_step_attempt(
        &self,
        step: &str,
        base_url: &str,
        base_bytes: &[u8],
    ) -> Result<Option<GeneratedImage>, PipelineError> {
        let context = vec![base_bytes.to_vec()];
        let enhanced = self.enhancer.enhance_all(step, &context, None).await?;
        let generated = self
            .generator
            .generate_all(&enhanced, &[base_url.to_string()], None)
            .await?;
        let validated = self
            .validator
            .validate_all(&generated, step, &context, TaskType::Edit)
            .await?;

        let best = validated
            .iter()
            .filter(|v| v.passed)
            .max_by_key(|v| v.score)
            .and_then(|best| {
                generated
                    .iter()
                    .find(|img| img.model_name == best.model_name)
                    .cloned()
            });
        Ok(best)
    }
}

/// Split a compound request into atomic steps.
///
/// The trailing preservation clause (or the configured default when absent)
/// is detached first, configured conjunction words are normalized to
/// commas, and every comma-separated operation is rebuilt as
/// `"<operation>. <preservation>"`. Empty segments are dropped. A
/// single-operation request comes back as one step; callers treat that as
/// "cannot decompose further".
pub fn decompose(request: &str, tokens: &SequentialTokens) -> Vec<String> {
    let (operations_part, preservation) = split_preservation(request, tokens);

    let mut normalized = operations_part;
    for word in &tokens.and_words {
        normalized = normalized.replace(word.as_str(), ",");
    }

    normalized
        .split(',')
        .map(|op| op.trim().trim_end_matches('.').trim())
        .filter(|op| !op.is_empty())
        .map(|op| format!("{op}. {preservation}"))
        .collect()
}

fn split_preservation(request: &str, tokens: &SequentialTokens) -> (String, String) {
    for marker in &tokens.preservation_markers {
        if let Some(idx) = request.find(marker.as_str()) {
            let head = request[..idx].trim().to_string();
            let clause = request[idx..].trim().to_string();
            return (head, clause);
        }
    }
    (
        request.trim().to_string(),
        tokens.default_preservation.clone(),
    )
}
