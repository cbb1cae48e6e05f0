//! Top-level state machine for one pipeline run.
//!
//! A run executes a bounded number of iterations, each an enhance →
//! generate → validate pass across the candidate model set. The first
//! iteration with a passing result terminates the run. Otherwise the loop
//! escalates: validator feedback flows into the next enhancement round, a
//! stubbornly failing compound request is decomposed and executed
//! sequentially, and exhaustion hands the task to a human.
//!
//! The optional smart-retry policy replaces the refinement pass: it
//! classifies each failed iteration and picks the next iteration's base
//! image (the best failed edit for small fixes, the original for damage).
//!
//! A successful run writes back to the tracker before returning: the edited
//! image is attached to the task and the boolean trigger field is cleared
//! so the same delivery does not re-arm the pipeline. Both writes are
//! best-effort, like the hybrid-fallback side effects.

use std::sync::Arc;
use std::time::Instant;

use tracing::instrument;
use uuid::Uuid;

use crate::artifacts::{
    GeneratedImage, IterationMetrics, ProcessResult, ValidationResult, ValidationSummary,
};
use crate::config::Settings;
use crate::enhancer::PromptEnhancer;
use crate::errors::PipelineError;
use crate::fallback::HybridFallback;
use crate::generator::ImageGenerator;
use crate::images;
use crate::providers::tracker::WorkTracker;
use crate::refiner::Refiner;
use crate::retry_policy::{RetryDecision, SmartRetry};
use crate::types::{BaseImage, ProcessStatus, RetryStrategy, TaskType};
use crate::validator::Validate;

/// Everything one run needs, assembled by the webhook entry layer.
#[derive(Clone, Debug)]
pub struct EditRun {
    pub task_id: String,
    /// The user-visible prompt. Stays untouched for the whole run.
    pub prompt: String,
    pub task_type: TaskType,
    /// Primary source image.
    pub source_url: String,
    pub source_bytes: Vec<u8>,
    /// Additional generation inputs (beyond the primary image).
    pub extra_urls: Vec<String>,
    pub extra_bytes: Vec<Vec<u8>>,
    /// Full enhancement context including reference images. Empty means
    /// "same as the generation inputs".
    pub context_bytes: Vec<Vec<u8>>,
    pub aspect_ratio: Option<String>,
    pub run_id: Option<String>,
}

impl EditRun {
    /// Create a run for a single source image with edit-task defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::orchestrator::EditRun;
    /// use pixelsmith::types::TaskType;
    ///
    /// let run = EditRun::new("task-1", "Remove the background.", "https://img/1.png", vec![]);
    /// assert_eq!(run.task_id, "task-1");
    /// assert_eq!(run.task_type, TaskType::Edit);
    /// assert!(run.aspect_ratio.is_none());
    /// ```
    pub fn new(
        task_id: impl Into<String>,
        prompt: impl Into<String>,
        source_url: impl Into<String>,
        source_bytes: Vec<u8>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            task_type: TaskType::Edit,
            source_url: source_url.into(),
            source_bytes,
            extra_urls: vec![],
            extra_bytes: vec![],
            context_bytes: vec![],
            aspect_ratio: None,
            run_id: None,
        }
    }

    /// Route the run as a different task type.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::orchestrator::EditRun;
    /// use pixelsmith::types::TaskType;
    ///
    /// let run = EditRun::new("task-1", "SUMMER SALE banner", "https://img/1.png", vec![])
    ///     .with_task_type(TaskType::Creative);
    /// assert_eq!(run.task_type, TaskType::Creative);
    /// ```
    #[must_use]
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Request a specific output aspect ratio from the image gateway.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::orchestrator::EditRun;
    ///
    /// let run = EditRun::new("task-1", "Remove the background.", "https://img/1.png", vec![])
    ///     .with_aspect_ratio("16:9");
    /// assert_eq!(run.aspect_ratio.as_deref(), Some("16:9"));
    /// ```
    #[must_use]
    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(ratio.into());
        self
    }

    /// Supply the full enhancement context (reference images included).
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::orchestrator::EditRun;
    ///
    /// let run = EditRun::new("task-1", "Match the reference style.", "https://img/1.png", vec![])
    ///     .with_context_bytes(vec![vec![0x89, 0x50], vec![0xff, 0xd8]]);
    /// assert_eq!(run.context_bytes.len(), 2);
    /// ```
    #[must_use]
    pub fn with_context_bytes(mut self, context: Vec<Vec<u8>>) -> Self {
        self.context_bytes = context;
        self
    }
}

pub struct Orchestrator {
    enhancer: Arc<PromptEnhancer>,
    generator: Arc<ImageGenerator>,
    validator: Arc<dyn Validate>,
    refiner: Arc<Refiner>,
    fallback: Arc<HybridFallback>,
    tracker: Arc<dyn WorkTracker>,
    max_iterations: u32,
    sequential_trigger: u32,
    smart_retry: Option<SmartRetry>,
    /// Boolean custom field cleared on success so the delivery does not
    /// re-trigger. Empty disables the writeback.
    trigger_field_id: String,
}

impl Orchestrator {
    pub fn new(
        enhancer: Arc<PromptEnhancer>,
        generator: Arc<ImageGenerator>,
        validator: Arc<dyn Validate>,
        refiner: Arc<Refiner>,
        fallback: Arc<HybridFallback>,
        tracker: Arc<dyn WorkTracker>,
        settings: &Settings,
    ) -> Self {
        let smart_retry = settings.smart_retry.then(|| {
            SmartRetry::new(
                settings.max_retries,
                settings.incremental_threshold,
                settings.catastrophic_threshold,
                settings.pass_threshold,
            )
        });
        Self {
            enhancer,
            generator,
            validator,
            refiner,
            fallback,
            tracker,
            max_iterations: settings.max_iterations.max(1),
            sequential_trigger: settings.sequential_trigger.max(1),
            smart_retry,
            trigger_field_id: settings.trigger_field_id.clone(),
        }
    }

    /// Highest-scoring passing result, ties broken by enumeration order.
    pub fn select_best(
        validations: &[ValidationResult],
        generated: &[GeneratedImage],
    ) -> Option<GeneratedImage> {
        let mut best: Option<&ValidationResult> = None;
        for validation in validations.iter().filter(|v| v.passed) {
            match best {
                Some(current) if validation.score <= current.score => {}
                _ => best = Some(validation),
            }
        }
        let best = best?;
        generated
            .iter()
            .find(|img| img.model_name == best.model_name)
            .cloned()
    }

    /// Run the full pipeline for one task. Never fails: stage errors burn
    /// the iteration they happened in, and exhaustion ends in the hybrid
    /// fallback rather than an `Err`.
    #[instrument(skip_all, fields(task_id = %run.task_id, run_id = tracing::field::Empty))]
    pub async fn process(&self, run: EditRun) -> ProcessResult {
        let started = Instant::now();
        let run_id = run
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("run_id", run_id.as_str());

        let mut original_urls = vec![run.source_url.clone()];
        original_urls.extend(run.extra_urls.iter().cloned());
        let mut original_bytes = vec![run.source_bytes.clone()];
        original_bytes.extend(run.extra_bytes.iter().cloned());

        // Enhancement always sees the full context (references included);
        // generation sees only the images that belong in the output.
        let enhancement_bytes = if run.context_bytes.is_empty() {
            original_bytes.clone()
        } else {
            run.context_bytes.clone()
        };
        let mut generation_urls = original_urls.clone();
        let mut generation_bytes = original_bytes.clone();

        let mut all_results: Vec<ValidationResult> = Vec::new();
        let mut metrics: Vec<IterationMetrics> = Vec::new();
        let mut previous_feedback: Option<String> = None;
        let mut retry_count: u32 = 0;
        let mut iterations_run: u32 = 0;

        tracing::info!(
            max_iterations = self.max_iterations,
            context_images = enhancement_bytes.len(),
            "starting edit processing"
        );

        for iteration in 1..=self.max_iterations {
            iterations_run = iteration;
            let iteration_start = Instant::now();
            tracing::info!(iteration, "iteration starting");

            // Phase 1 + 2: enhance and generate. Total wipe-outs fail the
            // iteration, not the run.
            let enhanced = match self
                .enhancer
                .enhance_all(&run.prompt, &enhancement_bytes, previous_feedback.as_deref())
                .await
            {
                Ok(enhanced) => enhanced,
                Err(err) => {
                    self.record_failed_iteration(&mut metrics, iteration, iteration_start, &err);
                    if iteration == self.max_iterations {
                        break;
                    }
                    continue;
                }
            };

            let generated = match self
                .generator
                .generate_all(&enhanced, &generation_urls, run.aspect_ratio.as_deref())
                .await
            {
                Ok(generated) => generated,
                Err(err) => {
                    self.record_failed_iteration(&mut metrics, iteration, iteration_start, &err);
                    if iteration == self.max_iterations {
                        break;
                    }
                    continue;
                }
            };

            // Phase 3: validation. A system error here (network, auth,
            // rate) aborts the iteration; quality failures flow through.
            let validated = match self
                .validator
                .validate_all(&generated, &run.prompt, &generation_bytes, run.task_type)
                .await
            {
                Ok(validated) => validated,
                Err(err) => {
                    tracing::error!(iteration, error = %err, "validation system error");
                    self.record_failed_iteration(&mut metrics, iteration, iteration_start, &err);
                    if iteration == self.max_iterations {
                        break;
                    }
                    continue;
                }
            };
            all_results.extend(validated.iter().cloned());

            metrics.push(IterationMetrics {
                iteration,
                enhancements_successful: enhanced.len(),
                generations_successful: generated.len(),
                validations_passed: validated.iter().filter(|v| v.passed).count(),
                best_score: validated
                    .iter()
                    .filter(|v| v.passed)
                    .map(|v| v.score)
                    .max()
                    .unwrap_or(0),
                duration: iteration_start.elapsed(),
                errors: vec![],
            });

            // Phase 4: decision.
            if let Some(best) = Self::select_best(&validated, &generated) {
                tracing::info!(
                    iteration,
                    model = %best.model_name,
                    "processing successful"
                );
                return self
                    .success(
                        &run.task_id,
                        best.model_name.clone(),
                        best,
                        iteration,
                        all_results,
                        metrics,
                        started,
                    )
                    .await;
            }

            // Capture feedback for the next enhancement round.
            let failed: Vec<&ValidationResult> =
                validated.iter().filter(|v| !v.passed).collect();
            let best_failed = failed.iter().max_by_key(|v| v.score).copied();
            if let Some(best_failed) = best_failed {
                previous_feedback = Some(format!(
                    "Previous attempt failed (score {}/10). Issues: {}",
                    best_failed.score,
                    best_failed.issues.join(", ")
                ));
            }
            let best_failed_edit = best_failed.and_then(|v| {
                generated
                    .iter()
                    .find(|img| img.model_name == v.model_name)
                    .cloned()
            });

            // Phase 5: sequential fallback for compound requests that keep
            // failing in parallel mode.
            if iteration >= self.sequential_trigger {
                let steps = self.refiner.decompose(&run.prompt);
                if steps.len() > 1 {
                    tracing::warn!(
                        iteration,
                        steps = steps.len(),
                        "switching to sequential mode"
                    );
                    match self
                        .refiner
                        .execute_sequential(&steps, &run.source_url, &run.source_bytes, &run.task_id)
                        .await
                    {
                        Ok(image) => {
                            let model_used = format!("{} (sequential)", image.model_name);
                            return self
                                .success(
                                    &run.task_id,
                                    model_used,
                                    image,
                                    iteration,
                                    all_results,
                                    metrics,
                                    started,
                                )
                                .await;
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "sequential mode failed");
                            break;
                        }
                    }
                }
                tracing::info!("request is a single operation, nothing to decompose");
            }

            if iteration == self.max_iterations {
                break;
            }

            // Phase 6: pick the next attempt's shape.
            if let Some(policy) = &self.smart_retry {
                let summary = ValidationSummary::from_results(&validated);
                let decision = policy.decide(&summary, &run.prompt, retry_count);
                retry_count += 1;
                tracing::info!(
                    strategy = ?decision.strategy,
                    reason = %decision.reason,
                    "smart retry decision"
                );
                match self.apply_retry_decision(
                    &decision,
                    best_failed_edit,
                    &original_urls,
                    &original_bytes,
                    &mut generation_urls,
                    &mut generation_bytes,
                ) {
                    ControlFlow::Continue => continue,
                    ControlFlow::Stop => break,
                }
            }

            // Phase 7: one refinement round on the clean prompt; a pass
            // here short-circuits the loop.
            match self
                .refiner
                .refine_with_feedback(
                    &run.prompt,
                    &run.source_url,
                    &run.source_bytes,
                    &validated,
                    run.aspect_ratio.as_deref(),
                )
                .await
            {
                Ok(outcome) => {
                    all_results.extend(outcome.validated.iter().cloned());
                    if let Some(best) =
                        Self::select_best(&outcome.validated, &outcome.generated)
                    {
                        tracing::info!(iteration, model = %best.model_name, "refinement passed");
                        return self
                            .success(
                                &run.task_id,
                                best.model_name.clone(),
                                best,
                                iteration,
                                all_results,
                                metrics,
                                started,
                            )
                            .await;
                    }
                }
                Err(err) => {
                    tracing::warn!(iteration, error = %err, "refinement round failed");
                }
            }
        }

        // All automated attempts exhausted.
        tracing::warn!(
            iterations = iterations_run,
            "all iterations failed, triggering hybrid fallback"
        );
        self.fallback
            .trigger_human_review(&run.task_id, &run.prompt, iterations_run, &all_results)
            .await;

        ProcessResult {
            status: ProcessStatus::HybridFallback,
            final_image: None,
            iterations: iterations_run.max(1),
            model_used: None,
            all_results,
            metrics,
            error: Some(format!("failed after {iterations_run} iterations")),
            processing_time: started.elapsed(),
        }
    }

    /// Assemble the success result and write it back to the tracker:
    /// attach the edited image to the task and clear the trigger field.
    /// Tracker failures are logged and do not alter the result.
    async fn success(
        &self,
        task_id: &str,
        model_used: String,
        image: GeneratedImage,
        iterations: u32,
        all_results: Vec<ValidationResult>,
        metrics: Vec<IterationMetrics>,
        started: Instant,
    ) -> ProcessResult {
        let filename = format!(
            "ai-edit-{task_id}.{}",
            extension_for(images::sniff_mime(&image.bytes))
        );
        if let Err(err) = self
            .tracker
            .upload_attachment(task_id, &filename, image.bytes.clone())
            .await
        {
            tracing::error!(task_id, error = %err, "failed to attach edited image");
        }
        if !self.trigger_field_id.is_empty() {
            if let Err(err) = self
                .tracker
                .set_field(task_id, &self.trigger_field_id, serde_json::Value::Bool(false))
                .await
            {
                tracing::error!(task_id, error = %err, "failed to clear the trigger field");
            }
        }

        ProcessResult {
            status: ProcessStatus::Success,
            final_image: Some(image),
            iterations,
            model_used: Some(model_used),
            all_results,
            metrics,
            error: None,
            processing_time: started.elapsed(),
        }
    }

    fn record_failed_iteration(
        &self,
        metrics: &mut Vec<IterationMetrics>,
        iteration: u32,
        iteration_start: Instant,
        err: &PipelineError,
    ) {
        tracing::error!(iteration, error = %err, "iteration failed");
        metrics.push(IterationMetrics {
            iteration,
            enhancements_successful: 0,
            generations_successful: 0,
            validations_passed: 0,
            best_score: 0,
            duration: iteration_start.elapsed(),
            errors: vec![err.to_string()],
        });
    }

    fn apply_retry_decision(
        &self,
        decision: &RetryDecision,
        best_failed_edit: Option<GeneratedImage>,
        original_urls: &[String],
        original_bytes: &[Vec<u8>],
        generation_urls: &mut Vec<String>,
        generation_bytes: &mut Vec<Vec<u8>>,
    ) -> ControlFlow {
        match decision.strategy {
            RetryStrategy::GiveUp => ControlFlow::Stop,
            RetryStrategy::NoRetry => ControlFlow::Continue,
            RetryStrategy::FullRestart => {
                *generation_urls = original_urls.to_vec();
                *generation_bytes = original_bytes.to_vec();
                ControlFlow::Continue
            }
            RetryStrategy::Incremental => {
                debug_assert_eq!(decision.base_image, Some(BaseImage::BestEdit));
                if let Some(edit) = best_failed_edit {
                    *generation_urls = vec![edit.result_url.clone()];
                    *generation_bytes = vec![edit.bytes.clone()];
                } else {
                    // Nothing to build on; fall back to the originals.
                    *generation_urls = original_urls.to_vec();
                    *generation_bytes = original_bytes.to_vec();
                }
                ControlFlow::Continue
            }
        }
    }
}

enum ControlFlow {
    Continue,
    Stop,
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ValidationResult;
    use chrono::Utc;

    fn image(model: &str) -> GeneratedImage {
        GeneratedImage {
            model_name: model.to_string(),
            bytes: vec![0],
            result_url: format!("https://cdn.test/{model}"),
            source_url: "https://img/src.png".into(),
            prompt_used: "p".into(),
            when: Utc::now(),
        }
    }

    #[test]
    fn select_best_takes_highest_passing_score() {
        let generated = vec![image("a"), image("b"), image("c")];
        let validations = vec![
            ValidationResult::normalized("a", true, 8, vec![], "", 8),
            ValidationResult::normalized("b", true, 9, vec![], "", 8),
            ValidationResult::normalized("c", false, 7, vec!["x".into()], "", 8),
        ];
        let best = Orchestrator::select_best(&validations, &generated).unwrap();
        assert_eq!(best.model_name, "b");
    }

    #[test]
    fn select_best_breaks_ties_by_enumeration_order() {
        let generated = vec![image("a"), image("b")];
        let validations = vec![
            ValidationResult::normalized("a", true, 9, vec![], "", 8),
            ValidationResult::normalized("b", true, 9, vec![], "", 8),
        ];
        let best = Orchestrator::select_best(&validations, &generated).unwrap();
        assert_eq!(best.model_name, "a");
    }

    #[test]
    fn select_best_returns_none_without_passes() {
        let generated = vec![image("a")];
        let validations = vec![ValidationResult::normalized(
            "a",
            false,
            5,
            vec!["x".into()],
            "",
            8,
        )];
        assert!(Orchestrator::select_best(&validations, &generated).is_none());
    }
}
