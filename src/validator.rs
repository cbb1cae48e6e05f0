//! Image validation against the user's request via vision-capable
//! reasoning models.
//!
//! Validation is deliberately **sequential** across the iteration's
//! generated images, with a configured delay between calls to respect the
//! validator's rate limits. It runs under its own semaphore, orthogonal to
//! the enhancement semaphore.
//!
//! The validator model must answer with a JSON object
//! `{pass_fail, score, issues, reasoning}`. The parser tolerates markdown
//! fences, surrounding prose, and scores written as `"N/10"`, floats, or
//! strings; everything is normalized onto an integer 0..=10 scale with the
//! pass flag forced consistent with the score. Unparseable replies become
//! error-status quality failures; gateway errors propagate to the
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::artifacts::{GeneratedImage, ValidationResult};
use crate::config::store::{PromptStore, keys};
use crate::errors::PipelineError;
use crate::images;
use crate::providers::reasoning::{ChatMessage, ChatRequest, ContentPart, ReasoningGateway};
use crate::types::TaskType;

const BUDGET_MAX_DIMENSION: u32 = 2048;
const BUDGET_JPEG_QUALITY: u8 = 85;

/// Contract every validator implementation satisfies. The orchestrator is
/// agnostic to which one it holds.
#[async_trait]
pub trait Validate: Send + Sync {
    async fn validate_all(
        &self,
        generated: &[GeneratedImage],
        request: &str,
        original_images: &[Vec<u8>],
        task_type: TaskType,
    ) -> Result<Vec<ValidationResult>, PipelineError>;
}

/// Single-model vision validator.
pub struct VisionValidator {
    gateway: Arc<dyn ReasoningGateway>,
    store: Arc<dyn PromptStore>,
    model: String,
    pass_threshold: u8,
    delay: Duration,
    image_budget_bytes: usize,
    semaphore: Arc<Semaphore>,
}

impl VisionValidator {
    pub fn new(
        gateway: Arc<dyn ReasoningGateway>,
        store: Arc<dyn PromptStore>,
        model: impl Into<String>,
        pass_threshold: u8,
        delay: Duration,
        image_budget_bytes: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            model: model.into(),
            pass_threshold,
            delay,
            image_budget_bytes,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Load the task-type rubric fresh and substitute the fonts guide.
    async fn rubric(&self, task_type: TaskType) -> Result<String, PipelineError> {
        let key = match task_type {
            TaskType::Edit => keys::SIMPLE_EDIT_RUBRIC,
            TaskType::Creative => keys::BRANDED_CREATIVE_RUBRIC,
        };
        let mut rubric = match self.store.document(key).await {
            Ok(rubric) => rubric,
            // The branded rubric may be absent in older bundles.
            Err(_) if task_type == TaskType::Creative => {
                self.store.document(keys::SIMPLE_EDIT_RUBRIC).await?
            }
            Err(err) => return Err(err.into()),
        };
        if rubric.contains("{fonts_guide}") {
            let guide = self.store.document(keys::FONTS_GUIDE).await.unwrap_or_default();
            rubric = rubric.replace("{fonts_guide}", &guide);
        }
        Ok(rubric)
    }

    #[instrument(skip_all, fields(model = %image.model_name))]
    async fn validate_single(
        &self,
        image: &GeneratedImage,
        request: &str,
        original_images: &[Vec<u8>],
        rubric: &str,
    ) -> Result<ValidationResult, PipelineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("validation semaphore closed");

        let mut parts = vec![ContentPart::text(user_text(request, original_images.len()))];
        for bytes in original_images {
            let (payload, mime) = images::fit_within_budget(
                bytes,
                self.image_budget_bytes,
                BUDGET_MAX_DIMENSION,
                BUDGET_JPEG_QUALITY,
            )
            .map_err(|err| {
                tracing::warn!(error = %err, "original image unusable for validation");
                err
            })
            .unwrap_or_else(|_| (bytes.clone(), "application/octet-stream"));
            parts.push(ContentPart::inline_image(&payload, mime));
        }
        // Edited image always goes last.
        let (edited, edited_mime) = images::fit_within_budget(
            &image.bytes,
            self.image_budget_bytes,
            BUDGET_MAX_DIMENSION,
            BUDGET_JPEG_QUALITY,
        )
        .unwrap_or_else(|_| (image.bytes.clone(), "application/octet-stream"));
        parts.push(ContentPart::inline_image(&edited, edited_mime));

        let chat = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(rubric.to_string()),
                ChatMessage::user(parts),
            ],
        )
        .with_reasoning_effort("high")
        .with_pinned_provider("Anthropic");

        let reply = self.gateway.complete(chat).await?;
        let result = parse_verdict(&reply.text, &image.model_name, self.pass_threshold);
        if result.passed {
            tracing::info!(model = %image.model_name, score = result.score, "validation passed");
        } else {
            tracing::warn!(
                model = %image.model_name,
                score = result.score,
                issues = ?result.issues,
                "validation failed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl Validate for VisionValidator {
    #[instrument(skip_all, fields(images = generated.len(), task_type = task_type.as_str()))]
    async fn validate_all(
        &self,
        generated: &[GeneratedImage],
        request: &str,
        original_images: &[Vec<u8>],
        task_type: TaskType,
    ) -> Result<Vec<ValidationResult>, PipelineError> {
        let rubric = self.rubric(task_type).await?;
        let mut results = Vec::with_capacity(generated.len());
        for (index, image) in generated.iter().enumerate() {
            let result = self
                .validate_single(image, request, original_images, &rubric)
                .await?;
            results.push(result);
            if index + 1 < generated.len() {
                // Inter-call spacing keeps the validator under its limits.
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(results)
    }
}

/// Stricter dual-model variant: two reasoning models validate in parallel
/// and both must pass with scores at or above the threshold. Disagreement
/// fails the image.
pub struct DualConsensusValidator {
    gateway: Arc<dyn ReasoningGateway>,
    store: Arc<dyn PromptStore>,
    primary_model: String,
    secondary_model: String,
    pass_threshold: u8,
    image_budget_bytes: usize,
}

impl DualConsensusValidator {
    pub fn new(
        gateway: Arc<dyn ReasoningGateway>,
        store: Arc<dyn PromptStore>,
        primary_model: impl Into<String>,
        secondary_model: impl Into<String>,
        pass_threshold: u8,
        image_budget_bytes: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            primary_model: primary_model.into(),
            secondary_model: secondary_model.into(),
            pass_threshold,
            image_budget_bytes,
        }
    }

    async fn verdict_from(
        &self,
        validator_model: &str,
        rubric: &str,
        image: &GeneratedImage,
        request: &str,
        original_images: &[Vec<u8>],
    ) -> Result<ValidationResult, PipelineError> {
        let mut parts = vec![ContentPart::text(user_text(request, original_images.len()))];
        for bytes in original_images {
            let (payload, mime) = images::fit_within_budget(
                bytes,
                self.image_budget_bytes,
                BUDGET_MAX_DIMENSION,
                BUDGET_JPEG_QUALITY,
            )
            .unwrap_or_else(|_| (bytes.clone(), "application/octet-stream"));
            parts.push(ContentPart::inline_image(&payload, mime));
        }
        let (edited, edited_mime) = images::fit_within_budget(
            &image.bytes,
            self.image_budget_bytes,
            BUDGET_MAX_DIMENSION,
            BUDGET_JPEG_QUALITY,
        )
        .unwrap_or_else(|_| (image.bytes.clone(), "application/octet-stream"));
        parts.push(ContentPart::inline_image(&edited, edited_mime));

        let chat = ChatRequest::new(
            validator_model.to_string(),
            vec![
                ChatMessage::system(rubric.to_string()),
                ChatMessage::user(parts),
            ],
        )
        .with_temperature(0.0);

        let reply = self.gateway.complete(chat).await?;
        Ok(parse_verdict(&reply.text, &image.model_name, self.pass_threshold))
    }
}

#[async_trait]
impl Validate for DualConsensusValidator {
    #[instrument(skip_all, fields(images = generated.len()))]
    async fn validate_all(
        &self,
        generated: &[GeneratedImage],
        request: &str,
        original_images: &[Vec<u8>],
        task_type: TaskType,
    ) -> Result<Vec<ValidationResult>, PipelineError> {
        let key = match task_type {
            TaskType::Edit => keys::SIMPLE_EDIT_RUBRIC,
            TaskType::Creative => keys::BRANDED_CREATIVE_RUBRIC,
        };
        let rubric = self.store.document(key).await?;

        let mut results = Vec::with_capacity(generated.len());
        for image in generated {
            let (first, second) = tokio::join!(
                self.verdict_from(&self.primary_model, &rubric, image, request, original_images),
                self.verdict_from(&self.secondary_model, &rubric, image, request, original_images),
            );
            let (first, second) = (first?, second?);

            let both_pass = first.passed && second.passed;
            let avg = ((first.score as u16 + second.score as u16) / 2) as u8;
            let mut issues = first.issues.clone();
            for issue in &second.issues {
                if !issues.contains(issue) {
                    issues.push(issue.clone());
                }
            }
            if !both_pass && first.passed != second.passed {
                issues.push("validators disagreed on the verdict".to_string());
            }
            let reasoning = format!(
                "consensus of {} (score {}) and {} (score {})",
                self.primary_model, first.score, self.secondary_model, second.score
            );
            results.push(ValidationResult::normalized(
                image.model_name.clone(),
                both_pass,
                if both_pass { avg } else { avg.min(self.pass_threshold.saturating_sub(1)) },
                issues,
                reasoning,
                self.pass_threshold,
            ));
        }
        Ok(results)
    }
}

fn user_text(request: &str, original_count: usize) -> String {
    if original_count <= 1 {
        format!(
            "Validate this edit.\n\nUSER REQUEST: {request}\n\n\
             Compare IMAGE 1 (original) with IMAGE 2 (edited).\nReturn ONLY JSON."
        )
    } else {
        format!(
            "Validate this edit.\n\nUSER REQUEST: {request}\n\n\
             Compare IMAGES 1-{original_count} (originals/inputs) with the FINAL IMAGE \
             (edited result). Verify ALL input images are properly incorporated.\n\
             Return ONLY JSON."
        )
    }
}

/// Parse a validator reply into a normalized [`ValidationResult`].
///
/// Content-level problems never raise; they yield an error-status result.
pub(crate) fn parse_verdict(raw: &str, model_name: &str, pass_threshold: u8) -> ValidationResult {
    let Some(json_text) = extract_json_object(raw) else {
        // Last resort: scrape a score out of the prose.
        if let Some(score) = scrape_score(raw) {
            return ValidationResult::normalized(
                model_name,
                false,
                score,
                vec!["validator reply was not a JSON object".into()],
                raw.chars().take(200).collect::<String>(),
                pass_threshold,
            );
        }
        return ValidationResult::parse_error(model_name, "validator reply carried no JSON object");
    };

    let parsed: Value = match serde_json::from_str(&json_text) {
        Ok(value) => value,
        Err(err) => {
            return ValidationResult::parse_error(
                model_name,
                format!("validator JSON failed to parse: {err}"),
            );
        }
    };

    let Some(score) = parsed.get("score").and_then(normalize_score) else {
        return ValidationResult::parse_error(model_name, "validator JSON carried no usable score");
    };
    let claimed_pass = parsed
        .get("pass_fail")
        .and_then(Value::as_str)
        .map(|v| v.trim().eq_ignore_ascii_case("pass"))
        .unwrap_or(false);
    let issues = match parsed.get("issues") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => vec![],
    };
    let reasoning = parsed
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    ValidationResult::normalized(model_name, claimed_pass, score, issues, reasoning, pass_threshold)
}

/// Find the outermost `{ … }` in a reply that may be wrapped in markdown
/// fences or surrounded by prose.
fn extract_json_object(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
    }
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize a score expressed as an integer, float, `"N"`, `"N.M"`,
/// `"N/10"`, or prose like `"PASS 10/10"` onto `0..=10`.
fn normalize_score(value: &Value) -> Option<u8> {
    let score = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let head = s.split('/').next().unwrap_or(s);
            let digits: String = head
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.parse::<f64>().ok()?
        }
        _ => return None,
    };
    Some(score.round().clamp(0.0, 10.0) as u8)
}

fn scrape_score(raw: &str) -> Option<u8> {
    let idx = raw.find("\"score\"").or_else(|| raw.find("score"))?;
    let tail = &raw[idx..];
    let digits: String = tail
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<f64>().ok().map(|s| s.clamp(0.0, 10.0) as u8)
}
