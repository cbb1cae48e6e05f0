//! Parallel prompt enhancement across the candidate model set.
//!
//! Each candidate image model gets its own enhancement call: the reasoning
//! model is primed with that model's activation/research documents (loaded
//! fresh from the prompt store on every call so live edits take effect) and
//! asked to translate the user's request into precise, model-specific
//! editing instructions. Context images are downscaled before transmission.
//!
//! Validator feedback from a failed iteration rides in its own block of the
//! *gateway* message. It is never concatenated into the prompt text the
//! image models eventually see; the enhanced prompt must stand alone.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::artifacts::EnhancedPrompt;
use crate::config::store::{PromptStore, keys};
use crate::errors::PipelineError;
use crate::images;
use crate::providers::reasoning::{ChatMessage, ChatRequest, ContentPart, ReasoningGateway};

const CONTEXT_MAX_DIMENSION: u32 = 512;
const CONTEXT_JPEG_QUALITY: u8 = 70;

pub struct PromptEnhancer {
    gateway: Arc<dyn ReasoningGateway>,
    store: Arc<dyn PromptStore>,
    /// Candidate image models, in enumeration order.
    model_names: Vec<String>,
    /// Reasoning model that performs the enhancement.
    enhancer_model: String,
    semaphore: Arc<Semaphore>,
}

impl PromptEnhancer {
    pub fn new(
        gateway: Arc<dyn ReasoningGateway>,
        store: Arc<dyn PromptStore>,
        model_names: Vec<String>,
        enhancer_model: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            model_names,
            enhancer_model: enhancer_model.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn model_names(&self) -> &[String] {
        &self.model_names
    }

    /// Enhance the request for every candidate model concurrently.
    ///
    /// Failures are isolated per model; the call fails only when *every*
    /// model fails, with [`PipelineError::AllEnhancementsFailed`]. The
    /// returned prompts preserve model enumeration order.
    #[instrument(skip_all, fields(models = self.model_names.len(), has_feedback = previous_feedback.is_some()))]
    pub async fn enhance_all(
        &self,
        request: &str,
        context_images: &[Vec<u8>],
        previous_feedback: Option<&str>,
    ) -> Result<Vec<EnhancedPrompt>, PipelineError> {
        let attempts = join_all(self.model_names.iter().map(|model| {
            self.enhance_single(request, model, context_images, previous_feedback)
        }))
        .await;

        let attempted = attempts.len();
        let mut successful = Vec::new();
        for (model, outcome) in self.model_names.iter().zip(attempts) {
            match outcome {
                Ok(prompt) => successful.push(prompt),
                Err(err) => {
                    tracing::error!(model = %model, error = %err, "enhancement failed");
                }
            }
        }

        if successful.is_empty() {
            return Err(PipelineError::AllEnhancementsFailed { attempted });
        }
        tracing::info!(
            successful = successful.len(),
            attempted,
            "parallel enhancement complete"
        );
        Ok(successful)
    }

    #[instrument(skip_all, fields(model = %model_name))]
    async fn enhance_single(
        &self,
        request: &str,
        model_name: &str,
        context_images: &[Vec<u8>],
        previous_feedback: Option<&str>,
    ) -> Result<EnhancedPrompt, PipelineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("enhancement semaphore closed");

        // Fresh per call: research edits must take effect without redeploy.
        let research = self.store.research_for(model_name).await;
        let fonts_guide = self.store.document(keys::FONTS_GUIDE).await.ok();
        let system_prompt = build_system_prompt(research.combined().as_deref(), fonts_guide.as_deref());

        let mut parts = vec![ContentPart::text(build_user_text(
            request,
            model_name,
            context_images.len(),
            previous_feedback,
        ))];
        for bytes in context_images {
            match images::resize_for_context(bytes, CONTEXT_MAX_DIMENSION, CONTEXT_JPEG_QUALITY) {
                Ok(scaled) => parts.push(ContentPart::inline_image(&scaled, "image/jpeg")),
                Err(err) => {
                    tracing::warn!(model = model_name, error = %err, "skipping undecodable context image");
                }
            }
        }

        let chat = ChatRequest::new(
            self.enhancer_model.clone(),
            vec![ChatMessage::system(system_prompt), ChatMessage::user(parts)],
        )
        .with_reasoning_effort("high")
        .with_pinned_provider("Anthropic");

        let reply = self.gateway.complete(chat).await?;
        let enhanced = strip_meta(&reply.text);
        tracing::info!(
            model = model_name,
            enhanced_len = enhanced.len(),
            "enhancement complete"
        );
        Ok(EnhancedPrompt::new(model_name, request, enhanced))
    }
}

fn build_system_prompt(research: Option<&str>, fonts_guide: Option<&str>) -> String {
    let mut prompt = research.unwrap_or_default().to_string();
    if let Some(guide) = fonts_guide {
        prompt.push_str(
            "\n\nFONT TRANSLATION GUIDE\n\
             When the request mentions fonts, translate to appropriate equivalents:\n\n",
        );
        prompt.push_str(guide);
        prompt.push_str("\n\nUse standard font names that image generation models understand.");
    }
    prompt.push_str(
        "\n\nFINAL OUTPUT OVERRIDE:\n\
         Ignore any instructions above about warnings, recommendations, or alternatives.\n\
         Output ONLY the enhanced prompt. No meta-commentary. No markdown headers.\n\
         Just the pure editing instructions.",
    );
    prompt
}

fn build_user_text(
    request: &str,
    model_name: &str,
    image_count: usize,
    previous_feedback: Option<&str>,
) -> String {
    let mut text = String::new();
    if image_count > 1 {
        text.push_str(&format!(
            "[MULTI-IMAGE INPUT]\n\
             You are viewing {image_count} images. Each image's role and content is described \
             in the request below. Use them according to their described purpose - do not \
             assume which is \"primary\" or \"secondary\".\n\n"
        ));
    }
    if let Some(feedback) = previous_feedback {
        text.push_str(&format!(
            "PREVIOUS ATTEMPT FEEDBACK (address these issues):\n{feedback}\n\n\
             Your enhanced prompt MUST specifically address these issues.\n\n"
        ));
    }
    text.push_str(&format!(
        "You are a TRANSLATOR, not a creative director.\n\n\
         Your job:\n\
         - Convert the user's request into precise technical instructions\n\
         - Include what the user asked for - don't invent requirements they didn't mention\n\
         - For unspecified details: follow the reference/inspiration if provided, otherwise \
         use sensible defaults\n\n\
         Key understanding:\n\
         - CONTENT images are the canvas - their composition is final unless the user \
         explicitly asks to change it\n\
         - INSPIRATION/REFERENCE images guide what you ADD: typography style, text placement, \
         colors, overlay aesthetics\n\n\
         Enhance this image editing request for {model_name}:\n\n\
         {request}\n\n\
         OUTPUT REQUIREMENTS:\n\
         - Return ONLY the enhanced prompt text ready for direct API submission\n\
         - NO explanations, warnings, recommendations, or meta-commentary\n\
         - Start immediately with the actual prompt instructions"
    ));
    text
}

/// Strip a wrapping markdown code fence and leading meta headers from a
/// model reply, leaving pure prompt text.
fn strip_meta(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line (which may carry a language tag) and any
        // closing fence.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
        text = text.trim();
    }
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(first) = lines.first() {
        let trimmed = first.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            lines.remove(0);
        } else {
            break;
        }
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences_and_headers() {
        assert_eq!(strip_meta("```\nmove the logo left\n```"), "move the logo left");
        assert_eq!(
            strip_meta("```text\nmove the logo left\n```"),
            "move the logo left"
        );
        assert_eq!(
            strip_meta("# Enhanced prompt\n\nmove the logo left"),
            "move the logo left"
        );
        assert_eq!(strip_meta("  plain instructions  "), "plain instructions");
    }

    #[test]
    fn feedback_rides_in_its_own_block() {
        let text = build_user_text("make it white", "nano-banana", 1, Some("tint was gray"));
        assert!(text.contains("PREVIOUS ATTEMPT FEEDBACK"));
        assert!(text.contains("tint was gray"));

        let clean = build_user_text("make it white", "nano-banana", 1, None);
        assert!(!clean.contains("PREVIOUS ATTEMPT FEEDBACK"));
    }

    #[test]
    fn multi_image_preface_only_with_multiple_images() {
        assert!(build_user_text("r", "m", 3, None).contains("[MULTI-IMAGE INPUT]"));
        assert!(!build_user_text("r", "m", 1, None).contains("[MULTI-IMAGE INPUT]"));
    }
}
