//! Parallel image generation across the candidate model set.
//!
//! One edit job per enhanced prompt, fanned out concurrently. Generation
//! concurrency is bounded only by the size of the candidate set; the remote
//! side queues jobs itself.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::instrument;

use crate::artifacts::{EnhancedPrompt, GeneratedImage};
use crate::errors::PipelineError;
use crate::providers::imaging::{EditJob, ImageEditGateway};
use crate::registry::ModelRegistry;

pub struct ImageGenerator {
    gateway: Arc<dyn ImageEditGateway>,
    registry: Arc<ModelRegistry>,
}

impl ImageGenerator {
    pub fn new(gateway: Arc<dyn ImageEditGateway>, registry: Arc<ModelRegistry>) -> Self {
        Self { gateway, registry }
    }

    /// Run one edit job per enhanced prompt against the same source images.
    ///
    /// Failures are isolated per model; only a total wipe-out raises
    /// [`PipelineError::AllGenerationsFailed`]. Output order follows the
    /// prompt order.
    #[instrument(skip_all, fields(models = prompts.len(), images = image_urls.len()))]
    pub async fn generate_all(
        &self,
        prompts: &[EnhancedPrompt],
        image_urls: &[String],
        aspect_ratio: Option<&str>,
    ) -> Result<Vec<GeneratedImage>, PipelineError> {
        let attempts = join_all(
            prompts
                .iter()
                .map(|prompt| self.generate_single(prompt, image_urls, aspect_ratio)),
        )
        .await;

        let attempted = attempts.len();
        let mut successful = Vec::new();
        for (prompt, outcome) in prompts.iter().zip(attempts) {
            match outcome {
                Ok(image) => successful.push(image),
                Err(err) => {
                    tracing::error!(model = %prompt.model_name, error = %err, "generation failed");
                }
            }
        }

        if successful.is_empty() {
            return Err(PipelineError::AllGenerationsFailed { attempted });
        }
        tracing::info!(
            successful = successful.len(),
            attempted,
            "parallel generation complete"
        );
        Ok(successful)
    }

    #[instrument(skip_all, fields(model = %prompt.model_name))]
    async fn generate_single(
        &self,
        prompt: &EnhancedPrompt,
        image_urls: &[String],
        aspect_ratio: Option<&str>,
    ) -> Result<GeneratedImage, PipelineError> {
        let job = EditJob {
            spec: self.registry.resolve(&prompt.model_name),
            prompt: prompt.enhanced.clone(),
            image_urls: image_urls.to_vec(),
            aspect_ratio: aspect_ratio.map(str::to_string),
        };
        let source_url = image_urls.first().cloned().unwrap_or_default();
        let output = self.gateway.edit(job).await?;
        tracing::info!(
            model = %prompt.model_name,
            result_kb = output.bytes.len() / 1024,
            execution_time_ms = output.execution_time_ms,
            "generation complete"
        );
        Ok(GeneratedImage {
            model_name: prompt.model_name.clone(),
            bytes: output.bytes,
            result_url: output.url,
            source_url,
            prompt_used: prompt.enhanced.clone(),
            when: Utc::now(),
        })
    }
}
