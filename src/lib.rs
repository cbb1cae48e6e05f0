//! # pixelsmith: an iterative, validator-gated image-editing pipeline
//!
//! pixelsmith takes a task description plus input images and produces a
//! single edited image that satisfies the request. Its value is not the
//! individual gateway calls but the quality-controlled loop that
//! coordinates them:
//!
//! - **Fan-out**: every iteration enhances the prompt for each candidate
//!   image model and runs all edit jobs in parallel.
//! - **Validation gate**: a vision-capable reasoning model scores every
//!   result; only a score at or above the pass threshold terminates the
//!   loop.
//! - **Feedback-carrying retries**: failed-iteration issues flow into the
//!   next enhancement round while the user-visible prompt stays clean.
//! - **Sequential fallback**: a compound request that keeps failing is
//!   decomposed into atomic steps executed in order, each step its own
//!   mini enhance → generate → validate loop.
//! - **Human handoff**: exhausted runs transition the tracker task to
//!   review with a structured summary of what failed.
//!
//! ## Architecture
//!
//! The [`orchestrator::Orchestrator`] owns the loop and depends on the
//! stage components by injection: [`enhancer::PromptEnhancer`],
//! [`generator::ImageGenerator`], a [`validator::Validate`] implementation,
//! [`refiner::Refiner`], and [`fallback::HybridFallback`]. The refiner
//! reuses the same enhancer/generator/validator; nothing calls back into
//! the orchestrator, so the graph stays a DAG.
//!
//! Remote services hide behind seams
//! ([`providers::reasoning::ReasoningGateway`],
//! [`providers::imaging::ImageEditGateway`],
//! [`providers::tracker::WorkTracker`]) so the pipeline can be exercised
//! against scripted implementations.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pixelsmith::config::store::{PromptStore, StaticStore, keys};
//! use pixelsmith::config::Settings;
//! use pixelsmith::enhancer::PromptEnhancer;
//! use pixelsmith::fallback::HybridFallback;
//! use pixelsmith::generator::ImageGenerator;
//! use pixelsmith::orchestrator::{EditRun, Orchestrator};
//! use pixelsmith::providers::imaging::ImageEditClient;
//! use pixelsmith::providers::reasoning::ReasoningClient;
//! use pixelsmith::providers::tracker::TrackerClient;
//! use pixelsmith::refiner::Refiner;
//! use pixelsmith::registry::ModelRegistry;
//! use pixelsmith::validator::{Validate, VisionValidator};
//!
//! # async fn example() {
//! let settings = Settings::default();
//! let store: Arc<dyn PromptStore> = Arc::new(
//!     StaticStore::new().with_document(keys::SIMPLE_EDIT_RUBRIC, "Score the edit 0-10 …"),
//! );
//! let reasoning = Arc::new(ReasoningClient::new(
//!     "https://openrouter.ai/api/v1",
//!     std::env::var("OPENROUTER_API_KEY").unwrap_or_default(),
//!     Duration::from_secs(settings.timeout_reasoning_seconds),
//! ));
//! let imaging = Arc::new(ImageEditClient::new(
//!     "https://api.wavespeed.ai/api/v3",
//!     std::env::var("WAVESPEED_API_KEY").unwrap_or_default(),
//!     Duration::from_secs(settings.timeout_imaging_seconds),
//!     Duration::from_secs(settings.timeout_imaging_poll_seconds),
//! ));
//! let tracker = Arc::new(TrackerClient::new(
//!     "https://api.clickup.com/api/v2",
//!     std::env::var("CLICKUP_API_KEY").unwrap_or_default(),
//!     Duration::from_secs(settings.timeout_tracker_seconds),
//! ));
//!
//! let enhancer = Arc::new(PromptEnhancer::new(
//!     reasoning.clone(),
//!     store.clone(),
//!     settings.models.clone(),
//!     settings.enhancer_model.clone(),
//!     settings.rate_limit_enhancement,
//! ));
//! let generator = Arc::new(ImageGenerator::new(
//!     imaging,
//!     Arc::new(ModelRegistry::builtin()),
//! ));
//! let validator: Arc<dyn Validate> = Arc::new(VisionValidator::new(
//!     reasoning,
//!     store.clone(),
//!     settings.validator_model.clone(),
//!     settings.pass_threshold,
//!     Duration::from_secs(settings.validation_delay_seconds),
//!     settings.validation_image_budget_bytes,
//!     settings.rate_limit_validation,
//! ));
//! let refiner = Arc::new(Refiner::new(
//!     enhancer.clone(),
//!     generator.clone(),
//!     validator.clone(),
//!     settings.sequential.clone(),
//!     settings.max_step_attempts,
//! ));
//! let fallback = Arc::new(HybridFallback::new(
//!     tracker.clone(),
//!     store,
//!     settings.review_status.clone(),
//! ));
//!
//! let orchestrator = Orchestrator::new(
//!     enhancer, generator, validator, refiner, fallback, tracker, &settings,
//! );
//! let run = EditRun::new("task-1", "Remove the background.", "https://img/1.png", vec![]);
//! let result = orchestrator.process(run).await;
//! println!("{:?}", result.status);
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`orchestrator`] - the bounded iteration state machine
//! - [`enhancer`] / [`generator`] / [`validator`] / [`refiner`] - stages
//! - [`retry_policy`] - the smart-retry decision table
//! - [`fallback`] - human-review handoff
//! - [`parser`] - tracker custom fields → typed task record
//! - [`registry`] - typed image-model registry
//! - [`providers`] - gateway clients and seams
//! - [`lock`] - per-task single-flight lock + webhook dedup ring
//! - [`config`] - settings and the live-updatable prompt store
//! - [`telemetry`] - tracing bootstrap for embedders

pub mod artifacts;
pub mod config;
pub mod enhancer;
pub mod errors;
pub mod fallback;
pub mod generator;
pub mod images;
pub mod lock;
pub mod orchestrator;
pub mod parser;
pub mod providers;
pub mod refiner;
pub mod registry;
pub mod retry_policy;
pub mod telemetry;
pub mod types;
pub mod validator;
