#![allow(dead_code)]
//! Shared stubs for pipeline integration tests.
//!
//! Remote gateways are replaced by scripted implementations so scenarios
//! can drive the orchestrator deterministically: the reasoning stub echoes
//! canned replies and records every request, the imaging stub fabricates
//! outputs keyed by model name, and the scripted validator pops one
//! per-call score map per validation round.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use pixelsmith::artifacts::{GeneratedImage, ValidationResult};
use pixelsmith::config::Settings;
use pixelsmith::config::store::{PromptStore, StaticStore, keys};
use pixelsmith::enhancer::PromptEnhancer;
use pixelsmith::errors::{PipelineError, ProviderError};
use pixelsmith::fallback::HybridFallback;
use pixelsmith::generator::ImageGenerator;
use pixelsmith::orchestrator::Orchestrator;
use pixelsmith::providers::imaging::{EditJob, EditOutput, ImageEditGateway};
use pixelsmith::providers::reasoning::{ChatReply, ChatRequest, ReasoningGateway};
use pixelsmith::providers::tracker::WorkTracker;
use pixelsmith::refiner::Refiner;
use pixelsmith::registry::ModelRegistry;
use pixelsmith::types::TaskType;
use pixelsmith::validator::Validate;

/// Reasoning gateway that records requests and replays canned replies.
/// With an empty queue it echoes a fixed acknowledgement, which keeps
/// enhancement deterministic for multi-model fan-outs.
#[derive(Default)]
pub struct ScriptedReasoning {
    pub replies: Mutex<VecDeque<String>>,
    pub seen: Mutex<Vec<ChatRequest>>,
    /// When set, any request whose user text contains this marker fails
    /// with an API error. Used to isolate per-model enhancement failures.
    pub fail_when_contains: Mutex<Option<String>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(reply.into());
    }

    /// Text of every user message seen so far, flattened.
    pub fn user_texts(&self) -> Vec<String> {
        use pixelsmith::providers::reasoning::{ContentPart, MessageContent};
        self.seen
            .lock()
            .unwrap()
            .iter()
            .flat_map(|request| request.messages.iter())
            .filter(|message| message.role == "user")
            .map(|message| match &message.content {
                MessageContent::Text(text) => text.clone(),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
            .collect()
    }
}

#[async_trait]
impl ReasoningGateway for ScriptedReasoning {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        use pixelsmith::providers::reasoning::{ContentPart, MessageContent};
        let model = request.model.clone();
        let user_text: String = request
            .messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| match &m.content {
                MessageContent::Text(text) => text.clone(),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
            .collect();
        self.seen.lock().unwrap().push(request);
        if let Some(marker) = self.fail_when_contains.lock().unwrap().as_ref() {
            if user_text.contains(marker.as_str()) {
                return Err(ProviderError::Api {
                    provider: "reasoning",
                    status: Some(400),
                    message: "scripted failure".into(),
                });
            }
        }
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "enhanced editing instructions".to_string());
        Ok(ChatReply { model, text })
    }
}

/// Imaging gateway that fabricates one output per job, keyed by model name
/// and an increasing counter so chained steps see distinct URLs.
#[derive(Default)]
pub struct StubImaging {
    pub seen: Mutex<Vec<EditJob>>,
    counter: AtomicUsize,
}

impl StubImaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source URLs of every job seen so far, first URL per job.
    pub fn primary_sources(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|job| job.image_urls.first().cloned().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl ImageEditGateway for StubImaging {
    async fn edit(&self, job: EditJob) -> Result<EditOutput, ProviderError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("https://cdn.test/{}/{n}", job.spec.name);
        let bytes = job.spec.name.as_bytes().to_vec();
        self.seen.lock().unwrap().push(job);
        Ok(EditOutput {
            bytes,
            url,
            execution_time_ms: Some(1200),
        })
    }
}

/// Validator that pops one score map per call: `model name -> (score,
/// issues)`. Models missing from the map score 5 with a generic issue.
pub struct ScriptedValidator {
    pub calls: Mutex<VecDeque<FxHashMap<String, (u8, Vec<String>)>>>,
    pub pass_threshold: u8,
    pub requests_seen: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    pub fn new(pass_threshold: u8) -> Self {
        Self {
            calls: Mutex::new(VecDeque::new()),
            pass_threshold,
            requests_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push_round(&self, scores: &[(&str, u8, &[&str])]) {
        let mut map = FxHashMap::default();
        for (model, score, issues) in scores {
            map.insert(
                model.to_string(),
                (*score, issues.iter().map(|s| s.to_string()).collect()),
            );
        }
        self.calls.lock().unwrap().push_back(map);
    }
}

#[async_trait]
impl Validate for ScriptedValidator {
    async fn validate_all(
        &self,
        generated: &[GeneratedImage],
        request: &str,
        _original_images: &[Vec<u8>],
        _task_type: TaskType,
    ) -> Result<Vec<ValidationResult>, PipelineError> {
        self.requests_seen.lock().unwrap().push(request.to_string());
        let round = self.calls.lock().unwrap().pop_front().unwrap_or_default();
        Ok(generated
            .iter()
            .map(|image| {
                let (score, issues) = round
                    .get(&image.model_name)
                    .cloned()
                    .unwrap_or((5, vec!["quality below bar".to_string()]));
                ValidationResult::normalized(
                    image.model_name.clone(),
                    score >= self.pass_threshold,
                    score,
                    issues,
                    "scripted",
                    self.pass_threshold,
                )
            })
            .collect())
    }
}

/// Tracker that records every side effect.
#[derive(Default)]
pub struct RecordingTracker {
    pub statuses: Mutex<Vec<(String, String)>>,
    pub comments: Mutex<Vec<(String, String)>>,
    pub fields: Mutex<Vec<(String, String, Value)>>,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkTracker for RecordingTracker {
    async fn task(&self, _task_id: &str) -> Result<Value, ProviderError> {
        Ok(Value::Null)
    }

    async fn upload_attachment(
        &self,
        task_id: &str,
        filename: &str,
        _bytes: Vec<u8>,
    ) -> Result<(), ProviderError> {
        self.uploads
            .lock()
            .unwrap()
            .push((task_id.to_string(), filename.to_string()));
        Ok(())
    }

    async fn set_status(&self, task_id: &str, status: &str) -> Result<(), ProviderError> {
        self.statuses
            .lock()
            .unwrap()
            .push((task_id.to_string(), status.to_string()));
        Ok(())
    }

    async fn post_comment(&self, task_id: &str, text: &str) -> Result<(), ProviderError> {
        self.comments
            .lock()
            .unwrap()
            .push((task_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_field(
        &self,
        task_id: &str,
        field_id: &str,
        value: Value,
    ) -> Result<(), ProviderError> {
        self.fields
            .lock()
            .unwrap()
            .push((task_id.to_string(), field_id.to_string(), value));
        Ok(())
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(vec![])
    }
}

/// Fully wired pipeline over the stubs.
pub struct TestPipeline {
    pub orchestrator: Orchestrator,
    pub reasoning: Arc<ScriptedReasoning>,
    pub imaging: Arc<StubImaging>,
    pub validator: Arc<ScriptedValidator>,
    pub tracker: Arc<RecordingTracker>,
}

pub fn test_store() -> Arc<dyn PromptStore> {
    Arc::new(
        StaticStore::new()
            .with_document(keys::SIMPLE_EDIT_RUBRIC, "Score the edit 0-10.")
            .with_document(keys::BRANDED_CREATIVE_RUBRIC, "Score the creative 0-10.")
            .with_research("stub-model", "You prompt stub-model.", "Keep prompts short."),
    )
}

/// Build a pipeline with the given candidate models and settings tweaks.
pub fn build_pipeline(models: &[&str], mutate: impl FnOnce(&mut Settings)) -> TestPipeline {
    let mut settings = Settings::default();
    settings.models = models.iter().map(|m| m.to_string()).collect();
    settings.validation_delay_seconds = 0;
    settings.trigger_field_id = "field-ai-edit".to_string();
    mutate(&mut settings);

    let reasoning = Arc::new(ScriptedReasoning::new());
    let imaging = Arc::new(StubImaging::new());
    let validator = Arc::new(ScriptedValidator::new(settings.pass_threshold));
    let tracker = Arc::new(RecordingTracker::new());
    let store = test_store();

    let enhancer = Arc::new(PromptEnhancer::new(
        reasoning.clone(),
        store.clone(),
        settings.models.clone(),
        settings.enhancer_model.clone(),
        settings.rate_limit_enhancement,
    ));
    let generator = Arc::new(ImageGenerator::new(
        imaging.clone(),
        Arc::new(ModelRegistry::builtin()),
    ));
    let validate: Arc<dyn Validate> = validator.clone();
    let refiner = Arc::new(Refiner::new(
        enhancer.clone(),
        generator.clone(),
        validate.clone(),
        settings.sequential.clone(),
        settings.max_step_attempts,
    ));
    let fallback = Arc::new(HybridFallback::new(
        tracker.clone(),
        store,
        settings.review_status.clone(),
    ));
    let orchestrator = Orchestrator::new(
        enhancer,
        generator,
        validate,
        refiner,
        fallback,
        tracker.clone(),
        &settings,
    );

    TestPipeline {
        orchestrator,
        reasoning,
        imaging,
        validator,
        tracker,
    }
}
