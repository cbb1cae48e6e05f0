//! Prompt-store abstraction for live-updatable documents.
//!
//! Model activation/research documents, validation rubrics, the fonts
//! translation guide, and the fallback comment template all live behind
//! [`PromptStore`]. Implementations must serve documents **fresh on every
//! call** so that edits in the backing store take effect without a redeploy;
//! callers deliberately do not cache.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

use crate::errors::ConfigError;

/// Well-known document keys.
pub mod keys {
    /// Validation rubric for plain edit tasks.
    pub const SIMPLE_EDIT_RUBRIC: &str = "validation/simple_edit";
    /// Validation rubric for branded creative tasks.
    pub const BRANDED_CREATIVE_RUBRIC: &str = "validation/branded_creative";
    /// Font translation guide substituted into rubrics and enhancements.
    pub const FONTS_GUIDE: &str = "fonts_guide";
    /// Comment template posted on hybrid fallback.
    pub const FALLBACK_COMMENT: &str = "fallback_comment";
}

/// Per-model prompt-engineering documents for the enhancer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResearchDocs {
    /// Persona/activation preamble.
    pub activation: String,
    /// Deep-research findings for the model.
    pub research: String,
}

impl ResearchDocs {
    /// Combined system-prompt body, or `None` when both halves are empty.
    pub fn combined(&self) -> Option<String> {
        if self.activation.is_empty() && self.research.is_empty() {
            return None;
        }
        Some(format!("{}\n\n{}", self.activation, self.research))
    }
}

/// Source of prompts, rubrics, and per-model research documents.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Fetch the research documents for one image model. Missing documents
    /// yield an empty [`ResearchDocs`], not an error; the enhancer proceeds
    /// without them.
    async fn research_for(&self, model: &str) -> ResearchDocs;

    /// Fetch a named document.
    async fn document(&self, key: &str) -> Result<String, ConfigError>;
}

/// Filesystem-backed store.
///
/// Layout mirrors the deployment bundle:
/// `<root>/deep_research/<model>/activation.txt`,
/// `<root>/deep_research/<model>/research.md`, and
/// `<root>/prompts/<key>.txt` (slashes in keys become directories).
/// Files are re-read on every call.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PromptStore for FileStore {
    async fn research_for(&self, model: &str) -> ResearchDocs {
        // Model names may carry path separators (provider/model); flatten.
        let folder = model.replace('/', "-");
        let dir = self.root.join("deep_research").join(folder);
        let activation = tokio::fs::read_to_string(dir.join("activation.txt"))
            .await
            .unwrap_or_default();
        let research = tokio::fs::read_to_string(dir.join("research.md"))
            .await
            .unwrap_or_default();
        if activation.is_empty() && research.is_empty() {
            tracing::warn!(model, "no research documents found");
        }
        ResearchDocs {
            activation,
            research,
        }
    }

    async fn document(&self, key: &str) -> Result<String, ConfigError> {
        let path = self.root.join("prompts").join(format!("{key}.txt"));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| ConfigError::MissingDocument {
                key: key.to_string(),
            })
    }
}

/// In-memory store for tests and embedded defaults.
#[derive(Clone, Debug, Default)]
pub struct StaticStore {
    documents: FxHashMap<String, String>,
    research: FxHashMap<String, ResearchDocs>,
}

impl StaticStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_document(mut self, key: impl Into<String>, body: impl Into<String>) -> Self {
        self.documents.insert(key.into(), body.into());
        self
    }

    #[must_use]
    pub fn with_research(
        mut self,
        model: impl Into<String>,
        activation: impl Into<String>,
        research: impl Into<String>,
    ) -> Self {
        self.research.insert(
            model.into(),
            ResearchDocs {
                activation: activation.into(),
                research: research.into(),
            },
        );
        self
    }
}

#[async_trait]
impl PromptStore for StaticStore {
    async fn research_for(&self, model: &str) -> ResearchDocs {
        self.research.get(model).cloned().unwrap_or_default()
    }

    async fn document(&self, key: &str) -> Result<String, ConfigError> {
        self.documents
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingDocument {
                key: key.to_string(),
            })
    }
}
