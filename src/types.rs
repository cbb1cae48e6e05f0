//! Shared enums used across the pipeline.

use serde::{Deserialize, Serialize};

/// Routing class of an incoming task.
///
/// `Edit` reworks existing imagery from free-form instructions; `Creative`
/// composes branded marketing material from structured fields. The parser
/// defaults to `Edit` when the tracker field is absent or malformed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Edit,
    Creative,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Edit => "edit",
            TaskType::Creative => "creative",
        }
    }
}

/// Terminal status of a pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Success,
    Failed,
    HybridFallback,
    Timeout,
}

/// Outcome class of a single validation.
///
/// `Error` marks a validator reply that could not be parsed; it always pairs
/// with `passed = false` and `score = 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Fail,
    Error,
}

/// Agreement level across validator verdicts within one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationConfidence {
    High,
    Medium,
    Low,
}

/// Outcome of the smart-retry decision table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Validation passed; nothing left to do.
    NoRetry,
    /// Retry on top of the best failed edit.
    Incremental,
    /// Retry from the original image.
    FullRestart,
    /// Retry budget exhausted.
    GiveUp,
}

/// Which image the next attempt should build on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseImage {
    Original,
    BestEdit,
}

/// Coarse complexity classification of an edit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditComplexity {
    Simple,
    Moderate,
    Complex,
}
