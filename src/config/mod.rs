//! Configuration loading for the pipeline.
//!
//! Parameters resolve with precedence **environment > YAML file > built-in
//! defaults**. A remote key-value store ([`store::PromptStore`]) may
//! additionally shadow any prompt document for live updates without a
//! redeploy; parameters in this struct are snapshotted at startup.

pub mod store;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Locale-aware tokens driving the sequential decomposer.
///
/// The conjunction words and the preservation-clause markers are
/// language-specific (Greek is prominent in production traffic), so they are
/// configuration rather than constants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialTokens {
    /// Conjunctions normalized to commas before splitting.
    pub and_words: Vec<String>,
    /// Prefixes that open the trailing preservation clause.
    pub preservation_markers: Vec<String>,
    /// Clause appended to every step when the request carries none.
    pub default_preservation: String,
}

impl Default for SequentialTokens {
    fn default() -> Self {
        Self {
            and_words: vec![" και ".into(), " and ".into()],
            preservation_markers: vec![
                "Όλα τα υπόλοιπα".into(),
                "Όλα τα υπολοιπα".into(),
                "Keep everything else".into(),
                "keep everything else".into(),
            ],
            default_preservation: "Keep everything else exactly the same.".into(),
        }
    }
}

/// Snapshot of all tunable pipeline parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Candidate image models exercised each iteration, in enumeration order.
    pub models: Vec<String>,
    /// Reasoning model used for prompt enhancement.
    pub enhancer_model: String,
    /// Reasoning model used for validation.
    pub validator_model: String,
    /// Second validator model for the dual-consensus variant.
    pub secondary_validator_model: String,

    pub max_iterations: u32,
    pub max_step_attempts: u32,
    pub pass_threshold: u8,
    /// Iteration count at which a compound request switches to sequential mode.
    pub sequential_trigger: u32,

    /// Enables the smart-retry policy inside the iteration loop.
    pub smart_retry: bool,
    pub max_retries: u32,
    pub catastrophic_threshold: f64,
    pub incremental_threshold: f64,

    pub rate_limit_enhancement: usize,
    pub rate_limit_validation: usize,
    pub validation_delay_seconds: u64,
    /// Inline-image byte budget for the vision validator.
    pub validation_image_budget_bytes: usize,

    pub timeout_reasoning_seconds: u64,
    pub timeout_imaging_seconds: u64,
    pub timeout_imaging_poll_seconds: u64,
    pub timeout_tracker_seconds: u64,

    pub lock_ttl_seconds: u64,
    pub lock_capacity: usize,
    pub webhook_ledger_capacity: usize,

    /// Tracker status used to surface a task for human review.
    pub review_status: String,
    /// Boolean custom field that arms the pipeline for a task.
    pub trigger_field_id: String,

    pub sequential: SequentialTokens,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models: vec![
                "seedream-v4".into(),
                "qwen-edit-plus".into(),
                "wan-2.5-edit".into(),
                "nano-banana".into(),
            ],
            enhancer_model: "anthropic/claude-sonnet-4.5".into(),
            validator_model: "anthropic/claude-sonnet-4.5".into(),
            secondary_validator_model: "openai/gpt-4-turbo".into(),
            max_iterations: 3,
            max_step_attempts: 2,
            pass_threshold: 8,
            sequential_trigger: 3,
            smart_retry: false,
            max_retries: 5,
            catastrophic_threshold: 5.0,
            incremental_threshold: 8.0,
            rate_limit_enhancement: 3,
            rate_limit_validation: 2,
            validation_delay_seconds: 2,
            validation_image_budget_bytes: 3_500_000,
            timeout_reasoning_seconds: 120,
            timeout_imaging_seconds: 120,
            timeout_imaging_poll_seconds: 300,
            timeout_tracker_seconds: 30,
            lock_ttl_seconds: 3600,
            lock_capacity: 1000,
            webhook_ledger_capacity: 1000,
            review_status: "needs human review".into(),
            trigger_field_id: String::new(),
            sequential: SequentialTokens::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file, then apply environment
    /// overrides on top.
    pub fn load(yaml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut settings = match yaml_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                    path: path.display().to_string(),
                    source,
                })?
            }
            _ => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    /// Apply `SCREAMING_SNAKE` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        override_u32(&mut self.max_iterations, "MAX_ITERATIONS")?;
        override_u32(&mut self.max_step_attempts, "MAX_STEP_ATTEMPTS")?;
        override_u8(&mut self.pass_threshold, "VALIDATION_PASS_THRESHOLD")?;
        override_u32(&mut self.sequential_trigger, "SEQUENTIAL_TRIGGER")?;
        override_bool(&mut self.smart_retry, "SMART_RETRY")?;
        override_u32(&mut self.max_retries, "MAX_RETRIES")?;
        override_f64(&mut self.catastrophic_threshold, "CATASTROPHIC_THRESHOLD")?;
        override_f64(&mut self.incremental_threshold, "INCREMENTAL_THRESHOLD")?;
        override_usize(&mut self.rate_limit_enhancement, "RATE_LIMIT_ENHANCEMENT")?;
        override_usize(&mut self.rate_limit_validation, "RATE_LIMIT_VALIDATION")?;
        override_u64(&mut self.validation_delay_seconds, "VALIDATION_DELAY_SECONDS")?;
        override_u64(&mut self.timeout_reasoning_seconds, "TIMEOUT_OPENROUTER_SECONDS")?;
        override_u64(&mut self.timeout_imaging_seconds, "TIMEOUT_WAVESPEED_SECONDS")?;
        override_u64(
            &mut self.timeout_imaging_poll_seconds,
            "TIMEOUT_WAVESPEED_POLLING_SECONDS",
        )?;
        override_u64(&mut self.timeout_tracker_seconds, "TIMEOUT_CLICKUP_SECONDS")?;
        override_u64(&mut self.lock_ttl_seconds, "LOCK_TTL_SECONDS")?;
        if let Ok(value) = std::env::var("REVIEW_STATUS") {
            self.review_status = value;
        }
        if let Ok(value) = std::env::var("TRIGGER_FIELD_ID") {
            self.trigger_field_id = value;
        }
        Ok(())
    }
}

macro_rules! override_parsed {
    ($name:ident, $ty:ty) => {
        fn $name(slot: &mut $ty, key: &str) -> Result<(), ConfigError> {
            if let Ok(value) = std::env::var(key) {
                *slot = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })?;
            }
            Ok(())
        }
    };
}

override_parsed!(override_u8, u8);
override_parsed!(override_u32, u32);
override_parsed!(override_u64, u64);
override_parsed!(override_usize, usize);
override_parsed!(override_f64, f64);

fn override_bool(slot: &mut bool, key: &str) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(key) {
        *slot = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_parameters() {
        let s = Settings::default();
        assert_eq!(s.max_iterations, 3);
        assert_eq!(s.pass_threshold, 8);
        assert_eq!(s.rate_limit_enhancement, 3);
        assert_eq!(s.rate_limit_validation, 2);
        assert_eq!(s.max_retries, 5);
        assert!(!s.smart_retry);
        assert!(s.sequential.and_words.contains(&" και ".to_string()));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_iterations: 5\npass_threshold: 9\n").unwrap();
        let s = Settings::load(Some(path.as_path())).unwrap();
        assert_eq!(s.max_iterations, 5);
        assert_eq!(s.pass_threshold, 9);
        // untouched fields keep defaults
        assert_eq!(s.max_step_attempts, 2);
    }
}
