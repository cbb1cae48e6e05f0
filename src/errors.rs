//! Error types for the pixelsmith pipeline.
//!
//! Two layers of errors mirror the two layers of the system:
//!
//! - [`ProviderError`]: failures talking to a remote gateway (transport,
//!   authentication, rate limiting, API rejections). Provider clients retry
//!   transport-class errors internally; everything that escapes a client is
//!   final for that single call.
//! - [`PipelineError`]: failures of a pipeline stage. Per-model failures are
//!   isolated inside the fan-out stages and only aggregate into the
//!   `All*Failed` variants when no model survives.
//!
//! Quality failures are **not** errors: a generated image that does not meet
//! the bar rides in a [`ValidationResult`](crate::artifacts::ValidationResult)
//! with `passed = false`.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by the remote gateway clients.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// Network-level failure (connect, TLS, read) or a 5xx reply.
    #[error("{provider} transport error: {message}")]
    #[diagnostic(code(pixelsmith::provider::transport))]
    Transport {
        provider: &'static str,
        message: String,
    },

    /// The gateway rejected our credentials. Never retried.
    #[error("{provider} authentication failed")]
    #[diagnostic(
        code(pixelsmith::provider::auth),
        help("Check the configured API key for this provider.")
    )]
    Auth { provider: &'static str },

    /// 429 from the gateway; `retry_after` carries the server hint when present.
    #[error("{provider} rate limit exceeded")]
    #[diagnostic(code(pixelsmith::provider::rate_limit))]
    RateLimit {
        provider: &'static str,
        retry_after: Option<u64>,
    },

    /// A 4xx/5xx reply or an in-band API error code.
    #[error("{provider} API error: {message}")]
    #[diagnostic(code(pixelsmith::provider::api))]
    Api {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// The gateway replied with something we could not decode.
    #[error("{provider} returned an unreadable response: {message}")]
    #[diagnostic(code(pixelsmith::provider::decode))]
    Decode {
        provider: &'static str,
        message: String,
    },

    /// A single remote operation exceeded its deadline.
    #[error("{provider} operation timed out after {seconds}s")]
    #[diagnostic(code(pixelsmith::provider::timeout))]
    Timeout {
        provider: &'static str,
        seconds: u64,
    },
}

impl ProviderError {
    /// Whether the backoff loop inside a provider client may try again.
    ///
    /// Authentication failures and malformed responses are final; transport
    /// errors, timeouts, rate limits and 5xx-class API errors are transient.
    pub fn is_retriable(&self) -> bool {
        match self {
            ProviderError::Auth { .. } | ProviderError::Decode { .. } => false,
            ProviderError::Transport { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::RateLimit { .. } => true,
            ProviderError::Api { status, .. } => status.is_none_or(|s| s >= 500),
        }
    }

    /// The provider name carried by every variant.
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Transport { provider, .. }
            | ProviderError::Auth { provider }
            | ProviderError::RateLimit { provider, .. }
            | ProviderError::Api { provider, .. }
            | ProviderError::Decode { provider, .. }
            | ProviderError::Timeout { provider, .. } => provider,
        }
    }
}

/// Errors raised by pipeline stages and surfaced to the orchestrator.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    /// Every candidate model failed prompt enhancement.
    #[error("all {attempted} prompt enhancements failed")]
    #[diagnostic(
        code(pixelsmith::pipeline::all_enhancements_failed),
        help("Check reasoning-gateway connectivity and the model research documents.")
    )]
    AllEnhancementsFailed { attempted: usize },

    /// Every candidate model failed image generation.
    #[error("all {attempted} image generations failed")]
    #[diagnostic(code(pixelsmith::pipeline::all_generations_failed))]
    AllGenerationsFailed { attempted: usize },

    /// A sequential-mode step ran out of attempts without a passing result.
    #[error("sequential step {step} failed after {attempts} attempts")]
    #[diagnostic(code(pixelsmith::pipeline::sequential_step_failed))]
    SequentialStepFailed { step: usize, attempts: u32 },

    /// A second run was requested for a task that already has an active one.
    #[error("task {task_id} already has an active pipeline run")]
    #[diagnostic(
        code(pixelsmith::pipeline::busy),
        help("Concurrent webhook deliveries for one task are coalesced; this one should be ignored.")
    )]
    Busy { task_id: String },

    /// Gateway error that escaped a stage (validation system errors, etc.).
    #[error(transparent)]
    #[diagnostic(code(pixelsmith::pipeline::provider))]
    Provider(#[from] ProviderError),

    /// Configuration or prompt-store failure.
    #[error(transparent)]
    #[diagnostic(code(pixelsmith::pipeline::config))]
    Config(#[from] ConfigError),
}

/// Errors loading configuration or prompt-store documents.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    #[diagnostic(code(pixelsmith::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    #[diagnostic(code(pixelsmith::config::yaml))]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("prompt-store document not found: {key}")]
    #[diagnostic(
        code(pixelsmith::config::missing_document),
        help("Seed the store with this document or point the loader at the right root.")
    )]
    MissingDocument { key: String },

    #[error("invalid value for {key}: {value}")]
    #[diagnostic(code(pixelsmith::config::invalid_value))]
    InvalidValue { key: String, value: String },
}
