//! Chat-completions client for the reasoning/vision gateway.
//!
//! The gateway speaks an OpenAI-compatible dialect: ordered messages whose
//! user content is a mixed list of text parts and inline base64 image parts.
//! Requests may pin a provider to prevent silent model fallback; the
//! effective model on the reply is re-checked and a mismatch logged.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{
    DEFAULT_ATTEMPTS, error_for_status, retry_after_seconds, transport_error, with_backoff,
};

const PROVIDER: &str = "reasoning";

/// One part of a user message.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Clone, Debug, Serialize)]
pub struct ImageUrlPart {
    pub url: String,
}

impl ContentPart {
    /// A plain text part.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::ContentPart;
    ///
    /// let part = ContentPart::text("Validate this edit.");
    /// assert!(matches!(part, ContentPart::Text { .. }));
    /// ```
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Inline an image as a base64 data URL with an explicit MIME type.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::ContentPart;
    ///
    /// let part = ContentPart::inline_image(&[1, 2, 3], "image/png");
    /// let rendered = serde_json::to_value(&part).unwrap();
    /// let url = rendered["image_url"]["url"].as_str().unwrap();
    /// assert!(url.starts_with("data:image/png;base64,"));
    /// ```
    pub fn inline_image(bytes: &[u8], mime: &str) -> Self {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        ContentPart::ImageUrl {
            image_url: ImageUrlPart {
                url: format!("data:{mime};base64,{encoded}"),
            },
        }
    }
}

/// Message content: a bare string (system prompts) or mixed parts.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    /// A system message carrying plain text.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::ChatMessage;
    ///
    /// let message = ChatMessage::system("You are a strict image validator.");
    /// assert_eq!(message.role, "system");
    /// ```
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user message of mixed text and image parts.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::{ChatMessage, ContentPart};
    ///
    /// let message = ChatMessage::user(vec![ContentPart::text("Compare the images.")]);
    /// assert_eq!(message.role, "user");
    /// ```
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Parts(parts),
        }
    }
}

/// A single chat-completions request.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Reasoning-effort hint (`low`/`medium`/`high`) for thinking models.
    pub reasoning_effort: Option<String>,
    /// Pin the upstream provider and disallow fallbacks.
    pub pin_provider: Option<String>,
    /// Attach the gateway's web-search plugin.
    pub web_search: bool,
}

impl ChatRequest {
    /// Create a request with the default token budget and no overrides.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::{ChatMessage, ChatRequest, ContentPart};
    ///
    /// let request = ChatRequest::new(
    ///     "anthropic/claude-sonnet-4.5",
    ///     vec![
    ///         ChatMessage::system("You enhance editing prompts."),
    ///         ChatMessage::user(vec![ContentPart::text("Remove the background.")]),
    ///     ],
    /// );
    /// assert_eq!(request.model, "anthropic/claude-sonnet-4.5");
    /// assert_eq!(request.max_tokens, 2000);
    /// assert!(request.pin_provider.is_none());
    /// ```
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: 2000,
            temperature: None,
            reasoning_effort: None,
            pin_provider: None,
            web_search: false,
        }
    }

    /// Hint the thinking effort for reasoning-capable models.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::ChatRequest;
    ///
    /// let request = ChatRequest::new("anthropic/claude-sonnet-4.5", vec![])
    ///     .with_reasoning_effort("high");
    /// assert_eq!(request.reasoning_effort.as_deref(), Some("high"));
    /// ```
    #[must_use]
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    /// Pin the upstream provider, disallowing silent model fallback.
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::ChatRequest;
    ///
    /// let request = ChatRequest::new("anthropic/claude-sonnet-4.5", vec![])
    ///     .with_pinned_provider("Anthropic");
    /// assert_eq!(request.pin_provider.as_deref(), Some("Anthropic"));
    /// ```
    #[must_use]
    pub fn with_pinned_provider(mut self, provider: impl Into<String>) -> Self {
        self.pin_provider = Some(provider.into());
        self
    }

    /// Override the sampling temperature (validators run at 0.0).
    ///
    /// # Examples
    ///
    /// ```
    /// use pixelsmith::providers::reasoning::ChatRequest;
    ///
    /// let request = ChatRequest::new("openai/gpt-4-turbo", vec![]).with_temperature(0.0);
    /// assert_eq!(request.temperature, Some(0.0));
    /// ```
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completed reply: the effective model and the concatenated text.
#[derive(Clone, Debug)]
pub struct ChatReply {
    pub model: String,
    pub text: String,
}

/// Seam for the reasoning gateway, so pipeline stages can be exercised
/// against scripted implementations.
#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ProviderError>;
}

/// HTTP client for the production gateway.
pub struct ReasoningClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl ReasoningClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    fn payload(request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": &request.model,
            "messages": &request.messages,
            "max_tokens": request.max_tokens,
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(effort) = &request.reasoning_effort {
            payload["reasoning"] = json!({ "effort": effort });
        }
        if let Some(provider) = &request.pin_provider {
            payload["provider"] = json!({
                "order": [provider],
                "allow_fallbacks": false,
            });
        }
        if request.web_search {
            payload["plugins"] = json!([{ "id": "web" }]);
        }
        payload
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<ChatReply, ProviderError> {
        let timeout_seconds = self.timeout.as_secs();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "pixelsmith")
            .timeout(self.timeout)
            .json(&Self::payload(request))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, timeout_seconds, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(PROVIDER, status, retry_after, body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| transport_error(PROVIDER, timeout_seconds, e))?;

        let effective_model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        if effective_model != request.model {
            tracing::warn!(
                requested = %request.model,
                effective = %effective_model,
                "gateway served a different model than requested"
            );
        }

        let content = body
            .pointer("/choices/0/message/content")
            .ok_or_else(|| ProviderError::Decode {
                provider: PROVIDER,
                message: "reply carried no message content".into(),
            })?;
        let text = flatten_content(content).ok_or_else(|| ProviderError::Decode {
            provider: PROVIDER,
            message: "message content was neither text nor text blocks".into(),
        })?;

        Ok(ChatReply {
            model: effective_model,
            text,
        })
    }
}

/// Content is either a plain string or a list of blocks whose text parts
/// are concatenated in order.
fn flatten_content(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
            Some(out)
        }
        _ => None,
    }
}

#[async_trait]
impl ReasoningGateway for ReasoningClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || self.complete_once(&request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_flattening_handles_both_shapes() {
        assert_eq!(flatten_content(&json!("plain")).as_deref(), Some("plain"));
        let blocks = json!([
            {"type": "text", "text": "first "},
            {"type": "text", "text": "second"},
        ]);
        assert_eq!(flatten_content(&blocks).as_deref(), Some("first second"));
        assert!(flatten_content(&json!(42)).is_none());
    }

    #[test]
    fn payload_carries_pinning_and_reasoning() {
        let request = ChatRequest::new("anthropic/claude-sonnet-4.5", vec![])
            .with_reasoning_effort("high")
            .with_pinned_provider("Anthropic");
        let payload = ReasoningClient::payload(&request);
        assert_eq!(payload["reasoning"]["effort"], "high");
        assert_eq!(payload["provider"]["allow_fallbacks"], false);
        assert_eq!(payload["provider"]["order"][0], "Anthropic");
        assert!(payload.get("temperature").is_none());
    }

    #[test]
    fn inline_images_become_data_urls() {
        let part = ContentPart::inline_image(&[1, 2, 3], "image/png");
        let rendered = serde_json::to_value(&part).unwrap();
        assert_eq!(rendered["type"], "image_url");
        let url = rendered["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
