//! Client for the work-tracker API.
//!
//! The tracker authenticates with a raw API key in the `Authorization`
//! header (no bearer prefix). Task payloads are passed through as
//! `serde_json::Value`; the [`TaskParser`](crate::parser::TaskParser) owns
//! their interpretation.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{
    DEFAULT_ATTEMPTS, error_for_status, retry_after_seconds, transport_error, with_backoff,
};

const PROVIDER: &str = "tracker";

/// Seam for the work-tracker.
#[async_trait]
pub trait WorkTracker: Send + Sync {
    /// Fetch the full task envelope (custom fields + attachments).
    async fn task(&self, task_id: &str) -> Result<Value, ProviderError>;

    /// Upload a file attachment to the task.
    async fn upload_attachment(
        &self,
        task_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ProviderError>;

    /// Transition the task to a status.
    async fn set_status(&self, task_id: &str, status: &str) -> Result<(), ProviderError>;

    /// Post a comment on the task.
    async fn post_comment(&self, task_id: &str, text: &str) -> Result<(), ProviderError>;

    /// Write a custom-field value (used to unset the trigger checkbox).
    async fn set_field(
        &self,
        task_id: &str,
        field_id: &str,
        value: Value,
    ) -> Result<(), ProviderError>;

    /// Download an attachment by URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl TrackerClient {
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

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", self.api_key.clone())
            .timeout(self.timeout)
    }

    async fn expect_success(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, ProviderError> {
        let timeout_seconds = self.timeout.as_secs();
        let response = response.map_err(|e| transport_error(PROVIDER, timeout_seconds, e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(PROVIDER, status, retry_after, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl WorkTracker for TrackerClient {
    async fn task(&self, task_id: &str) -> Result<Value, ProviderError> {
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || async move {
            let response = self
                .expect_success(
                    self.request(reqwest::Method::GET, &format!("/task/{task_id}"))
                        .send()
                        .await,
                )
                .await?;
            response.json().await.map_err(|e| ProviderError::Decode {
                provider: PROVIDER,
                message: e.to_string(),
            })
        })
        .await
    }

    async fn upload_attachment(
        &self,
        task_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ProviderError> {
        // Multipart bodies are not replayable; each retry rebuilds the form.
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || {
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(filename.to_string());
            let form = reqwest::multipart::Form::new().part("attachment", part);
            async move {
                self.expect_success(
                    self.request(reqwest::Method::POST, &format!("/task/{task_id}/attachment"))
                        .multipart(form)
                        .send()
                        .await,
                )
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn set_status(&self, task_id: &str, status: &str) -> Result<(), ProviderError> {
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || async move {
            self.expect_success(
                self.request(reqwest::Method::PUT, &format!("/task/{task_id}"))
                    .json(&json!({ "status": status }))
                    .send()
                    .await,
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn post_comment(&self, task_id: &str, text: &str) -> Result<(), ProviderError> {
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || async move {
            self.expect_success(
                self.request(reqwest::Method::POST, &format!("/task/{task_id}/comment"))
                    .json(&json!({ "comment_text": text }))
                    .send()
                    .await,
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn set_field(
        &self,
        task_id: &str,
        field_id: &str,
        value: Value,
    ) -> Result<(), ProviderError> {
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || {
            let value = value.clone();
            async move {
                self.expect_success(
                    self.request(
                        reqwest::Method::POST,
                        &format!("/task/{task_id}/field/{field_id}"),
                    )
                    .json(&json!({ "value": value }))
                    .send()
                    .await,
                )
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let timeout_seconds = self.timeout.as_secs();
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || async move {
            let response = self
                .http
                .get(url)
                .header("Authorization", self.api_key.clone())
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| transport_error(PROVIDER, timeout_seconds, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(error_for_status(PROVIDER, status, None, String::new()));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| transport_error(PROVIDER, timeout_seconds, e))?;
            Ok(bytes.to_vec())
        })
        .await
    }
}
