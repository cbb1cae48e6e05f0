//! Client for the asynchronous image-editing gateway.
//!
//! The gateway is two-phase: `POST /{model_path}` submits a job and returns
//! its identifier; `GET /predictions/{id}/result` is polled at a fixed
//! interval until the job completes or fails. The final output URL is
//! downloadable without authentication.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::ProviderError;
use crate::providers::{
    DEFAULT_ATTEMPTS, error_for_status, retry_after_seconds, transport_error, with_backoff,
};
use crate::registry::ModelSpec;

const PROVIDER: &str = "imaging";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One edit job for a single model.
#[derive(Clone, Debug)]
pub struct EditJob {
    pub spec: ModelSpec,
    pub prompt: String,
    /// Ordered source images; the first is the primary canvas.
    pub image_urls: Vec<String>,
    pub aspect_ratio: Option<String>,
}

/// The completed output of an edit job.
#[derive(Clone, Debug)]
pub struct EditOutput {
    pub bytes: Vec<u8>,
    /// Stable output URL, hostable and unauthenticated.
    pub url: String,
    pub execution_time_ms: Option<u64>,
}

/// Seam for the image-editing gateway.
#[async_trait]
pub trait ImageEditGateway: Send + Sync {
    async fn edit(&self, job: EditJob) -> Result<EditOutput, ProviderError>;
}

pub struct ImageEditClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    poll_deadline: Duration,
}

impl ImageEditClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        poll_deadline: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
            poll_deadline,
        }
    }

    fn payload(job: &EditJob) -> Value {
        let mut payload = json!({
            "images": &job.image_urls,
            "prompt": &job.prompt,
            "enable_base64_output": false,
            "enable_sync_mode": false,
        });
        if let Some(ratio) = &job.aspect_ratio {
            payload["aspect_ratio"] = json!(ratio);
        }
        if let Some(format) = &job.spec.output_format {
            payload["output_format"] = json!(format);
        }
        if let Some(resolution) = &job.spec.resolution {
            payload["resolution"] = json!(resolution);
        }
        if let Some(seed) = job.spec.seed {
            payload["seed"] = json!(seed);
        }
        payload
    }

    async fn submit(&self, job: &EditJob) -> Result<String, ProviderError> {
        let timeout_seconds = self.timeout.as_secs();
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, job.spec.remote_path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .json(&Self::payload(job))
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
        if body.get("code").and_then(Value::as_i64) != Some(200) {
            return Err(ProviderError::Api {
                provider: PROVIDER,
                status: None,
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("gateway rejected the job")
                    .to_string(),
            });
        }
        body.pointer("/data/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode {
                provider: PROVIDER,
                message: "submit reply carried no job id".into(),
            })
    }

    /// Poll until the job completes or the deadline passes.
    ///
    /// Transient poll failures (non-200 replies) are swallowed and retried
    /// on the next tick; only an explicit `failed` status or the deadline
    /// aborts the job.
    async fn poll(&self, job_id: &str, model: &str) -> Result<(String, Option<u64>), ProviderError> {
        let started = Instant::now();
        loop {
            if started.elapsed() >= self.poll_deadline {
                return Err(ProviderError::Timeout {
                    provider: PROVIDER,
                    seconds: self.poll_deadline.as_secs(),
                });
            }

            let reply = self
                .http
                .get(format!("{}/predictions/{}/result", self.base_url, job_id))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .timeout(self.timeout)
                .send()
                .await;

            let Ok(response) = reply else {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };
            if !response.status().is_success() {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            let Ok(body) = response.json::<Value>().await else {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };
            if body.get("code").and_then(Value::as_i64) != Some(200) {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let data = body.get("data").cloned().unwrap_or(Value::Null);
            match data.get("status").and_then(Value::as_str) {
                Some("completed") => {
                    let url = data
                        .pointer("/outputs/0")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| ProviderError::Decode {
                            provider: PROVIDER,
                            message: "completed job carried no outputs".into(),
                        })?;
                    let execution_time = data.get("executionTime").and_then(Value::as_u64);
                    tracing::info!(
                        model,
                        job_id,
                        elapsed_seconds = started.elapsed().as_secs(),
                        execution_time_ms = execution_time,
                        "edit job completed"
                    );
                    return Ok((url, execution_time));
                }
                Some("failed") => {
                    let message = data
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    return Err(ProviderError::Api {
                        provider: PROVIDER,
                        status: None,
                        message: format!("job failed: {message}"),
                    });
                }
                status => {
                    tracing::debug!(model, job_id, ?status, "edit job still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let timeout_seconds = self.timeout.as_secs();
        let response = self
            .http
            .get(url)
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
    }

    async fn edit_once(&self, job: &EditJob) -> Result<EditOutput, ProviderError> {
        let job_id = self.submit(job).await?;
        tracing::info!(model = %job.spec.name, job_id = %job_id, "edit job submitted");
        let (url, execution_time_ms) = self.poll(&job_id, &job.spec.name).await?;
        let bytes = self.download(&url).await?;
        Ok(EditOutput {
            bytes,
            url,
            execution_time_ms,
        })
    }
}

#[async_trait]
impl ImageEditGateway for ImageEditClient {
    async fn edit(&self, job: EditJob) -> Result<EditOutput, ProviderError> {
        with_backoff(PROVIDER, DEFAULT_ATTEMPTS, || self.edit_once(&job)).await
    }
}
