use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::ApiError;
use super::types::{Batch, BatchList, CreateBatchRequest, FileObject};

pub const API_URL: &str = "https://api.openai.com/v1";

/// Largest page the list endpoint accepts.
const MAX_PAGE_SIZE: usize = 100;

/// The remote operations the orchestrator needs from a batch-processing service.
///
/// Every call returns an explicit `Result` so the pipeline can branch on
/// the stage that failed. Implementations must be shareable across
/// pipeline tasks.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Upload one input file and return its remote file id.
    async fn upload(&self, content: Vec<u8>, filename: &str) -> Result<String, ApiError>;

    /// Create a batch job from a previously uploaded file.
    async fn create_job(&self, input_file_id: &str) -> Result<Batch, ApiError>;

    /// Fetch the raw (unnormalized) status string of a job.
    async fn get_status(&self, job_id: &str) -> Result<String, ApiError>;

    async fn get_job(&self, job_id: &str) -> Result<Batch, ApiError>;

    /// Fetch the content of an output file.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ApiError>;

    /// Most recent jobs first. `None` walks every page.
    async fn list_jobs(&self, limit: Option<u32>) -> Result<Vec<Batch>, ApiError>;

    async fn cancel_job(&self, job_id: &str) -> Result<Batch, ApiError>;
}

/// HTTP implementation of [`JobClient`] for the OpenAI Batch API.
pub struct OpenAiClient {
    api_key: String,
    client: Client,
    base_url: String,
    endpoint: String,
    completion_window: String,
}

impl OpenAiClient {
    /// Create a client for `base_url` (normally [`API_URL`]; proxies and compatible servers work too).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoint: "/v1/chat/completions".to_string(),
            completion_window: "24h".to_string(),
        })
    }

    /// Override the endpoint and completion window sent with every new batch.
    pub fn with_batch_options(
        mut self,
        endpoint: impl Into<String>,
        completion_window: impl Into<String>,
    ) -> Self {
        self.endpoint = endpoint.into();
        self.completion_window = completion_window.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Map non-success responses to [`ApiError`], passing successful ones through.
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ApiError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::api(status.as_u16(), message));
        }

        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = Self::check(response).await?.json::<T>().await?;
        Ok(body)
    }
}

#[async_trait]
impl JobClient for OpenAiClient {
    async fn upload(&self, content: Vec<u8>, filename: &str) -> Result<String, ApiError> {
        let part = Part::bytes(content).file_name(filename.to_string());
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let file: FileObject = Self::json(response).await?;
        Ok(file.id)
    }

    async fn create_job(&self, input_file_id: &str) -> Result<Batch, ApiError> {
        let req = CreateBatchRequest {
            input_file_id: input_file_id.to_string(),
            endpoint: self.endpoint.clone(),
            completion_window: self.completion_window.clone(),
        };

        let response = self
            .client
            .post(self.url("batches"))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        Self::json(response).await
    }

    async fn get_status(&self, job_id: &str) -> Result<String, ApiError> {
        Ok(self.get_job(job_id).await?.status)
    }

    async fn get_job(&self, job_id: &str) -> Result<Batch, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("batches/{job_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::json(response).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("files/{file_id}/content")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn list_jobs(&self, limit: Option<u32>) -> Result<Vec<Batch>, ApiError> {
        let mut jobs: Vec<Batch> = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page_size = match limit {
                Some(n) => (n as usize).saturating_sub(jobs.len()).min(MAX_PAGE_SIZE),
                None => MAX_PAGE_SIZE,
            };
            if page_size == 0 {
                break;
            }

            let mut request = self
                .client
                .get(self.url("batches"))
                .bearer_auth(&self.api_key)
                .query(&[("limit", page_size.to_string())]);
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor)]);
            }

            let page: BatchList = Self::json(request.send().await?).await?;
            let cursor = page
                .last_id
                .clone()
                .or_else(|| page.data.last().map(|b| b.id.clone()));
            let has_more = page.has_more && !page.data.is_empty();
            jobs.extend(page.data);

            match cursor {
                Some(cursor) if has_more => after = Some(cursor),
                _ => break,
            }
        }

        Ok(jobs)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<Batch, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("batches/{job_id}/cancel")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::json(response).await
    }
}
