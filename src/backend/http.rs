//! HTTP implementation of the training backend
//!
//! Endpoints:
//! - POST /train/stream     multipart form, server-sent `data: ` lines
//! - POST /predict          multipart form, JSON reply
//! - GET  /queue-status     JSON
//! - GET  /download-model   binary
//! - GET  /user/profile, POST /user/add-credits  (Bearer token)

use super::{
    describe_error_body, Backend, BackendError, ChunkSource, PredictOutcome, PredictRequest,
    QueueStatus, TrainRequest, UserProfile,
};
use crate::ConsoleConfig;
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Backend reached over HTTP
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client from the console configuration
    pub fn new(config: &ConsoleConfig) -> Result<Self, BackendError> {
        // Only the connect phase is bounded: a training stream may stay open for hours
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Download the most recently trained model to `dest`, returning the bytes written
    pub async fn download_model(&self, dest: &Path) -> Result<u64, BackendError> {
        let response = self.client.get(self.url("/download-model")).send().await?;
        let mut chunks = ResponseChunks::new(check_status(response).await?);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = chunks.next_chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(path = %dest.display(), bytes = written, "Downloaded model");
        Ok(written)
    }

    /// Fetch the signed-in user's profile
    pub async fn user_profile(&self, token: &str) -> Result<UserProfile, BackendError> {
        let response = self
            .client
            .get(self.url("/user/profile"))
            .bearer_auth(token)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    /// Add credits to the signed-in user's account, returning the new balance
    pub async fn add_credits(&self, token: &str, amount: f64) -> Result<f64, BackendError> {
        #[derive(Serialize)]
        struct AddCredits {
            amount: f64,
        }

        #[derive(Deserialize)]
        struct CreditsResponse {
            credits: f64,
        }

        let response = self
            .client
            .post(self.url("/user/add-credits"))
            .bearer_auth(token)
            .json(&AddCredits { amount })
            .send()
            .await?;

        let body: CreditsResponse = check_status(response).await?.json().await?;
        Ok(body.credits)
    }
}

fn to_form(fields: Vec<(&'static str, String)>) -> Form {
    fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value))
}

/// Turn a non-success response into `BackendError::Status`
async fn check_status(response: Response) -> Result<Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status,
        body: describe_error_body(&body),
    })
}

#[async_trait]
impl Backend for HttpBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn train_stream(
        &self,
        request: &TrainRequest,
    ) -> Result<Box<dyn ChunkSource>, BackendError> {
        debug!(
            method = %request.training_method,
            model = %request.model_name,
            dataset = %request.dataset_name,
            "Submitting training request"
        );

        let response = self
            .client
            .post(self.url("/train/stream"))
            .multipart(to_form(request.form_fields()))
            .send()
            .await?;

        Ok(Box::new(ResponseChunks::new(check_status(response).await?)))
    }

    async fn predict(&self, request: &PredictRequest) -> Result<PredictOutcome, BackendError> {
        let response = self
            .client
            .post(self.url("/predict"))
            .multipart(to_form(request.form_fields()))
            .send()
            .await?;

        // The backend reports prediction failures as `{error}` bodies, sometimes with a 4xx
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn queue_status(&self) -> Result<QueueStatus, BackendError> {
        let response = self.client.get(self.url("/queue-status")).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

/// Chunk reader over a streaming response body
pub struct ResponseChunks {
    response: Response,
}

impl ResponseChunks {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkSource for ResponseChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.response.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_creation_trims_trailing_slash() {
        let config = ConsoleConfig {
            backend_url: "http://localhost:8000/".to_string(),
            ..Default::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(backend.url("/predict"), "http://localhost:8000/predict");
    }
}
