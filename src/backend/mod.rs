//! Training backend abstraction and request/response types

mod http;

pub use http::{HttpBackend, ResponseChunks};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when talking to the training backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend returned error: {0}")]
    BackendError(String),
}

/// One of the two training strategies the backend can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingMethod {
    /// Accelerated training ("dwl" on the wire)
    #[serde(rename = "dwl")]
    Primary,
    /// Conventional fine-tuning ("traditional" on the wire)
    #[serde(rename = "traditional")]
    Baseline,
}

impl TrainingMethod {
    pub const ALL: [TrainingMethod; 2] = [TrainingMethod::Primary, TrainingMethod::Baseline];

    /// Form value sent to the backend
    pub fn as_wire(&self) -> &'static str {
        match self {
            TrainingMethod::Primary => "dwl",
            TrainingMethod::Baseline => "traditional",
        }
    }
}

impl fmt::Display for TrainingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for TrainingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dwl" | "primary" => Ok(TrainingMethod::Primary),
            "traditional" | "baseline" => Ok(TrainingMethod::Baseline),
            other => Err(format!("unknown training method: {}", other)),
        }
    }
}

/// A user-supplied sample appended to the backend's test set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSample {
    pub text: String,
    /// Class index of the sample
    pub label: u32,
}

/// Request to start a streamed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRequest {
    pub training_method: TrainingMethod,
    pub model_name: String,
    pub dataset_name: String,
    pub learning_rate: f64,
    #[serde(default = "default_pretrained")]
    pub pretrained: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_sample: Option<CustomSample>,
}

fn default_pretrained() -> bool { true }

impl TrainRequest {
    pub fn new(
        training_method: TrainingMethod,
        model_name: impl Into<String>,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            training_method,
            model_name: model_name.into(),
            dataset_name: dataset_name.into(),
            learning_rate: crate::TrainingParams::default().learning_rate,
            pretrained: true,
            custom_sample: None,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_pretrained(mut self, pretrained: bool) -> Self {
        self.pretrained = pretrained;
        self
    }

    pub fn with_custom_sample(mut self, text: impl Into<String>, label: u32) -> Self {
        self.custom_sample = Some(CustomSample {
            text: text.into(),
            label,
        });
        self
    }

    /// Form fields in the order the backend's form expects them
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("training_method", self.training_method.as_wire().to_string()),
            ("model_name", self.model_name.clone()),
            ("dataset_name", self.dataset_name.clone()),
            ("learning_rate", self.learning_rate.to_string()),
        ];
        // Checkbox semantics: the field is only present when checked
        if self.pretrained {
            fields.push(("pretrained", "on".to_string()));
        }
        if let Some(sample) = &self.custom_sample {
            fields.push(("custom_sample_text", sample.text.clone()));
            fields.push(("custom_sample_label", sample.label.to_string()));
        }
        fields
    }
}

/// Request to run inference against a trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub model_name: String,
    pub dataset_name: String,
    pub training_method: TrainingMethod,
    pub user_input: String,
}

impl PredictRequest {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("model_name", self.model_name.clone()),
            ("user_input", self.user_input.clone()),
            ("dataset_name", self.dataset_name.clone()),
            ("training_method", self.training_method.as_wire().to_string()),
        ]
    }
}

/// Response body of `/predict`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PredictOutcome {
    Error {
        error: String,
    },
    Generated {
        generated_text: String,
        #[serde(default)]
        note: Option<String>,
    },
    Class {
        prediction: serde_json::Value,
        #[serde(default)]
        note: Option<String>,
    },
}

impl PredictOutcome {
    /// Class index of a classification result, if the backend sent one
    pub fn class_index(&self) -> Option<usize> {
        match self {
            PredictOutcome::Class { prediction, .. } => match prediction {
                serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A job currently running or waiting on the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub training_method: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
}

/// Snapshot of the backend's GPU queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub gpu_available: bool,
    #[serde(default)]
    pub active_job: Option<QueuedJob>,
    #[serde(default)]
    pub queue_length: usize,
    #[serde(default)]
    pub queued_jobs: Vec<QueuedJob>,
}

/// Account details returned by `/user/profile`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub credits: f64,
}

/// Incremental reader over a response body
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of bytes, `None` at end of stream
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BackendError>;
}

/// Trait for training backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Base URL, for messages shown to the user
    fn base_url(&self) -> &str;

    /// Submit a training run and return its output stream
    async fn train_stream(
        &self,
        request: &TrainRequest,
    ) -> Result<Box<dyn ChunkSource>, BackendError>;

    /// Run inference with a trained model
    async fn predict(&self, request: &PredictRequest) -> Result<PredictOutcome, BackendError>;

    /// Fetch the current queue snapshot
    async fn queue_status(&self) -> Result<QueueStatus, BackendError>;
}

/// Render an error body: pretty JSON when it parses, raw text otherwise
pub(crate) fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    }
}
