//! Eury Console - streaming client for a remote model-training backend
//!
//! This crate provides:
//! - An HTTP client for the training backend (streamed training, inference, queue status, credits)
//! - Incremental ingestion of the server-sent training stream into logs, results and loss series
//! - Scraping of comparison tables and accuracy summaries out of the backend's results text
//! - A small REST API and a CLI on top of the same session logic

pub mod api;
pub mod backend;
pub mod ingest;
pub mod queue;
pub mod results;
pub mod session;

pub use backend::{Backend, BackendError, HttpBackend, TrainRequest, TrainingMethod};
pub use ingest::{ActiveRun, Ingestor, LossSample, RunOutcome, TrainingRunRecord};
pub use queue::QueueMonitor;
pub use results::{parse_results, ClassLabelTable, ParsedResults};
pub use session::{RunHistory, Submission, TrainingSession};

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors from loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for the console, built once at startup and passed to the backend client
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConsoleConfig {
    /// Base URL of the training backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Connect timeout for backend requests (secs). Streams themselves never time out.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How often the queue status is polled (secs)
    #[serde(default = "default_queue_poll_secs")]
    pub queue_poll_secs: u64,

    /// Address the API server listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Default training parameters
    #[serde(default)]
    pub defaults: TrainingParams,

    /// Extra or replacement class names per dataset
    #[serde(default)]
    pub labels: HashMap<String, Vec<String>>,
}

fn default_backend_url() -> String { "http://localhost:8000".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_queue_poll_secs() -> u64 { 5 }
fn default_listen_addr() -> String { "0.0.0.0:8080".to_string() }

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            queue_poll_secs: default_queue_poll_secs(),
            listen_addr: default_listen_addr(),
            defaults: TrainingParams::default(),
            labels: HashMap::new(),
        }
    }
}

impl ConsoleConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Built-in class names merged with the `[labels]` table
    pub fn label_table(&self) -> ClassLabelTable {
        ClassLabelTable::builtin().with_overrides(&self.labels)
    }

    /// Apply `EURY_BACKEND_URL` if set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("EURY_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend_url = url;
            }
        }
        self
    }
}

/// Default hyperparameters offered for a training run
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TrainingParams {
    pub learning_rate: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.00002,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config = ConsoleConfig::from_toml("").unwrap();
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert_eq!(config.queue_poll_secs, 5);
        assert_eq!(config.defaults, TrainingParams::default());
    }

    #[test]
    fn test_config_partial_override() {
        let config = ConsoleConfig::from_toml(
            r#"
backend_url = "https://trainer.example.net"

[defaults]
learning_rate = 0.001
"#,
        )
        .unwrap();
        assert_eq!(config.backend_url, "https://trainer.example.net");
        assert_eq!(config.defaults.learning_rate, 0.001);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_config_label_overrides() {
        let config = ConsoleConfig::from_toml(
            r#"
[labels]
sst2 = ["negative", "positive"]
"#,
        )
        .unwrap();
        let table = config.label_table();
        assert_eq!(table.resolve("sst2", "1"), "positive");
        assert_eq!(table.resolve("ag_news", "1"), "Sports");
    }

    #[test]
    fn test_config_rejects_bad_toml() {
        assert!(matches!(
            ConsoleConfig::from_toml("backend_url = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
