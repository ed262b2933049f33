//! Ingestion of the streamed training output
//!
//! Chunks flow through [`LineFramer`] → [`classify`] → [`LossTracker`] and
//! land in the log/results buffers of an [`ActiveRun`]. Everything runs
//! synchronously per chunk, so samples and rows keep stream order.

mod classify;
mod framer;
mod loss;

pub use classify::{classify, is_results_payload, Event, COMPLETION_MARKER, EVENT_PREFIX};
pub use framer::LineFramer;
pub use loss::{extract_loss, LossSample, LossTracker, LOSS_UPPER_BOUND};

use crate::backend::TrainingMethod;
use crate::results::{parse_results, ClassLabelTable, ParsedResults};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Whether ingestion should keep reading the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Something derived from one event line
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Log(String),
    Result(String),
    Loss(LossSample),
    Complete(String),
}

/// Output of feeding one chunk
#[derive(Debug)]
pub struct Feed {
    pub items: Vec<Ingested>,
    pub flow: Flow,
}

/// Frames, classifies and extracts one stream
#[derive(Debug)]
pub struct Ingestor {
    framer: LineFramer,
    logs: String,
    results: String,
    loss: LossTracker,
    stopped: bool,
}

impl Ingestor {
    pub fn new(started_at: Instant) -> Self {
        Self {
            framer: LineFramer::new(),
            logs: String::new(),
            results: String::new(),
            loss: LossTracker::new(started_at),
            stopped: false,
        }
    }

    /// Process one chunk. Once the completion marker is seen, the rest of
    /// that chunk and every later chunk are ignored.
    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> Feed {
        let mut items = Vec::new();
        if self.stopped {
            return Feed {
                items,
                flow: Flow::Stop,
            };
        }

        for line in self.framer.push(chunk) {
            let Some(event) = classify(&line) else {
                continue;
            };

            match event {
                Event::Complete(payload) => {
                    push_line(&mut self.logs, payload);
                    items.push(Ingested::Complete(payload.to_string()));
                    self.stopped = true;
                    break;
                }
                Event::Results(payload) => {
                    push_line(&mut self.results, payload);
                    items.push(Ingested::Result(payload.to_string()));
                }
                Event::Log(payload) => {
                    push_line(&mut self.logs, payload);
                    items.push(Ingested::Log(payload.to_string()));
                }
            }

            if let Some(sample) = self.loss.observe(event.payload(), now) {
                items.push(Ingested::Loss(sample));
            }
        }

        let flow = if self.stopped { Flow::Stop } else { Flow::Continue };
        Feed { items, flow }
    }

    /// Whether the completion marker has been seen
    pub fn is_complete(&self) -> bool {
        self.stopped
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }

    pub fn results(&self) -> &str {
        &self.results
    }

    pub fn loss_samples(&self) -> &[LossSample] {
        self.loss.samples()
    }
}

fn push_line(buffer: &mut String, payload: &str) {
    buffer.push_str(payload);
    buffer.push('\n');
}

/// Loss series of one run, filed under the method that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingRunRecord {
    pub method: TrainingMethod,
    pub loss_series: Vec<LossSample>,
}

/// A run in flight. Created at submission and consumed exactly once by
/// [`ActiveRun::finish`] or [`ActiveRun::fail`].
#[derive(Debug)]
pub struct ActiveRun {
    method: TrainingMethod,
    dataset_name: String,
    started_at: Instant,
    ingestor: Ingestor,
}

impl ActiveRun {
    pub fn start(method: TrainingMethod, dataset_name: impl Into<String>, now: Instant) -> Self {
        let dataset_name = dataset_name.into();
        info!(method = %method, dataset = %dataset_name, "Run started");
        Self {
            method,
            dataset_name,
            started_at: now,
            ingestor: Ingestor::new(now),
        }
    }

    pub fn method(&self) -> TrainingMethod {
        self.method
    }

    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> Feed {
        self.ingestor.feed(chunk, now)
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// The stream ended, with or without the completion marker
    pub fn finish(mut self) -> RunOutcome {
        if let Some(rest) = self.ingestor.framer.finish() {
            debug!(bytes = rest.len(), "Dropping unterminated final line");
        }
        let completed = self.ingestor.is_complete();
        if !completed {
            warn!(method = %self.method, "Stream ended without completion marker");
        }
        self.into_outcome(completed, None)
    }

    /// The transport failed. Logs are replaced by `message`; results and
    /// loss samples gathered so far are kept.
    pub fn fail(mut self, message: impl Into<String>) -> RunOutcome {
        let message = message.into();
        warn!(method = %self.method, error = %message, "Run failed");
        self.ingestor.logs = message.clone();
        self.into_outcome(false, Some(message))
    }

    fn into_outcome(self, completed: bool, error: Option<String>) -> RunOutcome {
        let Ingestor {
            logs,
            results,
            loss,
            ..
        } = self.ingestor;

        let outcome = RunOutcome {
            record: TrainingRunRecord {
                method: self.method,
                loss_series: loss.into_samples(),
            },
            dataset_name: self.dataset_name,
            logs,
            results,
            completed,
            error,
            duration_secs: self.started_at.elapsed().as_secs_f64(),
        };

        info!(
            method = %outcome.record.method,
            samples = outcome.record.loss_series.len(),
            completed = outcome.completed,
            "Run finished"
        );
        outcome
    }
}

/// Everything kept from a finished run, handed to read-only rendering
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub record: TrainingRunRecord,
    pub dataset_name: String,
    pub logs: String,
    pub results: String,
    pub completed: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl RunOutcome {
    /// Comparison table, custom sample and summary scraped from the results text
    pub fn parsed_results(&self, labels: &ClassLabelTable) -> ParsedResults {
        parse_results(&self.results, labels.labels_for(&self.dataset_name))
    }
}
