//! Training session: submits runs, drives ingestion, files results per method

use crate::backend::{
    Backend, BackendError, ChunkSource, PredictOutcome, PredictRequest, TrainRequest, TrainingMethod,
};
use crate::ingest::{ActiveRun, Flow, Ingested, RunOutcome, TrainingRunRecord};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors from session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("A training run is already in progress")]
    RunInProgress,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Finished runs, at most one per training method
#[derive(Default)]
pub struct RunHistory {
    by_method: DashMap<TrainingMethod, Arc<RunOutcome>>,
    latest: RwLock<Option<Arc<RunOutcome>>>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a finished run under its method, replacing that method's previous run
    pub async fn file(&self, outcome: RunOutcome) -> Arc<RunOutcome> {
        let outcome = Arc::new(outcome);
        self.by_method
            .insert(outcome.record.method, Arc::clone(&outcome));
        *self.latest.write().await = Some(Arc::clone(&outcome));
        outcome
    }

    /// Loss series of the last run with `method`
    pub fn record(&self, method: TrainingMethod) -> Option<TrainingRunRecord> {
        self.by_method.get(&method).map(|o| o.record.clone())
    }

    pub fn outcome(&self, method: TrainingMethod) -> Option<Arc<RunOutcome>> {
        self.by_method.get(&method).map(|o| Arc::clone(&o))
    }

    /// Most recently filed run of either method
    pub async fn latest(&self) -> Option<Arc<RunOutcome>> {
        self.latest.read().await.clone()
    }
}

/// Clears the in-flight flag when the run ends, however it ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A submitted run, holding the in-flight slot until consumed
pub struct Submission {
    run: ActiveRun,
    stream: Result<Box<dyn ChunkSource>, String>,
    history: Arc<RunHistory>,
    base_url: String,
    _guard: InFlightGuard,
}

impl Submission {
    pub fn method(&self) -> TrainingMethod {
        self.run.method()
    }

    /// Consume the stream to the end and file the run under its method.
    ///
    /// `on_item` sees every log line, result line and loss sample as it
    /// arrives. A transport failure files the run with its partial data and
    /// `error` set.
    pub async fn consume<F>(self, mut on_item: F) -> Arc<RunOutcome>
    where
        F: FnMut(&Ingested) + Send,
    {
        let Submission {
            mut run,
            stream,
            history,
            base_url,
            _guard,
        } = self;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(message) => return history.file(run.fail(message)).await,
        };

        let outcome = loop {
            match stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    let feed = run.feed(&chunk, Instant::now());
                    for item in &feed.items {
                        on_item(item);
                    }
                    if feed.flow == Flow::Stop {
                        debug!("Completion marker received, closing stream");
                        break run.finish();
                    }
                }
                Ok(None) => break run.finish(),
                Err(e) => break run.fail(connection_error(&e, &base_url)),
            }
        };

        history.file(outcome).await
    }
}

/// Drives training runs against one backend
pub struct TrainingSession {
    backend: Arc<dyn Backend>,
    history: Arc<RunHistory>,
    in_flight: Arc<AtomicBool>,
}

impl TrainingSession {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            history: Arc::new(RunHistory::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn history(&self) -> &Arc<RunHistory> {
        &self.history
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Whether a run is currently streaming
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Validate, claim the in-flight slot and open the training stream.
    ///
    /// Rejected submissions (validation, non-success HTTP status, another
    /// run in flight) return `Err` and leave the slot free. A connection
    /// failure still yields a `Submission`, which files the failed run when
    /// consumed.
    pub async fn submit(&self, request: &TrainRequest) -> Result<Submission, SessionError> {
        validate_train_request(request)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::RunInProgress);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        info!(
            method = %request.training_method,
            model = %request.model_name,
            dataset = %request.dataset_name,
            "Submitting training run"
        );
        let run = ActiveRun::start(
            request.training_method,
            request.dataset_name.clone(),
            Instant::now(),
        );

        let stream = match self.backend.train_stream(request).await {
            Ok(stream) => Ok(stream),
            Err(e @ BackendError::Status { .. }) => {
                warn!(error = %e, "Training submission rejected");
                return Err(e.into());
            }
            Err(e) => Err(connection_error(&e, self.backend.base_url())),
        };

        Ok(Submission {
            run,
            stream,
            history: Arc::clone(&self.history),
            base_url: self.backend.base_url().to_string(),
            _guard: guard,
        })
    }

    /// Submit a run and consume its stream to the end
    pub async fn run<F>(
        &self,
        request: &TrainRequest,
        on_item: F,
    ) -> Result<Arc<RunOutcome>, SessionError>
    where
        F: FnMut(&Ingested) + Send,
    {
        let submission = self.submit(request).await?;
        Ok(submission.consume(on_item).await)
    }

    /// Run inference with the model of a finished run
    pub async fn predict(&self, request: &PredictRequest) -> Result<PredictOutcome, SessionError> {
        if request.training_method == TrainingMethod::Primary {
            return Err(SessionError::Validation(
                "Prediction is not supported for dwl runs: the backend keeps no trained weights"
                    .to_string(),
            ));
        }
        if request.user_input.trim().is_empty() {
            return Err(SessionError::Validation("Input text is empty".to_string()));
        }

        info!(model = %request.model_name, dataset = %request.dataset_name, "Requesting prediction");
        Ok(self.backend.predict(request).await?)
    }
}

fn connection_error(error: &BackendError, base_url: &str) -> String {
    format!(
        "Error connecting to backend: {}\n\nPlease make sure the backend server is running at {}",
        error, base_url
    )
}

/// Checks made before anything is sent to the backend
pub fn validate_train_request(request: &TrainRequest) -> Result<(), SessionError> {
    if !request.pretrained {
        return Err(SessionError::Validation(
            "Currently only supports pretrain.".to_string(),
        ));
    }
    if request.model_name.trim().is_empty() {
        return Err(SessionError::Validation("Select a model".to_string()));
    }
    if request.dataset_name.trim().is_empty() {
        return Err(SessionError::Validation("Select a dataset".to_string()));
    }
    if !(request.learning_rate.is_finite() && request.learning_rate > 0.0) {
        return Err(SessionError::Validation(
            "Learning rate must be a positive number".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::QueueStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Chunk source replaying a script, optionally waiting on a gate first
    pub(crate) struct ScriptedChunks {
        pub chunks: VecDeque<Result<Vec<u8>, String>>,
        pub gate: Option<oneshot::Receiver<()>>,
    }

    #[async_trait]
    impl ChunkSource for ScriptedChunks {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BackendError> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => Ok(Some(chunk)),
                Some(Err(e)) => Err(BackendError::BackendError(e)),
                None => Ok(None),
            }
        }
    }

    /// Backend that serves one scripted stream per submission
    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub streams: Mutex<VecDeque<Result<ScriptedChunks, BackendError>>>,
        pub queue: Mutex<Option<QueueStatus>>,
        pub submitted: Mutex<Vec<TrainRequest>>,
    }

    impl MockBackend {
        pub fn with_stream(self, chunks: &[&str]) -> Self {
            self.push_stream(chunks, None);
            self
        }

        pub fn push_stream(&self, chunks: &[&str], gate: Option<oneshot::Receiver<()>>) {
            let chunks = chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
            self.streams
                .lock()
                .unwrap()
                .push_back(Ok(ScriptedChunks { chunks, gate }));
        }

        pub fn push_script(&self, chunks: Vec<Result<Vec<u8>, String>>) {
            self.streams.lock().unwrap().push_back(Ok(ScriptedChunks {
                chunks: chunks.into(),
                gate: None,
            }));
        }

        pub fn push_error(&self, error: BackendError) {
            self.streams.lock().unwrap().push_back(Err(error));
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn base_url(&self) -> &str {
            "http://mock.local"
        }

        async fn train_stream(
            &self,
            request: &TrainRequest,
        ) -> Result<Box<dyn ChunkSource>, BackendError> {
            self.submitted.lock().unwrap().push(request.clone());
            let next = self.streams.lock().unwrap().pop_front();
            match next {
                Some(Ok(stream)) => Ok(Box::new(stream)),
                Some(Err(e)) => Err(e),
                None => Err(BackendError::BackendError("no stream scripted".to_string())),
            }
        }

        async fn predict(&self, request: &PredictRequest) -> Result<PredictOutcome, BackendError> {
            Ok(PredictOutcome::Class {
                prediction: serde_json::json!(request.user_input.len() % 4),
                note: None,
            })
        }

        async fn queue_status(&self) -> Result<QueueStatus, BackendError> {
            self.queue
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| BackendError::BackendError("queue unavailable".to_string()))
        }
    }

    fn request(method: TrainingMethod) -> TrainRequest {
        TrainRequest::new(method, "distilbert-base-uncased", "ag_news")
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let backend = MockBackend::default().with_stream(&[
            "data: training loss: 1.0\nda",
            "ta: training loss: 0.5\ndata: Training complete\ndata: training loss: 0.1\n",
        ]);
        let session = TrainingSession::new(Arc::new(backend));

        let mut seen = Vec::new();
        let outcome = session
            .run(&request(TrainingMethod::Baseline), |item| seen.push(item.clone()))
            .await
            .unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.record.loss_series.len(), 2);
        assert!(matches!(seen.last(), Some(Ingested::Complete(_))));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_runs_are_isolated_per_method() {
        let backend = MockBackend::default()
            .with_stream(&["data: train_loss: 0.9\ndata: train_loss: 0.8\ndata: train_loss: 0.7\n"])
            .with_stream(&["data: avg_loss: 0.3\ndata: Training complete\n"]);
        let session = TrainingSession::new(Arc::new(backend));

        session.run(&request(TrainingMethod::Primary), |_| {}).await.unwrap();
        session.run(&request(TrainingMethod::Baseline), |_| {}).await.unwrap();

        let history = session.history();
        let primary = history.record(TrainingMethod::Primary).unwrap();
        let baseline = history.record(TrainingMethod::Baseline).unwrap();
        assert_eq!(primary.loss_series.len(), 3);
        assert_eq!(baseline.loss_series.len(), 1);
        assert_eq!(baseline.loss_series[0].value, 0.3);
        assert_eq!(
            history.latest().await.unwrap().record.method,
            TrainingMethod::Baseline
        );
    }

    #[tokio::test]
    async fn test_rerun_replaces_only_its_method() {
        let backend = MockBackend::default()
            .with_stream(&["data: train_loss: 0.9\n"])
            .with_stream(&["data: train_loss: 0.4\ndata: train_loss: 0.2\n"])
            .with_stream(&["data: train_loss: 0.6\n"]);
        let session = TrainingSession::new(Arc::new(backend));

        session.run(&request(TrainingMethod::Primary), |_| {}).await.unwrap();
        session.run(&request(TrainingMethod::Baseline), |_| {}).await.unwrap();
        session.run(&request(TrainingMethod::Primary), |_| {}).await.unwrap();

        let history = session.history();
        let primary = history.record(TrainingMethod::Primary).unwrap();
        assert_eq!(primary.loss_series.len(), 1);
        assert_eq!(primary.loss_series[0].value, 0.6);
        assert_eq!(history.record(TrainingMethod::Baseline).unwrap().loss_series.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_partial_series() {
        let backend = MockBackend::default();
        backend.push_script(vec![
            Ok(b"data: training loss: 0.8\n".to_vec()),
            Err("connection reset".to_string()),
        ]);
        let session = TrainingSession::new(Arc::new(backend));

        let outcome = session
            .run(&request(TrainingMethod::Baseline), |_| {})
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.record.loss_series.len(), 1);
        assert!(outcome.logs.starts_with("Error connecting to backend:"));
        assert!(outcome.logs.contains("http://mock.local"));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_status_error_is_surfaced() {
        let backend = MockBackend::default();
        backend.push_error(BackendError::Status {
            status: 402,
            body: "{\n  \"error\": \"Insufficient credits\"\n}".to_string(),
        });
        let session = TrainingSession::new(Arc::new(backend));

        let err = session
            .run(&request(TrainingMethod::Primary), |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient credits"));
        assert!(session.history().latest().await.is_none());
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_validation_happens_before_submission() {
        let backend = Arc::new(MockBackend::default());
        let session = TrainingSession::new(backend.clone());

        let err = session
            .run(&request(TrainingMethod::Primary).with_pretrained(false), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(ref m) if m == "Currently only supports pretrain."));

        let err = session
            .run(&TrainRequest::new(TrainingMethod::Primary, "bert-base-uncased", ""), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert!(backend.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_one_run_in_flight() {
        let backend = Arc::new(MockBackend::default());
        let (release, gate) = oneshot::channel();
        backend.push_stream(&["data: Training complete\n"], Some(gate));
        let session = Arc::new(TrainingSession::new(backend.clone()));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .run(&request(TrainingMethod::Primary), |_| {})
                    .await
                    .map(|o| o.completed)
            })
        };

        while !session.is_running() {
            tokio::task::yield_now().await;
        }

        let second = session.run(&request(TrainingMethod::Baseline), |_| {}).await;
        assert!(matches!(second, Err(SessionError::RunInProgress)));

        release.send(()).unwrap();
        assert!(first.await.unwrap().unwrap());
        assert!(!session.is_running());
        assert_eq!(backend.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submission_holds_slot_until_consumed() {
        let backend = MockBackend::default()
            .with_stream(&["data: train_loss: 0.5\ndata: Training complete\n"]);
        let session = TrainingSession::new(Arc::new(backend));

        let submission = session.submit(&request(TrainingMethod::Primary)).await.unwrap();
        assert_eq!(submission.method(), TrainingMethod::Primary);
        assert!(session.is_running());
        assert!(matches!(
            session.submit(&request(TrainingMethod::Baseline)).await,
            Err(SessionError::RunInProgress)
        ));

        let outcome = submission.consume(|_| {}).await;
        assert!(outcome.completed);
        assert!(!session.is_running());
        assert!(session.history().record(TrainingMethod::Primary).is_some());
    }

    #[tokio::test]
    async fn test_connection_failure_at_submission_is_filed() {
        let backend = MockBackend::default();
        backend.push_error(BackendError::BackendError("connection refused".to_string()));
        let session = TrainingSession::new(Arc::new(backend));

        let outcome = session
            .run(&request(TrainingMethod::Baseline), |_| {})
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert!(outcome.logs.contains("connection refused"));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_predict_refuses_primary_runs() {
        let session = TrainingSession::new(Arc::new(MockBackend::default()));
        let mut request = PredictRequest {
            model_name: "bert-base-uncased".to_string(),
            dataset_name: "ag_news".to_string(),
            training_method: TrainingMethod::Primary,
            user_input: "Markets fall".to_string(),
        };
        assert!(matches!(
            session.predict(&request).await,
            Err(SessionError::Validation(_))
        ));

        request.training_method = TrainingMethod::Baseline;
        let outcome = session.predict(&request).await.unwrap();
        assert_eq!(outcome.class_index(), Some("Markets fall".len() % 4));
    }
}
