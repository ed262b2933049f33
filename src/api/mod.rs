//! REST API over a training session

use crate::backend::{BackendError, TrainRequest, TrainingMethod};
use crate::ingest::{Ingested, LossSample, TrainingRunRecord};
use crate::queue::{QueueMonitor, QueueSnapshot};
use crate::results::{ClassLabelTable, ParsedResults};
use crate::session::{SessionError, TrainingSession};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// API state
pub struct ApiState {
    pub session: Arc<TrainingSession>,
    pub queue: Arc<QueueMonitor>,
    pub labels: ClassLabelTable,
    live: Mutex<LiveRun>,
}

impl ApiState {
    pub fn new(
        session: Arc<TrainingSession>,
        queue: Arc<QueueMonitor>,
        labels: ClassLabelTable,
    ) -> Self {
        Self {
            session,
            queue,
            labels,
            live: Mutex::new(LiveRun::default()),
        }
    }
}

/// Output of the run currently streaming
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveRun {
    pub training_method: Option<TrainingMethod>,
    pub logs: String,
    pub results: String,
    pub loss_series: Vec<LossSample>,
}

impl LiveRun {
    fn apply(&mut self, item: &Ingested) {
        match item {
            Ingested::Log(line) | Ingested::Complete(line) => {
                self.logs.push_str(line);
                self.logs.push('\n');
            }
            Ingested::Result(line) => {
                self.results.push_str(line);
                self.results.push('\n');
            }
            Ingested::Loss(sample) => self.loss_series.push(*sample),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend_url: String,
    pub training: bool,
}

/// Reply to an accepted training submission
#[derive(Debug, Serialize)]
pub struct TrainAccepted {
    pub accepted: bool,
    pub training_method: TrainingMethod,
}

/// Summary of the stored run of one method
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub training_method: TrainingMethod,
    pub dataset_name: String,
    pub samples: usize,
    pub completed: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub training: bool,
    pub latest: Option<TrainingMethod>,
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: String,
    pub results: String,
}

type ApiError = (StatusCode, String);

/// Create the API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/queue", get(queue_status))
        .route("/train", post(start_training))
        .route("/runs", get(list_runs))
        .route("/runs/live", get(live_run))
        .route("/runs/latest/logs", get(latest_logs))
        .route("/runs/latest/results", get(latest_results))
        .route("/runs/:method", get(run_record))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend_url: state.session.backend().base_url().to_string(),
        training: state.session.is_running(),
    })
}

async fn queue_status(State(state): State<Arc<ApiState>>) -> Json<QueueSnapshot> {
    Json(state.queue.snapshot().await)
}

/// Submit a run and consume its stream in the background; progress is visible at `/runs/live`
async fn start_training(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TrainRequest>,
) -> Result<(StatusCode, Json<TrainAccepted>), ApiError> {
    let submission = state
        .session
        .submit(&request)
        .await
        .map_err(submission_error)?;
    let method = submission.method();

    if let Ok(mut live) = state.live.lock() {
        *live = LiveRun {
            training_method: Some(method),
            ..Default::default()
        };
    }

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let live = &task_state.live;
        let outcome = submission
            .consume(|item| {
                if let Ok(mut live) = live.lock() {
                    live.apply(item);
                }
            })
            .await;

        match &outcome.error {
            None => info!(
                method = %outcome.record.method,
                completed = outcome.completed,
                "Background run finished"
            ),
            Some(e) => warn!(method = %outcome.record.method, error = %e, "Background run failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TrainAccepted {
            accepted: true,
            training_method: method,
        }),
    ))
}

/// Rejections carry the backend's own status and error payload when it gave one
fn submission_error(error: SessionError) -> ApiError {
    match error {
        SessionError::Validation(message) => (StatusCode::BAD_REQUEST, message),
        SessionError::RunInProgress => (StatusCode::CONFLICT, error.to_string()),
        SessionError::Backend(BackendError::Status { status, body }) => {
            let code = StatusCode::from_u16(status)
                .ok()
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (code, body)
        }
        SessionError::Backend(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

async fn list_runs(State(state): State<Arc<ApiState>>) -> Json<RunsResponse> {
    let history = state.session.history();
    let runs = TrainingMethod::ALL
        .iter()
        .filter_map(|&method| history.outcome(method))
        .map(|o| RunSummary {
            training_method: o.record.method,
            dataset_name: o.dataset_name.clone(),
            samples: o.record.loss_series.len(),
            completed: o.completed,
            error: o.error.clone(),
            duration_secs: o.duration_secs,
        })
        .collect();

    Json(RunsResponse {
        training: state.session.is_running(),
        latest: history.latest().await.map(|o| o.record.method),
        runs,
    })
}

async fn live_run(State(state): State<Arc<ApiState>>) -> Result<Json<LiveRun>, ApiError> {
    state
        .live
        .lock()
        .map(|live| Json(live.clone()))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn run_record(
    State(state): State<Arc<ApiState>>,
    Path(method): Path<String>,
) -> Result<Json<TrainingRunRecord>, ApiError> {
    let method: TrainingMethod = method
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;

    state
        .session
        .history()
        .record(method)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No {} run yet", method)))
}

async fn latest_logs(State(state): State<Arc<ApiState>>) -> Result<Json<LogsResponse>, ApiError> {
    let outcome = state
        .session
        .history()
        .latest()
        .await
        .ok_or_else(no_runs)?;

    Ok(Json(LogsResponse {
        logs: outcome.logs.clone(),
        results: outcome.results.clone(),
    }))
}

async fn latest_results(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ParsedResults>, ApiError> {
    let outcome = state
        .session
        .history()
        .latest()
        .await
        .ok_or_else(no_runs)?;

    Ok(Json(outcome.parsed_results(&state.labels)))
}

fn no_runs() -> ApiError {
    (StatusCode::NOT_FOUND, "No finished runs yet".to_string())
}
