use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info};

use ritus_align::{
    BatchJob, BatchOptions, BatchOutcome, ContentStore, CorpusSource, JobController, JobRegistry,
    JobStore, MemoryContentStore,
};
use ritus_types::{Job, JobId, JobStatus, ProjectId};

const DEFAULT_THRESHOLD: f64 = 75.0;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobRegistry>,
    pub content: Arc<MemoryContentStore>,
    pub corpus: CorpusSource,
    pub options: BatchOptions,
}

impl AppState {
    pub fn new(corpus: CorpusSource, options: BatchOptions) -> Self {
        Self {
            jobs: Arc::new(JobRegistry::new()),
            content: Arc::new(MemoryContentStore::new()),
            corpus,
            options,
        }
    }
}

#[derive(Deserialize, Default)]
struct StartRequest {
    similarity_threshold: Option<f64>,
}

#[derive(Serialize)]
struct StartResponse {
    message: &'static str,
    process_id: JobId,
    status: JobStatus,
    progress: f64,
}

#[derive(Serialize)]
struct StatusResponse {
    process_id: JobId,
    status: JobStatus,
    progress: f64,
    total_rows: usize,
    processed_rows: usize,
    similarity_threshold: f64,
    error_message: Option<String>,
}

impl From<Job> for StatusResponse {
    fn from(job: Job) -> Self {
        Self {
            process_id: job.id,
            status: job.status,
            progress: job.progress,
            total_rows: job.total_units,
            processed_rows: job.processed_units,
            similarity_threshold: job.similarity_threshold,
            error_message: job.error_message,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/projects/{project_id}/batch-process",
            post(start_batch).get(batch_status).delete(cancel_batch),
        )
        .route(
            "/api/projects/{project_id}/contents",
            get(list_contents).put(replace_contents),
        )
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn start_batch(
    State(state): State<AppState>,
    Path(project_id): Path<u64>,
    body: Bytes,
) -> Result<Json<StartResponse>, ApiError> {
    let project = ProjectId(project_id);
    let request: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };
    let threshold = request.similarity_threshold.unwrap_or(DEFAULT_THRESHOLD);
    if !(1.0..=100.0).contains(&threshold) {
        return Err(ApiError::bad_request(
            "invalid similarity threshold (must be between 1 and 100)",
        ));
    }

    let job = state.jobs.start(project, threshold);
    info!(
        "starting batch {} for project {project} (threshold {threshold})",
        job.id
    );
    let worker = state.clone();
    let jobs = Arc::clone(&state.jobs);
    let job_id = job.id;
    let handle = tokio::task::spawn_blocking(move || {
        let batch = BatchJob::new(
            worker.jobs.as_ref(),
            worker.content.as_ref(),
            project,
            job_id,
        )
        .with_options(worker.options.clone());
        match batch.run(&worker.corpus) {
            Ok(BatchOutcome::Completed { records }) => {
                info!("batch {job_id} for project {project} finished with {records} records")
            }
            Ok(BatchOutcome::Canceled) => info!("batch {job_id} for project {project} stopped"),
            Err(err) => error!("batch {job_id} for project {project} failed: {err}"),
        }
    });
    tokio::spawn(async move {
        if let Err(err) = handle.await {
            error!("batch {job_id} for project {project} aborted: {err}");
            JobController::new(jobs.as_ref(), project, job_id)
                .fail(&format!("batch worker aborted: {err}"));
        }
    });

    Ok(Json(StartResponse {
        message: "Batch process started",
        process_id: job.id,
        status: job.status,
        progress: job.progress,
    }))
}

async fn batch_status(State(state): State<AppState>, Path(project_id): Path<u64>) -> Response {
    match state.jobs.snapshot(ProjectId(project_id)) {
        Some(job) => Json(StatusResponse::from(job)).into_response(),
        None => Json(json!({ "status": "none", "progress": 0 })).into_response(),
    }
}

async fn cancel_batch(
    State(state): State<AppState>,
    Path(project_id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    state
        .jobs
        .cancel(ProjectId(project_id))
        .ok_or_else(|| ApiError::NotFound("No active batch process".to_string()))?;
    Ok(Json(json!({ "message": "Batch process canceled" })))
}

async fn list_contents(State(state): State<AppState>, Path(project_id): Path<u64>) -> Json<Value> {
    let rows: Vec<Value> = state
        .content
        .rows(ProjectId(project_id))
        .into_iter()
        .map(|row| {
            let data = serde_json::from_str(&row.data).unwrap_or(Value::String(row.data));
            json!({ "id": row.id, "data": data })
        })
        .collect();
    Json(Value::Array(rows))
}

async fn replace_contents(
    State(state): State<AppState>,
    Path(project_id): Path<u64>,
    Json(rows): Json<Vec<Value>>,
) -> Result<Json<Value>, ApiError> {
    let project = ProjectId(project_id);
    if let Some(pos) = rows.iter().position(|row| !row.is_object()) {
        return Err(ApiError::bad_request(format!(
            "content row {} is not a JSON object",
            pos + 1
        )));
    }
    let count = rows.len();
    state
        .jobs
        .with_idle_project(project, || state.content.replace(project, rows))
        .ok_or_else(|| {
            ApiError::Conflict("a batch process is running for this project".to_string())
        })?;
    Ok(Json(json!({ "rows": count })))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
}

impl ApiError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        ApiError::BadRequest(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
