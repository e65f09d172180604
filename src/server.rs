//! HTTP surface for triggering runs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/jobs/run-now` | Start a background run of all active sources |
//! | `GET`  | `/api/jobs/run-now/{job_id}` | State of a background run |
//! | `POST` | `/api/sources/{id}/run` | Run one source and wait for the result |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "job abc not found" } }
//! ```
//!
//! Error codes: `not_found` (404), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::ingest::{Pipeline, SourceRunResult};
use crate::jobs::{JobRegistry, JobSnapshot, JobState};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub jobs: Arc<JobRegistry>,
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/jobs/run-now", post(handle_run_now))
        .route("/api/jobs/run-now/{job_id}", get(handle_job_status))
        .route("/api/sources/{id}/run", post(handle_run_source))
        .layer(cors)
        .with_state(state)
}

/// Serve until the process is terminated.
pub async fn run_server(config: &Config, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let state = AppState {
        pipeline,
        jobs: Arc::new(JobRegistry::from_config(&config.jobs)),
    };
    let app = router(state);

    println!("pulse server listening on http://{}", config.server.bind);
    tracing::info!(bind = %config.server.bind, "server_start");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/jobs/run-now ============

#[derive(Serialize)]
struct AcceptedResponse {
    job_id: String,
    status: String,
}

/// Start a detached batch run and return at once with its job id.
async fn handle_run_now(State(state): State<AppState>) -> (StatusCode, Json<AcceptedResponse>) {
    let job_id = state.jobs.start();
    tracing::info!(job_id = %job_id, "run_now_accepted");

    let jobs = state.jobs.clone();
    let pipeline = state.pipeline.clone();
    let id = job_id.clone();
    tokio::spawn(async move {
        let final_state = match pipeline.run_all_active_sources().await {
            Ok(result) => JobState::Done { result },
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "run_now_failed");
                JobState::Failed {
                    error: format!("{:#}", e),
                }
            }
        };
        jobs.finish(&id, final_state);
    });

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            status: "accepted".to_string(),
        }),
    )
}

// ============ GET /api/jobs/run-now/{job_id} ============

async fn handle_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .jobs
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("job {} not found", job_id)))
}

// ============ POST /api/sources/{id}/run ============

async fn handle_run_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SourceRunResult>, AppError> {
    let source = state
        .pipeline
        .store()
        .get_source(id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("source {} not found", id)))?;

    Ok(Json(state.pipeline.run_source(&source).await))
}
