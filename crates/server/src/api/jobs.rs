//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use slidesmith_core::job::{
    CreateJobRequest, Job, JobError, JobFilter, JobParams, JobStatus, JobStoreError, Stage,
};

use crate::state::AppState;

/// Maximum slides per deck
const MAX_SLIDE_COUNT: u32 = 100;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    /// Deck topic
    pub topic: String,
    /// Number of slides (1..=100)
    pub slide_count: u32,
    /// Optional generation parameters
    #[serde(default)]
    pub params: JobParams,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status
    pub status: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for job operations
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub topic: String,
    pub slide_count: u32,
    pub params: JobParams,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub progress_percent: u8,
    pub steps_completed: Vec<String>,
    pub steps_remaining: Vec<String>,
    pub attempts: BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let steps_completed: Vec<String> = Stage::all()
            .iter()
            .filter(|s| job.stage_completed(**s))
            .map(|s| s.name().to_string())
            .collect();
        let steps_remaining: Vec<String> = Stage::all()
            .iter()
            .filter(|s| !job.stage_completed(**s))
            .map(|s| s.name().to_string())
            .collect();
        let current_stage = job.status.stage().map(|s| s.name().to_string());

        Self {
            id: job.id,
            topic: job.topic,
            slide_count: job.slide_count,
            params: job.params,
            status: job.status,
            current_stage,
            progress_percent: job.progress_percent,
            steps_completed,
            steps_remaining,
            attempts: job.attempts,
            error: job.error,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for a completed job's result
#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub job_id: String,
    pub artifact_uri: String,
    /// Seconds the returned artifact reference is advertised as valid.
    pub expires_in: u64,
    pub deck: serde_json::Value,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(JobErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error(e: JobStoreError) -> ApiError {
    match e {
        JobStoreError::NotFound(id) => {
            api_error(StatusCode::NOT_FOUND, format!("Job not found: {}", id))
        }
        JobStoreError::Conflict { reason, .. } => api_error(StatusCode::CONFLICT, reason),
        JobStoreError::Database(msg) => api_error(StatusCode::INTERNAL_SERVER_ERROR, msg),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new deck generation job.
///
/// Returns 202: the job is accepted and processed asynchronously.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let topic = body.topic.trim().to_string();
    if topic.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "topic must not be empty"));
    }
    if body.slide_count == 0 || body.slide_count > MAX_SLIDE_COUNT {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("slide_count must be between 1 and {}", MAX_SLIDE_COUNT),
        ));
    }

    let job = state
        .job_store()
        .create(CreateJobRequest {
            topic,
            slide_count: body.slide_count,
            params: body.params,
        })
        .map_err(store_error)?;

    slidesmith_core::metrics::JOBS_SUBMITTED.inc();

    if state.dispatcher().enqueue(&job.id).is_err() {
        tracing::error!(job_id = %job.id, "dispatcher rejected enqueue");
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "job accepted but could not be queued",
        ));
    }

    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

/// Get a job's status by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    match state.job_store().get(&id).map_err(store_error)? {
        Some(job) => Ok(Json(JobResponse::from(job))),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Job not found: {}", id),
        )),
    }
}

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(ref status) = params.status {
        filter = filter.with_status(status);
    }

    let jobs = state.job_store().list(&filter).map_err(store_error)?;
    let total = state.job_store().count(&filter).map_err(store_error)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Fetch the compiled deck for a completed job.
///
/// Returns 400 while the job has not completed; the status endpoint tells
/// callers when to come back.
pub async fn get_job_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResultResponse>, ApiError> {
    let job = match state.job_store().get(&id).map_err(store_error)? {
        Some(job) => job,
        None => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("Job not found: {}", id),
            ));
        }
    };

    if job.status != JobStatus::Completed {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("job is not completed (status: {})", job.status),
        ));
    }

    let artifact_uri = job.artifact_uri.ok_or_else(|| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "completed job has no artifact",
        )
    })?;

    let bytes = state
        .objects()
        .get(&artifact_uri)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let deck: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(JobResultResponse {
        job_id: job.id,
        artifact_uri,
        expires_in: state.config().artifacts.result_ttl_secs,
        deck,
    }))
}

/// Request cancellation of a job (DELETE endpoint).
///
/// Cancellation is cooperative: the flag is observed at stage boundaries, so
/// the job may take a moment to reach `cancelled`.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    match state.job_store().request_cancel(&id) {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job)))),
        Err(e) => Err(store_error(e)),
    }
}
