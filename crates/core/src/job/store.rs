//! Job storage trait and request/filter types.

use std::fmt;

use chrono::Duration;

use super::{Claim, Job, JobError, JobParams, JobStatus, SlideTask, StageResult, TaskStatus};

/// Error type for job store operations.
#[derive(Debug)]
pub enum JobStoreError {
    /// Job or task not found.
    NotFound(String),
    /// A conditional write lost its race: the expected status did not match,
    /// another worker holds an unexpired claim, the caller's claim token is
    /// stale, or the job is already terminal. Callers must abort the current
    /// attempt and apply no further side effects.
    Conflict { job_id: String, reason: String },
    /// Database error.
    Database(String),
}

impl fmt::Display for JobStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStoreError::NotFound(id) => write!(f, "job not found: {}", id),
            JobStoreError::Conflict { job_id, reason } => {
                write!(f, "concurrency conflict on job {}: {}", job_id, reason)
            }
            JobStoreError::Database(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl std::error::Error for JobStoreError {}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub topic: String,
    pub slide_count: u32,
    pub params: JobParams,
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by status string (as stored).
    pub status: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// A partial update applied under a claim.
///
/// `progress_percent` is clamped by the store so it never decreases; all other
/// fields overwrite when set.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress_percent: Option<u8>,
    /// Stage success marker to record.
    pub stage_result: Option<StageResult>,
    /// Stage whose attempt counter should be incremented.
    pub bump_attempt: Option<super::Stage>,
    pub error: Option<JobError>,
    pub artifact_uri: Option<String>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress_percent = Some(percent);
        self
    }

    pub fn with_stage_result(mut self, result: StageResult) -> Self {
        self.stage_result = Some(result);
        self
    }

    pub fn bumping_attempt(mut self, stage: super::Stage) -> Self {
        self.bump_attempt = Some(stage);
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_artifact(mut self, uri: impl Into<String>) -> Self {
        self.artifact_uri = Some(uri.into());
        self
    }
}

/// Trait for job storage backends.
///
/// The conditional `claim`/`update` pair is the sole mechanism preventing
/// double-processing: a worker may only mutate a job while holding a valid,
/// unexpired claim.
pub trait JobStore: Send + Sync {
    /// Create a new job in `pending` status.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Atomically claim a job for exclusive processing.
    ///
    /// Succeeds only when the current status equals `expected_status` and no
    /// unexpired claim exists; otherwise fails with `Conflict`.
    fn claim(
        &self,
        id: &str,
        expected_status: JobStatus,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<Claim, JobStoreError>;

    /// Apply a patch to a claimed job.
    ///
    /// Fails with `Conflict` when the claim token no longer matches (claim
    /// expired and was taken over) or the job is already terminal. When the
    /// patch moves the job to a terminal status the claim is released.
    fn update(&self, id: &str, patch: JobPatch, claim: &Claim) -> Result<Job, JobStoreError>;

    /// Release a claim without changing job state (e.g. before a nack).
    fn release(&self, id: &str, claim: &Claim) -> Result<(), JobStoreError>;

    /// Set the cancellation flag. Allowed without a claim; the orchestrator
    /// observes the flag at stage boundaries. Fails with `Conflict` on
    /// terminal jobs.
    fn request_cancel(&self, id: &str) -> Result<Job, JobStoreError>;

    /// Create one pending task per slide. Idempotent: existing tasks for the
    /// same (job, slide index) are left untouched.
    fn create_tasks(&self, job_id: &str, slide_count: u32) -> Result<Vec<SlideTask>, JobStoreError>;

    /// Update one task's status and bookkeeping fields.
    fn update_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result_ref: Option<String>,
        last_error: Option<String>,
    ) -> Result<SlideTask, JobStoreError>;

    /// List a job's tasks ordered by slide index.
    fn list_tasks(&self, job_id: &str) -> Result<Vec<SlideTask>, JobStoreError>;
}
