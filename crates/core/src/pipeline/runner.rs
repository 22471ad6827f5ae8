//! The job runner: drives one job through the stage state machine.
//!
//! A delivery is processed by claiming the job, advancing it stage by stage,
//! and releasing the claim implicitly on the terminal transition. Stage
//! results recorded in the job make redelivery idempotent: a stage whose
//! success marker is present is skipped, not re-executed.

use std::sync::Arc;

use chrono::Duration;

use crate::compiler::DeckDocument;
use crate::job::{
    Claim, Job, JobError, JobPatch, JobStatus, JobStore, JobStoreError, SlideImageRef, Stage,
    StageResult, TaskStatus,
};

use super::config::PipelineConfig;
use super::stages::{StageExecutors, StageFailure};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Another worker holds the job, the expected status changed underneath
    /// us, or our claim expired. The delivery should be retried later.
    #[error("claim lost for job {0}")]
    ClaimLost(String),

    /// A dependency was unavailable; the claim was released so the delivery
    /// can be retried.
    #[error("dependency unavailable for job {job_id} at stage {stage}: {message}")]
    DependencyUnavailable {
        job_id: String,
        stage: String,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl PipelineError {
    /// Whether re-enqueueing this delivery can make progress.
    pub fn is_redeliverable(&self) -> bool {
        match self {
            PipelineError::ClaimLost(_) | PipelineError::DependencyUnavailable { .. } => true,
            PipelineError::Store(JobStoreError::Database(_)) => true,
            PipelineError::Store(_) => false,
        }
    }
}

/// Drives claimed jobs through the pipeline.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    executors: Arc<StageExecutors>,
    config: PipelineConfig,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        executors: Arc<StageExecutors>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            executors,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Process one delivery: claim the job and advance it as far as possible.
    ///
    /// Returns `Ok(())` when the delivery is fully handled (including the job
    /// reaching `failed`); errors mean the delivery should be redelivered.
    pub async fn advance(&self, job_id: &str, worker_id: &str) -> Result<(), PipelineError> {
        let Some(job) = self.store.get(job_id)? else {
            tracing::warn!(job_id, "delivery for unknown job, dropping");
            return Ok(());
        };

        if job.status.is_terminal() {
            tracing::debug!(job_id, status = %job.status, "job already terminal, dropping delivery");
            return Ok(());
        }

        let claim = match self.store.claim(
            job_id,
            job.status,
            worker_id,
            Duration::seconds(self.config.claim_ttl_secs as i64),
        ) {
            Ok(claim) => claim,
            Err(JobStoreError::Conflict { .. }) => {
                return Err(PipelineError::ClaimLost(job_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        crate::metrics::JOBS_IN_FLIGHT.inc();
        let result = self.run_to_terminal_or_release(job_id, worker_id, &claim).await;
        crate::metrics::JOBS_IN_FLIGHT.dec();
        result
    }

    async fn run_to_terminal_or_release(
        &self,
        job_id: &str,
        worker_id: &str,
        claim: &Claim,
    ) -> Result<(), PipelineError> {
        loop {
            let job = self
                .store
                .get(job_id)?
                .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;

            if job.status.is_terminal() {
                return Ok(());
            }

            if job.cancel_requested {
                self.finish_cancelled(&job, claim)?;
                return Ok(());
            }

            match job.status {
                JobStatus::Pending => {
                    self.enter_stage(&job, claim, Stage::Outline, JobStatus::OutlineRunning)?;
                }
                JobStatus::OutlineRunning => {
                    if !job.stage_completed(Stage::Outline) {
                        self.bump_attempt(&job, claim, Stage::Outline)?;
                        let outline = match self.executors.run_outline(&job).await {
                            Ok(outline) => outline,
                            Err(failure) => {
                                return self.handle_failure(&job, claim, Stage::Outline, failure);
                            }
                        };
                        self.store.update(
                            job_id,
                            JobPatch::new()
                                .with_stage_result(StageResult::Outline { outline })
                                .with_status(JobStatus::OutlineDone)
                                .with_progress(self.progress_after(Stage::Outline)),
                            claim,
                        )?;
                    } else {
                        self.store.update(
                            job_id,
                            JobPatch::new()
                                .with_status(JobStatus::OutlineDone)
                                .with_progress(self.progress_after(Stage::Outline)),
                            claim,
                        )?;
                    }
                }
                JobStatus::OutlineDone => {
                    self.enter_stage(&job, claim, Stage::Content, JobStatus::ContentRunning)?;
                }
                JobStatus::ContentRunning => {
                    if !job.stage_completed(Stage::Content) {
                        self.bump_attempt(&job, claim, Stage::Content)?;
                        let outline = self.outline_of(&job)?;
                        let sections = match self.executors.run_content(&job, &outline).await {
                            Ok(sections) => sections,
                            Err(failure) => {
                                return self.handle_failure(&job, claim, Stage::Content, failure);
                            }
                        };
                        self.store.update(
                            job_id,
                            JobPatch::new()
                                .with_stage_result(StageResult::Content { sections })
                                .with_status(JobStatus::ContentDone)
                                .with_progress(self.progress_after(Stage::Content)),
                            claim,
                        )?;
                    } else {
                        self.store.update(
                            job_id,
                            JobPatch::new()
                                .with_status(JobStatus::ContentDone)
                                .with_progress(self.progress_after(Stage::Content)),
                            claim,
                        )?;
                    }
                }
                JobStatus::ContentDone => {
                    self.enter_stage(&job, claim, Stage::Images, JobStatus::ImagesRunning)?;
                }
                JobStatus::ImagesRunning => {
                    if !job.stage_completed(Stage::Images) {
                        self.bump_attempt(&job, claim, Stage::Images)?;
                        match self.run_images(&job, worker_id, claim).await? {
                            ImagesOutcome::Done(slides) => {
                                self.store.update(
                                    job_id,
                                    JobPatch::new()
                                        .with_stage_result(StageResult::Images { slides })
                                        .with_status(JobStatus::ImagesDone)
                                        .with_progress(self.progress_after(Stage::Images)),
                                    claim,
                                )?;
                            }
                            ImagesOutcome::BelowThreshold { succeeded, total } => {
                                self.fail_job(
                                    &job,
                                    claim,
                                    Stage::Images,
                                    "dependency",
                                    format!(
                                        "only {} of {} slide images succeeded, below threshold {}",
                                        succeeded, total, self.config.image_success_threshold
                                    ),
                                )?;
                                return Ok(());
                            }
                            ImagesOutcome::Cancelled => {
                                // Loop re-reads the job and takes the cancel path.
                            }
                        }
                    } else {
                        self.store.update(
                            job_id,
                            JobPatch::new()
                                .with_status(JobStatus::ImagesDone)
                                .with_progress(self.progress_after(Stage::Images)),
                            claim,
                        )?;
                    }
                }
                JobStatus::ImagesDone => {
                    self.enter_stage(&job, claim, Stage::Compile, JobStatus::Compiling)?;
                }
                JobStatus::Compiling => {
                    let artifact_uri = if let Some(StageResult::Compile { artifact_uri }) =
                        job.stage_results.get(Stage::Compile.name())
                    {
                        artifact_uri.clone()
                    } else {
                        self.bump_attempt(&job, claim, Stage::Compile)?;
                        let document = self.document_of(&job)?;
                        match self.executors.run_compile(&document).await {
                            Ok(uri) => uri,
                            Err(failure) => {
                                return self.handle_failure(&job, claim, Stage::Compile, failure);
                            }
                        }
                    };

                    self.store.update(
                        job_id,
                        JobPatch::new()
                            .with_stage_result(StageResult::Compile {
                                artifact_uri: artifact_uri.clone(),
                            })
                            .with_artifact(artifact_uri)
                            .with_status(JobStatus::Completed)
                            .with_progress(100),
                        claim,
                    )?;
                    crate::metrics::JOBS_FINISHED
                        .with_label_values(&["completed"])
                        .inc();
                    tracing::info!(job_id, "job completed");
                    return Ok(());
                }
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                    return Ok(());
                }
            }
        }
    }

    fn enter_stage(
        &self,
        job: &Job,
        claim: &Claim,
        stage: Stage,
        running: JobStatus,
    ) -> Result<(), PipelineError> {
        tracing::info!(job_id = %job.id, stage = %stage, "entering stage");
        self.store.update(
            &job.id,
            JobPatch::new().with_status(running),
            claim,
        )?;
        Ok(())
    }

    fn bump_attempt(&self, job: &Job, claim: &Claim, stage: Stage) -> Result<(), PipelineError> {
        self.store.update(
            &job.id,
            JobPatch::new().bumping_attempt(stage),
            claim,
        )?;
        Ok(())
    }

    fn progress_after(&self, stage: Stage) -> u8 {
        self.config.stage_weights.progress_after(stage)
    }

    /// Permanent stage failures finalize the job; unavailability releases the
    /// claim so the delivery can be retried.
    fn handle_failure(
        &self,
        job: &Job,
        claim: &Claim,
        stage: Stage,
        failure: StageFailure,
    ) -> Result<(), PipelineError> {
        match failure {
            StageFailure::Unavailable(message) => {
                tracing::warn!(job_id = %job.id, stage = %stage, %message, "dependency unavailable, releasing claim");
                self.store.release(&job.id, claim)?;
                Err(PipelineError::DependencyUnavailable {
                    job_id: job.id.clone(),
                    stage: stage.name().to_string(),
                    message,
                })
            }
            StageFailure::Failed { kind, message } => {
                self.fail_job(job, claim, stage, &kind, message)?;
                Ok(())
            }
        }
    }

    fn fail_job(
        &self,
        job: &Job,
        claim: &Claim,
        stage: Stage,
        kind: &str,
        message: String,
    ) -> Result<(), PipelineError> {
        tracing::warn!(job_id = %job.id, stage = %stage, kind, %message, "job failed");
        self.store.update(
            &job.id,
            JobPatch::new()
                .with_status(JobStatus::Failed)
                .with_error(JobError {
                    stage: stage.name().to_string(),
                    kind: kind.to_string(),
                    message,
                }),
            claim,
        )?;
        crate::metrics::JOBS_FINISHED
            .with_label_values(&["failed"])
            .inc();
        Ok(())
    }

    fn finish_cancelled(&self, job: &Job, claim: &Claim) -> Result<(), PipelineError> {
        let stage = job
            .status
            .stage()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| "pending".to_string());
        tracing::info!(job_id = %job.id, %stage, "job cancelled");
        self.store.update(
            &job.id,
            JobPatch::new()
                .with_status(JobStatus::Cancelled)
                .with_error(JobError {
                    stage,
                    kind: "cancelled".to_string(),
                    message: "cancelled by request".to_string(),
                }),
            claim,
        )?;
        crate::metrics::JOBS_FINISHED
            .with_label_values(&["cancelled"])
            .inc();
        Ok(())
    }

    fn outline_of(&self, job: &Job) -> Result<crate::job::DeckOutline, PipelineError> {
        match job.stage_results.get(Stage::Outline.name()) {
            Some(StageResult::Outline { outline }) => Ok(outline.clone()),
            _ => Err(JobStoreError::Conflict {
                job_id: job.id.clone(),
                reason: "missing outline result".to_string(),
            }
            .into()),
        }
    }

    fn sections_of(&self, job: &Job) -> Result<Vec<crate::job::SectionContent>, PipelineError> {
        match job.stage_results.get(Stage::Content.name()) {
            Some(StageResult::Content { sections }) => Ok(sections.clone()),
            _ => Err(JobStoreError::Conflict {
                job_id: job.id.clone(),
                reason: "missing content result".to_string(),
            }
            .into()),
        }
    }

    fn images_of(&self, job: &Job) -> Result<Vec<SlideImageRef>, PipelineError> {
        match job.stage_results.get(Stage::Images.name()) {
            Some(StageResult::Images { slides }) => Ok(slides.clone()),
            _ => Err(JobStoreError::Conflict {
                job_id: job.id.clone(),
                reason: "missing images result".to_string(),
            }
            .into()),
        }
    }

    fn document_of(&self, job: &Job) -> Result<DeckDocument, PipelineError> {
        Ok(DeckDocument {
            job_id: job.id.clone(),
            topic: job.topic.clone(),
            params: job.params.clone(),
            outline: self.outline_of(job)?,
            sections: self.sections_of(job)?,
            images: self.images_of(job)?,
        })
    }

    /// Fan out one image task per slide, bounded by the concurrency limiter.
    ///
    /// Task identity is durable: already-succeeded tasks are not re-run on
    /// redelivery. The cancel flag is re-checked before each dispatch.
    async fn run_images(
        &self,
        job: &Job,
        worker_id: &str,
        _claim: &Claim,
    ) -> Result<ImagesOutcome, PipelineError> {
        let outline = self.outline_of(job)?;
        let tasks = self.store.create_tasks(&job.id, job.slide_count)?;

        let mut handles = Vec::new();
        let mut cancelled = false;

        for task in &tasks {
            if task.status == TaskStatus::Succeeded {
                continue;
            }

            // Observe the cancel flag at task dispatch.
            let fresh = self
                .store
                .get(&job.id)?
                .ok_or_else(|| JobStoreError::NotFound(job.id.to_string()))?;
            if fresh.cancel_requested {
                cancelled = true;
                break;
            }

            let spec = outline
                .sections
                .get(task.slide_index as usize)
                .cloned()
                .unwrap_or_else(|| crate::job::SectionSpec {
                    heading: format!("Slide {}", task.slide_index + 1),
                    summary: job.topic.clone(),
                });

            let store = Arc::clone(&self.store);
            let executors = Arc::clone(&self.executors);
            let job_snapshot = job.clone();
            let task_id = task.id.clone();
            let slide_index = task.slide_index;
            let worker = worker_id.to_string();

            handles.push(tokio::spawn(async move {
                record_task_status(&*store, &task_id, TaskStatus::Running, None, None);
                tracing::debug!(job_id = %job_snapshot.id, slide_index, worker = %worker, "generating slide image");

                match executors
                    .generate_slide_image(&job_snapshot, &spec, slide_index)
                    .await
                {
                    Ok(uri) => {
                        crate::metrics::IMAGE_TASKS
                            .with_label_values(&["succeeded"])
                            .inc();
                        record_task_status(
                            &*store,
                            &task_id,
                            TaskStatus::Succeeded,
                            Some(uri),
                            None,
                        );
                    }
                    Err(failure) => {
                        crate::metrics::IMAGE_TASKS.with_label_values(&["failed"]).inc();
                        record_task_status(
                            &*store,
                            &task_id,
                            TaskStatus::Failed,
                            None,
                            Some(failure.to_string()),
                        );
                    }
                }
            }));
        }

        // Wait for in-flight tasks so limiter permits are returned before we
        // decide the stage outcome.
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(job_id = %job.id, error = %e, "image task panicked");
            }
        }

        if cancelled {
            return Ok(ImagesOutcome::Cancelled);
        }

        let tasks = self.store.list_tasks(&job.id)?;
        let succeeded = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .count();
        let total = job.slide_count as usize;
        let fraction = if total == 0 {
            1.0
        } else {
            succeeded as f64 / total as f64
        };

        if fraction + f64::EPSILON < self.config.image_success_threshold {
            return Ok(ImagesOutcome::BelowThreshold { succeeded, total });
        }

        let mut slides = Vec::with_capacity(total);
        for task in &tasks {
            match (&task.status, &task.result_ref) {
                (TaskStatus::Succeeded, Some(uri)) => slides.push(SlideImageRef {
                    slide_index: task.slide_index,
                    image_uri: Some(uri.clone()),
                    placeholder: false,
                }),
                _ => {
                    crate::metrics::IMAGE_TASKS
                        .with_label_values(&["placeholder"])
                        .inc();
                    slides.push(SlideImageRef::placeholder(task.slide_index));
                }
            }
        }

        Ok(ImagesOutcome::Done(slides))
    }
}

enum ImagesOutcome {
    Done(Vec<SlideImageRef>),
    BelowThreshold { succeeded: usize, total: usize },
    Cancelled,
}

/// Record a task transition. Store errors are logged rather than propagated;
/// the join counts a missing success row as a failed slide.
fn record_task_status(
    store: &dyn JobStore,
    task_id: &str,
    status: TaskStatus,
    result_ref: Option<String>,
    last_error: Option<String>,
) {
    if let Err(e) = store.update_task(task_id, status, result_ref, last_error) {
        tracing::error!(task_id, ?status, error = %e, "failed to record task status");
    }
}
