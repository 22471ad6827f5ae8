//! Core job and task data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline stages
// ============================================================================

/// A named step in the sequential generation pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Outline,
    Content,
    Images,
    Compile,
}

impl Stage {
    /// Stable name used as the `stage_results` key and in error payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Outline => "outline",
            Stage::Content => "content",
            Stage::Images => "images",
            Stage::Compile => "compile",
        }
    }

    /// All stages in execution order.
    pub fn all() -> [Stage; 4] {
        [Stage::Outline, Stage::Content, Stage::Images, Stage::Compile]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Job status
// ============================================================================

/// Job state machine status.
///
/// `pending` is initial; `completed`, `failed` and `cancelled` are terminal.
/// `failed` is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    OutlineRunning,
    OutlineDone,
    ContentRunning,
    ContentDone,
    ImagesRunning,
    ImagesDone,
    Compiling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Stable string form (matches the serde representation), used for
    /// database storage and filtering.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::OutlineRunning => "outline_running",
            JobStatus::OutlineDone => "outline_done",
            JobStatus::ContentRunning => "content_running",
            JobStatus::ContentDone => "content_done",
            JobStatus::ImagesRunning => "images_running",
            JobStatus::ImagesDone => "images_done",
            JobStatus::Compiling => "compiling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "outline_running" => JobStatus::OutlineRunning,
            "outline_done" => JobStatus::OutlineDone,
            "content_running" => JobStatus::ContentRunning,
            "content_done" => JobStatus::ContentDone,
            "images_running" => JobStatus::ImagesRunning,
            "images_done" => JobStatus::ImagesDone,
            "compiling" => JobStatus::Compiling,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    /// Terminal jobs are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The stage this status belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobStatus::OutlineRunning | JobStatus::OutlineDone => Some(Stage::Outline),
            JobStatus::ContentRunning | JobStatus::ContentDone => Some(Stage::Content),
            JobStatus::ImagesRunning | JobStatus::ImagesDone => Some(Stage::Images),
            JobStatus::Compiling => Some(Stage::Compile),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Deck content types
// ============================================================================

/// Optional generation parameters supplied at submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobParams {
    /// Visual/tonal style hint passed into prompts (e.g. "technical", "playful").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Intended audience, used in prompt construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Output language (model hint, default English).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Deck outline produced by the outline stage: a title plus one section
/// specification per slide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeckOutline {
    pub title: String,
    pub sections: Vec<SectionSpec>,
}

/// One planned section of the deck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionSpec {
    pub heading: String,
    pub summary: String,
}

/// Generated body content for one section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionContent {
    pub heading: String,
    pub bullets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_notes: Option<String>,
}

/// Image reference for one slide. `placeholder` is set when the slide's task
/// failed permanently but the completion policy allowed the deck to proceed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideImageRef {
    pub slide_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(default)]
    pub placeholder: bool,
}

impl SlideImageRef {
    pub fn placeholder(slide_index: u32) -> Self {
        Self {
            slide_index,
            image_uri: None,
            placeholder: true,
        }
    }
}

// ============================================================================
// Stage results
// ============================================================================

/// Durable success marker for a completed stage.
///
/// Presence of an entry in `Job::stage_results` means the stage's collaborator
/// call succeeded and must not be re-invoked on redelivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageResult {
    Outline { outline: DeckOutline },
    Content { sections: Vec<SectionContent> },
    Images { slides: Vec<SlideImageRef> },
    Compile { artifact_uri: String },
}

// ============================================================================
// Errors surfaced to clients
// ============================================================================

/// Client-visible terminal error detail. Never carries stack traces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    /// Stage that failed (stage name, or "submission" for validation).
    pub stage: String,
    /// Error taxonomy kind: "dependency", "dependency_unavailable",
    /// "compilation", "cancelled", "validation".
    pub kind: String,
    pub message: String,
}

// ============================================================================
// Claims
// ============================================================================

/// A time-bounded exclusive lock on a job held by one worker.
///
/// All job mutations require a valid claim token; the store rejects writes
/// whose token no longer matches the row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub job_id: String,
    pub worker_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Job record
// ============================================================================

/// One end-to-end deck generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub topic: String,
    pub slide_count: u32,
    pub params: JobParams,
    pub status: JobStatus,
    /// 0-100, monotone non-decreasing until a terminal status.
    pub progress_percent: u8,
    /// Stage name -> durable success marker.
    pub stage_results: BTreeMap<String, StageResult>,
    /// Stage name -> number of execution attempts.
    pub attempts: BTreeMap<String, u32>,
    pub error: Option<JobError>,
    /// Claim token of the worker currently holding the job, if any.
    pub owner_token: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub artifact_uri: Option<String>,
    /// Observed by the orchestrator at stage boundaries and task dispatch.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether a stage already recorded its success marker.
    pub fn stage_completed(&self, stage: Stage) -> bool {
        self.stage_results.contains_key(stage.name())
    }
}

// ============================================================================
// Slide tasks
// ============================================================================

/// Terminal-or-not status of a fan-out unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        Some(match s {
            "pending" => TaskStatus::Pending,
            "running" => TaskStatus::Running,
            "succeeded" => TaskStatus::Succeeded,
            "failed" => TaskStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// One unit of fan-out work within a job's image stage. Tasks are created when
/// the image stage first runs and keep their identity across redeliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideTask {
    pub id: String,
    pub job_id: String,
    pub slide_index: u32,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub result_ref: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
