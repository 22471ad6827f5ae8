//! Durable job records, slide tasks, and the claim-based storage layer.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobFilter, JobPatch, JobStore, JobStoreError};
pub use types::{
    Claim, DeckOutline, Job, JobError, JobParams, JobStatus, SectionContent, SectionSpec,
    SlideImageRef, SlideTask, Stage, StageResult, TaskStatus,
};
