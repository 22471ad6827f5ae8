pub mod artifact;
pub mod breaker;
pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod genai;
pub mod job;
pub mod limiter;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod testing;

pub use config::{load_config, load_config_from_str, Config, ConfigError, SanitizedConfig};
pub use dispatch::{DeadLetter, DispatchConfig, JobDispatcher};
pub use job::{
    CreateJobRequest, Job, JobFilter, JobStatus, JobStore, JobStoreError, SqliteJobStore,
};
pub use pipeline::{JobRunner, PipelineConfig, PipelineError, StageExecutors};
