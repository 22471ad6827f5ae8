//! The deck generation pipeline: configuration, stage executors, and the
//! runner driving jobs through the state machine.

mod config;
mod runner;
mod stages;

pub use config::{PipelineConfig, StageWeights};
pub use runner::{JobRunner, PipelineError};
pub use stages::{StageExecutors, StageFailure, DEP_IMAGE_MODEL, DEP_TEXT_MODEL};
