//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Jobs (submissions, completions, failures, stage durations)
//! - Resilience (retries, circuit breaker transitions, dead letters)
//! - External services (text model, image model)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs submitted total.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("slidesmith_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Jobs finished total by terminal status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "slidesmith_jobs_finished_total",
            "Total jobs reaching a terminal status",
        ),
        &["status"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Stage execution duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "slidesmith_stage_duration_seconds",
            "Duration of pipeline stage execution",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["stage", "result"], // result: "success", "failed"
    )
    .unwrap()
});

/// Slide image tasks total by result.
pub static IMAGE_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("slidesmith_image_tasks_total", "Total slide image tasks"),
        &["result"], // "succeeded", "failed", "placeholder"
    )
    .unwrap()
});

/// Jobs currently being processed.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "slidesmith_jobs_in_flight",
        "Jobs currently claimed by a worker",
    )
    .unwrap()
});

// =============================================================================
// Resilience Metrics
// =============================================================================

/// Retry attempts total by operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("slidesmith_retry_attempts_total", "Total retry attempts"),
        &["operation"],
    )
    .unwrap()
});

/// Circuit breaker state transitions by dependency.
pub static BREAKER_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "slidesmith_breaker_transitions_total",
            "Total circuit breaker state transitions",
        ),
        &["dependency", "state"], // state: "open", "half_open", "closed"
    )
    .unwrap()
});

/// Deliveries moved to the dead-letter store.
pub static DEAD_LETTERS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "slidesmith_dead_letters_total",
        "Total deliveries dead-lettered after exhausting receives",
    )
    .unwrap()
});

/// Delivery redeliveries total.
pub static REDELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "slidesmith_redeliveries_total",
        "Total job deliveries re-enqueued after a recoverable failure",
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "slidesmith_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "slidesmith_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Model tokens used.
pub static MODEL_TOKENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("slidesmith_model_tokens_total", "Total model tokens used"),
        &["provider", "direction"], // direction: "input", "output"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(IMAGE_TASKS.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        // Resilience
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(BREAKER_TRANSITIONS.clone()),
        Box::new(DEAD_LETTERS.clone()),
        Box::new(REDELIVERIES.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
        Box::new(MODEL_TOKENS.clone()),
    ]
}
