//! Stage executors wrapping the external collaborators.
//!
//! Every collaborator call goes through the dependency's circuit breaker and
//! the shared retry policy; image generation additionally holds a concurrency
//! limiter permit for the duration of the call.

use std::sync::Arc;
use std::time::Instant;

use crate::artifact::ObjectStore;
use crate::breaker::{BreakerError, BreakerPool, CircuitBreaker};
use crate::compiler::{DeckCompiler, DeckDocument};
use crate::genai::{GenerationError, ImageGenerator, TextGenerator, TextRequest};
use crate::job::{DeckOutline, Job, SectionContent, SectionSpec};
use crate::limiter::ConcurrencyLimiter;
use crate::retry::{RetryError, RetryPolicy};

use super::config::PipelineConfig;

/// Dependency names used for breakers and metrics.
pub const DEP_TEXT_MODEL: &str = "text_model";
pub const DEP_IMAGE_MODEL: &str = "image_model";

/// How a stage execution failed.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    /// The dependency is unreachable or saturated (breaker open, retry budget
    /// exhausted on transient errors). The job should be released for
    /// redelivery, not failed.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    /// A permanent failure; the job must move to `failed`.
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },
}

impl From<RetryError<GenerationError>> for StageFailure {
    fn from(e: RetryError<GenerationError>) -> Self {
        match e {
            RetryError::Exhausted {
                operation, source, ..
            } => StageFailure::Unavailable(format!("{}: {}", operation, source)),
            RetryError::Permanent {
                source: GenerationError::CircuitOpen(dep),
                ..
            } => StageFailure::Unavailable(format!("circuit open: {}", dep)),
            RetryError::Permanent { source, .. } => StageFailure::Failed {
                kind: "dependency".to_string(),
                message: source.to_string(),
            },
        }
    }
}

/// Executes individual pipeline stages against the collaborators.
pub struct StageExecutors {
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    compiler: Arc<dyn DeckCompiler>,
    objects: Arc<dyn ObjectStore>,
    breakers: BreakerPool,
    retry: RetryPolicy,
    image_limiter: ConcurrencyLimiter,
    config: PipelineConfig,
}

impl StageExecutors {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        image: Arc<dyn ImageGenerator>,
        compiler: Arc<dyn DeckCompiler>,
        objects: Arc<dyn ObjectStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            text,
            image,
            compiler,
            objects,
            breakers: BreakerPool::new(config.breaker.clone()),
            retry: config.retry.clone(),
            image_limiter: ConcurrencyLimiter::new(config.image_concurrency),
            config,
        }
    }

    pub fn image_limiter(&self) -> &ConcurrencyLimiter {
        &self.image_limiter
    }

    pub fn breakers(&self) -> &BreakerPool {
        &self.breakers
    }

    /// Generate the deck outline: one section spec per slide plus a title.
    pub async fn run_outline(&self, job: &Job) -> Result<DeckOutline, StageFailure> {
        let started = Instant::now();
        let breaker = self.breakers.breaker(DEP_TEXT_MODEL);

        let request = TextRequest::new(outline_prompt(job))
            .with_system(OUTLINE_SYSTEM.to_string())
            .with_max_tokens(self.config.outline_max_tokens);

        let result = self
            .retry
            .run("outline_generation", || {
                let request = request.clone();
                let breaker = Arc::clone(&breaker);
                async move {
                    guarded_text_json::<DeckOutline>(&*self.text, &breaker, request).await
                }
            })
            .await;

        observe_stage("outline", started, result.is_ok());

        let mut outline = result.map_err(StageFailure::from)?;

        let wanted = job.slide_count as usize;
        if outline.sections.len() < wanted {
            return Err(StageFailure::Failed {
                kind: "dependency".to_string(),
                message: format!(
                    "outline has {} sections, need {}",
                    outline.sections.len(),
                    wanted
                ),
            });
        }
        outline.sections.truncate(wanted);

        Ok(outline)
    }

    /// Generate body content for every planned section, in order.
    pub async fn run_content(
        &self,
        job: &Job,
        outline: &DeckOutline,
    ) -> Result<Vec<SectionContent>, StageFailure> {
        let started = Instant::now();
        let breaker = self.breakers.breaker(DEP_TEXT_MODEL);
        let mut sections = Vec::with_capacity(outline.sections.len());

        for spec in &outline.sections {
            let request = TextRequest::new(content_prompt(job, outline, spec))
                .with_system(CONTENT_SYSTEM.to_string())
                .with_max_tokens(self.config.content_max_tokens);

            let result = self
                .retry
                .run("content_generation", || {
                    let request = request.clone();
                    let breaker = Arc::clone(&breaker);
                    async move {
                        guarded_text_json::<SectionContent>(&*self.text, &breaker, request).await
                    }
                })
                .await;

            match result {
                Ok(content) => sections.push(content),
                Err(e) => {
                    observe_stage("content", started, false);
                    return Err(e.into());
                }
            }
        }

        observe_stage("content", started, true);
        Ok(sections)
    }

    /// Generate one slide image and store it, returning the object URI.
    ///
    /// Holds a limiter permit across the model call and the store write; the
    /// permit is released when this future completes or is dropped.
    pub async fn generate_slide_image(
        &self,
        job: &Job,
        spec: &SectionSpec,
        slide_index: u32,
    ) -> Result<String, StageFailure> {
        let _permit = self
            .image_limiter
            .acquire()
            .await
            .map_err(|e| StageFailure::Unavailable(e.to_string()))?;

        let breaker = self.breakers.breaker(DEP_IMAGE_MODEL);
        let prompt = image_prompt(job, spec);

        let bytes = self
            .retry
            .run("image_generation", || {
                let prompt = prompt.clone();
                let breaker = Arc::clone(&breaker);
                async move {
                    breaker
                        .try_acquire()
                        .map_err(|BreakerError::Open(dep)| GenerationError::CircuitOpen(dep))?;
                    let started = Instant::now();
                    let result = self.image.generate(&prompt).await;
                    record_external(DEP_IMAGE_MODEL, "generate", started, result.is_ok());
                    match result {
                        Ok(bytes) => {
                            breaker.record_success();
                            Ok(bytes)
                        }
                        Err(e) => {
                            breaker.record_failure();
                            Err(e)
                        }
                    }
                }
            })
            .await
            .map_err(StageFailure::from)?;

        self.objects
            .put("images", &bytes)
            .await
            .map_err(|e| StageFailure::Failed {
                kind: "dependency".to_string(),
                message: format!("storing image for slide {}: {}", slide_index, e),
            })
    }

    /// Assemble the final artifact and store it, returning its URI.
    pub async fn run_compile(&self, document: &DeckDocument) -> Result<String, StageFailure> {
        let started = Instant::now();

        let bytes = self.compiler.render(document).map_err(|e| {
            observe_stage("compile", started, false);
            StageFailure::Failed {
                kind: "compilation".to_string(),
                message: e.to_string(),
            }
        })?;

        let uri = self
            .objects
            .put("decks", &bytes)
            .await
            .map_err(|e| StageFailure::Failed {
                kind: "compilation".to_string(),
                message: format!("storing artifact: {}", e),
            })?;

        observe_stage("compile", started, true);
        Ok(uri)
    }
}

/// One breaker-guarded JSON generation call.
async fn guarded_text_json<T: serde::de::DeserializeOwned>(
    text: &dyn TextGenerator,
    breaker: &CircuitBreaker,
    request: TextRequest,
) -> Result<T, GenerationError> {
    breaker
        .try_acquire()
        .map_err(|BreakerError::Open(dep)| GenerationError::CircuitOpen(dep))?;

    let started = Instant::now();
    let result = crate::genai::generate_json::<T>(text, request).await;
    record_external(DEP_TEXT_MODEL, "generate", started, result.is_ok());

    match result {
        Ok((value, _usage)) => {
            breaker.record_success();
            Ok(value)
        }
        Err(e) => {
            breaker.record_failure();
            Err(e)
        }
    }
}

fn observe_stage(stage: &str, started: Instant, success: bool) {
    let result = if success { "success" } else { "failed" };
    crate::metrics::STAGE_DURATION
        .with_label_values(&[stage, result])
        .observe(started.elapsed().as_secs_f64());
}

fn record_external(service: &str, operation: &str, started: Instant, success: bool) {
    let status = if success { "success" } else { "error" };
    crate::metrics::EXTERNAL_SERVICE_DURATION
        .with_label_values(&[service, operation])
        .observe(started.elapsed().as_secs_f64());
    crate::metrics::EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, operation, status])
        .inc();
}

const OUTLINE_SYSTEM: &str = "You plan slide decks. Respond with strict JSON only: \
{\"title\": string, \"sections\": [{\"heading\": string, \"summary\": string}]}. \
Produce exactly one section per requested slide.";

const CONTENT_SYSTEM: &str = "You write slide content. Respond with strict JSON only: \
{\"heading\": string, \"bullets\": [string], \"speaker_notes\": string|null}.";

fn outline_prompt(job: &Job) -> String {
    let mut prompt = format!(
        "Plan a {}-slide deck about: {}",
        job.slide_count, job.topic
    );
    if let Some(style) = &job.params.style {
        prompt.push_str(&format!("\nStyle: {}", style));
    }
    if let Some(audience) = &job.params.audience {
        prompt.push_str(&format!("\nAudience: {}", audience));
    }
    if let Some(language) = &job.params.language {
        prompt.push_str(&format!("\nLanguage: {}", language));
    }
    prompt
}

fn content_prompt(job: &Job, outline: &DeckOutline, spec: &SectionSpec) -> String {
    format!(
        "Deck: {}\nTopic: {}\nWrite the slide for section \"{}\": {}",
        outline.title, job.topic, spec.heading, spec.summary
    )
}

fn image_prompt(job: &Job, spec: &SectionSpec) -> String {
    let style = job.params.style.as_deref().unwrap_or("clean, professional");
    format!(
        "Illustration for a slide titled \"{}\" about {}. Style: {}. No text in the image.",
        spec.heading, spec.summary, style
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobParams, JobStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn job() -> Job {
        Job {
            id: "job-1".to_string(),
            topic: "rust ownership".to_string(),
            slide_count: 4,
            params: JobParams {
                style: Some("technical".to_string()),
                audience: None,
                language: None,
            },
            status: JobStatus::Pending,
            progress_percent: 0,
            stage_results: BTreeMap::new(),
            attempts: BTreeMap::new(),
            error: None,
            owner_token: None,
            claim_expires_at: None,
            artifact_uri: None,
            cancel_requested: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_prompts_carry_job_details() {
        let job = job();
        let prompt = outline_prompt(&job);
        assert!(prompt.contains("4-slide"));
        assert!(prompt.contains("rust ownership"));
        assert!(prompt.contains("Style: technical"));
        assert!(!prompt.contains("Audience"));
    }

    #[test]
    fn test_unavailable_mapping() {
        let exhausted: StageFailure = RetryError::Exhausted {
            operation: "outline_generation".to_string(),
            attempts: 3,
            source: GenerationError::RateLimited,
        }
        .into();
        assert!(matches!(exhausted, StageFailure::Unavailable(_)));

        let circuit: StageFailure = RetryError::Permanent {
            operation: "outline_generation".to_string(),
            source: GenerationError::CircuitOpen("text_model".to_string()),
        }
        .into();
        assert!(matches!(circuit, StageFailure::Unavailable(_)));

        let permanent: StageFailure = RetryError::Permanent {
            operation: "outline_generation".to_string(),
            source: GenerationError::Payload("not json".to_string()),
        }
        .into();
        assert!(matches!(permanent, StageFailure::Failed { .. }));
    }
}
