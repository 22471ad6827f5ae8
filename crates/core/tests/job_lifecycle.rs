//! End-to-end pipeline tests against mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use slidesmith_core::artifact::ObjectStore;
use slidesmith_core::compiler::RenderedDeck;
use slidesmith_core::dispatch::{DispatchConfig, JobDispatcher};
use slidesmith_core::genai::GenerationError;
use slidesmith_core::job::{
    CreateJobRequest, Job, JobParams, JobPatch, JobStatus, JobStore, SqliteJobStore, Stage,
    StageResult,
};
use slidesmith_core::pipeline::{JobRunner, PipelineConfig, PipelineError, StageExecutors};
use slidesmith_core::retry::RetryPolicy;
use slidesmith_core::testing::{
    MemoryObjectStore, MockDeckCompiler, MockImageGenerator, MockTextGenerator,
};

struct Harness {
    store: Arc<SqliteJobStore>,
    text: Arc<MockTextGenerator>,
    image: Arc<MockImageGenerator>,
    compiler: Arc<MockDeckCompiler>,
    objects: Arc<MemoryObjectStore>,
    executors: Arc<StageExecutors>,
    runner: Arc<JobRunner>,
}

impl Harness {
    fn new(config: PipelineConfig) -> Self {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let text = Arc::new(MockTextGenerator::new());
        let image = Arc::new(MockImageGenerator::new());
        let compiler = Arc::new(MockDeckCompiler::new());
        let objects = Arc::new(MemoryObjectStore::new());

        let executors = Arc::new(StageExecutors::new(
            Arc::clone(&text) as _,
            Arc::clone(&image) as _,
            Arc::clone(&compiler) as _,
            Arc::clone(&objects) as _,
            config.clone(),
        ));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store) as _,
            Arc::clone(&executors),
            config,
        ));

        Self {
            store,
            text,
            image,
            compiler,
            objects,
            executors,
            runner,
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy::immediate(2),
            ..PipelineConfig::default()
        }
    }

    fn submit(&self, slide_count: u32) -> Job {
        self.store
            .create(CreateJobRequest {
                topic: "rust async runtimes".to_string(),
                slide_count,
                params: JobParams::default(),
            })
            .unwrap()
    }

    fn job(&self, id: &str) -> Job {
        self.store.get(id).unwrap().unwrap()
    }
}

async fn wait_for_terminal(store: &SqliteJobStore, job_id: &str, timeout: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get(job_id).unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {} did not reach a terminal state: {}", job_id, job.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_happy_path_completes() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(3);

    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);
    assert!(job.owner_token.is_none());
    assert!(job.error.is_none());

    // Every stage recorded its result and exactly one attempt.
    for stage in Stage::all() {
        assert!(job.stage_completed(stage), "missing result for {}", stage);
        assert_eq!(job.attempts.get(stage.name()), Some(&1));
    }

    // The artifact is fetchable and contains one slide per request.
    let uri = job.artifact_uri.expect("artifact uri");
    let bytes = h.objects.get(&uri).await.unwrap();
    let deck: RenderedDeck = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(deck.slides.len(), 3);
    assert!(deck.slides.iter().all(|s| s.image_uri.is_some()));

    assert_eq!(h.compiler.call_count(), 1);
    assert_eq!(h.image.call_count().await, 3);
}

#[tokio::test]
async fn test_concurrent_claim_is_exclusive() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(2);

    // Another worker grabs the job first.
    let _claim = h
        .store
        .claim(&job.id, JobStatus::Pending, "other-worker", chrono::Duration::seconds(60))
        .unwrap();

    let err = h.runner.advance(&job.id, "worker-0").await.unwrap_err();
    assert!(matches!(err, PipelineError::ClaimLost(_)));
    assert!(err.is_redeliverable());

    // No collaborator was invoked.
    assert_eq!(h.text.call_count().await, 0);
}

#[tokio::test]
async fn test_redelivery_skips_completed_stages() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(2);

    // Simulate a previous worker that finished the outline stage and then
    // crashed mid-delivery, leaving an expired claim behind.
    let claim = h
        .store
        .claim(&job.id, JobStatus::Pending, "crashed-worker", chrono::Duration::seconds(-1))
        .unwrap();
    let outline = slidesmith_core::job::DeckOutline {
        title: "Recovered Deck".to_string(),
        sections: vec![
            slidesmith_core::job::SectionSpec {
                heading: "One".to_string(),
                summary: "first".to_string(),
            },
            slidesmith_core::job::SectionSpec {
                heading: "Two".to_string(),
                summary: "second".to_string(),
            },
        ],
    };
    h.store
        .update(
            &job.id,
            JobPatch::new()
                .with_status(JobStatus::OutlineRunning)
                .with_stage_result(StageResult::Outline { outline })
                .bumping_attempt(Stage::Outline),
            &claim,
        )
        .unwrap();

    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Completed);

    // The outline collaborator was never re-invoked.
    assert_eq!(h.text.calls_containing("Plan a").await, 0);
    // The recovered outline flowed through to the artifact.
    let bytes = h.objects.get(job.artifact_uri.as_deref().unwrap()).await.unwrap();
    let deck: RenderedDeck = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(deck.title, "Recovered Deck");
}

#[tokio::test]
async fn test_transient_outage_releases_claim_then_recovers() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(2);

    // Both attempts of the retry budget fail transiently.
    h.text.push_error(GenerationError::RateLimited).await;
    h.text.push_error(GenerationError::RateLimited).await;

    let err = h.runner.advance(&job.id, "worker-0").await.unwrap_err();
    assert!(matches!(err, PipelineError::DependencyUnavailable { .. }));
    assert!(err.is_redeliverable());

    // The job is not failed and the claim was released for redelivery.
    let mid = h.job(&job.id);
    assert_eq!(mid.status, JobStatus::OutlineRunning);
    assert!(mid.owner_token.is_none());

    // Redelivery picks up where it left off and completes.
    h.runner.advance(&job.id, "worker-1").await.unwrap();
    let done = h.job(&job.id);
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts.get("outline"), Some(&2));
}

#[tokio::test]
async fn test_permanent_error_fails_job_with_detail() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(2);

    h.text
        .push_error(GenerationError::Api {
            status: 400,
            message: "prompt too long".to_string(),
        })
        .await;

    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("error detail");
    assert_eq!(error.stage, "outline");
    assert_eq!(error.kind, "dependency");
    assert!(error.message.contains("prompt too long"));
}

#[tokio::test]
async fn test_image_concurrency_is_bounded() {
    let config = PipelineConfig {
        retry: RetryPolicy::immediate(2),
        image_concurrency: 3,
        ..PipelineConfig::default()
    };
    let h = Harness::new(config);
    h.image.set_delay(Duration::from_millis(20)).await;

    let job = h.submit(12);
    h.runner.advance(&job.id, "worker-0").await.unwrap();

    assert_eq!(h.job(&job.id).status, JobStatus::Completed);
    assert_eq!(h.image.call_count().await, 12);
    assert!(
        h.image.peak_in_flight() <= 3,
        "peak concurrency {} exceeded limit",
        h.image.peak_in_flight()
    );
}

#[tokio::test]
async fn test_strict_threshold_fails_on_one_bad_slide() {
    let h = Harness::new(Harness::fast_config());
    h.image.fail_prompts_containing("Section 2").await;

    let job = h.submit(4);
    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.expect("error detail");
    assert_eq!(error.stage, "images");
    assert_eq!(error.kind, "dependency");
}

#[tokio::test]
async fn test_relaxed_threshold_uses_placeholder() {
    let config = PipelineConfig {
        retry: RetryPolicy::immediate(2),
        image_success_threshold: 0.75,
        ..PipelineConfig::default()
    };
    let h = Harness::new(config);
    h.image.fail_prompts_containing("Section 2").await;

    let job = h.submit(4);
    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Completed);

    match job.stage_results.get("images") {
        Some(StageResult::Images { slides }) => {
            assert_eq!(slides.len(), 4);
            let placeholders: Vec<_> = slides.iter().filter(|s| s.placeholder).collect();
            assert_eq!(placeholders.len(), 1);
            assert_eq!(placeholders[0].slide_index, 1);
        }
        other => panic!("unexpected images result: {:?}", other),
    }

    // The placeholder survives compilation.
    let bytes = h.objects.get(job.artifact_uri.as_deref().unwrap()).await.unwrap();
    let deck: RenderedDeck = serde_json::from_slice(&bytes).unwrap();
    assert!(deck.slides[1].image_placeholder);
    assert!(deck.slides[1].image_uri.is_none());
}

#[tokio::test]
async fn test_exactly_one_concurrent_claim_wins() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(2);

    // Race genuinely parallel claim attempts from separate threads.
    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&h.store);
        let id = job.id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            store.claim(
                &id,
                JobStatus::Pending,
                &format!("worker-{}", i),
                chrono::Duration::seconds(60),
            )
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one concurrent claim may succeed");
}

#[tokio::test]
async fn test_cancel_mid_images_releases_limiter_slots() {
    let config = PipelineConfig {
        retry: RetryPolicy::immediate(2),
        image_concurrency: 2,
        ..PipelineConfig::default()
    };
    let h = Harness::new(config);
    h.image.set_delay(Duration::from_millis(50)).await;

    let job = h.submit(8);
    let runner = Arc::clone(&h.runner);
    let id = job.id.clone();
    let advance = tokio::spawn(async move { runner.advance(&id, "worker-0").await });

    // Wait until the fan-out is underway, then flip the cancel flag.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.image.call_count().await == 0 {
        if tokio::time::Instant::now() > deadline {
            panic!("image stage never started");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.store.request_cancel(&job.id).unwrap();

    advance.await.unwrap().unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    // Every permit came back, in-flight calls included.
    let limiter = h.executors.image_limiter();
    assert_eq!(limiter.available(), limiter.max());
}

#[tokio::test]
async fn test_cancel_before_processing() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(3);

    h.store.request_cancel(&job.id).unwrap();
    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.as_ref().map(|e| e.kind.as_str()), Some("cancelled"));

    // Nothing was generated.
    assert_eq!(h.text.call_count().await, 0);
    assert_eq!(h.image.call_count().await, 0);
}

#[tokio::test]
async fn test_cancel_observed_at_stage_boundary() {
    let h = Harness::new(Harness::fast_config());
    let job = h.submit(2);

    // Flip the cancel flag while the content stage runs; the runner must
    // observe it at the next boundary and never start the image stage.
    let store = Arc::clone(&h.store);
    let job_id = job.id.clone();
    h.text
        .set_handler(move |request| {
            if request.prompt.contains("Write the slide") {
                let _ = store.request_cancel(&job_id);
            }
            None
        })
        .await;

    h.runner.advance(&job.id, "worker-0").await.unwrap();

    let job = h.job(&job.id);
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(h.image.call_count().await, 0);
}

#[tokio::test]
async fn test_unknown_delivery_is_dropped() {
    let h = Harness::new(Harness::fast_config());
    assert!(h.runner.advance("no-such-job", "worker-0").await.is_ok());
}

#[tokio::test]
async fn test_dispatcher_processes_submissions() {
    let h = Harness::new(Harness::fast_config());
    let dispatcher = JobDispatcher::new(DispatchConfig {
        workers: 2,
        max_receives: 5,
        redelivery_delay_ms: 10,
    });
    dispatcher.start(Arc::clone(&h.runner));

    let a = h.submit(2);
    let b = h.submit(3);
    dispatcher.enqueue(&a.id).unwrap();
    dispatcher.enqueue(&b.id).unwrap();

    let a = wait_for_terminal(&h.store, &a.id, Duration::from_secs(5)).await;
    let b = wait_for_terminal(&h.store, &b.id, Duration::from_secs(5)).await;
    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);

    dispatcher.stop();
}

#[tokio::test]
async fn test_dispatcher_dead_letters_after_max_receives() {
    let h = Harness::new(Harness::fast_config());

    // Every text call fails transiently, so every delivery ends in
    // DependencyUnavailable and gets redelivered.
    for _ in 0..64 {
        h.text.push_error(GenerationError::RateLimited).await;
    }

    let dispatcher = JobDispatcher::new(DispatchConfig {
        workers: 1,
        max_receives: 2,
        redelivery_delay_ms: 10,
    });
    dispatcher.start(Arc::clone(&h.runner));

    let job = h.submit(2);
    dispatcher.enqueue(&job.id).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let dead = dispatcher.dead_letters().await;
        if !dead.is_empty() {
            assert_eq!(dead[0].job_id, job.id);
            assert_eq!(dead[0].receives, 2);
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("delivery was never dead-lettered");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The job itself is stuck but not failed; operators can re-enqueue.
    assert_eq!(h.job(&job.id).status, JobStatus::OutlineRunning);

    dispatcher.stop();
}
