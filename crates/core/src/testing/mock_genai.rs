//! Mock text and image generators for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::genai::{
    GenerationError, ImageGenerator, TextGenerator, TextRequest, TextResponse, TokenUsage,
};
use crate::job::{DeckOutline, SectionContent, SectionSpec};

/// A prompt handler that overrides the default canned response.
type PromptHandler = Box<dyn Fn(&TextRequest) -> Option<String> + Send + Sync>;

/// Mock implementation of the `TextGenerator` trait.
///
/// By default it answers outline prompts with a well-formed outline (reading
/// the slide count out of the prompt) and everything else with a well-formed
/// section. Tests can inject errors (consumed one per call) or install a
/// custom handler.
pub struct MockTextGenerator {
    /// Recorded requests.
    requests: Arc<RwLock<Vec<TextRequest>>>,
    /// Errors to return, consumed FIFO, one per call.
    errors: Arc<RwLock<Vec<GenerationError>>>,
    /// Custom handler for dynamic responses.
    handler: Arc<RwLock<Option<PromptHandler>>>,
    /// Simulated latency.
    delay: Arc<RwLock<Duration>>,
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(Vec::new())),
            handler: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Queue errors to be returned before any successful response.
    pub async fn push_error(&self, error: GenerationError) {
        self.errors.write().await.push(error);
    }

    /// Install a handler that can override responses per request.
    pub async fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&TextRequest) -> Option<String> + Send + Sync + 'static,
    {
        *self.handler.write().await = Some(Box::new(handler));
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn recorded_requests(&self) -> Vec<TextRequest> {
        self.requests.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Number of recorded requests whose prompt contains `needle`.
    pub async fn calls_containing(&self, needle: &str) -> usize {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }

    fn canned_response(request: &TextRequest) -> String {
        if let Some(count) = parse_slide_count(&request.prompt) {
            let outline = DeckOutline {
                title: "Mock Deck".to_string(),
                sections: (0..count)
                    .map(|i| SectionSpec {
                        heading: format!("Section {}", i + 1),
                        summary: format!("Covers part {} of the topic", i + 1),
                    })
                    .collect(),
            };
            serde_json::to_string(&outline).unwrap()
        } else {
            let heading = request
                .prompt
                .split('"')
                .nth(1)
                .unwrap_or("Mock Section")
                .to_string();
            let content = SectionContent {
                heading,
                bullets: vec!["first point".to_string(), "second point".to_string()],
                speaker_notes: Some("mock notes".to_string()),
            };
            serde_json::to_string(&content).unwrap()
        }
    }
}

/// Extract `N` from a "Plan a N-slide deck" prompt.
fn parse_slide_count(prompt: &str) -> Option<u32> {
    let idx = prompt.find("-slide")?;
    let head = &prompt[..idx];
    let digits: String = head
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-text"
    }

    async fn generate(&self, request: TextRequest) -> Result<TextResponse, GenerationError> {
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.requests.write().await.push(request.clone());

        {
            let mut errors = self.errors.write().await;
            if !errors.is_empty() {
                return Err(errors.remove(0));
            }
        }

        let text = {
            let handler = self.handler.read().await;
            handler
                .as_ref()
                .and_then(|h| h(&request))
                .unwrap_or_else(|| Self::canned_response(&request))
        };

        Ok(TextResponse {
            text,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 50,
            },
            model: "mock-text".to_string(),
        })
    }
}

/// Mock implementation of the `ImageGenerator` trait.
///
/// Tracks peak concurrency so tests can assert the limiter bound, and can be
/// told to fail prompts containing given substrings.
pub struct MockImageGenerator {
    calls: Arc<RwLock<Vec<String>>>,
    /// Prompts containing any of these substrings fail permanently.
    fail_containing: Arc<RwLock<Vec<String>>>,
    errors: Arc<RwLock<Vec<GenerationError>>>,
    delay: Arc<RwLock<Duration>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl Default for MockImageGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageGenerator {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            fail_containing: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail any prompt containing `needle` with a permanent API error.
    pub async fn fail_prompts_containing(&self, needle: impl Into<String>) {
        self.fail_containing.write().await.push(needle.into());
    }

    /// Queue errors to be returned before any successful response.
    pub async fn push_error(&self, error: GenerationError) {
        self.errors.write().await.push(error);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn recorded_prompts(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Highest number of concurrently executing calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-image"
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = async {
            let delay = *self.delay.read().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.calls.write().await.push(prompt.to_string());

            {
                let mut errors = self.errors.write().await;
                if !errors.is_empty() {
                    return Err(errors.remove(0));
                }
            }

            let fail_containing = self.fail_containing.read().await;
            for needle in fail_containing.iter() {
                if prompt.contains(needle.as_str()) {
                    return Err(GenerationError::Api {
                        status: 400,
                        message: format!("prompt rejected: {}", needle),
                    });
                }
            }

            Ok(b"mock png bytes".to_vec())
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outline_response_matches_slide_count() {
        let text = MockTextGenerator::new();
        let response = text
            .generate(TextRequest::new("Plan a 6-slide deck about: rust"))
            .await
            .unwrap();

        let outline: DeckOutline = serde_json::from_str(&response.text).unwrap();
        assert_eq!(outline.sections.len(), 6);
        assert_eq!(text.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_content_response_parses() {
        let text = MockTextGenerator::new();
        let response = text
            .generate(TextRequest::new(
                "Deck: X\nTopic: y\nWrite the slide for section \"Intro\": overview",
            ))
            .await
            .unwrap();

        let content: SectionContent = serde_json::from_str(&response.text).unwrap();
        assert_eq!(content.heading, "Intro");
    }

    #[tokio::test]
    async fn test_errors_consumed_in_order() {
        let text = MockTextGenerator::new();
        text.push_error(GenerationError::RateLimited).await;

        assert!(text.generate(TextRequest::new("anything")).await.is_err());
        assert!(text.generate(TextRequest::new("anything")).await.is_ok());
    }

    #[tokio::test]
    async fn test_image_failure_by_prompt() {
        let image = MockImageGenerator::new();
        image.fail_prompts_containing("Section 2").await;

        assert!(image.generate("slide for Section 1").await.is_ok());
        assert!(image.generate("slide for Section 2").await.is_err());
    }
}
