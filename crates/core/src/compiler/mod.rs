//! Deck compilation: assembling stage outputs into the final artifact.

use serde::{Deserialize, Serialize};

use crate::job::{DeckOutline, JobParams, SectionContent, SlideImageRef};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Stage outputs do not line up (e.g. section/slide count mismatch).
    #[error("inconsistent deck document: {0}")]
    Inconsistent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Everything the compiler needs, gathered from the job's stage results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckDocument {
    pub job_id: String,
    pub topic: String,
    pub params: JobParams,
    pub outline: DeckOutline,
    pub sections: Vec<SectionContent>,
    pub images: Vec<SlideImageRef>,
}

/// One rendered slide in the final artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedSlide {
    pub index: u32,
    pub heading: String,
    pub bullets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(default)]
    pub image_placeholder: bool,
}

/// The final deck artifact format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedDeck {
    pub title: String,
    pub topic: String,
    pub slides: Vec<RenderedSlide>,
}

/// Trait for deck compilers.
pub trait DeckCompiler: Send + Sync {
    /// Render the document into the final artifact bytes.
    fn render(&self, document: &DeckDocument) -> Result<Vec<u8>, CompileError>;
}

/// Compiler producing a self-contained JSON deck.
pub struct JsonDeckCompiler;

impl JsonDeckCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonDeckCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeckCompiler for JsonDeckCompiler {
    fn render(&self, document: &DeckDocument) -> Result<Vec<u8>, CompileError> {
        if document.sections.len() != document.outline.sections.len() {
            return Err(CompileError::Inconsistent(format!(
                "outline has {} sections, content has {}",
                document.outline.sections.len(),
                document.sections.len()
            )));
        }

        let slides = document
            .sections
            .iter()
            .enumerate()
            .map(|(i, section)| {
                let image = document
                    .images
                    .iter()
                    .find(|img| img.slide_index as usize == i);
                RenderedSlide {
                    index: i as u32,
                    heading: section.heading.clone(),
                    bullets: section.bullets.clone(),
                    speaker_notes: section.speaker_notes.clone(),
                    image_uri: image.and_then(|img| img.image_uri.clone()),
                    image_placeholder: image.map(|img| img.placeholder).unwrap_or(true),
                }
            })
            .collect();

        let deck = RenderedDeck {
            title: document.outline.title.clone(),
            topic: document.topic.clone(),
            slides,
        };

        serde_json::to_vec_pretty(&deck).map_err(|e| CompileError::Serialization(e.to_string()))
    }
}
