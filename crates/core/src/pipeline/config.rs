//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::job::Stage;
use crate::retry::RetryPolicy;

/// Relative weight of each stage in overall progress. Must sum to 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageWeights {
    #[serde(default = "default_outline_weight")]
    pub outline: u8,
    #[serde(default = "default_content_weight")]
    pub content: u8,
    #[serde(default = "default_images_weight")]
    pub images: u8,
    #[serde(default = "default_compile_weight")]
    pub compile: u8,
}

fn default_outline_weight() -> u8 {
    10
}

fn default_content_weight() -> u8 {
    40
}

fn default_images_weight() -> u8 {
    35
}

fn default_compile_weight() -> u8 {
    15
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            outline: default_outline_weight(),
            content: default_content_weight(),
            images: default_images_weight(),
            compile: default_compile_weight(),
        }
    }
}

impl StageWeights {
    fn weight(&self, stage: Stage) -> u8 {
        match stage {
            Stage::Outline => self.outline,
            Stage::Content => self.content,
            Stage::Images => self.images,
            Stage::Compile => self.compile,
        }
    }

    /// Progress percentage after `stage` completes (cumulative).
    pub fn progress_after(&self, stage: Stage) -> u8 {
        Stage::all()
            .iter()
            .take_while(|s| **s <= stage)
            .map(|s| self.weight(*s))
            .sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        let total: u32 = Stage::all().iter().map(|s| self.weight(*s) as u32).sum();
        if total != 100 {
            return Err(format!("stage weights must sum to 100, got {}", total));
        }
        Ok(())
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Claim time-to-live in seconds; a crashed worker's claim expires after
    /// this long.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,

    /// Maximum concurrent image generation calls.
    #[serde(default = "default_image_concurrency")]
    pub image_concurrency: usize,

    /// Fraction of slide images (0.0..=1.0) that must succeed for the job to
    /// proceed; failed slides below the bar get placeholders.
    #[serde(default = "default_image_success_threshold")]
    pub image_success_threshold: f64,

    #[serde(default)]
    pub stage_weights: StageWeights,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default = "default_outline_max_tokens")]
    pub outline_max_tokens: u32,

    #[serde(default = "default_content_max_tokens")]
    pub content_max_tokens: u32,
}

fn default_claim_ttl_secs() -> u64 {
    120
}

fn default_image_concurrency() -> usize {
    5
}

fn default_image_success_threshold() -> f64 {
    1.0
}

fn default_outline_max_tokens() -> u32 {
    1024
}

fn default_content_max_tokens() -> u32 {
    2048
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: default_claim_ttl_secs(),
            image_concurrency: default_image_concurrency(),
            image_success_threshold: default_image_success_threshold(),
            stage_weights: StageWeights::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            outline_max_tokens: default_outline_max_tokens(),
            content_max_tokens: default_content_max_tokens(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.stage_weights.validate()?;
        if !(0.0..=1.0).contains(&self.image_success_threshold) {
            return Err(format!(
                "image_success_threshold must be in 0.0..=1.0, got {}",
                self.image_success_threshold
            ));
        }
        if self.image_concurrency == 0 {
            return Err("image_concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_are_cumulative() {
        let weights = StageWeights::default();
        assert_eq!(weights.progress_after(Stage::Outline), 10);
        assert_eq!(weights.progress_after(Stage::Content), 50);
        assert_eq!(weights.progress_after(Stage::Images), 85);
        assert_eq!(weights.progress_after(Stage::Compile), 100);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::default().validate().is_ok());

        let mut config = PipelineConfig::default();
        config.image_success_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.stage_weights.outline = 50;
        assert!(config.validate().is_err());
    }
}
