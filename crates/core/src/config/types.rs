use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::dispatch::DispatchConfig;
use crate::pipeline::PipelineConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub text_model: TextModelConfig,
    pub image_model: ImageModelConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("slidesmith.db")
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,
    /// Seconds a fetched result is advertised as valid (`expires_in` on the
    /// result endpoint).
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
            result_ttl_secs: default_result_ttl_secs(),
        }
    }
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_result_ttl_secs() -> u64 {
    3600
}

/// Text model backends
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextBackend {
    Anthropic,
    Ollama,
}

/// Text model configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextModelConfig {
    pub backend: TextBackend,
    /// Model name (e.g., "claude-3-haiku-20240307", "llama3")
    pub model: String,
    /// API key (required for anthropic)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override the API base URL
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Image model configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageModelConfig {
    /// Model name (e.g., "dall-e-3")
    pub model: String,
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Image size (default: "1024x1024")
    #[serde(default = "default_image_size")]
    pub size: String,
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub artifacts: ArtifactConfig,
    pub pipeline: PipelineConfig,
    pub dispatch: DispatchConfig,
    pub text_model: SanitizedModelConfig,
    pub image_model: SanitizedModelConfig,
}

/// Sanitized model config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedModelConfig {
    pub backend: String,
    pub model: String,
    pub api_key_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            artifacts: config.artifacts.clone(),
            pipeline: config.pipeline.clone(),
            dispatch: config.dispatch.clone(),
            text_model: SanitizedModelConfig {
                backend: match config.text_model.backend {
                    TextBackend::Anthropic => "anthropic".to_string(),
                    TextBackend::Ollama => "ollama".to_string(),
                },
                model: config.text_model.model.clone(),
                api_key_configured: config
                    .text_model
                    .api_key
                    .as_ref()
                    .map(|k| !k.is_empty())
                    .unwrap_or(false),
            },
            image_model: SanitizedModelConfig {
                backend: "openai".to_string(),
                model: config.image_model.model.clone(),
                api_key_configured: !config.image_model.api_key.is_empty(),
            },
        }
    }
}
