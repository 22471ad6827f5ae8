//! Configuration loading and types.

mod loader;
mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::{
    ArtifactConfig, Config, DatabaseConfig, ImageModelConfig, SanitizedConfig,
    SanitizedModelConfig, ServerConfig, TextBackend, TextModelConfig,
};

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
