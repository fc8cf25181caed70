mod paths;
mod settings;

pub use paths::StatePaths;
pub use settings::{Settings, DEFAULT_RUNNER_BIN, DEFAULT_TARGET_HOSTS};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    MissingVar { name: String },
    #[error("environment variable {name} must not be empty")]
    EmptyVar { name: String },
    #[error("invalid value for {name}: {reason}")]
    InvalidVar { name: String, reason: String },
}
