use std::path::PathBuf;
use thiserror::Error;
use tpmsync_core::SettingsError;
use tpmsync_registry::RegistryError;

/// Errors loading or validating a simulation settings document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse simulation settings: {0}")]
    Parse(String),

    #[error("invalid simulation settings: {0}")]
    Invalid(String),
}

/// Errors from the time source.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("time server I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve time server {0}")]
    Resolve(String),

    #[error("malformed time server response: {0}")]
    MalformedResponse(String),
}

/// Errors persisting a trial result.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("result sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode result record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("worker pool overloaded ({queue_depth} groups queued)")]
    Overloaded { queue_depth: usize },
}
