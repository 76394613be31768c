//! Errors raised while building trial settings.

use thiserror::Error;

/// Configuration errors. Each one rejects a single parameter combination;
/// none is fatal to a running sweep.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("infeasible structure: {0}")]
    InfeasibleStructure(String),

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
}
