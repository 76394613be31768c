use thiserror::Error;
use tpmsync_types::Token;

/// Errors from registry lookups and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no open session for token {0}")]
    NotFound(Token),

    #[error("session {0} already has a subscriber")]
    AlreadySubscribed(Token),

    #[error("session {0} is already registered")]
    Duplicate(Token),
}
