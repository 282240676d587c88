use analyst_protocol::ContentError;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced to callers of the client core
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported server URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("artifact {0} is not open")]
    ArtifactNotOpen(String),

    #[error("client event loop has stopped")]
    ActorClosed,
}
