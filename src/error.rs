//! Error taxonomy shared by the store, the REST surface and the client.

use thiserror::Error;

use crate::storage::StorageError;
use crate::story::StoryId;

/// Result type for story operations
pub type StoryResult<T> = Result<T, StoryError>;

/// Errors surfaced by story operations, on either side of the wire
#[derive(Error, Debug)]
pub enum StoryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Story not found: {0}")]
    NotFound(StoryId),

    #[error("User {requester} may not modify story {story_id}")]
    Forbidden { story_id: StoryId, requester: String },

    #[error("Network error: {0}")]
    Network(String),

    /// The client cache was asked to perform a transition its state machine forbids
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::Network(_) => "network_error",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<sled::Error> for StoryError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(StorageError::Sled(err))
    }
}

impl From<bincode::Error> for StoryError {
    fn from(err: bincode::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_error_display() {
        let err = StoryError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "Story not found: abc");
        assert!(err.is_not_found());
        assert_eq!(err.code(), "not_found");

        let err = StoryError::Forbidden {
            story_id: "abc".to_string(),
            requester: "mallory".to_string(),
        };
        assert_eq!(err.to_string(), "User mallory may not modify story abc");
    }
}
