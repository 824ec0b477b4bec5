//! Error types for ID derivation and parsing.

use thiserror::Error;

/// Errors that can occur when deriving or parsing IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID does not have the expected length.
    #[error("invalid ID length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The ID contains characters outside lowercase hex.
    #[error("invalid ID character: {0:?}")]
    InvalidCharacter(char),

    /// The descriptor has no services to derive an ID from.
    #[error("there is no services field")]
    NoServices,

    /// A service in the descriptor has no image.
    #[error("service '{service}' has no image field")]
    MissingImage { service: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error was raised while deriving from a descriptor.
    pub fn is_descriptor_error(&self) -> bool {
        matches!(self, IdError::NoServices | IdError::MissingImage { .. })
    }
}
