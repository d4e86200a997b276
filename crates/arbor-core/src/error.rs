use thiserror::Error;

use crate::api::ApiError;
use crate::app::conversation::MessageId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Cursor pointed at an id that is not in the tree.
    #[error("Invalid pointer: message {0} does not exist")]
    InvalidPointer(MessageId),
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("Model not selected")]
    NoModelSelected,
    #[error("Prompt is empty and has no attachments")]
    EmptyPrompt,
    #[error("A generation is already in progress for this conversation")]
    GenerationInProgress,
    /// An engine bug: a mutation produced a tree that breaks a structural invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
