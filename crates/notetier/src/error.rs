use thiserror::Error;

use crate::codec::ParseError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Note {0} was modified concurrently")]
    Conflict(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl NoteError {
    /// Whether the error is a revision conflict that a refresh-and-retry can resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, NoteError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, NoteError>;
