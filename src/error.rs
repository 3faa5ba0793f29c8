// vault-tasks/src/error.rs

use thiserror::Error;

use crate::task::DocumentId;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("could not read {id}: {source}")]
    Unreadable { id: DocumentId, #[source] source: std::io::Error },

    #[error("could not write {id}: {source}")]
    WriteFailure { id: DocumentId, #[source] source: std::io::Error },

    /// The line a task was parsed from has changed since the last parse.
    #[error("stale reference: line {line} of {id} no longer holds the task")]
    StaleReference { id: DocumentId, line: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for TaskError {
    fn from(e: toml::de::Error) -> Self {
        TaskError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for TaskError {
    fn from(e: toml::ser::Error) -> Self {
        TaskError::Config(e.to_string())
    }
}

impl From<notify::Error> for TaskError {
    fn from(e: notify::Error) -> Self {
        TaskError::Io(std::io::Error::other(e.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
