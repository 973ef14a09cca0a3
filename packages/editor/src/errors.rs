//! Error types for the editor

use thiserror::Error;
use vellum_document::ModelError;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("A transaction is already open")]
    TransactionOpen,

    #[error("No transaction is open")]
    NoTransaction,

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Unresolved target: {0}")]
    Unresolved(String),

    #[error("Document diverged: {0}")]
    Mismatch(String),

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Unknown attribute '{attr}' on {scope}")]
    UnknownAttribute { scope: &'static str, attr: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EditorError {
    /// True for errors caused by the local document not matching what the
    /// sender of a command saw
    pub fn is_divergence(&self) -> bool {
        matches!(self, EditorError::Unresolved(_) | EditorError::Mismatch(_))
    }
}
