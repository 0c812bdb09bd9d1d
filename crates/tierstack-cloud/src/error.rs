//! Apply engine error types

use thiserror::Error;
use tierstack_core::StackError;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Unresolved token in {resource}: {token}")]
    UnresolvedToken { resource: String, token: String },

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Secret store error: {0}")]
    Secret(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    /// Synthesized properties changed in a way the backend cannot apply
    #[error("Drift on {logical_id}: {reason}")]
    Drift { logical_id: String, reason: String },

    /// A level failed; earlier successes are already recorded in state
    #[error("Apply aborted at {logical_id}: {reason}")]
    ApplyAborted { logical_id: String, reason: String },

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
