//! Errors raised by [`StateManager`](super::StateManager) operations

use crate::models::Phase;
use std::path::PathBuf;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Session not found: {session_id} at {}", .path.display())]
    SessionNotFound { session_id: String, path: PathBuf },

    #[error("Invalid state.json: {0}")]
    Validation(String),

    #[error("Invalid phase transition: {from} → {to}")]
    InvalidPhaseTransition { from: Phase, to: Phase },

    /// Checkpoint argument rejected; the manifest is left untouched
    #[error("{0}")]
    InvalidCheckpoint(String),

    #[error("No state loaded. Call load() first.")]
    NotLoaded,

    #[error("Session already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Failed to write state.json: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize state.json: {0}")]
    Serialize(#[from] serde_json::Error),
}
