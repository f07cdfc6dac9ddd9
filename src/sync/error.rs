use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Session '{slug}' not found at {}", .path.display())]
    NotFoundOnFilesystem { slug: String, path: PathBuf },

    #[error("Invalid manifest for '{slug}': {error}")]
    InvalidManifest { slug: String, error: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
