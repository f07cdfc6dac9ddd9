//! Session index synchronization
//!
//! Reads manifests of either schema generation from disk and upserts them
//! into an [`IndexStore`](crate::store::IndexStore).

mod error;
pub mod reconciler;
pub mod schema;

pub use error::{SyncError, SyncResult};
pub use reconciler::{
    onboard_project, session_dir, sessions_root, sync_all, sync_one, FailedSession,
    FailureReason, SyncSummary, SyncedSession, SESSIONS_DIR,
};
pub use schema::{ManifestGeneration, SessionSnapshot};
