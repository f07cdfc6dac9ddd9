// sessiond - session manifest state machine with an eventually consistent index
// The manifest on disk is authoritative; the index is rebuilt from it on demand

pub mod cli;
pub mod config;
pub mod logging;
pub mod models;
pub mod pool;
pub mod state;
pub mod store;
pub mod sync;

pub use anyhow::{Context, Result};

// Re-export commonly used types
pub use models::{IndexRecord, Phase, SessionManifest, SessionType, Status};
pub use pool::{make_pooled_sync_callback, queue_batch_sync, SubmitOutcome, SyncTaskPool};
pub use state::{init_session, NewSession, StateError, StateManager};
pub use store::{InMemoryIndexStore, IndexStore, SqliteIndexStore};
pub use sync::{onboard_project, sync_all, sync_one, SyncError, SyncSummary};
