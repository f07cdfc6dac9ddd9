//! Save callbacks that push manifest changes into the index

use super::{SubmitOutcome, SyncTaskPool};
use crate::state::SaveCallback;
use crate::store::IndexStore;
use crate::sync::{sync_all, sync_one};
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Build a [`SaveCallback`] that schedules [`sync_one`] for the saved session.
///
/// The callback only schedules; it returns before reconciliation runs. The
/// reconciliation re-reads the manifest from disk when it executes.
pub fn make_pooled_sync_callback(
    pool: Arc<SyncTaskPool>,
    store: Arc<dyn IndexStore>,
    project_root: PathBuf,
    project_id: Option<Uuid>,
) -> SaveCallback {
    Arc::new(move |session_dir: &Path| -> anyhow::Result<()> {
        let slug = session_dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("session directory has no name: {}", session_dir.display()))?;

        let store = store.clone();
        let project_root = project_root.clone();
        let task_slug = slug.clone();

        let outcome = pool.submit(async move {
            sync_one(store.as_ref(), &project_root, &task_slug, project_id).await?;
            Ok(())
        });

        if !outcome.is_scheduled() {
            debug!(slug = %slug, ?outcome, "Index sync not scheduled");
        }

        Ok(())
    })
}

/// Schedule [`sync_all`] for the whole project without waiting for it.
///
/// Per-session failures are logged from the background task.
pub fn queue_batch_sync(
    pool: &SyncTaskPool,
    store: Arc<dyn IndexStore>,
    project_root: PathBuf,
    project_id: Option<Uuid>,
) -> SubmitOutcome {
    let outcome = pool.submit(async move {
        let summary = sync_all(store.as_ref(), &project_root, project_id).await?;
        for failed in &summary.failed {
            warn!(slug = %failed.slug, reason = %failed.reason, detail = %failed.detail, "Batch sync skipped session");
        }
        info!(
            project_root = %project_root.display(),
            synced = summary.synced.len(),
            total = summary.total,
            "Batch sync finished"
        );
        Ok(())
    });

    if !outcome.is_scheduled() {
        warn!(?outcome, "Batch sync not scheduled");
    }
    outcome
}
