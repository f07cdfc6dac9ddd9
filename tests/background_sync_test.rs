//! Save callback → task pool → reconciler wiring

use async_trait::async_trait;
use sessiond::models::{IndexRecord, Phase, Status};
use sessiond::pool::{make_pooled_sync_callback, SubmitOutcome, SyncTaskPool};
use sessiond::state::{init_session, NewSession, StateManager};
use sessiond::store::{IndexStore, SqliteIndexStore, StoreError, StoreResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Index store whose every call fails
#[derive(Default)]
struct UnreachableStore {
    calls: AtomicUsize,
}

#[async_trait]
impl IndexStore for UnreachableStore {
    async fn get_by_slug(&self, _slug: &str) -> StoreResult<Option<IndexRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Corrupt("connection refused".to_string()))
    }

    async fn create(&self, _record: IndexRecord) -> StoreResult<IndexRecord> {
        Err(StoreError::Corrupt("connection refused".to_string()))
    }

    async fn update(&self, id: Uuid, _record: IndexRecord) -> StoreResult<IndexRecord> {
        Err(StoreError::NotFound(id))
    }

    async fn list(&self) -> StoreResult<Vec<IndexRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_index_converges_to_last_saved_manifest() {
    let temp = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteIndexStore::open(db_dir.path().join("index.db")).unwrap());
    let pool = Arc::new(SyncTaskPool::new(3));
    let callback = make_pooled_sync_callback(
        pool.clone(),
        store.clone(),
        temp.path().to_path_buf(),
        None,
    );

    let request = NewSession {
        session_id: Some("search".to_string()),
        ..NewSession::new("Search")
    };
    let mut manager = init_session(temp.path(), request, Some(callback)).unwrap();
    manager.transition_to_phase(Phase::Plan).unwrap();
    manager.transition_to_phase(Phase::Build).unwrap();
    manager.init_build_progress(2).unwrap();
    manager.complete_checkpoint(1).unwrap();
    manager.set_status(Status::Paused).unwrap();

    pool.shutdown(Duration::from_secs(10)).await;
    assert_eq!(pool.pending_count(), 0);

    // Queued reconciliations may run in any order; a final pass settles the index
    let settled = sessiond::sync::sync_one(store.as_ref(), temp.path(), "search", None)
        .await
        .unwrap();
    let records = store.list().await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0], settled);
    assert_eq!(settled.current_phase, Phase::Build);
    assert_eq!(settled.status, Status::Paused);
    assert_eq!(settled.checkpoints_completed_list, vec![1]);
    assert_eq!(settled.current_checkpoint, Some(2));
}

#[tokio::test]
async fn test_failing_index_never_blocks_mutations() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(UnreachableStore::default());
    let pool = Arc::new(SyncTaskPool::new(2));
    let callback = make_pooled_sync_callback(
        pool.clone(),
        store.clone(),
        temp.path().to_path_buf(),
        None,
    );

    let request = NewSession {
        session_id: Some("search".to_string()),
        ..NewSession::new("Search")
    };
    let mut manager = init_session(temp.path(), request, Some(callback)).unwrap();
    manager.transition_to_phase(Phase::Plan).unwrap();
    manager.add_commit("abc1234", "wip", None).unwrap();

    pool.shutdown(Duration::from_secs(5)).await;

    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    let reloaded = StateManager::open(manager.session_dir()).unwrap();
    assert_eq!(reloaded.phase(), Some(Phase::Plan));
    assert_eq!(reloaded.manifest().unwrap().commits.len(), 1);
}

#[tokio::test]
async fn test_submissions_after_shutdown_never_run() {
    let pool = SyncTaskPool::default();
    pool.shutdown(Duration::from_secs(1)).await;

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let outcome = pool.submit(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert_eq!(outcome, SubmitOutcome::ShuttingDown);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}
