//! End-to-end session lifecycle tests
//!
//! Drives a fresh session through spec → plan → build with checkpoints and
//! checks that reconciliation mirrors the final manifest and the artifacts
//! actually present on disk, against both index store implementations.

use sessiond::models::Phase;
use sessiond::state::{init_session, NewSession, StateError, StateManager};
use sessiond::store::{InMemoryIndexStore, IndexStore, SqliteIndexStore};
use sessiond::sync::sync_one;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn drive_to_build_complete(project_root: &Path, slug: &str) -> StateManager {
    let request = NewSession {
        session_id: Some(slug.to_string()),
        ..NewSession::new("Checkout flow")
    };
    let mut manager = init_session(project_root, request, None).unwrap();
    assert_eq!(manager.phase(), Some(Phase::Spec));

    manager.transition_to_phase(Phase::Plan).unwrap();
    manager.transition_to_phase(Phase::Build).unwrap();
    manager.init_build_progress(3).unwrap();
    for id in 1..=3 {
        manager.complete_checkpoint(id).unwrap();
    }

    manager
}

async fn assert_lifecycle_reconciles(store: &dyn IndexStore) {
    let temp = TempDir::new().unwrap();
    let manager = drive_to_build_complete(temp.path(), "checkout");

    let manifest = manager.manifest().unwrap();
    assert_eq!(manifest.current_phase, Phase::Build);
    assert_eq!(manifest.build_progress.checkpoints_completed, vec![1, 2, 3]);
    assert_eq!(manifest.build_progress.current_checkpoint, None);

    // Only spec.md and plan.json exist; plan.md was never written
    fs::write(manager.session_dir().join("spec.md"), "# Spec").unwrap();
    fs::write(manager.session_dir().join("plan.json"), "{}").unwrap();

    let record = sync_one(store, temp.path(), "checkout", None).await.unwrap();

    assert_eq!(record.session_slug, "checkout");
    assert_eq!(record.title.as_deref(), Some("Checkout flow"));
    assert_eq!(record.current_phase, Phase::Build);
    assert_eq!(record.checkpoints_total, 3);
    assert_eq!(record.checkpoints_completed, 3);
    assert_eq!(record.checkpoints_completed_list, vec![1, 2, 3]);
    assert_eq!(record.current_checkpoint, None);
    assert!(record.spec_exists);
    assert!(record.plan_exists);
    assert!(!record.plan_readable_exists);
    assert_eq!(
        record.phase_history.plan_completed_at,
        record.phase_history.build_started_at
    );

    // Re-running against an unchanged manifest is a no-op
    let again = sync_one(store, temp.path(), "checkout", None).await.unwrap();
    assert_eq!(again, record);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lifecycle_reconciles_in_memory() {
    let store = InMemoryIndexStore::new();
    assert_lifecycle_reconciles(&store).await;
}

#[tokio::test]
async fn test_lifecycle_reconciles_sqlite() {
    let db_dir = TempDir::new().unwrap();
    let store = SqliteIndexStore::open(db_dir.path().join("sessions.db")).unwrap();
    assert_lifecycle_reconciles(&store).await;
}

#[test]
fn test_rejected_operations_leave_manifest_bytes_unchanged() {
    let temp = TempDir::new().unwrap();
    let mut manager = drive_to_build_complete(temp.path(), "checkout");
    let before = fs::read(manager.state_file()).unwrap();

    assert!(matches!(
        manager.transition_to_phase(Phase::Spec),
        Err(StateError::InvalidPhaseTransition { .. })
    ));
    assert!(matches!(
        manager.complete_checkpoint(2),
        Err(StateError::InvalidCheckpoint(_))
    ));
    assert!(matches!(
        manager.init_build_progress(0),
        Err(StateError::InvalidCheckpoint(_))
    ));
    assert!(matches!(
        manager.start_checkpoint(4),
        Err(StateError::InvalidCheckpoint(_))
    ));

    assert_eq!(fs::read(manager.state_file()).unwrap(), before);
    assert!(!manager.session_dir().join("state.json.tmp").exists());
}

#[test]
fn test_reload_round_trip_through_docs_to_complete() {
    let temp = TempDir::new().unwrap();
    let mut manager = drive_to_build_complete(temp.path(), "checkout");
    manager.add_commit("abc1234", "feat: checkout", Some(3)).unwrap();
    manager.transition_to_phase(Phase::Docs).unwrap();
    manager.transition_to_phase(Phase::Complete).unwrap();

    let reloaded = StateManager::open(manager.session_dir()).unwrap();
    let (saved, loaded) = (manager.manifest().unwrap(), reloaded.manifest().unwrap());

    assert_eq!(loaded, saved);
    assert_eq!(loaded.current_phase, Phase::Complete);
    assert!(loaded.phase_history.docs_completed_at.is_some());
    assert_eq!(loaded.commits.len(), 1);
    assert!(!reloaded.can_transition_to(Phase::Docs));
}
