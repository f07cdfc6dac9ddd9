//! Reconciliation across manifest schema generations and whole projects

use serde_json::{json, Value};
use sessiond::models::{Phase, SessionType, Status};
use sessiond::store::{InMemoryIndexStore, IndexStore, SqliteIndexStore};
use sessiond::sync::{onboard_project, sessions_root, sync_all, sync_one, FailureReason};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

fn write_session(root: &Path, slug: &str, manifest: &Value) {
    let dir = sessions_root(root).join(slug);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("state.json"), serde_json::to_string_pretty(manifest).unwrap()).unwrap();
}

fn legacy_manifest() -> Value {
    json!({
        "session_id": "legacy",
        "topic": "Payments",
        "granularity": "quick",
        "phases": {
            "spec": {"status": "finalized", "started_at": "2026-01-10T09:00:00Z", "finalized_at": "2026-01-10T11:00:00Z"},
            "plan": {"status": "finalized", "started_at": "2026-01-10T11:00:00Z", "finalized_at": "2026-01-11T09:00:00Z"},
            "build": {"status": "in_progress", "started_at": "2026-01-11T09:00:00Z"}
        },
        "plan_state": {
            "status": "approved",
            "checkpoints_total": 4,
            "checkpoints_completed": [1, 2],
            "current_checkpoint": 3
        },
        "commits": [
            {"sha": "aaa1111", "message": "cp1", "checkpoint_id": 1, "created_at": "2026-01-11T10:00:00Z"},
            {"sha": "bbb2222", "message": "cp2", "checkpoint_id": 2, "created_at": "2026-01-11T12:00:00Z"}
        ]
    })
}

fn current_manifest() -> Value {
    json!({
        "session_id": "current",
        "topic": "Payments",
        "session_type": "quick",
        "created_at": "2026-01-10T09:00:00Z",
        "updated_at": "2026-01-11T12:00:00Z",
        "current_phase": "build",
        "status": "active",
        "phase_history": {
            "spec_started_at": "2026-01-10T09:00:00Z",
            "spec_completed_at": "2026-01-10T11:00:00Z",
            "plan_started_at": "2026-01-10T11:00:00Z",
            "plan_completed_at": "2026-01-11T09:00:00Z",
            "build_started_at": "2026-01-11T09:00:00Z"
        },
        "build_progress": {
            "checkpoints_total": 4,
            "checkpoints_completed": [1, 2],
            "current_checkpoint": 3
        },
        "git": {"branch": null, "worktree": null, "base_branch": null},
        "commits": [
            {"sha": "aaa1111", "message": "cp1", "checkpoint": 1, "created_at": "2026-01-11T10:00:00Z"},
            {"sha": "bbb2222", "message": "cp2", "checkpoint": 2, "created_at": "2026-01-11T12:00:00Z"}
        ],
        "artifacts": {"spec": "spec.md", "plan": "plan.json", "plan_readable": "plan.md"}
    })
}

#[tokio::test]
async fn test_generations_produce_equivalent_records() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryIndexStore::new();
    write_session(temp.path(), "legacy", &legacy_manifest());
    write_session(temp.path(), "current", &current_manifest());

    let legacy = sync_one(&store, temp.path(), "legacy", None).await.unwrap();
    let current = sync_one(&store, temp.path(), "current", None).await.unwrap();

    assert_ne!(legacy.id, current.id);
    assert_eq!(legacy.current_phase, Phase::Build);
    assert_eq!(legacy.current_phase, current.current_phase);
    assert_eq!(legacy.checkpoints_total, current.checkpoints_total);
    assert_eq!(legacy.checkpoints_completed, current.checkpoints_completed);
    assert_eq!(legacy.checkpoints_completed_list, current.checkpoints_completed_list);
    assert_eq!(legacy.current_checkpoint, current.current_checkpoint);
    assert_eq!(legacy.session_type, SessionType::Quick);
    assert_eq!(legacy.session_type, current.session_type);
    assert_eq!(legacy.status, Status::Active);
    assert_eq!(legacy.phase_history, current.phase_history);
    assert_eq!(legacy.commits, current.commits);
    assert_eq!(legacy.artifacts, current.artifacts);
}

#[tokio::test]
async fn test_sync_all_total_matches_session_directories() {
    let temp = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let store = SqliteIndexStore::open(db_dir.path().join("index.db")).unwrap();

    write_session(temp.path(), "legacy", &legacy_manifest());
    write_session(temp.path(), "current", &current_manifest());
    fs::create_dir_all(sessions_root(temp.path()).join("no-manifest")).unwrap();
    let bad = sessions_root(temp.path()).join("bad-json");
    fs::create_dir_all(&bad).unwrap();
    fs::write(bad.join("state.json"), "{\"topic\": ").unwrap();
    let bad_phase = sessions_root(temp.path()).join("bad-phase");
    fs::create_dir_all(&bad_phase).unwrap();
    fs::write(bad_phase.join("state.json"), r#"{"build_progress": {}, "current_phase": "review"}"#).unwrap();

    let subdirs = fs::read_dir(sessions_root(temp.path()))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();

    let project = Uuid::new_v4();
    let summary = sync_all(&store, temp.path(), Some(project)).await.unwrap();

    assert_eq!(summary.total, subdirs);
    assert_eq!(summary.total, summary.synced.len() + summary.failed.len());
    assert_eq!(summary.synced.len(), 2);
    assert_eq!(summary.failed.len(), 3);

    let reason_of = |slug: &str| {
        summary
            .failed
            .iter()
            .find(|f| f.slug == slug)
            .map(|f| f.reason)
    };
    assert_eq!(reason_of("no-manifest"), Some(FailureReason::ManifestNotFound));
    assert_eq!(reason_of("bad-json"), Some(FailureReason::InvalidManifest));
    assert_eq!(reason_of("bad-phase"), Some(FailureReason::InvalidManifest));

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.project_id == Some(project)));

    // A second pass updates in place
    let again = sync_all(&store, temp.path(), None).await.unwrap();
    let ids: Vec<_> = again.synced.iter().map(|s| s.id).collect();
    let expected: Vec<_> = summary.synced.iter().map(|s| s.id).collect();
    assert_eq!(ids, expected);
    assert!(store
        .list()
        .await
        .unwrap()
        .iter()
        .all(|r| r.project_id == Some(project)));
}

#[tokio::test]
async fn test_onboard_project_attaches_sessions() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryIndexStore::new();
    write_session(temp.path(), "legacy", &legacy_manifest());
    fs::create_dir_all(sessions_root(temp.path()).join("scratch")).unwrap();

    let project = Uuid::new_v4();
    let records = onboard_project(&store, temp.path(), project).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].project_id, Some(project));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_manifests_written_by_other_tooling_reconcile() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryIndexStore::new();

    let mut api_initial = current_manifest();
    api_initial["$schema"] = json!("Session state manifest v2 - programmatic updates only");
    api_initial["granularity"] = json!("feature");
    api_initial["current_phase"] = json!("spec");
    api_initial["build_progress"] = json!({
        "checkpoints_total": 0,
        "checkpoints_completed": null,
        "current_checkpoint": null
    });
    api_initial["git"] = Value::Null;
    write_session(temp.path(), "api", &api_initial);

    let mut legacy = legacy_manifest();
    legacy["granularity"] = json!("feature");
    write_session(temp.path(), "legacy", &legacy);

    let api = sync_one(&store, temp.path(), "api", None).await.unwrap();
    assert_eq!(api.current_phase, Phase::Spec);
    assert_eq!(api.checkpoints_total, 0);
    assert!(api.checkpoints_completed_list.is_empty());
    assert_eq!(api.git_branch, None);

    let legacy = sync_one(&store, temp.path(), "legacy", None).await.unwrap();
    assert_eq!(legacy.session_type, SessionType::Full);
    assert_eq!(legacy.current_phase, Phase::Build);
}
