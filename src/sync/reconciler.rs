//! Filesystem → index reconciliation
//!
//! The manifest on disk is the source of truth. Every call re-reads it and
//! upserts an equivalent [`IndexRecord`] keyed by session slug.

use super::error::{SyncError, SyncResult};
use super::schema::{self, SessionSnapshot};
use crate::models::{IndexRecord, Phase, Status, MANIFEST_FILE};
use crate::store::{IndexStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directory holding one subdirectory per session, relative to the project root
pub const SESSIONS_DIR: &str = "agents/sessions";

pub fn sessions_root(project_root: &Path) -> PathBuf {
    project_root.join(SESSIONS_DIR)
}

pub fn session_dir(project_root: &Path, slug: &str) -> PathBuf {
    sessions_root(project_root).join(slug)
}

// =============================================================================
// Batch summary
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncedSession {
    pub slug: String,
    pub id: Uuid,
    pub current_phase: Phase,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureReason {
    #[serde(rename = "manifest not found")]
    ManifestNotFound,
    #[serde(rename = "invalid manifest")]
    InvalidManifest,
    #[serde(rename = "invalid session name")]
    InvalidName,
    #[serde(rename = "unexpected error")]
    Unexpected,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ManifestNotFound => "manifest not found",
            FailureReason::InvalidManifest => "invalid manifest",
            FailureReason::InvalidName => "invalid session name",
            FailureReason::Unexpected => "unexpected error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedSession {
    pub slug: String,
    pub reason: FailureReason,
    /// Manifest path or underlying error message
    pub detail: String,
}

impl FailedSession {
    fn from_error(slug: &str, err: &SyncError) -> Self {
        let (reason, detail) = match err {
            SyncError::NotFoundOnFilesystem { path, .. } => {
                (FailureReason::ManifestNotFound, path.display().to_string())
            }
            SyncError::InvalidManifest { error, .. } => {
                (FailureReason::InvalidManifest, error.clone())
            }
            other => (FailureReason::Unexpected, other.to_string()),
        };
        Self {
            slug: slug.to_string(),
            reason,
            detail,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncSummary {
    pub synced: Vec<SyncedSession>,
    pub failed: Vec<FailedSession>,
    /// Always `synced.len() + failed.len()`
    pub total: usize,
}

impl SyncSummary {
    fn push_synced(&mut self, record: &IndexRecord) {
        self.synced.push(SyncedSession {
            slug: record.session_slug.clone(),
            id: record.id,
            current_phase: record.current_phase,
            status: record.status,
        });
        self.total += 1;
    }

    fn push_failed(&mut self, failed: FailedSession) {
        self.failed.push(failed);
        self.total += 1;
    }
}

// =============================================================================
// Single session
// =============================================================================

/// Read `{project_root}/agents/sessions/{slug}/state.json` and upsert it into `store`.
///
/// An existing record keeps its identity and has every mapped field
/// overwritten; `project_id` is only replaced when one is supplied.
pub async fn sync_one(
    store: &dyn IndexStore,
    project_root: &Path,
    slug: &str,
    project_id: Option<Uuid>,
) -> SyncResult<IndexRecord> {
    let session_dir = session_dir(project_root, slug);
    let manifest_path = session_dir.join(MANIFEST_FILE);

    let raw = match tokio::fs::read_to_string(&manifest_path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SyncError::NotFoundOnFilesystem {
                slug: slug.to_string(),
                path: manifest_path,
            });
        }
        Err(err) => return Err(err.into()),
    };

    let snapshot = schema::parse_manifest(&raw).map_err(|error| SyncError::InvalidManifest {
        slug: slug.to_string(),
        error,
    })?;

    let presence = ArtifactPresence::probe(&session_dir, &snapshot).await;
    let working_dir = absolute(project_root);
    let session_dir = absolute(&session_dir);

    let record = build_record(
        slug,
        project_id,
        &working_dir,
        &session_dir,
        snapshot,
        presence,
    );

    let record = match store.get_by_slug(slug).await? {
        Some(existing) => overwrite(store, existing, record).await?,
        None => match store.create(record.clone()).await {
            Ok(created) => created,
            Err(StoreError::DuplicateSlug(_)) => {
                // A concurrent sync created the slug between lookup and insert
                let existing = store
                    .get_by_slug(slug)
                    .await?
                    .ok_or_else(|| StoreError::DuplicateSlug(slug.to_string()))?;
                overwrite(store, existing, record).await?
            }
            Err(err) => return Err(err.into()),
        },
    };

    debug!(
        slug = %slug,
        id = %record.id,
        phase = %record.current_phase,
        "Reconciled session into index"
    );

    Ok(record)
}

/// Artifact existence as observed on disk at reconciliation time
#[derive(Debug, Clone, Copy, Default)]
struct ArtifactPresence {
    spec: bool,
    plan: bool,
    plan_readable: bool,
}

impl ArtifactPresence {
    async fn probe(session_dir: &Path, snapshot: &SessionSnapshot) -> Self {
        let artifacts = &snapshot.artifacts;
        Self {
            spec: is_file(&session_dir.join(&artifacts.spec)).await,
            plan: is_file(&session_dir.join(&artifacts.plan)).await,
            plan_readable: is_file(&session_dir.join(&artifacts.plan_readable)).await,
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Update `existing` in place, keeping its identity and any project it belongs to
async fn overwrite(
    store: &dyn IndexStore,
    existing: IndexRecord,
    mut record: IndexRecord,
) -> SyncResult<IndexRecord> {
    record.id = existing.id;
    record.project_id = record.project_id.or(existing.project_id);
    Ok(store.update(existing.id, record).await?)
}

/// Map a snapshot onto a record with a fresh identity
fn build_record(
    slug: &str,
    project_id: Option<Uuid>,
    working_dir: &str,
    session_dir: &str,
    snapshot: SessionSnapshot,
    presence: ArtifactPresence,
) -> IndexRecord {
    let progress = snapshot.build_progress;

    IndexRecord {
        id: Uuid::new_v4(),
        session_slug: slug.to_string(),
        project_id,
        title: snapshot.topic,
        description: snapshot.description,
        session_type: snapshot.session_type,
        working_dir: working_dir.to_string(),
        session_dir: session_dir.to_string(),
        current_phase: snapshot.current_phase,
        status: snapshot.status,
        phase_history: snapshot.phase_history,
        checkpoints_total: progress.checkpoints_total.unwrap_or(0),
        checkpoints_completed: progress.checkpoints_completed.len() as u32,
        checkpoints_completed_list: progress.checkpoints_completed,
        current_checkpoint: progress.current_checkpoint,
        git_branch: snapshot.git.branch,
        git_worktree: snapshot.git.worktree,
        git_base_branch: snapshot.git.base_branch,
        spec_exists: presence.spec,
        plan_exists: presence.plan,
        plan_readable_exists: presence.plan_readable,
        commits: snapshot.commits,
        artifacts: snapshot.artifacts,
        manifest_updated_at: snapshot.updated_at,
    }
}

// =============================================================================
// Whole project
// =============================================================================

/// One immediate subdirectory of the sessions root
struct SessionDirEntry {
    /// Directory name, lossily decoded when it is not valid UTF-8
    slug: String,
    path: PathBuf,
    utf8_name: bool,
}

/// Immediate subdirectories of the sessions root, sorted by name.
///
/// A missing sessions root yields no entries.
async fn session_dirs(project_root: &Path) -> SyncResult<Vec<SessionDirEntry>> {
    let root = sessions_root(project_root);
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if is_dir {
            let name = entry.file_name();
            dirs.push(SessionDirEntry {
                slug: name.to_string_lossy().into_owned(),
                utf8_name: name.to_str().is_some(),
                path,
            });
        }
    }
    dirs.sort_by(|a, b| a.slug.cmp(&b.slug));

    Ok(dirs)
}

/// Reconcile every session directory, recording failures instead of aborting.
///
/// `total` equals the number of immediate subdirectories of the sessions root.
pub async fn sync_all(
    store: &dyn IndexStore,
    project_root: &Path,
    project_id: Option<Uuid>,
) -> SyncResult<SyncSummary> {
    let mut summary = SyncSummary::default();

    for SessionDirEntry { slug, path, utf8_name } in session_dirs(project_root).await? {
        if !utf8_name {
            warn!(path = %path.display(), "Session directory name is not valid UTF-8");
            summary.push_failed(FailedSession {
                slug,
                reason: FailureReason::InvalidName,
                detail: path.display().to_string(),
            });
            continue;
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !is_file(&manifest_path).await {
            warn!(slug = %slug, path = %manifest_path.display(), "Session has no manifest");
            summary.push_failed(FailedSession {
                slug,
                reason: FailureReason::ManifestNotFound,
                detail: manifest_path.display().to_string(),
            });
            continue;
        }

        match sync_one(store, project_root, &slug, project_id).await {
            Ok(record) => summary.push_synced(&record),
            Err(err) => {
                warn!(slug = %slug, error = %err, "Failed to sync session");
                summary.push_failed(FailedSession::from_error(&slug, &err));
            }
        }
    }

    info!(
        synced = summary.synced.len(),
        failed = summary.failed.len(),
        total = summary.total,
        "Project sync finished"
    );

    Ok(summary)
}

/// Attach every session with a manifest to `project_id`.
///
/// Directories without a manifest are skipped silently; unreadable manifests
/// are skipped with a warning. Index store failures abort.
pub async fn onboard_project(
    store: &dyn IndexStore,
    project_root: &Path,
    project_id: Uuid,
) -> SyncResult<Vec<IndexRecord>> {
    let mut records = Vec::new();

    for SessionDirEntry { slug, path, utf8_name } in session_dirs(project_root).await? {
        if !utf8_name {
            warn!(path = %path.display(), "Skipping session with non UTF-8 name");
            continue;
        }
        if !is_file(&path.join(MANIFEST_FILE)).await {
            continue;
        }

        match sync_one(store, project_root, &slug, Some(project_id)).await {
            Ok(record) => records.push(record),
            Err(err @ (SyncError::NotFoundOnFilesystem { .. } | SyncError::InvalidManifest { .. })) => {
                warn!(slug = %slug, error = %err, "Skipping session during onboarding");
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        project_id = %project_id,
        sessions = records.len(),
        "Onboarded project sessions"
    );

    Ok(records)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryIndexStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_manifest(root: &Path, slug: &str, manifest: serde_json::Value) -> PathBuf {
        let dir = session_dir(root, slug);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        dir
    }

    fn current_manifest(phase: &str) -> serde_json::Value {
        json!({
            "session_id": "s",
            "topic": "Auth rework",
            "current_phase": phase,
            "status": "active",
            "phase_history": {},
            "build_progress": {"checkpoints_total": 3, "checkpoints_completed": [1], "current_checkpoint": 2},
            "git": {"branch": "feature/auth", "base_branch": "main"},
            "commits": [],
            "updated_at": "2026-01-15T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_sync_one_creates_then_updates_in_place() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();
        let dir = write_manifest(temp.path(), "auth", current_manifest("build"));
        std::fs::write(dir.join("spec.md"), "# spec").unwrap();

        let created = sync_one(&store, temp.path(), "auth", None).await.unwrap();
        assert_eq!(created.current_phase, Phase::Build);
        assert_eq!(created.checkpoints_total, 3);
        assert_eq!(created.checkpoints_completed, 1);
        assert_eq!(created.git_branch.as_deref(), Some("feature/auth"));
        assert!(created.spec_exists);
        assert!(!created.plan_exists);

        let again = sync_one(&store, temp.path(), "auth", None).await.unwrap();
        assert_eq!(again, created);

        write_manifest(temp.path(), "auth", current_manifest("docs"));
        std::fs::write(dir.join("plan.json"), "{}").unwrap();
        let updated = sync_one(&store, temp.path(), "auth", None).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.current_phase, Phase::Docs);
        assert!(updated.plan_exists);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_sync_one_project_id_only_overwritten_when_supplied() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();
        write_manifest(temp.path(), "auth", current_manifest("spec"));
        let project = Uuid::new_v4();

        sync_one(&store, temp.path(), "auth", Some(project)).await.unwrap();
        let record = sync_one(&store, temp.path(), "auth", None).await.unwrap();
        assert_eq!(record.project_id, Some(project));

        let other = Uuid::new_v4();
        let record = sync_one(&store, temp.path(), "auth", Some(other)).await.unwrap();
        assert_eq!(record.project_id, Some(other));
    }

    #[tokio::test]
    async fn test_sync_one_missing_and_invalid_manifest() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();

        let err = sync_one(&store, temp.path(), "ghost", None).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFoundOnFilesystem { ref slug, .. } if slug == "ghost"));

        let dir = session_dir(temp.path(), "broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "{ not json").unwrap();
        let err = sync_one(&store, temp.path(), "broken", None).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidManifest { ref slug, .. } if slug == "broken"));

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sync_all_records_partial_failures() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();
        write_manifest(temp.path(), "a-good", current_manifest("plan"));
        write_manifest(temp.path(), "b-legacy", json!({"phases": {"spec": {"status": "in_progress"}}}));
        std::fs::create_dir_all(session_dir(temp.path(), "c-empty")).unwrap();
        let broken = session_dir(temp.path(), "d-broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILE), "[").unwrap();
        std::fs::write(sessions_root(temp.path()).join("notes.txt"), "not a session").unwrap();

        let summary = sync_all(&store, temp.path(), None).await.unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.total, summary.synced.len() + summary.failed.len());
        assert_eq!(summary.synced.len(), 2);
        assert_eq!(summary.synced[0].slug, "a-good");
        assert_eq!(summary.synced[1].current_phase, Phase::Spec);

        let reasons: Vec<_> = summary.failed.iter().map(|f| (f.slug.as_str(), f.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                ("c-empty", FailureReason::ManifestNotFound),
                ("d-broken", FailureReason::InvalidManifest),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_all_reports_non_utf8_directory() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();
        write_manifest(temp.path(), "good", current_manifest("plan"));
        let odd = sessions_root(temp.path()).join(OsStr::from_bytes(b"odd-\xff"));
        std::fs::create_dir_all(&odd).unwrap();
        std::fs::write(odd.join(MANIFEST_FILE), current_manifest("plan").to_string()).unwrap();

        let summary = sync_all(&store, temp.path(), None).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.synced.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].reason, FailureReason::InvalidName);
        assert!(summary.failed[0].slug.starts_with("odd-"));
        assert_eq!(store.len().await, 1);

        let records = onboard_project(&store, temp.path(), Uuid::new_v4()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_all_without_sessions_root() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();

        let summary = sync_all(&store, temp.path(), None).await.unwrap();
        assert_eq!(summary, SyncSummary::default());
    }

    #[tokio::test]
    async fn test_onboard_project_skips_unusable_sessions() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryIndexStore::new();
        write_manifest(temp.path(), "good", current_manifest("build"));
        std::fs::create_dir_all(session_dir(temp.path(), "empty")).unwrap();
        let broken = session_dir(temp.path(), "broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILE), "nope").unwrap();

        let project = Uuid::new_v4();
        let records = onboard_project(&store, temp.path(), project).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_slug, "good");
        assert_eq!(records[0].project_id, Some(project));
    }

    #[test]
    fn test_failure_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(FailureReason::ManifestNotFound).unwrap(),
            json!("manifest not found")
        );
        assert_eq!(FailureReason::Unexpected.to_string(), "unexpected error");
    }
}
