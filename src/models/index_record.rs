//! Index records: the queryable, reconstructable mirror of a session manifest

use super::manifest::{Artifacts, Phase, PhaseHistory, SessionType, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commit as mirrored into the index.
///
/// Legacy manifests may omit `created_at`, so it is optional here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedCommit {
    pub sha: String,
    pub message: String,
    #[serde(default)]
    pub checkpoint: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Denormalized index row for one session.
///
/// `id` is owned by the index and never derived from the manifest;
/// `session_slug` is unique across the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub id: Uuid,
    pub session_slug: String,
    pub project_id: Option<Uuid>,

    pub title: Option<String>,
    pub description: Option<String>,
    pub session_type: SessionType,

    /// Absolute project root
    pub working_dir: String,
    /// Absolute session directory
    pub session_dir: String,

    pub current_phase: Phase,
    pub status: Status,
    pub phase_history: PhaseHistory,

    pub checkpoints_total: u32,
    /// Number of completed checkpoints
    pub checkpoints_completed: u32,
    pub checkpoints_completed_list: Vec<u32>,
    pub current_checkpoint: Option<u32>,

    pub git_branch: Option<String>,
    pub git_worktree: Option<String>,
    pub git_base_branch: Option<String>,

    // Computed from the filesystem at sync time
    pub spec_exists: bool,
    pub plan_exists: bool,
    pub plan_readable_exists: bool,

    pub commits: Vec<IndexedCommit>,
    pub artifacts: Artifacts,

    pub manifest_updated_at: Option<DateTime<Utc>>,
}
