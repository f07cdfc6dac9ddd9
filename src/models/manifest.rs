//! Session Manifest Types
//!
//! Defines the structures persisted in `agents/sessions/{slug}/state.json`:
//! - identity and session type
//! - phase state machine and phase history
//! - build checkpoint progress
//! - git context, commits and artifact paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// File name of the manifest inside a session directory
pub const MANIFEST_FILE: &str = "state.json";

/// Temporary file the manifest is written to before being renamed into place
pub const MANIFEST_TMP_FILE: &str = "state.json.tmp";

// =============================================================================
// Enumerations
// =============================================================================

/// Workflow phase: spec → plan → build → (docs) → complete
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Spec,
    Plan,
    Build,
    Docs,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Spec,
        Phase::Plan,
        Phase::Build,
        Phase::Docs,
        Phase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Spec => "spec",
            Phase::Plan => "plan",
            Phase::Build => "build",
            Phase::Docs => "docs",
            Phase::Complete => "complete",
        }
    }

    /// Phases reachable in one step from this phase
    pub fn allowed_transitions(&self) -> &'static [Phase] {
        match self {
            Phase::Spec => &[Phase::Plan],
            Phase::Plan => &[Phase::Build],
            Phase::Build => &[Phase::Docs, Phase::Complete],
            Phase::Docs => &[Phase::Complete],
            Phase::Complete => &[],
        }
    }

    pub fn can_transition_to(&self, next: Phase) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{}'", s))
    }
}

/// Session execution status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Paused,
    Complete,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Paused => "paused",
            Status::Complete => "complete",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Status::Active),
            "paused" => Ok(Status::Paused),
            "complete" => Ok(Status::Complete),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Type of session workflow
///
/// - `full`: spec → plan → build → docs
/// - `quick`: simplified workflow for small tasks
/// - `research`: exploration without implementation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Full,
    Quick,
    Research,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Full => "full",
            SessionType::Quick => "quick",
            SessionType::Research => "research",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SessionType::Full),
            "quick" => Ok(SessionType::Quick),
            "research" => Ok(SessionType::Research),
            other => Err(format!("unknown session type '{}'", other)),
        }
    }
}

// =============================================================================
// Nested Records
// =============================================================================

/// Start/complete timestamps per phase, populated as transitions occur.
///
/// `complete` is terminal and has no slots of its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseHistory {
    #[serde(default)]
    pub spec_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub spec_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub plan_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub plan_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub docs_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub docs_completed_at: Option<DateTime<Utc>>,

    /// Slots written by other tooling, kept across saves
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PhaseHistory {
    pub fn started_at(&self, phase: Phase) -> Option<DateTime<Utc>> {
        match phase {
            Phase::Spec => self.spec_started_at,
            Phase::Plan => self.plan_started_at,
            Phase::Build => self.build_started_at,
            Phase::Docs => self.docs_started_at,
            Phase::Complete => None,
        }
    }

    pub fn completed_at(&self, phase: Phase) -> Option<DateTime<Utc>> {
        match phase {
            Phase::Spec => self.spec_completed_at,
            Phase::Plan => self.plan_completed_at,
            Phase::Build => self.build_completed_at,
            Phase::Docs => self.docs_completed_at,
            Phase::Complete => None,
        }
    }

    /// Record `<phase>_started_at`. No-op for `complete`.
    pub fn mark_started(&mut self, phase: Phase, at: DateTime<Utc>) {
        let slot = match phase {
            Phase::Spec => &mut self.spec_started_at,
            Phase::Plan => &mut self.plan_started_at,
            Phase::Build => &mut self.build_started_at,
            Phase::Docs => &mut self.docs_started_at,
            Phase::Complete => return,
        };
        *slot = Some(at);
    }

    /// Record `<phase>_completed_at`. No-op for `complete`.
    pub fn mark_completed(&mut self, phase: Phase, at: DateTime<Utc>) {
        let slot = match phase {
            Phase::Spec => &mut self.spec_completed_at,
            Phase::Plan => &mut self.plan_completed_at,
            Phase::Build => &mut self.build_completed_at,
            Phase::Docs => &mut self.docs_completed_at,
            Phase::Complete => return,
        };
        *slot = Some(at);
    }
}

/// Checkpoint progress during the build phase
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildProgress {
    #[serde(default)]
    pub checkpoints_total: Option<u32>,
    #[serde(default)]
    pub checkpoints_completed: Vec<u32>,
    #[serde(default)]
    pub current_checkpoint: Option<u32>,
}

impl BuildProgress {
    /// Total checkpoints, if progress has been initialized.
    ///
    /// A stored total of 0 means the same as an absent one.
    pub fn total(&self) -> Option<u32> {
        self.checkpoints_total.filter(|total| *total >= 1)
    }

    pub fn is_initialized(&self) -> bool {
        self.total().is_some()
    }

    pub fn is_finished(&self) -> bool {
        match self.total() {
            Some(total) => self.checkpoints_completed.len() == total as usize,
            None => false,
        }
    }

    fn validate(&self) -> Result<(), String> {
        let Some(total) = self.total() else {
            if !self.checkpoints_completed.is_empty() {
                return Err("checkpoints_completed set without checkpoints_total".to_string());
            }
            if self.current_checkpoint.is_some() {
                return Err("current_checkpoint set without checkpoints_total".to_string());
            }
            return Ok(());
        };

        let mut previous = 0;
        for &id in &self.checkpoints_completed {
            if id < 1 || id > total {
                return Err(format!(
                    "completed checkpoint {} outside 1..={}",
                    id, total
                ));
            }
            if id <= previous {
                return Err("checkpoints_completed must be strictly increasing".to_string());
            }
            previous = id;
        }

        if let Some(current) = self.current_checkpoint {
            if current < 1 || current > total {
                return Err(format!("current_checkpoint {} outside 1..={}", current, total));
            }
        }

        Ok(())
    }
}

/// Git branch and worktree context
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitContext {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub worktree: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
}

/// Git commit made during the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    #[serde(default)]
    pub checkpoint: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Artifact paths, relative to the session directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifacts {
    #[serde(default = "default_spec_artifact")]
    pub spec: String,
    #[serde(default = "default_plan_artifact")]
    pub plan: String,
    #[serde(default = "default_plan_readable_artifact")]
    pub plan_readable: String,
}

fn default_spec_artifact() -> String {
    "spec.md".to_string()
}

fn default_plan_artifact() -> String {
    "plan.json".to_string()
}

fn default_plan_readable_artifact() -> String {
    "plan.md".to_string()
}

impl Default for Artifacts {
    fn default() -> Self {
        Self {
            spec: default_spec_artifact(),
            plan: default_plan_artifact(),
            plan_readable: default_plan_readable_artifact(),
        }
    }
}

// =============================================================================
// Session Manifest (state.json)
// =============================================================================

/// The authoritative record of one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionManifest {
    pub session_id: String,
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub session_type: SessionType,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub current_phase: Phase,
    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub phase_history: PhaseHistory,
    #[serde(default)]
    pub build_progress: BuildProgress,
    #[serde(default)]
    pub git: GitContext,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub artifacts: Artifacts,

    /// Keys written by other tooling (e.g. `key_decisions`), carried through saves untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SessionManifest {
    /// Fresh manifest at the start of the spec phase
    pub fn new(
        session_id: impl Into<String>,
        topic: impl Into<String>,
        description: Option<String>,
        session_type: SessionType,
    ) -> Self {
        let now = Utc::now();
        let mut phase_history = PhaseHistory::default();
        phase_history.mark_started(Phase::Spec, now);

        Self {
            session_id: session_id.into(),
            topic: topic.into(),
            description,
            session_type,
            created_at: now,
            updated_at: now,
            current_phase: Phase::Spec,
            status: Status::Active,
            phase_history,
            build_progress: BuildProgress::default(),
            git: GitContext::default(),
            commits: Vec::new(),
            artifacts: Artifacts::default(),
            extra: BTreeMap::new(),
        }
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.session_id.trim().is_empty() {
            return Err("session_id must not be empty".to_string());
        }
        self.build_progress
            .validate()
            .map_err(|e| format!("build_progress: {}", e))
    }
}

/// Build a session id of the form `YYYY-MM-DD_<topic-slug>_<suffix>`
pub fn generate_session_id(topic: &str, now: DateTime<Utc>) -> String {
    let mut slug = String::with_capacity(topic.len());
    for c in topic.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(40).collect();
    let slug = slug.trim_end_matches('-');

    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();

    format!("{}_{}_{}", now.format("%Y-%m-%d"), slug, suffix)
}

// =============================================================================
// Tests
// =============================================================================
