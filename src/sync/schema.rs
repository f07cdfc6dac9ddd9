//! Manifest schema generations
//!
//! Two wire shapes describe the same session. The current shape carries
//! `phase_history` / `build_progress`; the legacy shape carries `phases`,
//! `plan_state`, `checkpoint_id` on commits and `granularity`. Both are
//! normalized into one [`SessionSnapshot`] before anything else reads them.

use crate::models::{
    Artifacts, BuildProgress, GitContext, IndexedCommit, Phase, PhaseHistory, SessionType, Status,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestGeneration {
    Legacy,
    Current,
}

impl ManifestGeneration {
    /// Inferred from key presence; there is no version field.
    pub fn detect(raw: &Value) -> Result<Self, String> {
        let object = raw
            .as_object()
            .ok_or_else(|| "manifest must be a JSON object".to_string())?;

        if object.contains_key("phase_history") || object.contains_key("build_progress") {
            Ok(ManifestGeneration::Current)
        } else {
            Ok(ManifestGeneration::Legacy)
        }
    }
}

/// Canonical view of a manifest, independent of its wire generation
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub generation: ManifestGeneration,
    pub topic: Option<String>,
    pub description: Option<String>,
    pub session_type: SessionType,
    pub current_phase: Phase,
    pub status: Status,
    pub phase_history: PhaseHistory,
    pub build_progress: BuildProgress,
    pub git: GitContext,
    pub commits: Vec<IndexedCommit>,
    pub artifacts: Artifacts,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parse manifest text of either generation
pub fn parse_manifest(raw: &str) -> Result<SessionSnapshot, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    normalize(value)
}

pub fn normalize(value: Value) -> Result<SessionSnapshot, String> {
    let snapshot = match ManifestGeneration::detect(&value)? {
        ManifestGeneration::Current => serde_json::from_value::<CurrentManifest>(value)
            .map(SessionSnapshot::from),
        ManifestGeneration::Legacy => serde_json::from_value::<LegacyManifest>(value)
            .map(SessionSnapshot::from),
    };
    snapshot.map_err(|e| e.to_string())
}

// =============================================================================
// Current generation
// =============================================================================

#[derive(Deserialize)]
struct CurrentManifest {
    topic: Option<String>,
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_session_type")]
    session_type: Option<SessionType>,
    #[serde(default)]
    current_phase: Phase,
    #[serde(default)]
    status: Status,
    #[serde(default, deserialize_with = "null_as_default")]
    phase_history: PhaseHistory,
    #[serde(default, deserialize_with = "null_as_default")]
    build_progress: CurrentBuildProgress,
    #[serde(default, deserialize_with = "null_as_default")]
    git: GitContext,
    #[serde(default, deserialize_with = "null_as_default")]
    commits: Vec<IndexedCommit>,
    #[serde(default, deserialize_with = "null_as_default")]
    artifacts: Artifacts,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Default, Deserialize)]
struct CurrentBuildProgress {
    checkpoints_total: Option<u32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    checkpoints_completed: Vec<u32>,
    current_checkpoint: Option<u32>,
}

impl From<CurrentBuildProgress> for BuildProgress {
    fn from(p: CurrentBuildProgress) -> Self {
        Self {
            checkpoints_total: p.checkpoints_total,
            checkpoints_completed: p.checkpoints_completed,
            current_checkpoint: p.current_checkpoint,
        }
    }
}

impl From<CurrentManifest> for SessionSnapshot {
    fn from(m: CurrentManifest) -> Self {
        Self {
            generation: ManifestGeneration::Current,
            topic: m.topic,
            description: m.description,
            session_type: m.session_type.unwrap_or_default(),
            current_phase: m.current_phase,
            status: m.status,
            phase_history: m.phase_history,
            build_progress: m.build_progress.into(),
            git: m.git,
            commits: m.commits,
            artifacts: m.artifacts,
            updated_at: m.updated_at,
        }
    }
}

// =============================================================================
// Legacy generation
// =============================================================================

#[derive(Deserialize)]
struct LegacyManifest {
    topic: Option<String>,
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_session_type")]
    session_type: Option<SessionType>,
    #[serde(default, deserialize_with = "lenient_session_type")]
    granularity: Option<SessionType>,
    current_phase: Option<Phase>,
    status: Option<Status>,
    #[serde(default)]
    phases: BTreeMap<String, LegacyPhase>,
    #[serde(default)]
    plan_state: LegacyPlanState,
    #[serde(default)]
    commits: Vec<LegacyCommit>,
    #[serde(default)]
    artifacts: Artifacts,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Default, Deserialize)]
struct LegacyPhase {
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    finalized_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Default, Deserialize)]
struct LegacyPlanState {
    checkpoints_total: Option<u32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    checkpoints_completed: Vec<u32>,
    current_checkpoint: Option<u32>,
}

#[derive(Deserialize)]
struct LegacyCommit {
    sha: String,
    #[serde(default)]
    message: String,
    checkpoint_id: Option<u32>,
    checkpoint: Option<u32>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

impl LegacyManifest {
    fn phase(&self, phase: Phase) -> Option<&LegacyPhase> {
        self.phases.get(phase.as_str())
    }

    fn derived_phase(&self) -> Phase {
        if let Some(phase) = self.current_phase {
            return phase;
        }
        Phase::ALL
            .into_iter()
            .find(|p| {
                self.phase(*p)
                    .and_then(|entry| entry.status.as_deref())
                    .is_some_and(|status| status == "in_progress")
            })
            .unwrap_or_default()
    }

    fn phase_history(&self) -> PhaseHistory {
        let mut history = PhaseHistory::default();
        for phase in Phase::ALL {
            let Some(entry) = self.phase(phase) else {
                continue;
            };
            if let Some(at) = entry.started_at {
                history.mark_started(phase, at);
            }
            if let Some(at) = entry.finalized_at.or(entry.completed_at) {
                history.mark_completed(phase, at);
            }
        }
        history
    }
}

impl From<LegacyManifest> for SessionSnapshot {
    fn from(m: LegacyManifest) -> Self {
        let current_phase = m.derived_phase();
        let phase_history = m.phase_history();

        let mut checkpoints_completed = m.plan_state.checkpoints_completed;
        checkpoints_completed.sort_unstable();
        checkpoints_completed.dedup();

        let commits = m
            .commits
            .into_iter()
            .map(|c| IndexedCommit {
                sha: c.sha,
                message: c.message,
                checkpoint: c.checkpoint_id.or(c.checkpoint),
                created_at: c.created_at,
            })
            .collect();

        Self {
            generation: ManifestGeneration::Legacy,
            topic: m.topic,
            description: m.description,
            session_type: m.session_type.or(m.granularity).unwrap_or_default(),
            current_phase,
            status: m.status.unwrap_or_default(),
            phase_history,
            build_progress: BuildProgress {
                checkpoints_total: m.plan_state.checkpoints_total,
                checkpoints_completed,
                current_checkpoint: m.plan_state.current_checkpoint,
            },
            git: GitContext::default(),
            commits,
            artifacts: m.artifacts,
            updated_at: m.updated_at,
        }
    }
}

// =============================================================================
// Field helpers
// =============================================================================

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` taken as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<u32>>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unrecognized session types (e.g. `"feature"`) read as absent
fn lenient_session_type<'de, D>(deserializer: D) -> Result<Option<SessionType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

// =============================================================================
// Tests
// =============================================================================
