//! StateManager - state.json load, validated mutation and atomic save

use super::error::{StateError, StateResult};
use crate::models::{
    Commit, Phase, SessionManifest, Status, MANIFEST_FILE, MANIFEST_TMP_FILE,
};
use chrono::Utc;
use std::fmt;
use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Invoked with the session directory after every successful save.
///
/// Errors and panics raised by the callback are logged and never reach the
/// caller of [`StateManager::save`].
pub type SaveCallback = Arc<dyn Fn(&Path) -> anyhow::Result<()> + Send + Sync>;

/// Sole mutator of one session's state.json
pub struct StateManager {
    session_dir: PathBuf,
    manifest: Option<SessionManifest>,
    on_save: Option<SaveCallback>,
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("session_dir", &self.session_dir)
            .field("manifest", &self.manifest)
            .field("on_save", &self.on_save.is_some())
            .finish()
    }
}

impl StateManager {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            manifest: None,
            on_save: None,
        }
    }

    pub fn with_save_callback(mut self, callback: SaveCallback) -> Self {
        self.on_save = Some(callback);
        self
    }

    /// Construct and load in one step
    pub fn open(session_dir: impl Into<PathBuf>) -> StateResult<Self> {
        let mut manager = Self::new(session_dir);
        manager.load()?;
        Ok(manager)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.session_dir.join(MANIFEST_FILE)
    }

    pub fn is_loaded(&self) -> bool {
        self.manifest.is_some()
    }

    /// Get loaded manifest (read-only)
    pub fn manifest(&self) -> Option<&SessionManifest> {
        self.manifest.as_ref()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.manifest.as_ref().map(|m| m.current_phase)
    }

    pub fn can_transition_to(&self, phase: Phase) -> bool {
        self.phase()
            .is_some_and(|current| current.can_transition_to(phase))
    }

    // =========================================================================
    // Load / Create / Save
    // =========================================================================

    /// Read and validate state.json from disk
    pub fn load(&mut self) -> StateResult<&SessionManifest> {
        let state_file = self.state_file();
        if !state_file.exists() {
            return Err(StateError::SessionNotFound {
                session_id: self.slug(),
                path: state_file,
            });
        }

        let content = fs::read_to_string(&state_file)?;
        let manifest: SessionManifest = serde_json::from_str(&content)
            .map_err(|e| StateError::Validation(e.to_string()))?;
        manifest.validate().map_err(StateError::Validation)?;

        debug!(
            session = %manifest.session_id,
            phase = %manifest.current_phase,
            "Loaded session manifest"
        );

        Ok(&*self.manifest.insert(manifest))
    }

    /// Write a brand-new manifest; fails if state.json already exists
    pub fn create(&mut self, manifest: SessionManifest) -> StateResult<&SessionManifest> {
        let state_file = self.state_file();
        if state_file.exists() {
            return Err(StateError::AlreadyExists(state_file));
        }
        manifest.validate().map_err(StateError::Validation)?;

        fs::create_dir_all(&self.session_dir)?;
        let mut manifest = manifest;
        self.persist(&mut manifest)?;

        info!(session = %manifest.session_id, "Created session manifest");
        Ok(&*self.manifest.insert(manifest))
    }

    /// Persist the loaded manifest, refreshing `updated_at`
    pub fn save(&mut self) -> StateResult<()> {
        let mut manifest = self.manifest.take().ok_or(StateError::NotLoaded)?;
        let result = self.persist(&mut manifest);
        self.manifest = Some(manifest);
        result
    }

    /// Write to state.json.tmp, then rename over state.json.
    ///
    /// The rename is the commit point: a crash before it leaves the previous
    /// manifest intact.
    fn persist(&self, manifest: &mut SessionManifest) -> StateResult<()> {
        manifest.updated_at = Utc::now();

        let mut content = serde_json::to_string_pretty(manifest)?;
        content.push('\n');

        let tmp_path = self.session_dir.join(MANIFEST_TMP_FILE);
        if let Err(e) = write_synced(&tmp_path, content.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        fs::rename(&tmp_path, self.state_file())?;

        self.notify_saved();
        Ok(())
    }

    fn notify_saved(&self) {
        let Some(callback) = &self.on_save else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| callback(&self.session_dir))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    session_dir = %self.session_dir.display(),
                    error = %err,
                    "Save callback failed"
                );
            }
            Err(_) => {
                error!(
                    session_dir = %self.session_dir.display(),
                    "Save callback panicked"
                );
            }
        }
    }

    /// Apply `change` to a copy of the manifest and persist it.
    ///
    /// Nothing in memory or on disk changes unless both `change` and the save
    /// succeed.
    fn mutate<F>(&mut self, change: F) -> StateResult<()>
    where
        F: FnOnce(&mut SessionManifest) -> StateResult<()>,
    {
        let mut candidate = self.manifest.clone().ok_or(StateError::NotLoaded)?;
        change(&mut candidate)?;
        self.persist(&mut candidate)?;
        self.manifest = Some(candidate);
        Ok(())
    }

    fn slug(&self) -> String {
        self.session_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    // =========================================================================
    // Phase Management
    // =========================================================================

    /// Move to `new_phase`, stamping the completed and started slots with one instant
    pub fn transition_to_phase(&mut self, new_phase: Phase) -> StateResult<()> {
        self.mutate(|manifest| {
            let from = manifest.current_phase;
            if !from.can_transition_to(new_phase) {
                return Err(StateError::InvalidPhaseTransition { from, to: new_phase });
            }

            let now = Utc::now();
            manifest.phase_history.mark_completed(from, now);
            manifest.phase_history.mark_started(new_phase, now);
            manifest.current_phase = new_phase;

            info!(session = %manifest.session_id, %from, to = %new_phase, "Phase transition");
            Ok(())
        })
    }

    // =========================================================================
    // Checkpoint Tracking
    // =========================================================================

    /// Reset build progress to `total` pending checkpoints, starting at 1
    pub fn init_build_progress(&mut self, total: u32) -> StateResult<()> {
        if total < 1 {
            return Err(StateError::InvalidCheckpoint(
                "checkpoints_total must be at least 1".to_string(),
            ));
        }

        self.mutate(|manifest| {
            let progress = &mut manifest.build_progress;
            progress.checkpoints_total = Some(total);
            progress.checkpoints_completed.clear();
            progress.current_checkpoint = Some(1);
            Ok(())
        })
    }

    pub fn start_checkpoint(&mut self, checkpoint_id: u32) -> StateResult<()> {
        self.mutate(|manifest| {
            let total = checkpoint_bounds(manifest, checkpoint_id)?;
            debug!(session = %manifest.session_id, checkpoint_id, total, "Starting checkpoint");
            manifest.build_progress.current_checkpoint = Some(checkpoint_id);
            Ok(())
        })
    }

    /// Mark a checkpoint done and advance the pointer to `checkpoint_id + 1`.
    ///
    /// The pointer advances without looking at whether the next checkpoint is
    /// already complete; completing the last checkpoint clears it.
    pub fn complete_checkpoint(&mut self, checkpoint_id: u32) -> StateResult<()> {
        self.mutate(|manifest| {
            let total = checkpoint_bounds(manifest, checkpoint_id)?;
            let progress = &mut manifest.build_progress;

            if progress.checkpoints_completed.contains(&checkpoint_id) {
                return Err(StateError::InvalidCheckpoint(format!(
                    "Checkpoint {} is already completed",
                    checkpoint_id
                )));
            }

            progress.checkpoints_completed.push(checkpoint_id);
            progress.checkpoints_completed.sort_unstable();
            progress.current_checkpoint = if checkpoint_id < total {
                Some(checkpoint_id + 1)
            } else {
                None
            };
            Ok(())
        })
    }

    // =========================================================================
    // Commits, Status and Git Context
    // =========================================================================

    pub fn add_commit(
        &mut self,
        sha: impl Into<String>,
        message: impl Into<String>,
        checkpoint: Option<u32>,
    ) -> StateResult<()> {
        let commit = Commit {
            sha: sha.into(),
            message: message.into(),
            checkpoint,
            created_at: Utc::now(),
        };
        self.mutate(|manifest| {
            manifest.commits.push(commit);
            Ok(())
        })
    }

    pub fn set_status(&mut self, status: Status) -> StateResult<()> {
        self.mutate(|manifest| {
            manifest.status = status;
            Ok(())
        })
    }

    pub fn set_git_branch(&mut self, branch: impl Into<String>) -> StateResult<()> {
        let branch = branch.into();
        self.mutate(|manifest| {
            manifest.git.branch = Some(branch);
            Ok(())
        })
    }

    pub fn set_git_worktree(&mut self, worktree: Option<String>) -> StateResult<()> {
        self.mutate(|manifest| {
            manifest.git.worktree = worktree;
            Ok(())
        })
    }
}

/// Validate `checkpoint_id` against initialized progress, returning the total
fn checkpoint_bounds(manifest: &SessionManifest, checkpoint_id: u32) -> StateResult<u32> {
    let total = manifest.build_progress.total().ok_or_else(|| {
        StateError::InvalidCheckpoint(
            "build_progress not initialized. Call init_build_progress first.".to_string(),
        )
    })?;
    if checkpoint_id < 1 || checkpoint_id > total {
        return Err(StateError::InvalidCheckpoint(format!(
            "checkpoint_id must be between 1 and {}",
            total
        )));
    }
    Ok(total)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// =============================================================================
// Tests
// =============================================================================
