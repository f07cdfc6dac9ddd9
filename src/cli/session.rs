//! Session manifest commands

use super::{relative, CliContext};
use crate::models::{Phase, SessionManifest, SessionType, Status};
use crate::state::{init_session, NewSession, StateManager};
use crate::Result;
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// Start build progress with TOTAL checkpoints
    Init {
        /// Session slug
        slug: String,

        /// Number of checkpoints
        total: u32,
    },

    /// Mark a checkpoint as the current one
    Start {
        /// Session slug
        slug: String,

        /// Checkpoint number
        id: u32,
    },

    /// Mark a checkpoint as completed
    Complete {
        /// Session slug
        slug: String,

        /// Checkpoint number
        id: u32,
    },
}

/// One validated manifest change
pub enum Mutation {
    Transition(Phase),
    InitCheckpoints(u32),
    StartCheckpoint(u32),
    CompleteCheckpoint(u32),
    Commit {
        sha: String,
        message: String,
        checkpoint: Option<u32>,
    },
    SetStatus(Status),
    SetBranch {
        branch: String,
        worktree: Option<String>,
    },
}

impl Mutation {
    fn apply(self, manager: &mut StateManager) -> Result<String> {
        let summary = match self {
            Mutation::Transition(phase) => {
                let from = manager.phase().unwrap_or_default();
                manager.transition_to_phase(phase)?;
                format!("Phase {} → {}", from, phase)
            }
            Mutation::InitCheckpoints(total) => {
                manager.init_build_progress(total)?;
                format!("Build progress initialized with {} checkpoints", total)
            }
            Mutation::StartCheckpoint(id) => {
                manager.start_checkpoint(id)?;
                format!("Checkpoint {} started", id)
            }
            Mutation::CompleteCheckpoint(id) => {
                manager.complete_checkpoint(id)?;
                format!("Checkpoint {} completed", id)
            }
            Mutation::Commit {
                sha,
                message,
                checkpoint,
            } => {
                let short: String = sha.chars().take(7).collect();
                manager.add_commit(sha, message, checkpoint)?;
                format!("Commit {} recorded", short)
            }
            Mutation::SetStatus(status) => {
                manager.set_status(status)?;
                format!("Status set to {}", status)
            }
            Mutation::SetBranch { branch, worktree } => {
                let summary = format!("Branch set to {}", branch);
                manager.set_git_branch(branch)?;
                if worktree.is_some() {
                    manager.set_git_worktree(worktree)?;
                }
                summary
            }
        };
        Ok(summary)
    }
}

impl CheckpointCommands {
    /// Target session and the change to apply to it
    pub fn into_mutation(self) -> (String, Mutation) {
        match self {
            CheckpointCommands::Init { slug, total } => (slug, Mutation::InitCheckpoints(total)),
            CheckpointCommands::Start { slug, id } => (slug, Mutation::StartCheckpoint(id)),
            CheckpointCommands::Complete { slug, id } => (slug, Mutation::CompleteCheckpoint(id)),
        }
    }
}

pub async fn init(ctx: &CliContext, request: NewSession, json: bool) -> Result<()> {
    let sync = ctx.background_sync()?;
    let manager = init_session(&ctx.project_root, request, Some(sync.callback()))?;

    if json {
        println!(
            "{}",
            json!({
                "status": "success",
                "session_id": manager.manifest().map(|m| m.session_id.as_str()),
                "session_path": manager.session_dir(),
            })
        );
    } else if let Some(manifest) = manager.manifest() {
        println!("{}", format!("✓ Created session {}", manifest.session_id).green());
        println!(
            "   Path: {}",
            relative(manager.session_dir(), &ctx.project_root).display()
        );
    }

    sync.drain().await;
    Ok(())
}

pub async fn status(ctx: &CliContext, slug: &str, json: bool) -> Result<()> {
    let session_dir = ctx.session_dir(slug);
    let mut manager = StateManager::new(&session_dir);

    if !manager.state_file().exists() {
        if json {
            println!("{}", json!({"error": "session_not_found", "session_id": slug}));
        } else {
            println!("{}", format!("Session '{}' not found", slug).red());
        }
        return Ok(());
    }

    let manifest = manager.load()?;
    if json {
        println!("{}", serde_json::to_string_pretty(manifest)?);
    } else {
        print_status(slug, manifest);
    }

    Ok(())
}

/// Load, change and save one manifest, then wait for the index update
pub async fn mutate(ctx: &CliContext, slug: &str, mutation: Mutation, json: bool) -> Result<()> {
    let sync = ctx.background_sync()?;
    let mut manager = StateManager::new(ctx.session_dir(slug)).with_save_callback(sync.callback());
    manager.load()?;

    let summary = mutation.apply(&mut manager)?;

    if json {
        if let Some(manifest) = manager.manifest() {
            println!("{}", serde_json::to_string_pretty(manifest)?);
        }
    } else {
        println!("{}", format!("✓ {}: {}", slug, summary).green());
    }

    sync.drain().await;
    Ok(())
}

fn print_status(slug: &str, manifest: &SessionManifest) {
    println!("{}", format!("Status for: {}", slug).cyan().bold());
    println!();

    let phase_icon = match manifest.current_phase {
        Phase::Spec => "📝",
        Phase::Plan => "🗺",
        Phase::Build => "🔨",
        Phase::Docs => "📚",
        Phase::Complete => "✅",
    };

    let status = match manifest.status {
        Status::Active => manifest.status.as_str().green(),
        Status::Paused => manifest.status.as_str().yellow(),
        Status::Complete => manifest.status.as_str().blue(),
        Status::Failed => manifest.status.as_str().red(),
    };

    println!("   Topic:     {}", manifest.topic);
    if manifest.session_type != SessionType::Full {
        println!("   Type:      {}", manifest.session_type);
    }
    println!("   Phase:     {} {}", phase_icon, manifest.current_phase.as_str().cyan());
    println!("   Status:    {}", status);

    let progress = &manifest.build_progress;
    if let Some(total) = progress.total() {
        let current = progress
            .current_checkpoint
            .map(|c| format!(" (current: {})", c))
            .unwrap_or_default();
        println!(
            "   Progress:  {}/{} checkpoints{}",
            progress.checkpoints_completed.len(),
            total,
            current
        );
    }

    if let Some(branch) = &manifest.git.branch {
        println!("   Branch:    {}", branch);
    }
    if !manifest.commits.is_empty() {
        println!("   Commits:   {}", manifest.commits.len());
    }

    println!(
        "   Updated:   {}",
        manifest.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    let next = manifest.current_phase.allowed_transitions();
    if !next.is_empty() {
        let names: Vec<&str> = next.iter().map(|p| p.as_str()).collect();
        println!("   Next:      {}", names.join(" | ").bright_black());
    }
}
