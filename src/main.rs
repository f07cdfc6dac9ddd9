use clap::{Parser, Subcommand};
use colored::Colorize;
use sessiond::cli::session::{self, CheckpointCommands, Mutation};
use sessiond::cli::{sync, CliContext};
use sessiond::models::{Phase, SessionType, Status};
use sessiond::state::NewSession;
use sessiond::Result;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sessiond")]
#[command(author = "Chris Cheng <chris.cheng@shopee.com>")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session manifest state machine and index sync", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new session directory and manifest
    Init {
        /// Session topic
        #[arg(short, long)]
        topic: String,

        /// Optional description
        #[arg(short, long)]
        description: Option<String>,

        /// Custom session id (generated from the topic otherwise)
        #[arg(long)]
        session_id: Option<String>,

        /// Session type (full, quick, research)
        #[arg(long = "type", default_value = "full")]
        session_type: SessionType,
    },

    /// Show the manifest of a session
    Status {
        /// Session slug
        slug: String,
    },

    /// Move a session to another phase
    Transition {
        /// Session slug
        slug: String,

        /// Target phase (spec, plan, build, docs, complete)
        phase: Phase,
    },

    /// Build checkpoint tracking
    #[command(subcommand)]
    Checkpoint(CheckpointCommands),

    /// Record a git commit made during the session
    Commit {
        /// Session slug
        slug: String,

        /// Commit sha
        sha: String,

        /// Commit message
        message: String,

        /// Checkpoint the commit belongs to
        #[arg(short, long)]
        checkpoint: Option<u32>,
    },

    /// Set the session status (active, paused, complete, failed)
    #[command(name = "set-status")]
    SetStatus {
        /// Session slug
        slug: String,

        status: Status,
    },

    /// Set the git branch (and optionally worktree) of a session
    #[command(name = "set-branch")]
    SetBranch {
        /// Session slug
        slug: String,

        branch: String,

        #[arg(short, long)]
        worktree: Option<String>,
    },

    /// Reconcile one session into the index
    Sync {
        /// Session slug
        slug: String,

        /// Project to attach the record to
        #[arg(long)]
        project_id: Option<Uuid>,
    },

    /// Reconcile every session of the project into the index
    #[command(name = "sync-all")]
    SyncAll {
        /// Project to attach the records to
        #[arg(long)]
        project_id: Option<Uuid>,
    },

    /// List indexed sessions
    List,
}

fn main() {
    let cli = Cli::parse();
    sessiond::logging::init(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", format!("Error: failed to start runtime: {}", e).red());
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_async(cli)) {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

async fn run_async(cli: Cli) -> Result<()> {
    let ctx = CliContext::load(cli.project_root)?;
    let json = cli.json;

    match cli.command {
        Commands::Init {
            topic,
            description,
            session_id,
            session_type,
        } => {
            let request = NewSession {
                topic,
                description,
                session_type,
                session_id,
            };
            session::init(&ctx, request, json).await?;
        }

        Commands::Status { slug } => {
            session::status(&ctx, &slug, json).await?;
        }

        Commands::Transition { slug, phase } => {
            session::mutate(&ctx, &slug, Mutation::Transition(phase), json).await?;
        }

        Commands::Checkpoint(cmd) => {
            let (slug, mutation) = cmd.into_mutation();
            session::mutate(&ctx, &slug, mutation, json).await?;
        }

        Commands::Commit {
            slug,
            sha,
            message,
            checkpoint,
        } => {
            let mutation = Mutation::Commit {
                sha,
                message,
                checkpoint,
            };
            session::mutate(&ctx, &slug, mutation, json).await?;
        }

        Commands::SetStatus { slug, status } => {
            session::mutate(&ctx, &slug, Mutation::SetStatus(status), json).await?;
        }

        Commands::SetBranch {
            slug,
            branch,
            worktree,
        } => {
            let mutation = Mutation::SetBranch { branch, worktree };
            session::mutate(&ctx, &slug, mutation, json).await?;
        }

        Commands::Sync { slug, project_id } => {
            sync::run_one(&ctx, &slug, project_id, json).await?;
        }

        Commands::SyncAll { project_id } => {
            sync::run_all(&ctx, project_id, json).await?;
        }

        Commands::List => {
            sync::list(&ctx, json).await?;
        }
    }

    Ok(())
}
