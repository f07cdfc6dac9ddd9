//! Index reconciliation commands

use super::CliContext;
use crate::models::{IndexRecord, Phase};
use crate::store::IndexStore;
use crate::sync::{sync_all, sync_one, SyncSummary};
use crate::Result;
use colored::Colorize;
use uuid::Uuid;

pub async fn run_one(
    ctx: &CliContext,
    slug: &str,
    project_id: Option<Uuid>,
    json: bool,
) -> Result<()> {
    let store = ctx.open_index()?;
    let project_id = project_id.or(ctx.config.project_id);

    let record = sync_one(store.as_ref(), &ctx.project_root, slug, project_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!(
            "{}",
            format!("✓ Synced {} ({})", record.session_slug, record.current_phase).green()
        );
        println!("   Index id: {}", record.id.to_string().bright_black());
    }

    Ok(())
}

pub async fn run_all(ctx: &CliContext, project_id: Option<Uuid>, json: bool) -> Result<()> {
    let store = ctx.open_index()?;
    let project_id = project_id.or(ctx.config.project_id);

    let summary = sync_all(store.as_ref(), &ctx.project_root, project_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

pub async fn list(ctx: &CliContext, json: bool) -> Result<()> {
    let store = ctx.open_index()?;
    let records = store.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No sessions indexed. Run 'sessiond sync-all' first.".yellow());
        return Ok(());
    }

    println!("{}", "Indexed sessions:".cyan().bold());
    for record in &records {
        println!("   {}", format_record(record));
    }

    Ok(())
}

fn format_record(record: &IndexRecord) -> String {
    let phase = match record.current_phase {
        Phase::Complete => record.current_phase.as_str().green(),
        Phase::Build => record.current_phase.as_str().blue(),
        _ => record.current_phase.as_str().yellow(),
    };

    let progress = if record.checkpoints_total > 0 {
        format!(" [{}/{}]", record.checkpoints_completed, record.checkpoints_total)
    } else {
        String::new()
    };

    format!(
        "{:<48} {:<9} {}{}",
        record.session_slug,
        phase,
        record.status,
        progress.bright_black()
    )
}

fn print_summary(summary: &SyncSummary) {
    println!(
        "{}",
        format!(
            "Synced {} of {} sessions",
            summary.synced.len(),
            summary.total
        )
        .cyan()
        .bold()
    );

    for synced in &summary.synced {
        println!(
            "   {} {} ({}, {})",
            "✓".green(),
            synced.slug,
            synced.current_phase,
            synced.status
        );
    }

    for failed in &summary.failed {
        println!(
            "   {} {}: {}",
            "✗".red(),
            failed.slug,
            failed.reason.to_string().red()
        );
        println!("     {}", failed.detail.bright_black());
    }
}
