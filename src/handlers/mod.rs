//! Command handlers for the CLI.
//!
//! Each handler drives one service operation and prints its result as JSON
//! on stdout. Progress and diagnostics go to stderr through `tracing` and
//! `indicatif`, so stdout stays machine-readable.

pub mod job_handlers;
pub mod upload_handlers;
pub mod vault_handlers;

use anyhow::{Context, Result, bail};
use dialoguer::console::Term;
use serde::Serialize;

use crate::{
    config::JobChoice,
    models::job::{Job, JobType},
    services::job_service::{JobSelection, JobService, default_job_window, select_job},
};

pub(crate) fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve which job a consuming command works on: the explicit id, an
/// interactive pick among recent jobs, or the most recent succeeded one.
pub(crate) async fn resolve_job(
    jobs: &JobService,
    vault: &str,
    job_type: JobType,
    choice: &JobChoice,
) -> Result<String> {
    if let Some(job_id) = &choice.job_id {
        return Ok(job_id.clone());
    }

    let window = default_job_window();
    let picked = if choice.pick {
        let recent = jobs
            .list_recent(vault, job_type, window)
            .await
            .with_context(|| format!("listing recent jobs of {}", vault))?;
        let index = prompt_job_index(&recent)?;
        select_job(&recent, JobSelection::ByIndex(index)).cloned()
    } else {
        jobs.latest_succeeded(vault, job_type, window)
            .await
            .with_context(|| format!("listing recent jobs of {}", vault))?
    };

    match picked {
        Some(job) => {
            tracing::info!("Using {} job {}", job.job_type, job.job_id);
            Ok(job.job_id)
        }
        None => bail!(
            "no succeeded {} job in {} within the last {} days",
            job_type,
            vault,
            window.num_days()
        ),
    }
}

fn prompt_job_index(jobs: &[Job]) -> Result<usize> {
    if jobs.is_empty() {
        bail!("no recent jobs to pick from");
    }
    let term = Term::stderr();
    if !term.is_term() {
        bail!("--pick needs an interactive terminal; pass --job-id instead");
    }

    let items: Vec<String> = jobs
        .iter()
        .map(|job| {
            format!(
                "{}  {:<11}  {}",
                job.creation_date.format("%Y-%m-%d %H:%M"),
                job.status,
                job.job_id
            )
        })
        .collect();
    let index = dialoguer::Select::new()
        .with_prompt("Select a job")
        .items(&items)
        .default(items.len() - 1)
        .interact_on(&term)?;
    Ok(index)
}

/// Ask before a destructive operation unless `assume_yes` is set.
pub(crate) fn confirm(assume_yes: bool, prompt: impl Into<String>) -> Result<()> {
    if assume_yes {
        return Ok(());
    }
    let term = Term::stderr();
    if !term.is_term() {
        bail!("refusing to continue without confirmation; pass --yes");
    }
    let proceed = dialoguer::Confirm::new()
        .default(false)
        .with_prompt(prompt)
        .wait_for_newline(true)
        .interact_on(&term)?;
    if !proceed {
        bail!("Operation cancelled by user");
    }
    Ok(())
}
