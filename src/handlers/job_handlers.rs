//! Job commands: starting retrievals, inspecting jobs and consuming their
//! output.

use anyhow::{Context, Result};
use chrono::Duration;
use serde_json::json;
use std::{path::Path, sync::Arc};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::{
    backend::GlacierApi,
    config::JobChoice,
    handlers::{print_json, resolve_job},
    models::job::{JobRequest, JobType},
    services::{job_service::JobService, retrieval_service::RetrievalService},
};

pub async fn retrieve_inventory(api: Arc<dyn GlacierApi>, vault: &str) -> Result<()> {
    let job_id = JobService::new(api)
        .initiate_inventory(vault)
        .await
        .with_context(|| format!("starting inventory retrieval for {}", vault))?;
    print_json(&json!({ "vault": vault, "job_id": job_id }))
}

pub async fn retrieve_archive(api: Arc<dyn GlacierApi>, vault: &str, archive_id: &str) -> Result<()> {
    let request = JobRequest::Archive {
        archive_id: archive_id.to_string(),
    };
    let job_id = JobService::new(api)
        .initiate(vault, &request)
        .await
        .with_context(|| format!("starting retrieval of archive {}", archive_id))?;
    print_json(&json!({ "vault": vault, "archive_id": archive_id, "job_id": job_id }))
}

pub async fn describe_job(api: Arc<dyn GlacierApi>, vault: &str, job_id: &str) -> Result<()> {
    let job = JobService::new(api)
        .describe(vault, job_id)
        .await
        .with_context(|| format!("describing job {}", job_id))?;
    print_json(&job)
}

pub async fn list_jobs(api: Arc<dyn GlacierApi>, vault: &str) -> Result<()> {
    let jobs = JobService::new(api)
        .list(vault)
        .await
        .with_context(|| format!("listing jobs of {}", vault))?;
    print_json(&jobs)
}

pub async fn recent_jobs(
    api: Arc<dyn GlacierApi>,
    vault: &str,
    job_type: JobType,
    days: i64,
) -> Result<()> {
    let window = Duration::try_days(days).with_context(|| format!("{} days is out of range", days))?;
    let jobs = JobService::new(api)
        .list_recent(vault, job_type, window)
        .await
        .with_context(|| format!("listing recent jobs of {}", vault))?;
    let indexed: Vec<_> = jobs
        .iter()
        .enumerate()
        .map(|(index, job)| json!({ "index": index, "job": job }))
        .collect();
    print_json(&indexed)
}

/// Copy the raw output of a succeeded job of any type to stdout.
pub async fn job_output(api: Arc<dyn GlacierApi>, vault: &str, job_id: &str) -> Result<()> {
    let output = RetrievalService::new(api)
        .fetch_output(vault, job_id)
        .await
        .with_context(|| format!("fetching output of job {}", job_id))?;
    let mut reader = StreamReader::new(output);
    let mut stdout = tokio::io::stdout();
    let written = tokio::io::copy(&mut reader, &mut stdout)
        .await
        .with_context(|| format!("copying output of job {}", job_id))?;
    stdout.flush().await?;
    tracing::info!("Wrote {} bytes of job {} to stdout", written, job_id);
    Ok(())
}

pub async fn download(
    api: Arc<dyn GlacierApi>,
    vault: &str,
    destination: &Path,
    choice: &JobChoice,
) -> Result<()> {
    let job_id = resolve_job(
        &JobService::new(api.clone()),
        vault,
        JobType::ArchiveRetrieval,
        choice,
    )
    .await?;
    let written = RetrievalService::new(api)
        .download_to_file(vault, &job_id, destination)
        .await
        .with_context(|| format!("downloading job {} to {}", job_id, destination.display()))?;
    print_json(&json!({
        "job_id": job_id,
        "path": destination.display().to_string(),
        "bytes": written,
    }))
}

pub async fn inventory(api: Arc<dyn GlacierApi>, vault: &str, choice: &JobChoice) -> Result<()> {
    let job_id = resolve_job(
        &JobService::new(api.clone()),
        vault,
        JobType::InventoryRetrieval,
        choice,
    )
    .await?;
    let inventory = RetrievalService::new(api)
        .fetch_inventory(vault, &job_id)
        .await
        .with_context(|| format!("reading inventory job {}", job_id))?;
    tracing::info!("Inventory of {} lists {} archives", vault, inventory.len());
    print_json(&inventory)
}
