//! Vault and archive commands: listing, creation, deletion and cleanup.

use anyhow::{Context, Result, bail};
use serde_json::json;
use std::sync::Arc;

use crate::{
    backend::{GlacierApi, local::LocalGlacier},
    config::JobChoice,
    handlers::{confirm, print_json, resolve_job},
    models::{archive::DeleteOutcome, job::JobType},
    services::{job_service::JobService, retrieval_service::RetrievalService},
};

pub async fn list_vaults(api: Arc<dyn GlacierApi>) -> Result<()> {
    let vaults = api.list_vaults().await.context("listing vaults")?;
    tracing::debug!("Found {} vaults", vaults.len());
    print_json(&vaults)
}

/// Only the local backend can create vaults.
pub async fn create_vault(local: Option<&LocalGlacier>, vault: &str) -> Result<()> {
    let Some(local) = local else {
        bail!("create-vault is only available with --backend local");
    };
    let created = local
        .create_vault(vault)
        .await
        .with_context(|| format!("creating vault {}", vault))?;
    print_json(&created)
}

pub async fn delete_archive(api: Arc<dyn GlacierApi>, vault: &str, archive_id: &str) -> Result<()> {
    let outcome = RetrievalService::new(api)
        .delete_archive(vault, archive_id)
        .await
        .with_context(|| format!("deleting archive {}", archive_id))?;
    let status = match outcome {
        DeleteOutcome::Deleted => "deleted",
        DeleteOutcome::NotFound => "not found",
    };
    print_json(&json!({ "archive_id": archive_id, "status": status }))
}

/// Delete everything an inventory job listed. Fails if any delete failed,
/// after printing the full report.
pub async fn empty_vault(
    api: Arc<dyn GlacierApi>,
    vault: &str,
    choice: &JobChoice,
    assume_yes: bool,
) -> Result<()> {
    let job_id = resolve_job(
        &JobService::new(api.clone()),
        vault,
        JobType::InventoryRetrieval,
        choice,
    )
    .await?;

    confirm(
        assume_yes,
        format!("Delete every archive listed by inventory job {} from {}?", job_id, vault),
    )?;

    let report = RetrievalService::new(api)
        .empty_vault(vault, &job_id)
        .await
        .with_context(|| format!("emptying vault {}", vault))?;
    print_json(&report)?;
    tracing::info!(
        "Removed {} of {} archives from {}",
        report.succeeded().count(),
        report.total(),
        vault
    );

    if !report.is_clean() {
        bail!(
            "{} of {} archives could not be deleted",
            report.failed.len(),
            report.total()
        );
    }
    Ok(())
}
