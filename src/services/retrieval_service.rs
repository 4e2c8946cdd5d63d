//! Consuming finished jobs: archive downloads, inventory decoding and
//! vault cleanup driven by an inventory snapshot.

use futures::TryStreamExt;
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{GlacierApi, JobOutput},
    errors::{GlacierError, GlacierResult},
    models::{
        archive::DeleteOutcome,
        inventory::Inventory,
        job::{Job, JobStatus, JobType},
    },
};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CleanupFailure {
    pub archive_id: String,
    pub error: String,
}

/// Per-archive results of emptying a vault. Every archive of the inventory
/// lands in exactly one list.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    /// Already gone on the service; counts as success.
    pub already_absent: Vec<String>,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.deleted.len() + self.already_absent.len() + self.failed.len()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &String> {
        self.deleted.iter().chain(self.already_absent.iter())
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct RetrievalService {
    api: Arc<dyn GlacierApi>,
}

impl RetrievalService {
    pub fn new(api: Arc<dyn GlacierApi>) -> Self {
        Self { api }
    }

    /// Describe the job and check it is a succeeded job of `expected` type.
    async fn ready_job(&self, vault: &str, job_id: &str, expected: JobType) -> GlacierResult<Job> {
        let job = self.api.describe_job(vault, job_id).await?;
        if job.job_type != expected {
            return Err(GlacierError::WrongJobType {
                job_id: job_id.to_string(),
                expected,
                actual: job.job_type,
            });
        }
        if job.status != JobStatus::Succeeded {
            return Err(GlacierError::JobNotReady {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        Ok(job)
    }

    /// Raw output of a succeeded job of any type.
    pub async fn fetch_output(&self, vault: &str, job_id: &str) -> GlacierResult<JobOutput> {
        let job = self.api.describe_job(vault, job_id).await?;
        if job.status != JobStatus::Succeeded {
            return Err(GlacierError::JobNotReady {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        self.api.get_job_output(vault, job_id).await
    }

    /// Stream an archive-retrieval job's output to `destination`. The file
    /// only appears once fully written. Returns the bytes written.
    pub async fn download_to_file(
        &self,
        vault: &str,
        job_id: &str,
        destination: &Path,
    ) -> GlacierResult<u64> {
        self.ready_job(vault, job_id, JobType::ArchiveRetrieval)
            .await?;
        let output = self.api.get_job_output(vault, job_id).await?;

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = match write_stream(output, &tmp_path).await {
            Ok(written) => written,
            Err(err) => {
                discard_partial(&tmp_path).await;
                return Err(err);
            }
        };
        if let Err(err) = fs::rename(&tmp_path, destination).await {
            discard_partial(&tmp_path).await;
            return Err(err.into());
        }

        info!(
            "downloaded {} bytes of job {} to {}",
            written,
            job_id,
            destination.display()
        );
        Ok(written)
    }

    /// Decode an inventory-retrieval job's output.
    pub async fn fetch_inventory(&self, vault: &str, job_id: &str) -> GlacierResult<Inventory> {
        self.ready_job(vault, job_id, JobType::InventoryRetrieval)
            .await?;
        let chunks: Vec<bytes::Bytes> = self
            .api
            .get_job_output(vault, job_id)
            .await?
            .try_collect()
            .await
            .map_err(|e| GlacierError::transfer("get_job_output", e))?;
        let body = chunks.concat();
        debug!("inventory of job {} is {} bytes", job_id, body.len());
        Inventory::from_slice(&body)
    }

    pub async fn delete_archive(&self, vault: &str, archive_id: &str) -> GlacierResult<DeleteOutcome> {
        self.api.delete_archive(vault, archive_id).await
    }

    /// Delete every archive listed by a succeeded inventory job.
    ///
    /// Works off the job's snapshot: archives added since are untouched and
    /// ones already gone count as deleted. A failed delete is recorded and
    /// the rest continue.
    pub async fn empty_vault(&self, vault: &str, job_id: &str) -> GlacierResult<CleanupReport> {
        let inventory = self.fetch_inventory(vault, job_id).await?;
        if inventory.is_empty() {
            info!("inventory {} of {} lists no archives", job_id, vault);
            return Ok(CleanupReport::default());
        }
        info!(
            "deleting {} archives from {} (inventory of {})",
            inventory.len(),
            vault,
            inventory.inventory_date.as_deref().unwrap_or("unknown date")
        );

        let mut report = CleanupReport::default();
        for summary in inventory.archive_list {
            let archive_id = summary.archive_id;
            match self.api.delete_archive(vault, &archive_id).await {
                Ok(DeleteOutcome::Deleted) => {
                    info!("deleted archive {} from {}", archive_id, vault);
                    report.deleted.push(archive_id);
                }
                Ok(DeleteOutcome::NotFound) => {
                    debug!("archive {} was already gone", archive_id);
                    report.already_absent.push(archive_id);
                }
                Err(err) => {
                    warn!("failed to delete archive {}: {}", archive_id, err);
                    report.failed.push(CleanupFailure {
                        archive_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

/// Copy `output` into a new file at `path`. Failures reading the job output
/// are transfer errors; failures writing the file are local I/O errors.
async fn write_stream(mut output: JobOutput, path: &Path) -> GlacierResult<u64> {
    let mut file = File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = output
        .try_next()
        .await
        .map_err(|err| GlacierError::transfer("get_job_output", err))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn discard_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("could not remove partial download {}: {}", path.display(), err);
        }
    }
}
