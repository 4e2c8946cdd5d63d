//! Job tracker: initiate retrieval jobs, describe them, and pick among the
//! recent ones.
//!
//! Jobs take hours to finish, so nothing here polls. Callers ask for the
//! current status when they want it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    backend::GlacierApi,
    errors::{GlacierError, GlacierResult},
    models::job::{Job, JobRequest, JobType},
};

/// How far back job listings look by default. The service retires job
/// records after roughly a month.
pub fn default_job_window() -> Duration {
    Duration::days(30)
}

/// How to choose one job out of a filtered, creation-ordered list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobSelection {
    /// Position in the list returned by [`JobService::list_recent`].
    ByIndex(usize),
    /// Maximum creation timestamp; the first one wins ties.
    MostRecent,
}

/// Apply `selection` to jobs ordered as [`JobService::list_recent`] returns them.
pub fn select_job(jobs: &[Job], selection: JobSelection) -> Option<&Job> {
    match selection {
        JobSelection::ByIndex(index) => jobs.get(index),
        JobSelection::MostRecent => jobs.iter().fold(None, |best: Option<&Job>, job| match best {
            Some(current) if current.creation_date >= job.creation_date => Some(current),
            _ => Some(job),
        }),
    }
}

/// Keep jobs of `job_type` created at or after `cutoff`, oldest first.
pub fn filter_recent(mut jobs: Vec<Job>, job_type: JobType, cutoff: DateTime<Utc>) -> Vec<Job> {
    jobs.retain(|job| job.job_type == job_type && job.creation_date >= cutoff);
    // Stable: equal timestamps keep the service's order.
    jobs.sort_by_key(|job| job.creation_date);
    jobs
}

#[derive(Clone)]
pub struct JobService {
    api: Arc<dyn GlacierApi>,
}

impl JobService {
    pub fn new(api: Arc<dyn GlacierApi>) -> Self {
        Self { api }
    }

    pub async fn initiate(&self, vault: &str, request: &JobRequest) -> GlacierResult<String> {
        let job_id = self.api.initiate_job(vault, request).await?;
        info!(
            "initiated {} job {} in vault {}",
            request.job_type(),
            job_id,
            vault
        );
        Ok(job_id)
    }

    /// Start an inventory job after checking that the vault exists.
    pub async fn initiate_inventory(&self, vault: &str) -> GlacierResult<String> {
        let vaults = self.api.list_vaults().await?;
        if !vaults.iter().any(|v| v.name == vault) {
            return Err(GlacierError::VaultNotFound(vault.to_string()));
        }
        self.initiate(vault, &JobRequest::Inventory).await
    }

    pub async fn describe(&self, vault: &str, job_id: &str) -> GlacierResult<Job> {
        self.api.describe_job(vault, job_id).await
    }

    /// Every job the service still reports for the vault.
    pub async fn list(&self, vault: &str) -> GlacierResult<Vec<Job>> {
        self.api.list_jobs(vault).await
    }

    /// Jobs of `job_type` created within `window` of now, oldest first.
    pub async fn list_recent(
        &self,
        vault: &str,
        job_type: JobType,
        window: Duration,
    ) -> GlacierResult<Vec<Job>> {
        let jobs = self.api.list_jobs(vault).await?;
        let total = jobs.len();
        // Windows reaching past the earliest representable instant keep everything.
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = filter_recent(jobs, job_type, cutoff);
        debug!(
            "{} of {} jobs in {} are recent {} jobs",
            recent.len(),
            total,
            vault,
            job_type
        );
        Ok(recent)
    }

    /// The newest succeeded job of `job_type` within `window`, if any.
    pub async fn latest_succeeded(
        &self,
        vault: &str,
        job_type: JobType,
        window: Duration,
    ) -> GlacierResult<Option<Job>> {
        let mut jobs = self.list_recent(vault, job_type, window).await?;
        jobs.retain(Job::is_succeeded);
        Ok(select_job(&jobs, JobSelection::MostRecent).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::testing::FakeGlacier, models::job::JobStatus};

    fn job(id: &str, job_type: JobType, age: Duration) -> Job {
        Job {
            job_id: id.to_string(),
            job_type,
            status: JobStatus::Succeeded,
            creation_date: Utc::now() - age,
            completion_date: None,
            archive_id: None,
            status_message: None,
        }
    }

    #[test]
    fn most_recent_picks_max_creation_and_first_on_ties() {
        let now = Utc::now();
        let mut a = job("a", JobType::InventoryRetrieval, Duration::zero());
        let mut b = job("b", JobType::InventoryRetrieval, Duration::zero());
        let c = job("c", JobType::InventoryRetrieval, Duration::days(2));
        a.creation_date = now;
        b.creation_date = now;

        let jobs = vec![c.clone(), a.clone(), b.clone()];
        assert_eq!(select_job(&jobs, JobSelection::MostRecent).unwrap().job_id, "a");
        assert_eq!(select_job(&jobs, JobSelection::ByIndex(0)).unwrap().job_id, "c");
        assert!(select_job(&jobs, JobSelection::ByIndex(3)).is_none());
        assert!(select_job(&[], JobSelection::MostRecent).is_none());
    }

    #[test]
    fn filter_applies_cutoff_and_type_and_orders_oldest_first() {
        let jobs = vec![
            job("new", JobType::InventoryRetrieval, Duration::hours(1)),
            job("ancient", JobType::InventoryRetrieval, Duration::days(31)),
            job("archive", JobType::ArchiveRetrieval, Duration::hours(2)),
            job("older", JobType::InventoryRetrieval, Duration::days(29)),
        ];

        let recent = filter_recent(
            jobs,
            JobType::InventoryRetrieval,
            Utc::now() - default_job_window(),
        );
        let ids: Vec<&str> = recent.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["older", "new"]);
    }

    #[tokio::test]
    async fn latest_succeeded_skips_unfinished_jobs() {
        let mut running = job("running", JobType::ArchiveRetrieval, Duration::minutes(1));
        running.status = JobStatus::InProgress;
        let fake = FakeGlacier::default()
            .with_job(job("old", JobType::ArchiveRetrieval, Duration::days(3)), b"")
            .with_job(job("fresh", JobType::ArchiveRetrieval, Duration::hours(3)), b"")
            .with_job(running, b"")
            .with_job(job("inv", JobType::InventoryRetrieval, Duration::minutes(5)), b"");
        let service = JobService::new(Arc::new(fake));

        let picked = service
            .latest_succeeded("v", JobType::ArchiveRetrieval, default_job_window())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.job_id, "fresh");

        let none = service
            .latest_succeeded("v", JobType::ArchiveRetrieval, Duration::minutes(30))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn oversized_window_lists_every_job_of_the_type() {
        let fake = FakeGlacier::default()
            .with_job(job("a", JobType::InventoryRetrieval, Duration::days(400)), b"")
            .with_job(job("b", JobType::InventoryRetrieval, Duration::hours(1)), b"")
            .with_job(job("c", JobType::ArchiveRetrieval, Duration::hours(1)), b"");
        let service = JobService::new(Arc::new(fake));

        let recent = service
            .list_recent("v", JobType::InventoryRetrieval, Duration::days(100_000_000))
            .await
            .unwrap();
        let ids: Vec<&str> = recent.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn inventory_requires_existing_vault() {
        let fake = Arc::new(FakeGlacier::default().with_vault("photos"));
        let service = JobService::new(fake.clone());

        let err = service.initiate_inventory("missing").await.unwrap_err();
        assert!(matches!(err, GlacierError::VaultNotFound(ref name) if name == "missing"));

        assert_eq!(service.initiate_inventory("photos").await.unwrap(), "job-new");
        assert_eq!(
            fake.calls(),
            vec!["list_vaults", "list_vaults", "initiate_job:inventory-retrieval"]
        );
    }
}
