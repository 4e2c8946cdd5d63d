//! The remote archival service as seen by the client.
//!
//! [`GlacierApi`] is the only seam between the upload/job logic and the
//! service. [`aws::AwsGlacier`] talks to the real service; [`local::LocalGlacier`]
//! emulates it on local disk for dry runs and tests.

pub mod aws;
pub mod local;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;

use crate::{
    errors::GlacierResult,
    models::{
        archive::{ArchiveCreated, DeleteOutcome},
        job::{Job, JobRequest},
        multipart::ByteRange,
        vault::Vault,
    },
};

/// Streamed body of a job's output.
pub type JobOutput = BoxStream<'static, io::Result<Bytes>>;

#[async_trait]
pub trait GlacierApi: Send + Sync {
    async fn list_vaults(&self) -> GlacierResult<Vec<Vault>>;

    /// Returns the upload id of the new session.
    async fn initiate_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> GlacierResult<String>;

    /// Upload one part. `checksum` is the tree hash of `body`; the service
    /// echoes back the checksum it computed.
    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        checksum: &str,
        body: Bytes,
    ) -> GlacierResult<String>;

    async fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> GlacierResult<ArchiveCreated>;

    async fn abort_multipart_upload(&self, vault: &str, upload_id: &str) -> GlacierResult<()>;

    async fn upload_archive(
        &self,
        vault: &str,
        description: &str,
        checksum: &str,
        body: Bytes,
    ) -> GlacierResult<ArchiveCreated>;

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> GlacierResult<DeleteOutcome>;

    /// Returns the job id.
    async fn initiate_job(&self, vault: &str, request: &JobRequest) -> GlacierResult<String>;

    async fn describe_job(&self, vault: &str, job_id: &str) -> GlacierResult<Job>;

    async fn list_jobs(&self, vault: &str) -> GlacierResult<Vec<Job>>;

    async fn get_job_output(&self, vault: &str, job_id: &str) -> GlacierResult<JobOutput>;
}
