//! Scriptable in-memory [`GlacierApi`] for exercising failure paths.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use super::{GlacierApi, JobOutput};
use crate::{
    errors::{GlacierError, GlacierResult},
    models::{
        archive::{ArchiveCreated, DeleteOutcome},
        job::{Job, JobRequest},
        multipart::ByteRange,
        vault::Vault,
    },
    services::tree_hash::{TreeHasher, tree_hash},
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    parts_seen: u32,
    body: Vec<u8>,
    jobs: Vec<Job>,
    outputs: HashMap<String, Vec<u8>>,
    archives: HashSet<String>,
}

#[derive(Default)]
pub struct FakeGlacier {
    vaults: Vec<Vault>,
    fail_part: Option<u32>,
    fail_complete: bool,
    fail_abort: bool,
    fail_upload: bool,
    bad_part_checksum: bool,
    fail_deletes: HashSet<String>,
    broken_outputs: HashSet<String>,
    state: Mutex<State>,
}

impl FakeGlacier {
    pub fn failing_part(mut self, part_number: u32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn echoing_bad_checksum(mut self) -> Self {
        self.bad_part_checksum = true;
        self
    }

    pub fn failing_delete(mut self, archive_id: &str) -> Self {
        self.fail_deletes.insert(archive_id.to_string());
        self
    }

    /// The job's output stream breaks after its first chunk.
    pub fn breaking_output(mut self, job_id: &str) -> Self {
        self.broken_outputs.insert(job_id.to_string());
        self
    }

    pub fn with_vault(mut self, name: &str) -> Self {
        self.vaults.push(Vault {
            name: name.to_string(),
            arn: format!("arn:test:glacier:vaults/{}", name),
            creation_date: None,
            number_of_archives: None,
            size_in_bytes: None,
        });
        self
    }

    pub fn with_archives(self, ids: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .archives
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    /// Register a job; `output` is what `get_job_output` streams back.
    pub fn with_job(self, job: Job, output: &[u8]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.outputs.insert(job.job_id.clone(), output.to_vec());
            state.jobs.push(job);
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

#[async_trait]
impl GlacierApi for FakeGlacier {
    async fn list_vaults(&self) -> GlacierResult<Vec<Vault>> {
        self.record("list_vaults");
        Ok(self.vaults.clone())
    }

    async fn initiate_multipart_upload(
        &self,
        _vault: &str,
        _description: &str,
        part_size: u64,
    ) -> GlacierResult<String> {
        self.record(format!("initiate_multipart_upload:{}", part_size));
        Ok("upload-1".into())
    }

    async fn upload_part(
        &self,
        _vault: &str,
        _upload_id: &str,
        range: ByteRange,
        _checksum: &str,
        body: Bytes,
    ) -> GlacierResult<String> {
        self.record(format!("upload_part:{}", range.content_range()));
        let mut state = self.state.lock().unwrap();
        state.parts_seen += 1;
        if self.fail_part == Some(state.parts_seen) {
            return Err(GlacierError::transfer(
                "upload_multipart_part",
                "connection reset by peer",
            ));
        }
        state.body.extend_from_slice(&body);
        if self.bad_part_checksum {
            return Ok("0".repeat(64));
        }
        Ok(tree_hash(&body).to_hex())
    }

    async fn complete_multipart_upload(
        &self,
        _vault: &str,
        _upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> GlacierResult<ArchiveCreated> {
        self.record(format!("complete_multipart_upload:{}", archive_size));
        if self.fail_complete {
            return Err(GlacierError::service(
                "complete_multipart_upload",
                "InvalidParameterValueException",
            ));
        }
        let mut hasher = TreeHasher::new();
        hasher.update(&self.state.lock().unwrap().body);
        let computed = hasher.finish().to_hex();
        if computed != checksum {
            return Err(GlacierError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual: computed,
            });
        }
        Ok(ArchiveCreated {
            archive_id: "archive-1".into(),
            checksum: Some(computed),
            location: None,
        })
    }

    async fn abort_multipart_upload(&self, _vault: &str, upload_id: &str) -> GlacierResult<()> {
        self.record(format!("abort_multipart_upload:{}", upload_id));
        if self.fail_abort {
            return Err(GlacierError::transfer(
                "abort_multipart_upload",
                "timed out",
            ));
        }
        Ok(())
    }

    async fn upload_archive(
        &self,
        _vault: &str,
        _description: &str,
        checksum: &str,
        _body: Bytes,
    ) -> GlacierResult<ArchiveCreated> {
        self.record("upload_archive");
        if self.fail_upload {
            return Err(GlacierError::service(
                "upload_archive",
                "RequestTimeoutException",
            ));
        }
        Ok(ArchiveCreated {
            archive_id: "archive-single".into(),
            checksum: Some(checksum.to_string()),
            location: None,
        })
    }

    async fn delete_archive(&self, _vault: &str, archive_id: &str) -> GlacierResult<DeleteOutcome> {
        self.record(format!("delete_archive:{}", archive_id));
        if self.fail_deletes.contains(archive_id) {
            return Err(GlacierError::service("delete_archive", "ServiceUnavailable"));
        }
        if self.state.lock().unwrap().archives.remove(archive_id) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn initiate_job(&self, _vault: &str, request: &JobRequest) -> GlacierResult<String> {
        self.record(format!("initiate_job:{}", request.job_type()));
        Ok("job-new".into())
    }

    async fn describe_job(&self, _vault: &str, job_id: &str) -> GlacierResult<Job> {
        self.record(format!("describe_job:{}", job_id));
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .cloned()
            .ok_or_else(|| GlacierError::service("describe_job", "ResourceNotFoundException"))
    }

    async fn list_jobs(&self, _vault: &str) -> GlacierResult<Vec<Job>> {
        self.record("list_jobs");
        Ok(self.state.lock().unwrap().jobs.clone())
    }

    async fn get_job_output(&self, _vault: &str, job_id: &str) -> GlacierResult<JobOutput> {
        self.record(format!("get_job_output:{}", job_id));
        let body = self
            .state
            .lock()
            .unwrap()
            .outputs
            .get(job_id)
            .cloned()
            .ok_or_else(|| GlacierError::service("get_job_output", "ResourceNotFoundException"))?;

        // Split in two so consumers have to handle multiple chunks.
        let mid = body.len() / 2;
        let second = if self.broken_outputs.contains(job_id) {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
        } else {
            Ok(Bytes::copy_from_slice(&body[mid..]))
        };
        let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::copy_from_slice(&body[..mid])), second];
        Ok(stream::iter(chunks).boxed())
    }
}
