//! Glacier client backed by the AWS SDK.
//!
//! Wraps `aws_sdk_glacier::Client` bound to one region and credential
//! profile. All calls use the `-` account id, i.e. the account that owns
//! the credentials.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_glacier::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{ActionCode, JobParameters, StatusCode},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{error::Error as StdError, fmt::Debug, io};
use tracing::{debug, warn};

use super::{GlacierApi, JobOutput};
use crate::{
    errors::{GlacierError, GlacierResult},
    models::{
        archive::{ArchiveCreated, DeleteOutcome},
        job::{Job, JobRequest, JobStatus, JobType},
        multipart::ByteRange,
        vault::Vault,
    },
};

const ACCOUNT_ID: &str = "-";

#[derive(Clone)]
pub struct AwsGlacier {
    client: Client,
}

impl AwsGlacier {
    /// Build a client from the default credential chain, optionally pinned
    /// to a named profile.
    pub async fn connect(region: &str, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_owned()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        debug!("glacier client configured for region {}", region);

        Self {
            client: Client::new(&sdk_config),
        }
    }
}

/// Map an SDK failure onto the error taxonomy: anything the service answered
/// is a rejection, anything that never got a proper answer is a transfer
/// failure.
fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> GlacierError
where
    E: StdError + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) | SdkError::ConstructionFailure(_) => {
            GlacierError::service(operation, message)
        }
        _ => GlacierError::transfer(operation, message),
    }
}

/// Like [`sdk_error`], but recognises the service refusing our checksum.
fn integrity_error<E, R>(operation: &str, expected: &str, err: SdkError<E, R>) -> GlacierError
where
    E: StdError + ProvideErrorMetadata + 'static,
    R: Debug,
{
    let checksum_rejected = err
        .as_service_error()
        .and_then(|e| e.message())
        .is_some_and(|m| m.to_ascii_lowercase().contains("checksum"));
    if checksum_rejected {
        return GlacierError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: "rejected by service".into(),
        };
    }
    sdk_error(operation, err)
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn missing(operation: &str, field: &str) -> GlacierError {
    GlacierError::service(operation, format!("response is missing `{}`", field))
}

/// Fields shared by `DescribeJobOutput` and `GlacierJobDescription`.
struct JobFields<'a> {
    job_id: Option<&'a str>,
    action: Option<&'a ActionCode>,
    status: Option<&'a StatusCode>,
    creation_date: Option<&'a str>,
    completion_date: Option<&'a str>,
    archive_id: Option<&'a str>,
    status_message: Option<&'a str>,
}

impl JobFields<'_> {
    /// `Ok(None)` for job kinds this client does not manage (e.g. select).
    fn into_job(self, operation: &str) -> GlacierResult<Option<Job>> {
        let Some(action) = self.action else {
            return Err(missing(operation, "Action"));
        };
        let job_type = match action.as_str().parse::<JobType>() {
            Ok(job_type) => job_type,
            Err(reason) => {
                debug!("skipping job: {}", reason);
                return Ok(None);
            }
        };
        let status = self
            .status
            .ok_or_else(|| missing(operation, "StatusCode"))?
            .as_str()
            .parse::<JobStatus>()
            .map_err(|reason| GlacierError::service(operation, reason))?;
        let creation_date =
            parse_date(self.creation_date).ok_or_else(|| missing(operation, "CreationDate"))?;

        Ok(Some(Job {
            job_id: self
                .job_id
                .ok_or_else(|| missing(operation, "JobId"))?
                .to_string(),
            job_type,
            status,
            creation_date,
            completion_date: parse_date(self.completion_date),
            archive_id: self.archive_id.map(str::to_owned),
            status_message: self.status_message.map(str::to_owned),
        }))
    }
}

#[async_trait]
impl GlacierApi for AwsGlacier {
    async fn list_vaults(&self) -> GlacierResult<Vec<Vault>> {
        let mut vaults = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_vaults()
                .account_id(ACCOUNT_ID)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| sdk_error("list_vaults", e))?;

            for vault in output.vault_list() {
                vaults.push(Vault {
                    name: vault.vault_name().unwrap_or_default().to_string(),
                    arn: vault.vault_arn().unwrap_or_default().to_string(),
                    creation_date: vault.creation_date().map(str::to_owned),
                    number_of_archives: vault.number_of_archives().into(),
                    size_in_bytes: vault.size_in_bytes().into(),
                });
            }

            marker = output.marker().map(str::to_owned);
            if marker.is_none() {
                break;
            }
        }
        Ok(vaults)
    }

    async fn initiate_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> GlacierResult<String> {
        let output = self
            .client
            .initiate_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .archive_description(description)
            .part_size(part_size.to_string())
            .send()
            .await
            .map_err(|e| sdk_error("initiate_multipart_upload", e))?;

        output
            .upload_id()
            .map(str::to_owned)
            .ok_or_else(|| missing("initiate_multipart_upload", "uploadId"))
    }

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        checksum: &str,
        body: Bytes,
    ) -> GlacierResult<String> {
        let output = self
            .client
            .upload_multipart_part()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .range(range.content_range())
            .checksum(checksum)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| integrity_error("upload_multipart_part", checksum, e))?;

        Ok(output.checksum().unwrap_or(checksum).to_string())
    }

    async fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> GlacierResult<ArchiveCreated> {
        let output = self
            .client
            .complete_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .archive_size(archive_size.to_string())
            .checksum(checksum)
            .send()
            .await
            .map_err(|e| integrity_error("complete_multipart_upload", checksum, e))?;

        Ok(ArchiveCreated {
            archive_id: output
                .archive_id()
                .ok_or_else(|| missing("complete_multipart_upload", "archiveId"))?
                .to_string(),
            checksum: output.checksum().map(str::to_owned),
            location: output.location().map(str::to_owned),
        })
    }

    async fn abort_multipart_upload(&self, vault: &str, upload_id: &str) -> GlacierResult<()> {
        self.client
            .abort_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| sdk_error("abort_multipart_upload", e))?;
        Ok(())
    }

    async fn upload_archive(
        &self,
        vault: &str,
        description: &str,
        checksum: &str,
        body: Bytes,
    ) -> GlacierResult<ArchiveCreated> {
        let output = self
            .client
            .upload_archive()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .archive_description(description)
            .checksum(checksum)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| integrity_error("upload_archive", checksum, e))?;

        Ok(ArchiveCreated {
            archive_id: output
                .archive_id()
                .ok_or_else(|| missing("upload_archive", "archiveId"))?
                .to_string(),
            checksum: output.checksum().map(str::to_owned),
            location: output.location().map(str::to_owned),
        })
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> GlacierResult<DeleteOutcome> {
        match self
            .client
            .delete_archive()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .archive_id(archive_id)
            .send()
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|e| e.code())
                    .is_some_and(|code| code == "ResourceNotFoundException") =>
            {
                warn!("archive {} not found in vault {}", archive_id, vault);
                Ok(DeleteOutcome::NotFound)
            }
            Err(err) => Err(sdk_error("delete_archive", err)),
        }
    }

    async fn initiate_job(&self, vault: &str, request: &JobRequest) -> GlacierResult<String> {
        let mut params = JobParameters::builder().r#type(request.job_type().as_param());
        params = match request {
            JobRequest::Inventory => params.format("JSON"),
            JobRequest::Archive { archive_id } => params.archive_id(archive_id),
        };

        let output = self
            .client
            .initiate_job()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .job_parameters(params.build())
            .send()
            .await
            .map_err(|e| sdk_error("initiate_job", e))?;

        output
            .job_id()
            .map(str::to_owned)
            .ok_or_else(|| missing("initiate_job", "jobId"))
    }

    async fn describe_job(&self, vault: &str, job_id: &str) -> GlacierResult<Job> {
        let output = self
            .client
            .describe_job()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .job_id(job_id)
            .send()
            .await
            .map_err(|e| sdk_error("describe_job", e))?;

        let fields = JobFields {
            job_id: output.job_id(),
            action: output.action(),
            status: output.status_code(),
            creation_date: output.creation_date(),
            completion_date: output.completion_date(),
            archive_id: output.archive_id(),
            status_message: output.status_message(),
        };
        fields.into_job("describe_job")?.ok_or_else(|| {
            GlacierError::service(
                "describe_job",
                format!("job `{}` is not a retrieval job", job_id),
            )
        })
    }

    async fn list_jobs(&self, vault: &str) -> GlacierResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_jobs()
                .account_id(ACCOUNT_ID)
                .vault_name(vault)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| sdk_error("list_jobs", e))?;

            for job in output.job_list() {
                let fields = JobFields {
                    job_id: job.job_id(),
                    action: job.action(),
                    status: job.status_code(),
                    creation_date: job.creation_date(),
                    completion_date: job.completion_date(),
                    archive_id: job.archive_id(),
                    status_message: job.status_message(),
                };
                if let Some(job) = fields.into_job("list_jobs")? {
                    jobs.push(job);
                }
            }

            marker = output.marker().map(str::to_owned);
            if marker.is_none() {
                break;
            }
        }
        Ok(jobs)
    }

    async fn get_job_output(&self, vault: &str, job_id: &str) -> GlacierResult<JobOutput> {
        let output = self
            .client
            .get_job_output()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .job_id(job_id)
            .send()
            .await
            .map_err(|e| sdk_error("get_job_output", e))?;

        let body = stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(err) => Err(io::Error::other(err)),
            }
        });
        Ok(body.boxed())
    }
}
