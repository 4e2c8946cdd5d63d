//! Archive uploads: the multipart session state machine and the
//! single-request upload.
//!
//! A multipart upload is `initiate -> upload parts in file order -> complete`.
//! [`MultipartSession`] enforces that parts tile the file exactly and that
//! the service agrees with the client-side tree hash. [`UploadService`]
//! drives a session over a file and guarantees the abort-or-complete
//! contract: any failure after initiation triggers exactly one abort
//! attempt, whose outcome is logged but never replaces the original error.

use bytes::Bytes;
use serde_json::json;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs::{self, File};
use tracing::{debug, info, warn};

use crate::{
    backend::GlacierApi,
    errors::{GlacierError, GlacierResult},
    models::{
        archive::{Archive, ArchiveCreated},
        multipart::{ByteRange, PartRecord},
    },
    services::{
        audit_log::AuditLog,
        chunker::{ChunkReader, DEFAULT_PART_SIZE},
        tree_hash::{tree_hash, tree_hash_file},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Completed,
    Aborted,
}

/// Client side of one multipart upload.
pub struct MultipartSession<'a> {
    api: &'a dyn GlacierApi,
    vault: String,
    upload_id: String,
    part_size: u64,
    file_size: u64,
    offset: u64,
    /// Set once a part shorter than `part_size` was sent; it must be the last.
    saw_short_part: bool,
    parts: Vec<PartRecord>,
    state: SessionState,
}

impl<'a> MultipartSession<'a> {
    /// Initiate a session on the service.
    pub async fn begin(
        api: &'a dyn GlacierApi,
        vault: &str,
        file_size: u64,
        part_size: u64,
        description: &str,
    ) -> GlacierResult<Self> {
        let upload_id = api
            .initiate_multipart_upload(vault, description, part_size)
            .await?;
        debug!(
            "initiated upload {} of {} bytes into {} ({} byte parts)",
            upload_id, file_size, vault, part_size
        );

        Ok(Self {
            api,
            vault: vault.to_string(),
            upload_id,
            part_size,
            file_size,
            offset: 0,
            saw_short_part: false,
            parts: Vec::new(),
            state: SessionState::Open,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Bytes acknowledged so far.
    pub fn uploaded(&self) -> u64 {
        self.offset
    }

    fn ensure_open(&self, operation: &str) -> GlacierResult<()> {
        match self.state {
            SessionState::Open => Ok(()),
            state => Err(GlacierError::service(
                operation,
                format!("upload `{}` is no longer open ({:?})", self.upload_id, state),
            )),
        }
    }

    /// Upload the next contiguous range starting at `offset`.
    pub async fn put_part(&mut self, offset: u64, data: Bytes) -> GlacierResult<&PartRecord> {
        self.ensure_open("upload_multipart_part")?;

        let len = data.len() as u64;
        let out_of_order = offset != self.offset || self.saw_short_part;
        let past_end = offset.checked_add(len).is_none_or(|end| end > self.file_size);
        if out_of_order || len == 0 || len > self.part_size || past_end {
            return Err(GlacierError::InvalidPartRange {
                expected: self.offset,
                actual: offset,
            });
        }

        let range = ByteRange::new(offset, len);
        let checksum = tree_hash(&data).to_hex();
        let acknowledged = self
            .api
            .upload_part(&self.vault, &self.upload_id, range, &checksum, data)
            .await?;
        if acknowledged != checksum {
            return Err(GlacierError::ChecksumMismatch {
                expected: checksum,
                actual: acknowledged,
            });
        }

        self.offset += len;
        self.saw_short_part = len < self.part_size;
        self.parts.push(PartRecord {
            part_number: self.parts.len() as u32 + 1,
            range,
            checksum,
        });
        Ok(&self.parts[self.parts.len() - 1])
    }

    /// Finalize the archive. `checksum` is the whole-file tree hash.
    pub async fn complete(
        &mut self,
        total_size: u64,
        checksum: &str,
    ) -> GlacierResult<ArchiveCreated> {
        self.ensure_open("complete_multipart_upload")?;
        if self.offset != total_size || total_size != self.file_size {
            return Err(GlacierError::IncompleteUpload {
                uploaded: self.offset,
                expected: total_size,
            });
        }

        let created = self
            .api
            .complete_multipart_upload(&self.vault, &self.upload_id, total_size, checksum)
            .await?;
        if let Some(remote) = created.checksum.as_deref() {
            if remote != checksum {
                return Err(GlacierError::ChecksumMismatch {
                    expected: checksum.to_string(),
                    actual: remote.to_string(),
                });
            }
        }

        self.state = SessionState::Completed;
        Ok(created)
    }

    /// Release the session on the service. Returns `Ok(false)` without a
    /// request when the session already completed or was aborted.
    pub async fn abort(&mut self) -> GlacierResult<bool> {
        if self.state != SessionState::Open {
            return Ok(false);
        }
        self.state = SessionState::Aborted;
        self.api
            .abort_multipart_upload(&self.vault, &self.upload_id)
            .await?;
        Ok(true)
    }
}

/// Result of one upload attempt together with where its audit log went.
#[derive(Debug)]
pub struct UploadOutcome {
    pub result: GlacierResult<Archive>,
    pub audit_log: io::Result<PathBuf>,
}

/// Reports `(bytes uploaded, total bytes)` after every part.
pub type ProgressFn<'p> = &'p mut (dyn FnMut(u64, u64) + Send);

#[derive(Clone)]
pub struct UploadService {
    api: Arc<dyn GlacierApi>,
    log_dir: PathBuf,
    part_size: u64,
}

fn description_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Record a failed step and hand the error back.
fn noted(audit: &mut AuditLog, step: &str, err: GlacierError) -> GlacierError {
    audit.failure(step, &err);
    err
}

impl UploadService {
    pub fn new(api: Arc<dyn GlacierApi>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            log_dir: log_dir.into(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Upload `path` into `vault` with the multipart protocol.
    pub async fn upload_multipart(
        &self,
        vault: &str,
        path: &Path,
        progress: ProgressFn<'_>,
    ) -> UploadOutcome {
        let mut audit = AuditLog::new(&self.log_dir, path, vault);
        debug!("recording upload of {} in {}", path.display(), audit.path().display());
        let result = self
            .run_multipart(vault, path, &mut audit, progress)
            .await;
        let audit_log = audit.finish().await;
        UploadOutcome { result, audit_log }
    }

    async fn run_multipart(
        &self,
        vault: &str,
        path: &Path,
        audit: &mut AuditLog,
        progress: ProgressFn<'_>,
    ) -> GlacierResult<Archive> {
        let description = description_for(path);
        let (checksum, file_size) = tree_hash_file(path)
            .await
            .map_err(|e| noted(audit, "error", e.into()))?;
        let checksum = checksum.to_hex();
        audit.set_checksum(&checksum);
        audit.set_file_size(file_size);
        audit.set_part_size(self.part_size);
        info!(
            "uploading {} ({} bytes, tree hash {}) to {}",
            path.display(),
            file_size,
            checksum,
            vault
        );

        let mut session =
            MultipartSession::begin(&*self.api, vault, file_size, self.part_size, &description)
                .await
                .map_err(|e| noted(audit, "initiate_multipart_upload", e))?;
        audit.set_upload_id(session.upload_id());
        audit.success(
            "initiate_multipart_upload",
            json!({ "upload_id": session.upload_id() }),
        );

        match self
            .transfer(&mut session, path, file_size, &checksum, audit, progress)
            .await
        {
            Ok(created) => Ok(Archive {
                archive_id: created.archive_id,
                description,
                size: file_size,
                checksum,
                location: created.location,
            }),
            Err(err) => {
                warn!("upload {} failed: {}", session.upload_id(), err);
                match session.abort().await {
                    Ok(_) => audit.success(
                        "abort_multipart_upload",
                        json!({ "upload_id": session.upload_id() }),
                    ),
                    Err(abort_err) => {
                        warn!("abort of {} failed: {}", session.upload_id(), abort_err);
                        audit.failure("abort_multipart_upload", &abort_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Stream the parts and complete. Any error returned here leaves the
    /// session open for the caller to abort.
    async fn transfer(
        &self,
        session: &mut MultipartSession<'_>,
        path: &Path,
        file_size: u64,
        checksum: &str,
        audit: &mut AuditLog,
        progress: ProgressFn<'_>,
    ) -> GlacierResult<ArchiveCreated> {
        let file = File::open(path)
            .await
            .map_err(|e| noted(audit, "error", e.into()))?;
        let mut reader = ChunkReader::new(file, session.part_size());

        while let Some(part) = reader
            .next_part()
            .await
            .map_err(|e| noted(audit, "error", e.into()))?
        {
            let step = format!("part_{}", part.number);
            match session.put_part(part.offset, part.data).await {
                Ok(record) => audit.success(step, record),
                Err(err) => return Err(noted(audit, &step, err)),
            }
            progress(session.uploaded(), file_size);
        }

        let created = session
            .complete(file_size, checksum)
            .await
            .map_err(|e| noted(audit, "complete_multipart_upload", e))?;
        audit.success("complete_multipart_upload", &created);
        Ok(created)
    }

    /// Upload `path` in a single request. No retry on failure.
    pub async fn upload_single(&self, vault: &str, path: &Path) -> UploadOutcome {
        let mut audit = AuditLog::new(&self.log_dir, path, vault);
        debug!("recording upload of {} in {}", path.display(), audit.path().display());
        let result = self.run_single(vault, path, &mut audit).await;
        if let Err(err) = &result {
            audit.failure("error", err);
        }
        let audit_log = audit.finish().await;
        UploadOutcome { result, audit_log }
    }

    async fn run_single(
        &self,
        vault: &str,
        path: &Path,
        audit: &mut AuditLog,
    ) -> GlacierResult<Archive> {
        let description = description_for(path);
        let body = Bytes::from(fs::read(path).await?);
        let checksum = tree_hash(&body).to_hex();
        let size = body.len() as u64;
        audit.set_checksum(&checksum);
        audit.set_file_size(size);
        info!("uploading {} ({} bytes) to {}", path.display(), size, vault);

        let created = self
            .api
            .upload_archive(vault, &description, &checksum, body)
            .await?;
        audit.success("upload_archive", &created);
        if let Some(remote) = created.checksum.as_deref() {
            if remote != checksum {
                return Err(GlacierError::ChecksumMismatch {
                    expected: checksum,
                    actual: remote.to_string(),
                });
            }
        }

        Ok(Archive {
            archive_id: created.archive_id,
            description,
            size,
            checksum,
            location: created.location,
        })
    }

    /// Abort a session by id, e.g. one left behind by a crashed run.
    pub async fn abort_upload(&self, vault: &str, upload_id: &str) -> GlacierResult<()> {
        self.api.abort_multipart_upload(vault, upload_id).await?;
        info!("aborted upload {} in {}", upload_id, vault);
        Ok(())
    }
}
