//! LocalGlacier: an on-disk emulator of the archival service.
//!
//! Metadata (vaults, archives, upload sessions, parts, jobs) lives in
//! SQLite; payloads live on disk sharded beneath
//! `base_path/{vault}/{shard}/{shard}/{archive_id}`. It enforces the same
//! rules the real service does for part sizes, byte ranges and tree hashes,
//! so uploads can be rehearsed without an account. Jobs become ready after
//! a configurable delay (immediately by default) and capture their output
//! at initiation, which gives inventories the same snapshot semantics.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::{GlacierApi, JobOutput};
use crate::{
    errors::{GlacierError, GlacierResult},
    models::{
        archive::{ArchiveCreated, DeleteOutcome},
        inventory::{ArchiveSummary, Inventory},
        job::{Job, JobRequest, JobStatus, JobType},
        multipart::ByteRange,
        vault::Vault,
    },
    services::{
        chunker::{MAX_PART_SIZE, MIN_PART_SIZE},
        tree_hash::{TreeHasher, tree_hash},
    },
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const VAULT_NAME_MAX_LEN: usize = 255;
const UPLOADS_DIR: &str = ".uploads";
const JOBS_DIR: &str = ".jobs";

#[derive(Clone)]
pub struct LocalGlacier {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads, parts and job outputs live.
    pub base_path: PathBuf,

    /// How long a new job stays `InProgress`.
    pub job_delay: Duration,
}

#[derive(FromRow)]
struct UploadRow {
    description: String,
    part_size: i64,
}

#[derive(FromRow)]
struct PartRow {
    range_start: i64,
    range_end: i64,
}

#[derive(FromRow)]
struct ArchiveRow {
    archive_id: String,
    description: String,
    size_bytes: i64,
    tree_hash: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct JobRow {
    job_id: String,
    job_type: String,
    archive_id: Option<String>,
    created_at: DateTime<Utc>,
    ready_at: DateTime<Utc>,
    output_path: String,
}

impl JobRow {
    fn into_job(self, now: DateTime<Utc>) -> GlacierResult<Job> {
        let job_type = self
            .job_type
            .parse::<JobType>()
            .map_err(|reason| GlacierError::service("describe_job", reason))?;
        let ready = now >= self.ready_at;
        Ok(Job {
            job_id: self.job_id,
            job_type,
            status: if ready {
                JobStatus::Succeeded
            } else {
                JobStatus::InProgress
            },
            creation_date: self.created_at,
            completion_date: ready.then_some(self.ready_at),
            archive_id: self.archive_id,
            status_message: ready.then(|| "Succeeded".to_string()),
        })
    }
}

fn not_found(operation: &str, what: impl std::fmt::Display) -> GlacierError {
    GlacierError::service(operation, format!("ResourceNotFoundException: {}", what))
}

fn invalid(operation: &str, reason: impl std::fmt::Display) -> GlacierError {
    GlacierError::service(operation, format!("InvalidParameterValueException: {}", reason))
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl LocalGlacier {
    /// Open (or create) an emulator rooted at `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> GlacierResult<Self> {
        let base_path = data_dir.into();
        fs::create_dir_all(&base_path).await?;

        let db_path = base_path.join("meta.db");
        debug!("opening local vault metadata at {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let service = Self {
            db: Arc::new(pool),
            base_path,
            job_delay: Duration::zero(),
        };
        service.run_migrations().await?;
        Ok(service)
    }

    pub fn with_job_delay(mut self, delay: Duration) -> Self {
        self.job_delay = delay;
        self
    }

    /// Apply the embedded schema. Every statement is idempotent.
    async fn run_migrations(&self) -> GlacierResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Validate a vault name: 1-255 characters of `a-z`, `A-Z`, `0-9`,
    /// `_`, `-` and `.`.
    fn ensure_vault_name_safe(&self, name: &str) -> GlacierResult<()> {
        if name.is_empty() || name.len() > VAULT_NAME_MAX_LEN {
            return Err(invalid(
                "create_vault",
                "vault names must be between 1 and 255 characters",
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(invalid(
                "create_vault",
                "allowed characters are letters, digits, underscore, hyphen and period",
            ));
        }
        if name.starts_with('.') {
            return Err(invalid("create_vault", "vault names cannot start with a period"));
        }
        Ok(())
    }

    /// Create a vault. Creating an existing vault is a no-op, as on the
    /// real service.
    pub async fn create_vault(&self, name: &str) -> GlacierResult<Vault> {
        self.ensure_vault_name_safe(name)?;
        fs::create_dir_all(self.vault_root(name)).await?;

        let arn = format!("arn:local:glacier:local:000000000000:vaults/{}", name);
        sqlx::query(
            "INSERT INTO vaults (name, arn, creation_date) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(&arn)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.db)
        .await?;

        info!("created local vault {}", name);
        self.fetch_vault("create_vault", name).await
    }

    fn vault_root(&self, vault: &str) -> PathBuf {
        self.base_path.join(vault)
    }

    /// Two-level shard directories from MD5(vault/archive_id), keeping the
    /// number of files per directory small.
    fn archive_shards(vault: &str, archive_id: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", vault, archive_id));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn archive_path(&self, vault: &str, archive_id: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::archive_shards(vault, archive_id);
        let mut path = self.vault_root(vault);
        path.push(shard_a);
        path.push(shard_b);
        path.push(archive_id);
        path
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(UPLOADS_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, range_start: u64) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("{:020}.part", range_start))
    }

    async fn fetch_vault(&self, operation: &str, name: &str) -> GlacierResult<Vault> {
        sqlx::query_as::<_, Vault>(
            "SELECT v.name, v.arn, v.creation_date,
                    COUNT(a.archive_id) AS number_of_archives,
                    COALESCE(SUM(a.size_bytes), 0) AS size_in_bytes
             FROM vaults v
             LEFT JOIN archives a ON a.vault_name = v.name AND a.is_deleted = 0
             WHERE v.name = ?
             GROUP BY v.name, v.arn, v.creation_date",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| not_found(operation, format!("vault `{}`", name)))
    }

    async fn fetch_upload(&self, vault: &str, upload_id: &str) -> GlacierResult<UploadRow> {
        sqlx::query_as::<_, UploadRow>(
            "SELECT description, part_size FROM multipart_uploads
             WHERE upload_id = ? AND vault_name = ?",
        )
        .bind(upload_id)
        .bind(vault)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| not_found("multipart upload", format!("upload `{}`", upload_id)))
    }

    async fn fetch_job(&self, vault: &str, job_id: &str) -> GlacierResult<JobRow> {
        sqlx::query_as::<_, JobRow>(
            "SELECT job_id, job_type, archive_id, created_at, ready_at, output_path
             FROM jobs WHERE job_id = ? AND vault_name = ?",
        )
        .bind(job_id)
        .bind(vault)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| not_found("describe_job", format!("job `{}`", job_id)))
    }

    /// Write `data` to `path` through a temp file: write, fsync, rename.
    async fn write_durable(&self, path: &Path, data: &[u8]) -> GlacierResult<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            GlacierError::Io(io::Error::new(
                ErrorKind::Other,
                "payload path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(GlacierError::Io(err));
        }
        Ok(())
    }

    async fn insert_archive(
        &self,
        vault: &str,
        archive_id: &str,
        description: &str,
        size: u64,
        tree_hash: &str,
    ) -> GlacierResult<()> {
        sqlx::query(
            "INSERT INTO archives (archive_id, vault_name, description, size_bytes, tree_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(archive_id)
        .bind(vault)
        .bind(description)
        .bind(size as i64)
        .bind(tree_hash)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Serialize the vault's current archive list as an inventory document.
    async fn snapshot_inventory(&self, vault: &Vault) -> GlacierResult<Vec<u8>> {
        let rows = sqlx::query_as::<_, ArchiveRow>(
            "SELECT archive_id, description, size_bytes, tree_hash, created_at
             FROM archives WHERE vault_name = ? AND is_deleted = 0
             ORDER BY created_at ASC, archive_id ASC",
        )
        .bind(&vault.name)
        .fetch_all(&*self.db)
        .await?;

        let inventory = Inventory {
            vault_arn: Some(vault.arn.clone()),
            inventory_date: Some(Utc::now().to_rfc3339()),
            archive_list: rows
                .into_iter()
                .map(|row| ArchiveSummary {
                    archive_id: row.archive_id,
                    archive_description: row.description,
                    creation_date: Some(row.created_at.to_rfc3339()),
                    size: row.size_bytes as u64,
                    sha256_tree_hash: Some(row.tree_hash),
                })
                .collect(),
        };
        inventory.to_json()
    }

    /// Recursively remove empty directories up to `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn discard_upload(&self, upload_id: &str) -> GlacierResult<()> {
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&*self.db)
            .await?;

        match fs::remove_dir_all(self.upload_dir(upload_id)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(GlacierError::Io(err)),
        }
    }
}

#[async_trait]
impl GlacierApi for LocalGlacier {
    async fn list_vaults(&self) -> GlacierResult<Vec<Vault>> {
        let vaults = sqlx::query_as::<_, Vault>(
            "SELECT v.name, v.arn, v.creation_date,
                    COUNT(a.archive_id) AS number_of_archives,
                    COALESCE(SUM(a.size_bytes), 0) AS size_in_bytes
             FROM vaults v
             LEFT JOIN archives a ON a.vault_name = v.name AND a.is_deleted = 0
             GROUP BY v.name, v.arn, v.creation_date
             ORDER BY v.name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(vaults)
    }

    async fn initiate_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> GlacierResult<String> {
        const OP: &str = "initiate_multipart_upload";
        self.fetch_vault(OP, vault).await?;
        if !part_size.is_power_of_two() || !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
            return Err(invalid(
                OP,
                format!(
                    "part size {} must be a power of two between 1 MiB and 4 GiB",
                    part_size
                ),
            ));
        }

        let upload_id = new_id();
        sqlx::query(
            "INSERT INTO multipart_uploads (upload_id, vault_name, description, part_size, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&upload_id)
        .bind(vault)
        .bind(description)
        .bind(part_size as i64)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!("initiated local upload {} in vault {}", upload_id, vault);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: ByteRange,
        checksum: &str,
        body: Bytes,
    ) -> GlacierResult<String> {
        const OP: &str = "upload_multipart_part";
        let upload = self.fetch_upload(vault, upload_id).await?;
        let part_size = upload.part_size as u64;

        if body.len() as u64 != range.len() {
            return Err(invalid(
                OP,
                format!(
                    "range {} does not match body length {}",
                    range.content_range(),
                    body.len()
                ),
            ));
        }
        if range.start % part_size != 0 || range.len() > part_size {
            return Err(invalid(
                OP,
                format!(
                    "range {} is not aligned to part size {}",
                    range.content_range(),
                    part_size
                ),
            ));
        }

        let computed = tree_hash(&body).to_hex();
        if computed != checksum {
            return Err(GlacierError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual: computed,
            });
        }

        self.write_durable(&self.part_path(upload_id, range.start), &body)
            .await?;
        sqlx::query(
            "INSERT INTO multipart_parts (upload_id, range_start, range_end, tree_hash)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(upload_id, range_start) DO UPDATE SET
                range_end = excluded.range_end,
                tree_hash = excluded.tree_hash",
        )
        .bind(upload_id)
        .bind(range.start as i64)
        .bind(range.end as i64)
        .bind(&computed)
        .execute(&*self.db)
        .await?;

        Ok(computed)
    }

    async fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> GlacierResult<ArchiveCreated> {
        const OP: &str = "complete_multipart_upload";
        let upload = self.fetch_upload(vault, upload_id).await?;
        let part_size = upload.part_size as u64;

        let parts = sqlx::query_as::<_, PartRow>(
            "SELECT range_start, range_end FROM multipart_parts
             WHERE upload_id = ? ORDER BY range_start ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?;

        // Parts must tile [0, archive_size) exactly; only the last may be short.
        let mut expected_start = 0u64;
        for (index, part) in parts.iter().enumerate() {
            let range = ByteRange {
                start: part.range_start as u64,
                end: part.range_end as u64,
            };
            let is_last = index + 1 == parts.len();
            if range.start != expected_start || (!is_last && range.len() != part_size) {
                return Err(invalid(
                    OP,
                    format!("parts do not cover the archive at offset {}", expected_start),
                ));
            }
            expected_start = range.end + 1;
        }
        if expected_start != archive_size {
            return Err(invalid(
                OP,
                format!(
                    "uploaded parts total {} bytes, archive size is {}",
                    expected_start, archive_size
                ),
            ));
        }

        let mut hasher = TreeHasher::new();
        let mut payload = Vec::with_capacity(archive_size as usize);
        for part in &parts {
            let data = fs::read(self.part_path(upload_id, part.range_start as u64)).await?;
            hasher.update(&data);
            payload.extend_from_slice(&data);
        }
        let computed = hasher.finish().to_hex();
        if computed != checksum {
            return Err(GlacierError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual: computed,
            });
        }

        let archive_id = new_id();
        let path = self.archive_path(vault, &archive_id);
        self.write_durable(&path, &payload).await?;
        if let Err(err) = self
            .insert_archive(vault, &archive_id, &upload.description, archive_size, &computed)
            .await
        {
            let _ = fs::remove_file(&path).await;
            return Err(err);
        }
        self.discard_upload(upload_id).await?;

        info!("completed local upload {} as archive {}", upload_id, archive_id);
        Ok(ArchiveCreated {
            location: Some(format!("/{}/archives/{}", vault, archive_id)),
            archive_id,
            checksum: Some(computed),
        })
    }

    async fn abort_multipart_upload(&self, vault: &str, upload_id: &str) -> GlacierResult<()> {
        self.fetch_upload(vault, upload_id).await?;
        self.discard_upload(upload_id).await?;
        debug!("aborted local upload {}", upload_id);
        Ok(())
    }

    async fn upload_archive(
        &self,
        vault: &str,
        description: &str,
        checksum: &str,
        body: Bytes,
    ) -> GlacierResult<ArchiveCreated> {
        self.fetch_vault("upload_archive", vault).await?;

        let computed = tree_hash(&body).to_hex();
        if computed != checksum {
            return Err(GlacierError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual: computed,
            });
        }

        let archive_id = new_id();
        let path = self.archive_path(vault, &archive_id);
        self.write_durable(&path, &body).await?;
        if let Err(err) = self
            .insert_archive(vault, &archive_id, description, body.len() as u64, &computed)
            .await
        {
            let _ = fs::remove_file(&path).await;
            return Err(err);
        }

        Ok(ArchiveCreated {
            location: Some(format!("/{}/archives/{}", vault, archive_id)),
            archive_id,
            checksum: Some(computed),
        })
    }

    /// Soft-delete the archive and remove its payload. Unknown or already
    /// deleted ids report [`DeleteOutcome::NotFound`].
    async fn delete_archive(&self, vault: &str, archive_id: &str) -> GlacierResult<DeleteOutcome> {
        self.fetch_vault("delete_archive", vault).await?;
        let result = sqlx::query(
            "UPDATE archives SET is_deleted = 1
             WHERE archive_id = ? AND vault_name = ? AND is_deleted = 0",
        )
        .bind(archive_id)
        .bind(vault)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(DeleteOutcome::NotFound);
        }

        let path = self.archive_path(vault, archive_id);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed archive payload {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", path.display());
            }
            Err(err) => return Err(GlacierError::Io(err)),
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent, &self.vault_root(vault)).await;
        }

        Ok(DeleteOutcome::Deleted)
    }

    async fn initiate_job(&self, vault: &str, request: &JobRequest) -> GlacierResult<String> {
        const OP: &str = "initiate_job";
        let vault_rec = self.fetch_vault(OP, vault).await?;
        let job_id = new_id();
        let output_path = self.base_path.join(JOBS_DIR).join(&job_id);

        // Output is captured now so the job reflects the vault as of initiation.
        match request {
            JobRequest::Inventory => {
                let body = self.snapshot_inventory(&vault_rec).await?;
                self.write_durable(&output_path, &body).await?;
            }
            JobRequest::Archive { archive_id } => {
                let exists: Option<String> = sqlx::query_scalar(
                    "SELECT archive_id FROM archives
                     WHERE archive_id = ? AND vault_name = ? AND is_deleted = 0",
                )
                .bind(archive_id)
                .bind(vault)
                .fetch_optional(&*self.db)
                .await?;
                if exists.is_none() {
                    return Err(not_found(OP, format!("archive `{}`", archive_id)));
                }
                let body = fs::read(self.archive_path(vault, archive_id)).await?;
                self.write_durable(&output_path, &body).await?;
            }
        }

        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO jobs (job_id, vault_name, job_type, archive_id, created_at, ready_at, output_path)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job_id)
        .bind(vault)
        .bind(request.job_type().as_param())
        .bind(match request {
            JobRequest::Inventory => None,
            JobRequest::Archive { archive_id } => Some(archive_id.as_str()),
        })
        .bind(created_at)
        .bind(created_at + self.job_delay)
        .bind(output_path.to_string_lossy().into_owned())
        .execute(&*self.db)
        .await?;

        info!("initiated local {} job {}", request.job_type(), job_id);
        Ok(job_id)
    }

    async fn describe_job(&self, vault: &str, job_id: &str) -> GlacierResult<Job> {
        self.fetch_job(vault, job_id).await?.into_job(Utc::now())
    }

    async fn list_jobs(&self, vault: &str) -> GlacierResult<Vec<Job>> {
        self.fetch_vault("list_jobs", vault).await?;
        let now = Utc::now();
        sqlx::query_as::<_, JobRow>(
            "SELECT job_id, job_type, archive_id, created_at, ready_at, output_path
             FROM jobs WHERE vault_name = ? ORDER BY created_at ASC",
        )
        .bind(vault)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|row| row.into_job(now))
        .collect()
    }

    async fn get_job_output(&self, vault: &str, job_id: &str) -> GlacierResult<JobOutput> {
        let row = self.fetch_job(vault, job_id).await?;
        if Utc::now() < row.ready_at {
            return Err(invalid(
                "get_job_output",
                format!("job `{}` is still in progress", job_id),
            ));
        }

        let file = File::open(&row.output_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                not_found("get_job_output", format!("output of job `{}`", job_id))
            } else {
                GlacierError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    const MIB: u64 = 1024 * 1024;

    async fn open_with_vault(dir: &Path) -> LocalGlacier {
        let service = LocalGlacier::open(dir).await.unwrap();
        service.create_vault("photos").await.unwrap();
        service
    }

    async fn read_output(service: &LocalGlacier, job_id: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = service
            .get_job_output("photos", job_id)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn rejects_invalid_vault_names() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalGlacier::open(dir.path()).await.unwrap();
        for name in ["", ".hidden", "with space", "a/b"] {
            assert!(service.create_vault(name).await.is_err(), "{:?}", name);
        }
        let vault = service.create_vault("Backups_2024-01.v2").await.unwrap();
        assert_eq!(vault.number_of_archives, Some(0));
    }

    #[tokio::test]
    async fn rejects_part_sizes_that_are_not_powers_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_with_vault(dir.path()).await;

        for part_size in [MIB / 2, 3 * MIB, 8 * 1024 * MIB] {
            let err = service
                .initiate_multipart_upload("photos", "x", part_size)
                .await
                .unwrap_err();
            assert!(matches!(err, GlacierError::Service { .. }), "{}", part_size);
        }
        assert!(
            service
                .initiate_multipart_upload("photos", "x", 8 * MIB)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn unknown_vault_is_a_service_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalGlacier::open(dir.path()).await.unwrap();
        let err = service
            .initiate_multipart_upload("missing", "x", MIB)
            .await
            .unwrap_err();
        assert!(matches!(err, GlacierError::Service { .. }));
    }

    #[tokio::test]
    async fn part_with_wrong_checksum_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_with_vault(dir.path()).await;
        let upload_id = service
            .initiate_multipart_upload("photos", "x", MIB)
            .await
            .unwrap();

        let body = Bytes::from(vec![1u8; 10]);
        let err = service
            .upload_part("photos", &upload_id, ByteRange::new(0, 10), "00", body)
            .await
            .unwrap_err();
        assert!(matches!(err, GlacierError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn completion_requires_full_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_with_vault(dir.path()).await;
        let upload_id = service
            .initiate_multipart_upload("photos", "x", MIB)
            .await
            .unwrap();

        let data = vec![9u8; (2 * MIB) as usize];
        let first = Bytes::copy_from_slice(&data[..MIB as usize]);
        service
            .upload_part(
                "photos",
                &upload_id,
                ByteRange::new(0, MIB),
                &tree_hash(&first).to_hex(),
                first,
            )
            .await
            .unwrap();

        let err = service
            .complete_multipart_upload("photos", &upload_id, 2 * MIB, &tree_hash(&data).to_hex())
            .await
            .unwrap_err();
        assert!(matches!(err, GlacierError::Service { .. }));
    }

    #[tokio::test]
    async fn inventory_is_a_snapshot_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_with_vault(dir.path()).await;

        let body = Bytes::from_static(b"hello archive");
        let created = service
            .upload_archive("photos", "hello.txt", &tree_hash(&body).to_hex(), body.clone())
            .await
            .unwrap();

        let job_id = service
            .initiate_job("photos", &JobRequest::Inventory)
            .await
            .unwrap();

        // Created after the snapshot: must not show up.
        let later = Bytes::from_static(b"later");
        service
            .upload_archive("photos", "later.txt", &tree_hash(&later).to_hex(), later)
            .await
            .unwrap();

        let inventory = Inventory::from_slice(&read_output(&service, &job_id).await).unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.archive_list[0].archive_id, created.archive_id);
        assert_eq!(inventory.archive_list[0].size, body.len() as u64);

        assert_eq!(
            service
                .delete_archive("photos", &created.archive_id)
                .await
                .unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            service
                .delete_archive("photos", &created.archive_id)
                .await
                .unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn archive_retrieval_returns_payload() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_with_vault(dir.path()).await;
        let body = Bytes::from(vec![42u8; 4096]);
        let created = service
            .upload_archive("photos", "blob", &tree_hash(&body).to_hex(), body.clone())
            .await
            .unwrap();

        let job_id = service
            .initiate_job(
                "photos",
                &JobRequest::Archive {
                    archive_id: created.archive_id.clone(),
                },
            )
            .await
            .unwrap();
        let job = service.describe_job("photos", &job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.archive_id.as_deref(), Some(created.archive_id.as_str()));

        assert_eq!(read_output(&service, &job_id).await, body.to_vec());
    }

    #[tokio::test]
    async fn delayed_jobs_stay_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let service = open_with_vault(dir.path())
            .await
            .with_job_delay(Duration::hours(4));

        let job_id = service
            .initiate_job("photos", &JobRequest::Inventory)
            .await
            .unwrap();
        let job = service.describe_job("photos", &job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.completion_date.is_none());
        assert!(service.get_job_output("photos", &job_id).await.is_err());
    }
}
