//! Per-attempt upload audit log.
//!
//! Every upload attempt owns one [`AuditLog`]. It collects the computed
//! checksum, sizes and one entry per service interaction, and is written
//! as pretty JSON to `<file>_<YYYYmmddHHMMSS>_<vault>.log` when the attempt
//! ends. If the attempt unwinds before [`AuditLog::finish`] runs, `Drop`
//! writes it synchronously instead, so no attempt goes unrecorded.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};

use crate::errors::GlacierError;

/// One service interaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuditEntry {
    /// `initiate_multipart_upload`, `part_<n>`, `complete_multipart_upload`,
    /// `abort_multipart_upload`, `upload_archive` or `error`.
    pub step: String,

    pub at: DateTime<Utc>,

    pub ok: bool,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub response: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AuditRecord {
    pub vault: String,

    pub source: String,

    pub original_checksum: Option<String>,

    pub file_size: Option<u64>,

    pub part_size: Option<u64>,

    pub upload_id: Option<String>,

    pub steps: Vec<AuditEntry>,
}

#[cfg(test)]
impl AuditRecord {
    pub(crate) fn step(&self, name: &str) -> Option<&AuditEntry> {
        self.steps.iter().find(|entry| entry.step == name)
    }
}

pub struct AuditLog {
    path: PathBuf,
    record: AuditRecord,
    persisted: bool,
}

/// Deterministic log file name for an attempt.
pub fn log_file_name(file_name: &str, started_at: DateTime<Local>, vault: &str) -> String {
    format!(
        "{}_{}_{}.log",
        file_name,
        started_at.format("%Y%m%d%H%M%S"),
        vault
    )
}

impl AuditLog {
    pub fn new(log_dir: &Path, source: &Path, vault: &str) -> Self {
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".into());
        let path = log_dir.join(log_file_name(&file_name, Local::now(), vault));

        Self {
            path,
            record: AuditRecord {
                vault: vault.to_string(),
                source: source.display().to_string(),
                ..AuditRecord::default()
            },
            persisted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_checksum(&mut self, checksum: &str) {
        self.record.original_checksum = Some(checksum.to_string());
    }

    pub fn set_file_size(&mut self, size: u64) {
        self.record.file_size = Some(size);
    }

    pub fn set_part_size(&mut self, size: u64) {
        self.record.part_size = Some(size);
    }

    pub fn set_upload_id(&mut self, upload_id: &str) {
        self.record.upload_id = Some(upload_id.to_string());
    }

    pub fn success(&mut self, step: impl Into<String>, response: impl Serialize) {
        let response = serde_json::to_value(response).unwrap_or(Value::Null);
        self.record.steps.push(AuditEntry {
            step: step.into(),
            at: Utc::now(),
            ok: true,
            response,
            error: None,
        });
    }

    pub fn failure(&mut self, step: impl Into<String>, err: &GlacierError) {
        self.record.steps.push(AuditEntry {
            step: step.into(),
            at: Utc::now(),
            ok: false,
            response: Value::Null,
            error: Some(err.to_string()),
        });
    }

    fn render(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.record).map_err(io::Error::other)
    }

    /// Write the record. Returns where it went.
    pub async fn finish(mut self) -> io::Result<PathBuf> {
        let body = self.render()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Mark first: a failed write here is reported to the caller, not
        // retried from Drop.
        self.persisted = true;
        fs::write(&self.path, body).await?;
        debug!("audit log written to {}", self.path.display());
        Ok(self.path.clone())
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        let written = self
            .render()
            .and_then(|body| std::fs::write(&self.path, body));
        match written {
            Ok(()) => warn!(
                "upload ended before its audit log was flushed, wrote {}",
                self.path.display()
            ),
            Err(err) => warn!(
                "could not write audit log {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}
