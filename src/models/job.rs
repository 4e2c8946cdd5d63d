//! Asynchronous retrieval jobs and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The kinds of job this client initiates and consumes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    InventoryRetrieval,
    ArchiveRetrieval,
}

impl JobType {
    /// Value of the `Type` job parameter when initiating a job.
    pub fn as_param(&self) -> &'static str {
        match self {
            JobType::InventoryRetrieval => "inventory-retrieval",
            JobType::ArchiveRetrieval => "archive-retrieval",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl FromStr for JobType {
    type Err = String;

    /// Accepts both the request form (`inventory-retrieval`) and the action
    /// code reported by describe/list (`InventoryRetrieval`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inventory-retrieval" | "InventoryRetrieval" => Ok(JobType::InventoryRetrieval),
            "archive-retrieval" | "ArchiveRetrieval" => Ok(JobType::ArchiveRetrieval),
            other => Err(format!("unsupported job type `{}`", other)),
        }
    }
}

/// `InProgress -> {Succeeded, Failed}`; the latter two are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "InProgress",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(JobStatus::InProgress),
            "Succeeded" => Ok(JobStatus::Succeeded),
            "Failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status `{}`", other)),
        }
    }
}

/// What a new job should do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobRequest {
    Inventory,
    Archive { archive_id: String },
}

impl JobRequest {
    pub fn job_type(&self) -> JobType {
        match self {
            JobRequest::Inventory => JobType::InventoryRetrieval,
            JobRequest::Archive { .. } => JobType::ArchiveRetrieval,
        }
    }
}

/// A job as reported by the service. The client only ever holds a
/// reference to it; the service retires job records after about a month.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Job {
    pub job_id: String,

    pub job_type: JobType,

    pub status: JobStatus,

    pub creation_date: DateTime<Utc>,

    pub completion_date: Option<DateTime<Utc>>,

    /// Target archive for archive-retrieval jobs.
    pub archive_id: Option<String>,

    pub status_message: Option<String>,
}

impl Job {
    pub fn is_succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}
