//! Error taxonomy shared by every upload, job and retrieval operation.

use std::io;
use thiserror::Error;

use crate::models::job::{JobStatus, JobType};

#[derive(Debug, Error)]
pub enum GlacierError {
    /// The service rejected a request. Never retried automatically.
    #[error("service rejected {operation}: {message}")]
    Service { operation: String, message: String },

    /// Network or transport failure while talking to the service.
    #[error("transfer failed during {operation}: {message}")]
    Transfer { operation: String, message: String },

    #[error("checksum mismatch: expected {expected}, service reported {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("incomplete upload: {uploaded} of {expected} bytes sent")]
    IncompleteUpload { uploaded: u64, expected: u64 },

    #[error("part at offset {actual} does not continue the upload at offset {expected}")]
    InvalidPartRange { expected: u64, actual: u64 },

    #[error("job `{job_id}` is {status}, output is only available once it has succeeded")]
    JobNotReady { job_id: String, status: JobStatus },

    #[error("job `{job_id}` is an {actual} job, expected {expected}")]
    WrongJobType {
        job_id: String,
        expected: JobType,
        actual: JobType,
    },

    #[error("malformed inventory: {0}")]
    MalformedInventory(String),

    #[error("vault `{0}` not found")]
    VaultNotFound(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type GlacierResult<T> = Result<T, GlacierError>;

impl GlacierError {
    pub fn service(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Service {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn transfer(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Transfer {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}
