//! Represents an archive, an immutable blob stored in a vault.

use serde::{Deserialize, Serialize};

/// What the service returns once an archive has been created, either by
/// `upload_archive` or by completing a multipart upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArchiveCreated {
    pub archive_id: String,

    /// Tree hash the service computed over the bytes it stored.
    pub checksum: Option<String>,

    pub location: Option<String>,
}

/// A stored archive.
///
/// Archives are write-once: created by a completed upload and destroyed only
/// by an explicit delete.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Archive {
    /// Opaque id assigned by the service at upload completion.
    pub archive_id: String,

    /// Free text, usually the source file name.
    pub description: String,

    pub size: u64,

    /// Hex SHA-256 tree hash of the content.
    pub checksum: String,

    pub location: Option<String>,
}

/// Outcome of deleting a single archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The archive id is unknown to the service, e.g. already deleted.
    NotFound,
}
