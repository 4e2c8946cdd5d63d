//! Point-in-time vault inventory produced by an inventory-retrieval job.

use serde::{Deserialize, Serialize};

use crate::errors::{GlacierError, GlacierResult};

/// One archive as listed in an inventory snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveSummary {
    pub archive_id: String,

    #[serde(default)]
    pub archive_description: String,

    #[serde(default)]
    pub creation_date: Option<String>,

    pub size: u64,

    #[serde(rename = "SHA256TreeHash", default)]
    pub sha256_tree_hash: Option<String>,
}

/// The inventory document in the service's JSON format.
///
/// A snapshot as of `inventory_date`, not live data: archives created after
/// the job ran are absent and deleted ones may still be listed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Inventory {
    #[serde(rename = "VaultARN", default)]
    pub vault_arn: Option<String>,

    #[serde(rename = "InventoryDate", default)]
    pub inventory_date: Option<String>,

    #[serde(rename = "ArchiveList")]
    pub archive_list: Vec<ArchiveSummary>,
}

impl Inventory {
    /// Decode a job output body.
    pub fn from_slice(body: &[u8]) -> GlacierResult<Self> {
        serde_json::from_slice(body).map_err(|err| GlacierError::MalformedInventory(err.to_string()))
    }

    pub fn to_json(&self) -> GlacierResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| GlacierError::MalformedInventory(err.to_string()))
    }

    pub fn len(&self) -> usize {
        self.archive_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive_list.is_empty()
    }
}
