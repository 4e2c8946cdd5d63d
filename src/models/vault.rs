//! Represents a vault, a named container for archives.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A vault as listed by the service.
///
/// The client never creates or renames vaults; it only lists them and
/// selects among them by name.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Vault {
    /// Vault name, unique per account and region.
    pub name: String,

    /// Remote locator (ARN).
    pub arn: String,

    /// ISO 8601 creation date as reported by the service.
    pub creation_date: Option<String>,

    /// Archive count as of the service's last inventory.
    pub number_of_archives: Option<i64>,

    /// Total size as of the service's last inventory.
    pub size_in_bytes: Option<i64>,
}
