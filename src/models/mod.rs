//! Core data models for the archival client.
//!
//! Vaults, archives, jobs and inventories mirror what the service reports;
//! multipart records track the client's side of an upload session. All of
//! them serialize as JSON via `serde` for display and for the audit log.

pub mod archive;
pub mod inventory;
pub mod job;
pub mod multipart;
pub mod vault;
