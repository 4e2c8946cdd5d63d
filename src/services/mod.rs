//! Client-side logic on top of [`crate::backend::GlacierApi`].

pub mod audit_log;
pub mod chunker;
pub mod job_service;
pub mod retrieval_service;
pub mod tree_hash;
pub mod upload_service;
