//! Upload and abort commands.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::{path::Path, sync::Arc};

use crate::{
    backend::GlacierApi, config::AppConfig, handlers::print_json,
    services::upload_service::UploadService,
};

/// Upload `file` into `vault`, in parts unless `single` is set.
///
/// The audit log location is printed whether or not the upload succeeded.
pub async fn upload(
    cfg: &AppConfig,
    api: Arc<dyn GlacierApi>,
    vault: &str,
    file: &Path,
    single: bool,
) -> Result<()> {
    let service = UploadService::new(api, cfg.log_dir.clone()).with_part_size(cfg.part_size);

    let outcome = if single {
        service.upload_single(vault, file).await
    } else {
        let bar = ProgressBar::new(0).with_style(ProgressStyle::with_template(
            "{bar:40} {bytes}/{total_bytes} {binary_bytes_per_sec} eta {eta}",
        )?);
        let mut progress = |sent: u64, total: u64| {
            bar.set_length(total);
            bar.set_position(sent);
        };
        let outcome = service.upload_multipart(vault, file, &mut progress).await;
        bar.finish_and_clear();
        outcome
    };

    match &outcome.audit_log {
        Ok(path) => eprintln!("Response saved to {}", path.display()),
        Err(err) => tracing::warn!("Could not write audit log: {}", err),
    }

    let archive = outcome
        .result
        .with_context(|| format!("uploading {} to vault {}", file.display(), vault))?;
    print_json(&archive)
}

pub async fn abort_upload(
    cfg: &AppConfig,
    api: Arc<dyn GlacierApi>,
    vault: &str,
    upload_id: &str,
) -> Result<()> {
    UploadService::new(api, cfg.log_dir.clone())
        .abort_upload(vault, upload_id)
        .await
        .with_context(|| format!("aborting upload {}", upload_id))?;
    print_json(&json!({ "vault": vault, "upload_id": upload_id, "aborted": true }))
}
