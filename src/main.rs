use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod errors;
mod handlers;
mod models;
mod services;

use backend::{GlacierApi, aws::AwsGlacier, local::LocalGlacier};
use config::{AppConfig, BackendKind, Command, Preferences};
use handlers::{job_handlers, upload_handlers, vault_handlers};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::debug!("Starting glacier-vault with config: {:?}", cfg);

    if command == Command::ClearCache {
        return clear_cache();
    }

    // --- Initialize the service handle ---
    let (api, local): (Arc<dyn GlacierApi>, Option<Arc<LocalGlacier>>) = match cfg.backend {
        BackendKind::Aws => {
            let client = AwsGlacier::connect(&cfg.region, cfg.profile.as_deref()).await;
            let api: Arc<dyn GlacierApi> = Arc::new(client);
            (api, None)
        }
        BackendKind::Local => {
            let local = Arc::new(
                LocalGlacier::open(cfg.data_dir.clone())
                    .await
                    .with_context(|| format!("opening local vaults at {}", cfg.data_dir.display()))?
                    .with_job_delay(chrono::Duration::seconds(i64::from(cfg.job_delay_secs))),
            );
            tracing::info!("Using local backend at {}", cfg.data_dir.display());
            let api: Arc<dyn GlacierApi> = local.clone();
            (api, Some(local))
        }
    };

    // --- Dispatch ---
    match command {
        Command::ListVaults => vault_handlers::list_vaults(api).await,
        Command::CreateVault { vault } => vault_handlers::create_vault(local.as_deref(), &vault).await,
        Command::Upload {
            vault,
            file,
            single,
        } => upload_handlers::upload(&cfg, api, &vault, &file, single).await,
        Command::AbortUpload { vault, upload_id } => {
            upload_handlers::abort_upload(&cfg, api, &vault, &upload_id).await
        }
        Command::DeleteArchive { vault, archive_id } => {
            vault_handlers::delete_archive(api, &vault, &archive_id).await
        }
        Command::RetrieveInventory { vault } => job_handlers::retrieve_inventory(api, &vault).await,
        Command::RetrieveArchive { vault, archive_id } => {
            job_handlers::retrieve_archive(api, &vault, &archive_id).await
        }
        Command::DescribeJob { vault, job_id } => {
            job_handlers::describe_job(api, &vault, &job_id).await
        }
        Command::ListJobs { vault } => job_handlers::list_jobs(api, &vault).await,
        Command::RecentJobs {
            vault,
            job_type,
            days,
        } => job_handlers::recent_jobs(api, &vault, job_type.into(), days).await,
        Command::JobOutput { vault, job_id } => {
            job_handlers::job_output(api, &vault, &job_id).await
        }
        Command::Download { vault, path, job } => {
            job_handlers::download(api, &vault, &path, &job).await
        }
        Command::Inventory { vault, job } => job_handlers::inventory(api, &vault, &job).await,
        Command::EmptyVault { vault, job, yes } => {
            vault_handlers::empty_vault(api, &vault, &job, yes).await
        }
        Command::ClearCache => clear_cache(),
    }
}

fn clear_cache() -> Result<()> {
    match Preferences::default_path() {
        Some(path) if Preferences::clear(&path)? => {
            println!("Removed cached preferences at {}", path.display())
        }
        _ => println!("No cached preferences"),
    }
    Ok(())
}
