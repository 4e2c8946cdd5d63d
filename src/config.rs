use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    io::{ErrorKind, IsTerminal},
    path::{Path, PathBuf},
};

use crate::{
    models::job::JobType,
    services::chunker::{DEFAULT_PART_SIZE, MAX_PART_SIZE, MIN_PART_SIZE},
};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Upper bound for `recent-jobs --days`.
const MAX_LOOKBACK_DAYS: i64 = 36_500;

/// Which implementation of the service to talk to.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// The real service, through the AWS SDK.
    Aws,
    /// On-disk emulator under `--data-dir`.
    Local,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    Inventory,
    Archive,
}

impl From<JobKind> for JobType {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Inventory => JobType::InventoryRetrieval,
            JobKind::Archive => JobType::ArchiveRetrieval,
        }
    }
}

/// Centralized application configuration.
/// Combines CLI arguments, environment variables and cached preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub region: String,
    pub profile: Option<String>,
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub part_size: u64,
    /// Seconds a new local-backend job stays in progress.
    pub job_delay_secs: u32,
}

/// Command-line configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Client for cold-storage archive vaults")]
pub struct Args {
    /// Service region (overrides GLACIER_REGION and the cached region)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Named credentials profile (overrides GLACIER_PROFILE and the cached profile)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Service backend (overrides GLACIER_BACKEND)
    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendKind>,

    /// Directory of the local backend (overrides GLACIER_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory for upload audit logs (overrides GLACIER_LOG_DIR)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Multipart part size in bytes; a power of two from 1 MiB to 4 GiB
    #[arg(long, global = true)]
    pub part_size: Option<u64>,

    /// Seconds before a local-backend job completes (overrides GLACIER_JOB_DELAY)
    #[arg(long, global = true)]
    pub job_delay: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

/// Job selection shared by the commands that consume a finished job.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct JobChoice {
    /// Use this job instead of picking one from the recent jobs
    #[arg(long)]
    pub job_id: Option<String>,

    /// Choose interactively among recent jobs instead of taking the newest
    #[arg(long, conflicts_with = "job_id")]
    pub pick: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List every vault in the region
    ListVaults,
    /// Create a vault (local backend only)
    CreateVault { vault: String },
    /// Upload a file as a new archive
    Upload {
        vault: String,
        file: PathBuf,
        /// Send the whole file in one request instead of in parts
        #[arg(long)]
        single: bool,
    },
    /// Abort a multipart upload left behind by an earlier run
    AbortUpload { vault: String, upload_id: String },
    /// Delete a single archive
    DeleteArchive { vault: String, archive_id: String },
    /// Start an inventory-retrieval job
    RetrieveInventory { vault: String },
    /// Start an archive-retrieval job
    RetrieveArchive { vault: String, archive_id: String },
    /// Show the current state of a job
    DescribeJob { vault: String, job_id: String },
    /// Dump every job the service reports for a vault
    ListJobs { vault: String },
    /// List recent jobs of one type, oldest first
    RecentJobs {
        vault: String,
        #[arg(long, value_enum, default_value = "inventory")]
        job_type: JobKind,
        /// How many days back to look
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(i64).range(0..=MAX_LOOKBACK_DAYS)
        )]
        days: i64,
    },
    /// Write the raw output of a finished job to stdout
    JobOutput { vault: String, job_id: String },
    /// Save the output of an archive-retrieval job to a file
    Download {
        vault: String,
        path: PathBuf,
        #[command(flatten)]
        job: JobChoice,
    },
    /// Print the archive list of an inventory-retrieval job
    Inventory {
        vault: String,
        #[command(flatten)]
        job: JobChoice,
    },
    /// Delete every archive listed by an inventory-retrieval job
    EmptyVault {
        vault: String,
        #[command(flatten)]
        job: JobChoice,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Forget the cached region and profile
    ClearCache,
}

/// Values read from `GLACIER_*` environment variables.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub region: Option<String>,
    pub profile: Option<String>,
    pub backend: Option<String>,
    pub data_dir: Option<String>,
    pub log_dir: Option<String>,
    pub job_delay: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            region: read_var("GLACIER_REGION")?,
            profile: read_var("GLACIER_PROFILE")?,
            backend: read_var("GLACIER_BACKEND")?,
            data_dir: read_var("GLACIER_DATA_DIR")?,
            log_dir: read_var("GLACIER_LOG_DIR")?,
            job_delay: read_var("GLACIER_JOB_DELAY")?,
        })
    }
}

fn read_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Region and profile remembered between runs.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Preferences {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

impl Preferences {
    /// `preferences.json` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "glacier-vault")
            .map(|dirs| dirs.config_dir().join("preferences.json"))
    }

    /// Missing file means nothing cached yet.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing preferences at {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => {
                Err(err).with_context(|| format!("reading preferences at {}", path.display()))
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Remove the cache file. Returns whether there was one.
    pub fn clear(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "glacier-vault")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data/glacier"))
}

fn validate_part_size(part_size: u64) -> Result<u64> {
    if !part_size.is_power_of_two() || !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
        bail!(
            "part size {} must be a power of two between {} and {} bytes",
            part_size,
            MIN_PART_SIZE,
            MAX_PART_SIZE
        );
    }
    Ok(part_size)
}

impl AppConfig {
    /// Merge the layers: CLI first, then environment, then the cache, then
    /// defaults. `prompt_region` is asked only when no layer names a region
    /// and the real service is used.
    pub fn resolve(
        args: &Args,
        env: &EnvOverrides,
        cached: &Preferences,
        prompt_region: impl FnOnce() -> Result<Option<String>>,
    ) -> Result<Self> {
        let backend = match (args.backend, env.backend.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some(value)) => BackendKind::from_str(value, true)
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("parsing GLACIER_BACKEND value `{}`", value))?,
            (None, None) => BackendKind::Aws,
        };

        // The local backend ignores the region, so never ask for one there.
        let region = match args
            .region
            .clone()
            .or_else(|| env.region.clone())
            .or_else(|| cached.region.clone())
        {
            Some(region) => region,
            None if backend == BackendKind::Aws => {
                prompt_region()?.unwrap_or_else(|| DEFAULT_REGION.to_string())
            }
            None => DEFAULT_REGION.to_string(),
        };

        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| env.data_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);
        let log_dir = args
            .log_dir
            .clone()
            .or_else(|| env.log_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let part_size = validate_part_size(args.part_size.unwrap_or(DEFAULT_PART_SIZE))?;
        let job_delay_secs = match (args.job_delay, env.job_delay.as_deref()) {
            (Some(secs), _) => secs,
            (None, Some(value)) => value
                .trim()
                .parse()
                .with_context(|| format!("parsing GLACIER_JOB_DELAY value `{}`", value))?,
            (None, None) => 0,
        };

        Ok(Self {
            region,
            profile: args
                .profile
                .clone()
                .or_else(|| env.profile.clone())
                .or_else(|| cached.profile.clone()),
            backend,
            data_dir,
            log_dir,
            part_size,
            job_delay_secs,
        })
    }

    /// The preferences this configuration should leave in the cache.
    pub fn preferences(&self) -> Preferences {
        Preferences {
            region: Some(self.region.clone()),
            profile: self.profile.clone(),
        }
    }

    /// Parse CLI args and the environment into an AppConfig and the command
    /// to run. Updates the preference cache when the region or profile
    /// changed.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let env = EnvOverrides::from_env()?;

        let cache_path = Preferences::default_path();
        let cached = match &cache_path {
            Some(path) => Preferences::load(path)?,
            None => Preferences::default(),
        };

        let interactive = args.command != Command::ClearCache;
        let cfg = Self::resolve(&args, &env, &cached, || {
            if interactive { prompt_for_region() } else { Ok(None) }
        })?;

        if interactive && cfg.backend == BackendKind::Aws {
            let updated = cfg.preferences();
            if let Some(path) = cache_path.as_deref().filter(|_| updated != cached) {
                updated.save(path)?;
                tracing::debug!("Saved preferences to {}", path.display());
            }
        }

        Ok((cfg, args.command))
    }
}

/// Ask for a region once, on first use. Not asked when stdin is not a terminal.
fn prompt_for_region() -> Result<Option<String>> {
    if !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let region: String = dialoguer::Input::new()
        .with_prompt("Service region")
        .default(DEFAULT_REGION.to_string())
        .interact_text()?;
    Ok(Some(region))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    fn no_prompt() -> Result<Option<String>> {
        Ok(None)
    }

    #[test]
    fn cli_beats_env_beats_cache() {
        let env = EnvOverrides {
            region: Some("eu-west-1".into()),
            profile: Some("env-profile".into()),
            ..Default::default()
        };
        let cached = Preferences {
            region: Some("ap-south-1".into()),
            profile: Some("cached".into()),
        };

        let cfg = AppConfig::resolve(
            &parse(&["glacier-vault", "--region", "us-west-2", "list-vaults"]),
            &env,
            &cached,
            no_prompt,
        )
        .unwrap();
        assert_eq!(cfg.region, "us-west-2");
        assert_eq!(cfg.profile.as_deref(), Some("env-profile"));

        let cfg = AppConfig::resolve(
            &parse(&["glacier-vault", "list-vaults"]),
            &EnvOverrides::default(),
            &cached,
            no_prompt,
        )
        .unwrap();
        assert_eq!(cfg.region, "ap-south-1");
        assert_eq!(cfg.preferences(), cached);
    }

    #[test]
    fn falls_back_to_prompt_then_default_region() {
        let args = parse(&["glacier-vault", "list-vaults"]);
        let cfg = AppConfig::resolve(&args, &EnvOverrides::default(), &Preferences::default(), || {
            Ok(Some("ca-central-1".into()))
        })
        .unwrap();
        assert_eq!(cfg.region, "ca-central-1");

        let cfg =
            AppConfig::resolve(&args, &EnvOverrides::default(), &Preferences::default(), no_prompt)
                .unwrap();
        assert_eq!(cfg.region, DEFAULT_REGION);
        assert_eq!(cfg.backend, BackendKind::Aws);
        assert_eq!(cfg.part_size, DEFAULT_PART_SIZE);
        assert_eq!(cfg.log_dir, PathBuf::from("."));
    }

    #[test]
    fn cached_region_skips_the_prompt() {
        let cached = Preferences {
            region: Some("eu-north-1".into()),
            profile: None,
        };
        let cfg = AppConfig::resolve(
            &parse(&["glacier-vault", "list-vaults"]),
            &EnvOverrides::default(),
            &cached,
            || panic!("prompted despite a cached region"),
        )
        .unwrap();
        assert_eq!(cfg.region, "eu-north-1");
    }

    #[test]
    fn backend_from_env_and_bad_values() {
        let args = parse(&["glacier-vault", "list-vaults"]);
        let env = EnvOverrides {
            backend: Some("LOCAL".into()),
            data_dir: Some("/tmp/vaults".into()),
            ..Default::default()
        };
        let cfg = AppConfig::resolve(&args, &env, &Preferences::default(), no_prompt).unwrap();
        assert_eq!(cfg.backend, BackendKind::Local);
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/vaults"));

        let env = EnvOverrides {
            backend: Some("tape".into()),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&args, &env, &Preferences::default(), no_prompt).is_err());
    }

    #[test]
    fn part_size_must_be_power_of_two_in_range() {
        for bad in ["1000", "524288", "8589934592"] {
            let args = parse(&["glacier-vault", "--part-size", bad, "list-vaults"]);
            assert!(
                AppConfig::resolve(&args, &EnvOverrides::default(), &Preferences::default(), no_prompt)
                    .is_err(),
                "{} accepted",
                bad
            );
        }
        let args = parse(&["glacier-vault", "--part-size", "1048576", "list-vaults"]);
        let cfg = AppConfig::resolve(&args, &EnvOverrides::default(), &Preferences::default(), no_prompt)
            .unwrap();
        assert_eq!(cfg.part_size, 1024 * 1024);
    }

    #[test]
    fn part_size_bounds_are_inclusive() {
        for (size, ok) in [
            (MIN_PART_SIZE, true),
            (MAX_PART_SIZE, true),
            (MIN_PART_SIZE / 2, false),
            (MAX_PART_SIZE * 2, false),
        ] {
            assert_eq!(validate_part_size(size).is_ok(), ok, "{}", size);
        }
    }

    #[test]
    fn recent_jobs_lookback_is_bounded() {
        let args = parse(&["glacier-vault", "recent-jobs", "v", "--days", "36500"]);
        assert!(matches!(args.command, Command::RecentJobs { days: 36_500, .. }));

        for bad in ["100000000", "-1"] {
            assert!(
                Args::try_parse_from(["glacier-vault", "recent-jobs", "v", "--days", bad]).is_err(),
                "{} accepted",
                bad
            );
        }
    }

    #[test]
    fn job_delay_from_cli_then_env() {
        let args = parse(&["glacier-vault", "list-vaults"]);
        let cfg = AppConfig::resolve(&args, &EnvOverrides::default(), &Preferences::default(), no_prompt)
            .unwrap();
        assert_eq!(cfg.job_delay_secs, 0);

        let env = EnvOverrides {
            job_delay: Some("90".into()),
            ..Default::default()
        };
        let cfg = AppConfig::resolve(&args, &env, &Preferences::default(), no_prompt).unwrap();
        assert_eq!(cfg.job_delay_secs, 90);

        let args = parse(&["glacier-vault", "--job-delay", "5", "list-vaults"]);
        let cfg = AppConfig::resolve(&args, &env, &Preferences::default(), no_prompt).unwrap();
        assert_eq!(cfg.job_delay_secs, 5);

        let env = EnvOverrides {
            job_delay: Some("soon".into()),
            ..Default::default()
        };
        let args = parse(&["glacier-vault", "list-vaults"]);
        assert!(AppConfig::resolve(&args, &env, &Preferences::default(), no_prompt).is_err());
    }

    #[test]
    fn parses_job_consuming_commands() {
        let args = parse(&[
            "glacier-vault",
            "download",
            "photos",
            "out.tar",
            "--job-id",
            "J1",
        ]);
        assert_eq!(
            args.command,
            Command::Download {
                vault: "photos".into(),
                path: PathBuf::from("out.tar"),
                job: JobChoice {
                    job_id: Some("J1".into()),
                    pick: false,
                },
            }
        );

        let args = parse(&["glacier-vault", "empty-vault", "photos", "--pick", "--yes"]);
        assert!(matches!(
            args.command,
            Command::EmptyVault { job: JobChoice { pick: true, job_id: None }, yes: true, .. }
        ));

        assert!(Args::try_parse_from(["glacier-vault", "inventory", "v", "--pick", "--job-id", "x"]).is_err());

        let args = parse(&["glacier-vault", "job-output", "photos", "J9"]);
        assert_eq!(
            args.command,
            Command::JobOutput {
                vault: "photos".into(),
                job_id: "J9".into(),
            }
        );
    }

    #[test]
    fn preferences_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");

        assert_eq!(Preferences::load(&path).unwrap(), Preferences::default());
        let prefs = Preferences {
            region: Some("us-west-1".into()),
            profile: Some("backup".into()),
        };
        prefs.save(&path).unwrap();
        assert_eq!(Preferences::load(&path).unwrap(), prefs);

        assert!(Preferences::clear(&path).unwrap());
        assert!(!Preferences::clear(&path).unwrap());
    }
}
