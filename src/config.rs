use crate::services::{
    lifecycle::LifecycleConfig,
    retention::{DEFAULT_RETENTION_DAYS, RetentionPolicy},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "TRASH_VAULT_";

/// Which object-storage adapter backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite metadata + payloads on local disk.
    Local,
    /// Process memory; everything is lost on exit.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub files_container: String,
    pub trash_container: String,
    pub retention_days: u32,
    /// Seconds between background sweeps; 0 disables the worker.
    pub sweep_interval_secs: u64,
    pub cleanup_api_key: Option<String>,
    pub max_upload_bytes: usize,
    pub allow_key_fragment_restore: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multi-tenant file store with a time-bounded trash")]
pub struct Args {
    /// Host to bind to (overrides TRASH_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TRASH_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides TRASH_VAULT_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory where object payloads are stored (overrides TRASH_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides TRASH_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Container for active files (overrides TRASH_VAULT_FILES_CONTAINER)
    #[arg(long)]
    pub files_container: Option<String>,

    /// Container for trashed files (overrides TRASH_VAULT_TRASH_CONTAINER)
    #[arg(long)]
    pub trash_container: Option<String>,

    /// Days a trashed file stays restorable (overrides TRASH_VAULT_RETENTION_DAYS)
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Seconds between expiry sweeps, 0 to disable (overrides TRASH_VAULT_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Largest accepted upload request in bytes (overrides TRASH_VAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Restore from the name embedded in the trash key when metadata lacks it
    #[arg(long)]
    pub allow_key_fragment_restore: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge CLI args over variables looked up through `env` over defaults.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let lookup = |suffix: &str| env(&format!("{}{}", ENV_PREFIX, suffix));

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, &lookup, "PORT", 3000)?,
            backend: pick(args.backend, &lookup, "BACKEND", Backend::Local)?,
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| lookup("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/trash_vault.db".into()),
            files_container: args
                .files_container
                .or_else(|| lookup("FILES_CONTAINER"))
                .unwrap_or_else(|| "files".into()),
            trash_container: args
                .trash_container
                .or_else(|| lookup("TRASH_CONTAINER"))
                .unwrap_or_else(|| "trash".into()),
            retention_days: pick(
                args.retention_days,
                &lookup,
                "RETENTION_DAYS",
                DEFAULT_RETENTION_DAYS,
            )?,
            sweep_interval_secs: pick(
                args.sweep_interval_secs,
                &lookup,
                "SWEEP_INTERVAL_SECS",
                3600,
            )?,
            cleanup_api_key: lookup("CLEANUP_API_KEY").filter(|k| !k.is_empty()),
            max_upload_bytes: pick(
                args.max_upload_bytes,
                &lookup,
                "MAX_UPLOAD_BYTES",
                100 * 1024 * 1024,
            )?,
            allow_key_fragment_restore: args.allow_key_fragment_restore
                || pick(None, &lookup, "ALLOW_KEY_FRAGMENT_RESTORE", false)?,
        };

        if cfg.files_container == cfg.trash_container {
            anyhow::bail!(
                "files and trash containers must differ (both are `{}`)",
                cfg.files_container
            );
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            files_container: self.files_container.clone(),
            trash_container: self.trash_container.clone(),
            retention: RetentionPolicy::from_days(self.retention_days),
            allow_key_fragment_restore: self.allow_key_fragment_restore,
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// CLI value if given, else the parsed environment value, else `default`.
fn pick<T>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    suffix: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(suffix) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, suffix, raw)),
        None => Ok(default),
    }
}
