use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr};

/// Which object store backs the two buckets.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite metadata plus files under `storage_dir`.
    Disk,
    /// Process memory; everything is lost on exit.
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub working_bucket: String,
    pub stable_bucket: String,
    pub backend: Backend,
    pub max_version_attempts: u32,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Versioned document storage API")]
pub struct Args {
    /// Host to bind to (overrides DOCVAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOCVAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides DOCVAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DOCVAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Physical name of the Working bucket (overrides DOCVAULT_WORKING_BUCKET)
    #[arg(long)]
    pub working_bucket: Option<String>,

    /// Physical name of the Stable bucket (overrides DOCVAULT_STABLE_BUCKET)
    #[arg(long)]
    pub stable_bucket: Option<String>,

    /// Object store backend (overrides DOCVAULT_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Attempts to claim a version number before giving up (overrides DOCVAULT_MAX_VERSION_ATTEMPTS)
    #[arg(long)]
    pub max_version_attempts: Option<u32>,

    /// Largest accepted request body in bytes (overrides DOCVAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::merge(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge parsed CLI args over values from `lookup` (normally the process
    /// environment), falling back to built-in defaults.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let backend = match args.backend {
            Some(backend) => backend,
            None => match lookup("DOCVAULT_BACKEND") {
                Some(value) => <Backend as ValueEnum>::from_str(&value, true)
                    .map_err(|err| anyhow!(err))
                    .with_context(|| format!("parsing DOCVAULT_BACKEND value `{}`", value))?,
                None => Backend::Disk,
            },
        };

        let cfg = Self {
            host: args.host.unwrap_or_else(|| text("DOCVAULT_HOST", "0.0.0.0")),
            port: or_env(args.port, &lookup, "DOCVAULT_PORT", 3000)?,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| text("DOCVAULT_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                text("DOCVAULT_DATABASE_URL", "sqlite://./data/meta/docvault.db")
            }),
            working_bucket: args
                .working_bucket
                .unwrap_or_else(|| text("DOCVAULT_WORKING_BUCKET", "working")),
            stable_bucket: args
                .stable_bucket
                .unwrap_or_else(|| text("DOCVAULT_STABLE_BUCKET", "stable")),
            backend,
            max_version_attempts: or_env(
                args.max_version_attempts,
                &lookup,
                "DOCVAULT_MAX_VERSION_ATTEMPTS",
                5,
            )?,
            max_upload_bytes: or_env(
                args.max_upload_bytes,
                &lookup,
                "DOCVAULT_MAX_UPLOAD_BYTES",
                64 * 1024 * 1024,
            )?,
        };

        if cfg.max_version_attempts == 0 {
            anyhow::bail!("max_version_attempts must be at least 1");
        }
        if cfg.working_bucket == cfg.stable_bucket {
            anyhow::bail!(
                "working and stable buckets must differ (both are `{}`)",
                cfg.working_bucket
            );
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn or_env<T>(
    arg: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: Display + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}
