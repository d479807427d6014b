use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use uuid::Uuid;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Directory holding not-yet-uploaded files, keyed by asset id.
    pub uploads_root: PathBuf,
    pub backend: StorageBackendConfig,
    pub clamscan_path: PathBuf,
    pub scan_timeout_secs: u64,
    /// Shared secret for signed bypass tokens. Absent means bypass tokens
    /// are never accepted.
    pub jwt_secret: Option<String>,
    pub media: MediaPolicy,
}

/// Which cloud-storage backend to construct at startup. Selected once; no
/// runtime switching.
#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3 { bucket: String, region: String },
    LocalFake { root: PathBuf, base_url: String },
    Disabled,
}

/// Shared policy for serving media: threaded into the storage gateway at
/// construction rather than read from process-wide state.
#[derive(Debug, Clone)]
pub struct MediaPolicy {
    pub cache_max_age_secs: u64,
    pub content_disposition_inline: bool,
    pub default_content_type: String,
}

impl MediaPolicy {
    pub fn content_disposition_for(&self, filename: &str) -> String {
        let kind = if self.content_disposition_inline {
            "inline"
        } else {
            "attachment"
        };
        format!("{}; filename=\"{}\"", kind, filename)
    }

    pub fn cache_control(&self) -> String {
        format!("max-age={}, public", self.cache_max_age_secs)
    }
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            cache_max_age_secs: 86_400,
            content_disposition_inline: true,
            default_content_type: "application/octet-stream".into(),
        }
    }
}

/// What this invocation of the binary should do. An external queue delivers
/// scan/sync tasks by exec-ing one of the single-task modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Migrate,
    ReplicationAudit,
    RefreshMetadata,
    Scan(Uuid),
    Sync(Uuid),
    Replicate(Uuid),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Asset lifecycle pipeline")]
pub struct Args {
    /// Database URL (overrides ASSET_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for not-yet-uploaded files (overrides ASSET_STORE_UPLOADS_ROOT)
    #[arg(long)]
    pub uploads_root: Option<PathBuf>,

    /// Storage backend: s3, local or none (overrides ASSET_STORE_STORAGE_BACKEND)
    #[arg(long)]
    pub storage_backend: Option<String>,

    /// S3 bucket name (overrides ASSET_STORE_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// S3 region (overrides ASSET_STORE_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Root directory for the local fake backend (overrides ASSET_STORE_FAKE_STORAGE_ROOT)
    #[arg(long)]
    pub fake_storage_root: Option<PathBuf>,

    /// Virus scanner executable (overrides ASSET_STORE_CLAMSCAN_PATH)
    #[arg(long)]
    pub clamscan_path: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Report uploaded assets that are missing or never replicated remotely
    #[arg(long)]
    pub replication_audit: bool,

    /// Recompute missing checksum/size/mtime for assets still held locally
    #[arg(long)]
    pub refresh_metadata: bool,

    /// Run the virus-scan task for one asset
    #[arg(long, value_name = "ASSET_ID")]
    pub scan: Option<Uuid>,

    /// Run the cloud-sync task for one asset
    #[arg(long, value_name = "ASSET_ID")]
    pub sync: Option<Uuid>,

    /// Kick-start replication for one uploaded asset
    #[arg(long, value_name = "ASSET_ID")]
    pub replicate: Option<Uuid>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and a run mode.
    pub fn from_env_and_args() -> Result<(Self, Option<RunMode>)> {
        let args = Args::parse();
        let cfg = Self::from_env(&args)?;
        Ok((cfg, args.run_mode()))
    }

    fn from_env(args: &Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_db = env::var("ASSET_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/asset_store.db".into());
        let env_uploads =
            env::var("ASSET_STORE_UPLOADS_ROOT").unwrap_or_else(|_| "./data/uploads".into());
        let env_backend = env::var("ASSET_STORE_STORAGE_BACKEND").unwrap_or_else(|_| "none".into());
        let env_clamscan =
            env::var("ASSET_STORE_CLAMSCAN_PATH").unwrap_or_else(|_| "clamscan".into());
        let scan_timeout_secs = parse_env_u64("ASSET_STORE_SCAN_TIMEOUT_SECS", 60)?;
        let jwt_secret = env::var("ASSET_STORE_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let media = MediaPolicy {
            cache_max_age_secs: parse_env_u64("ASSET_STORE_CACHE_MAX_AGE_SECS", 86_400)?,
            content_disposition_inline: env::var("ASSET_STORE_CONTENT_DISPOSITION")
                .map(|v| v != "attachment")
                .unwrap_or(true),
            default_content_type: env::var("ASSET_STORE_DEFAULT_CONTENT_TYPE")
                .unwrap_or_else(|_| "application/octet-stream".into()),
        };

        let backend_kind = args.storage_backend.clone().unwrap_or(env_backend);
        let backend = match backend_kind.as_str() {
            "s3" => StorageBackendConfig::S3 {
                bucket: args
                    .s3_bucket
                    .clone()
                    .or_else(|| env::var("ASSET_STORE_S3_BUCKET").ok())
                    .context("storage backend `s3` requires a bucket name")?,
                region: args
                    .s3_region
                    .clone()
                    .or_else(|| env::var("ASSET_STORE_S3_REGION").ok())
                    .unwrap_or_else(|| "eu-west-1".into()),
            },
            "local" => StorageBackendConfig::LocalFake {
                root: args
                    .fake_storage_root
                    .clone()
                    .or_else(|| {
                        env::var("ASSET_STORE_FAKE_STORAGE_ROOT")
                            .ok()
                            .map(PathBuf::from)
                    })
                    .unwrap_or_else(|| "./data/fake-storage".into()),
                base_url: env::var("ASSET_STORE_FAKE_STORAGE_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".into()),
            },
            "none" => StorageBackendConfig::Disabled,
            other => anyhow::bail!("unknown storage backend `{}`", other),
        };

        // --- Merge ---
        Ok(Self {
            database_url: args.database_url.clone().unwrap_or(env_db),
            uploads_root: args
                .uploads_root
                .clone()
                .unwrap_or_else(|| PathBuf::from(env_uploads)),
            backend,
            clamscan_path: args
                .clamscan_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(env_clamscan)),
            scan_timeout_secs,
            jwt_secret,
            media,
        })
    }
}

impl Args {
    fn run_mode(&self) -> Option<RunMode> {
        if self.migrate {
            Some(RunMode::Migrate)
        } else if self.replication_audit {
            Some(RunMode::ReplicationAudit)
        } else if self.refresh_metadata {
            Some(RunMode::RefreshMetadata)
        } else if let Some(id) = self.scan {
            Some(RunMode::Scan(id))
        } else if let Some(id) = self.sync {
            Some(RunMode::Sync(id))
        } else {
            self.replicate.map(RunMode::Replicate)
        }
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
