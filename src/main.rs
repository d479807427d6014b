use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, path::Path, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

use asset_store::config::{AppConfig, RunMode, StorageBackendConfig};
use asset_store::queue::NullDispatcher;
use asset_store::services::asset_repository::AssetRepository;
use asset_store::services::cloud_storage::{
    DisabledStorage, LocalFakeStorage, S3Storage, StorageGateway,
};
use asset_store::services::lifecycle::AssetLifecycle;
use asset_store::services::replication::ReplicationCoordinator;
use asset_store::services::virus_scanner::VirusScanner;
use asset_store::workers::metadata_repair::BackfillMetadataWorker;
use asset_store::workers::scan::VirusScanWorker;
use asset_store::workers::storage_sync::SaveToCloudWorker;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    let Some(mode) = mode else {
        anyhow::bail!(
            "nothing to do: pass --migrate, --replication-audit, --refresh-metadata, \
             --scan <id>, --sync <id> or --replicate <id>"
        );
    };

    tracing::info!("Starting asset-store with config: {:?}", cfg);

    // --- Ensure the uploads directory exists ---
    if !cfg.uploads_root.exists() {
        fs::create_dir_all(&cfg.uploads_root)?;
        tracing::info!("Created uploads directory at {}", cfg.uploads_root.display());
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if let Err(err) = fs::OpenOptions::new().create(true).write(true).open(db_path) {
        tracing::warn!("Failed to open database file {}: {}", db_path, err);
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&cfg.database_url)
            .await?,
    );

    // --- Handle migration mode ---
    if mode == RunMode::Migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let repo = AssetRepository::new(db.clone());
    let gateway: Arc<dyn StorageGateway> = match &cfg.backend {
        StorageBackendConfig::S3 { bucket, region } => Arc::new(
            S3Storage::new(
                bucket.clone(),
                region.clone(),
                cfg.uploads_root.clone(),
                cfg.media.clone(),
            )
            .await,
        ),
        StorageBackendConfig::LocalFake { root, base_url } => Arc::new(LocalFakeStorage::new(
            root.clone(),
            cfg.uploads_root.clone(),
            base_url.clone(),
        )),
        StorageBackendConfig::Disabled => Arc::new(DisabledStorage),
    };
    let lifecycle = AssetLifecycle::new(
        repo.clone(),
        Arc::new(NullDispatcher),
        cfg.uploads_root.clone(),
    );

    match mode {
        RunMode::Migrate => unreachable!("handled above"),
        RunMode::Scan(asset_id) => {
            let scanner = VirusScanner::new(
                cfg.clamscan_path.clone(),
                Duration::from_secs(cfg.scan_timeout_secs),
            );
            let worker = VirusScanWorker::new(repo, scanner, lifecycle, cfg.uploads_root.clone());
            worker.perform(asset_id).await?;
            tracing::info!("Scan task for {} complete.", asset_id);
        }
        RunMode::Sync(asset_id) => {
            let worker = SaveToCloudWorker::new(repo, gateway, lifecycle);
            worker.perform(asset_id).await?;
            tracing::info!("Cloud sync for {} complete.", asset_id);
        }
        RunMode::RefreshMetadata => {
            let worker = BackfillMetadataWorker::new(repo, cfg.uploads_root.clone());
            let repaired = worker.perform_all().await?;
            tracing::info!("Refreshed content metadata for {} assets.", repaired);
        }
        RunMode::Replicate(asset_id) => {
            let asset = repo.find(asset_id).await?;
            let nudged = ReplicationCoordinator::new(gateway)
                .ensure_replicated(&asset)
                .await?;
            if nudged {
                tracing::info!("Replication kick-started for {}.", asset_id);
            } else {
                tracing::info!("Asset {} is already replicated.", asset_id);
            }
        }
        RunMode::ReplicationAudit => {
            let assets = repo.all_uploaded().await?;
            let report = ReplicationCoordinator::new(gateway).audit(&assets).await;
            for id in &report.missing {
                tracing::warn!("asset {} has no remote object", id);
            }
            for id in &report.unreplicated {
                tracing::warn!("asset {} exists remotely but was never replicated", id);
            }
            tracing::info!(
                "Replication audit complete: {} assets, {} missing, {} unreplicated, {} skipped.",
                assets.len(),
                report.missing.len(),
                report.unreplicated.len(),
                report.skipped
            );
        }
    }

    Ok(())
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
