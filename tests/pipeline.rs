//! End-to-end pipeline scenarios: intake through scanning to cloud storage,
//! wired with the real repository, the local fake storage backend and a
//! shell-script scanner.

use asset_store::models::asset::{Asset, AssetState};
use asset_store::queue::{DispatchError, TaskDispatcher, TaskKind};
use asset_store::services::asset_repository::AssetRepository;
use asset_store::services::cloud_storage::{LocalFakeStorage, StorageGateway};
use asset_store::services::content::FileDigest;
use asset_store::services::lifecycle::AssetLifecycle;
use asset_store::services::virus_scanner::VirusScanner;
use asset_store::workers::scan::VirusScanWorker;
use asset_store::workers::storage_sync::SaveToCloudWorker;
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

async fn migrated_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    for statement in include_str!("../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement).execute(&pool).await.expect("migration");
    }
    Arc::new(pool)
}

#[derive(Default)]
struct RecordingDispatcher {
    enqueued: Mutex<Vec<(TaskKind, Uuid)>>,
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn enqueue(&self, task: TaskKind, asset_id: Uuid) -> Result<(), DispatchError> {
        self.enqueued.lock().unwrap().push((task, asset_id));
        Ok(())
    }
}

fn fake_scanner(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("scanner.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Pipeline {
    repo: AssetRepository,
    dispatcher: Arc<RecordingDispatcher>,
    gateway: Arc<LocalFakeStorage>,
    lifecycle: AssetLifecycle,
    uploads: tempfile::TempDir,
    remote: tempfile::TempDir,
    scripts: tempfile::TempDir,
}

impl Pipeline {
    async fn new() -> Self {
        let repo = AssetRepository::new(migrated_pool().await);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let uploads = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let gateway = Arc::new(LocalFakeStorage::new(
            remote.path().to_path_buf(),
            uploads.path().to_path_buf(),
            "http://localhost:3000".into(),
        ));
        let lifecycle = AssetLifecycle::new(
            repo.clone(),
            dispatcher.clone(),
            uploads.path().to_path_buf(),
        );
        Self {
            repo,
            dispatcher,
            gateway,
            lifecycle,
            uploads,
            remote,
            scripts,
        }
    }

    /// Intake: write the file, capture its content identity, persist the
    /// asset.
    async fn attach(&self, filename: &str, contents: &[u8]) -> Asset {
        let mut asset = Asset::new(filename);
        let path = asset.local_path(self.uploads.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, contents).await.unwrap();

        let digest = FileDigest::from_file(&path).await.unwrap();
        asset.checksum = Some(digest.checksum);
        asset.size_bytes = Some(digest.size_bytes);
        asset.last_modified_at_source = Some(digest.last_modified);
        self.repo.create(&asset).await.unwrap();
        self.lifecycle.file_attached(&asset).await.unwrap();
        asset
    }

    fn scan_worker(&self, script: &str) -> VirusScanWorker {
        VirusScanWorker::new(
            self.repo.clone(),
            VirusScanner::new(
                fake_scanner(self.scripts.path(), script),
                Duration::from_secs(5),
            ),
            self.lifecycle.clone(),
            self.uploads.path().to_path_buf(),
        )
    }

    fn sync_worker(&self) -> SaveToCloudWorker {
        SaveToCloudWorker::new(
            self.repo.clone(),
            self.gateway.clone(),
            self.lifecycle.clone(),
        )
    }
}

#[tokio::test]
async fn a_clean_upload_travels_from_intake_to_cloud_storage() {
    let pipeline = Pipeline::new().await;
    let asset = pipeline.attach("report.txt", b"0123456789").await;

    let created = pipeline.repo.find(asset.id).await.unwrap();
    assert_eq!(created.state, AssetState::Unscanned);
    let checksum = created.checksum.clone().unwrap();
    assert_eq!(created.size_bytes, Some(10));
    assert_eq!(
        pipeline.dispatcher.enqueued.lock().unwrap().clone(),
        vec![(TaskKind::VirusScan, asset.id)]
    );

    // Scan comes back clean and schedules the sync.
    pipeline.scan_worker("exit 0").perform(asset.id).await.unwrap();
    assert_eq!(
        pipeline.repo.find(asset.id).await.unwrap().state,
        AssetState::Clean
    );
    assert_eq!(
        pipeline.dispatcher.enqueued.lock().unwrap().clone(),
        vec![
            (TaskKind::VirusScan, asset.id),
            (TaskKind::SaveToCloud, asset.id)
        ]
    );

    // The sync uploads the bytes and releases the local copy.
    pipeline.sync_worker().perform(asset.id).await.unwrap();

    let uploaded = pipeline.repo.find(asset.id).await.unwrap();
    assert_eq!(uploaded.state, AssetState::Uploaded);
    assert_eq!(uploaded.checksum.as_deref(), Some(checksum.as_str()));
    assert_eq!(uploaded.size_bytes, Some(10));
    assert!(pipeline.gateway.exists(&uploaded).await.unwrap());
    assert!(!asset.local_path(pipeline.uploads.path()).exists());

    let remote_copy = pipeline.remote.path().join(asset.uuid.to_string());
    assert_eq!(tokio::fs::read(&remote_copy).await.unwrap(), b"0123456789");
}

#[tokio::test]
async fn an_infected_upload_never_reaches_cloud_storage() {
    let pipeline = Pipeline::new().await;
    let asset = pipeline.attach("malware.bin", b"eicar").await;

    pipeline
        .scan_worker("echo 'Eicar-Test-Signature FOUND'; exit 1")
        .perform(asset.id)
        .await
        .unwrap();

    let infected = pipeline.repo.find(asset.id).await.unwrap();
    assert_eq!(infected.state, AssetState::Infected);
    // Only the intake-time scan was ever queued; no sync follows infection.
    assert_eq!(
        pipeline.dispatcher.enqueued.lock().unwrap().clone(),
        vec![(TaskKind::VirusScan, asset.id)]
    );

    // A stray sync delivery does nothing for an infected asset.
    pipeline.sync_worker().perform(asset.id).await.unwrap();
    assert!(!pipeline.gateway.exists(&infected).await.unwrap());
    assert_eq!(
        pipeline.repo.find(asset.id).await.unwrap().state,
        AssetState::Infected
    );
    // The local copy is retained for investigation.
    assert!(asset.local_path(pipeline.uploads.path()).exists());
}

#[tokio::test]
async fn reattaching_a_file_sends_the_asset_back_through_the_pipeline() {
    let pipeline = Pipeline::new().await;
    let asset = pipeline.attach("report.txt", b"0123456789").await;

    pipeline.scan_worker("exit 0").perform(asset.id).await.unwrap();
    pipeline.sync_worker().perform(asset.id).await.unwrap();
    assert_eq!(
        pipeline.repo.find(asset.id).await.unwrap().state,
        AssetState::Uploaded
    );

    // Replace the file under a new name.
    let mut updated = pipeline.repo.find(asset.id).await.unwrap();
    updated.attach_file("report-v2.txt");
    let path = updated.local_path(pipeline.uploads.path());
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"new contents").await.unwrap();
    let digest = FileDigest::from_file(&path).await.unwrap();
    updated.checksum = Some(digest.checksum);
    updated.size_bytes = Some(digest.size_bytes);
    updated.last_modified_at_source = Some(digest.last_modified);
    pipeline.repo.update(&updated).await.unwrap();
    pipeline.lifecycle.file_attached(&updated).await.unwrap();

    let reset = pipeline.repo.find(asset.id).await.unwrap();
    assert_eq!(reset.state, AssetState::Unscanned);
    assert_eq!(reset.filename(), "report-v2.txt");
    assert!(reset.has_ever_been_named("report.txt"));

    // The fresh scan and sync move it through again.
    pipeline.scan_worker("exit 0").perform(asset.id).await.unwrap();
    pipeline.sync_worker().perform(asset.id).await.unwrap();
    assert_eq!(
        pipeline.repo.find(asset.id).await.unwrap().state,
        AssetState::Uploaded
    );
}
