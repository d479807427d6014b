//! Virus-scan task.

use crate::models::asset::AssetState;
use crate::services::asset_repository::AssetRepository;
use crate::services::lifecycle::AssetLifecycle;
use crate::services::virus_scanner::{ScanVerdict, VirusScanner};
use crate::workers::WorkerError;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Scans one asset's local file and feeds the verdict into the lifecycle.
///
/// Safe under at-least-once redelivery: an asset that already left
/// `unscanned` is skipped without touching the scanner. Scanner operational
/// failures propagate untouched so the queue retries them.
pub struct VirusScanWorker {
    repo: AssetRepository,
    scanner: VirusScanner,
    lifecycle: AssetLifecycle,
    uploads_root: PathBuf,
}

impl VirusScanWorker {
    pub fn new(
        repo: AssetRepository,
        scanner: VirusScanner,
        lifecycle: AssetLifecycle,
        uploads_root: PathBuf,
    ) -> Self {
        Self {
            repo,
            scanner,
            lifecycle,
            uploads_root,
        }
    }

    pub async fn perform(&self, asset_id: Uuid) -> Result<(), WorkerError> {
        let asset = self.repo.find(asset_id).await?;
        if asset.state != AssetState::Unscanned {
            debug!("asset {} already {:?}; skipping scan", asset.id, asset.state);
            return Ok(());
        }

        let verdict = self
            .scanner
            .scan(&asset.local_path(&self.uploads_root))
            .await?;
        match verdict {
            ScanVerdict::Clean => {
                self.lifecycle.scanned_clean(&asset).await?;
            }
            ScanVerdict::Infected(details) => {
                self.lifecycle.scanned_infected(&asset, &details).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::asset::Asset;
    use crate::queue::TaskKind;
    use crate::services::testing::{RecordingDispatcher, test_pool};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn fake_scanner(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("scanner.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Fixture {
        repo: AssetRepository,
        dispatcher: Arc<RecordingDispatcher>,
        uploads: tempfile::TempDir,
        scripts: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            Self {
                repo: AssetRepository::new(test_pool().await),
                dispatcher: Arc::new(RecordingDispatcher::default()),
                uploads: tempfile::tempdir().unwrap(),
                scripts: tempfile::tempdir().unwrap(),
            }
        }

        fn worker(&self, scanner_path: PathBuf) -> VirusScanWorker {
            let uploads_root = self.uploads.path().to_path_buf();
            VirusScanWorker::new(
                self.repo.clone(),
                VirusScanner::new(scanner_path, Duration::from_secs(5)),
                AssetLifecycle::new(
                    self.repo.clone(),
                    self.dispatcher.clone(),
                    uploads_root.clone(),
                ),
                uploads_root,
            )
        }

        async fn seed(&self, asset: &Asset) {
            self.repo.create(asset).await.unwrap();
            let path = asset.local_path(self.uploads.path());
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, b"contents").await.unwrap();
        }
    }

    #[tokio::test]
    async fn clean_scan_advances_the_asset_and_queues_the_sync() {
        let fixture = Fixture::new().await;
        let asset = Asset::new("a.png");
        fixture.seed(&asset).await;

        let worker = fixture.worker(fake_scanner(fixture.scripts.path(), "exit 0"));
        worker.perform(asset.id).await.unwrap();

        assert_eq!(
            fixture.repo.find(asset.id).await.unwrap().state,
            AssetState::Clean
        );
        assert_eq!(
            fixture.dispatcher.tasks(),
            vec![(TaskKind::SaveToCloud, asset.id)]
        );
    }

    #[tokio::test]
    async fn infected_scan_parks_the_asset() {
        let fixture = Fixture::new().await;
        let asset = Asset::new("a.png");
        fixture.seed(&asset).await;

        let worker = fixture.worker(fake_scanner(
            fixture.scripts.path(),
            "echo 'Eicar FOUND'; exit 1",
        ));
        worker.perform(asset.id).await.unwrap();

        assert_eq!(
            fixture.repo.find(asset.id).await.unwrap().state,
            AssetState::Infected
        );
        assert!(fixture.dispatcher.tasks().is_empty());
    }

    #[tokio::test]
    async fn redelivery_after_the_scan_never_reinvokes_the_scanner() {
        let fixture = Fixture::new().await;
        let mut asset = Asset::new("a.png");
        asset.state = AssetState::Clean;
        fixture.seed(&asset).await;

        // A scanner that would fail loudly if ever run.
        let worker = fixture.worker(PathBuf::from("/nonexistent/clamscan"));
        worker.perform(asset.id).await.unwrap();

        assert_eq!(
            fixture.repo.find(asset.id).await.unwrap().state,
            AssetState::Clean
        );
    }

    #[tokio::test]
    async fn scanner_failures_propagate_and_leave_state_alone() {
        let fixture = Fixture::new().await;
        let asset = Asset::new("a.png");
        fixture.seed(&asset).await;

        let worker = fixture.worker(fake_scanner(fixture.scripts.path(), "exit 2"));
        assert!(matches!(
            worker.perform(asset.id).await,
            Err(WorkerError::Scan(_))
        ));
        assert_eq!(
            fixture.repo.find(asset.id).await.unwrap().state,
            AssetState::Unscanned
        );
    }
}
