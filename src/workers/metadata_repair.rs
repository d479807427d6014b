//! Repair task: backfill checksum/size/mtime for assets whose content
//! metadata was never captured (interrupted intake, migrated records).
//! Refreshes stored values from the local file without re-attaching it;
//! state is never touched.

use crate::services::asset_repository::AssetRepository;
use crate::services::content::digest_for_asset;
use crate::workers::WorkerError;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct BackfillMetadataWorker {
    repo: AssetRepository,
    uploads_root: PathBuf,
}

impl BackfillMetadataWorker {
    pub fn new(repo: AssetRepository, uploads_root: PathBuf) -> Self {
        Self { repo, uploads_root }
    }

    pub async fn perform(&self, asset_id: Uuid) -> Result<(), WorkerError> {
        let asset = self.repo.find(asset_id).await?;
        if !asset.has_local_copy() {
            debug!("asset {} has no local copy; skipping backfill", asset.id);
            return Ok(());
        }
        if asset.checksum.is_some()
            && asset.size_bytes.is_some()
            && asset.last_modified_at_source.is_some()
        {
            return Ok(());
        }

        let digest = digest_for_asset(&asset, &self.uploads_root).await?;
        self.repo.save_content_metadata(asset.id, &digest).await?;
        Ok(())
    }

    /// Walk every asset missing content metadata. Per-asset failures are
    /// logged and skipped. Returns how many records were repaired.
    pub async fn perform_all(&self) -> Result<usize, WorkerError> {
        let mut repaired = 0;
        for asset in self.repo.assets_missing_content_metadata().await? {
            match self.perform(asset.id).await {
                Ok(()) => repaired += 1,
                Err(err) => warn!("could not backfill asset {}: {}", asset.id, err),
            }
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::asset::{Asset, AssetState};
    use crate::services::testing::test_pool;

    struct Fixture {
        repo: AssetRepository,
        uploads: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            Self {
                repo: AssetRepository::new(test_pool().await),
                uploads: tempfile::tempdir().unwrap(),
            }
        }

        fn worker(&self) -> BackfillMetadataWorker {
            BackfillMetadataWorker::new(self.repo.clone(), self.uploads.path().to_path_buf())
        }
    }

    #[tokio::test]
    async fn backfills_missing_content_metadata_from_the_file() {
        let fixture = Fixture::new().await;
        let asset = Asset::new("a.txt");
        fixture.repo.create(&asset).await.unwrap();
        let path = asset.local_path(fixture.uploads.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let repaired = fixture.worker().perform_all().await.unwrap();
        assert_eq!(repaired, 1);

        let repaired_asset = fixture.repo.find(asset.id).await.unwrap();
        assert_eq!(
            repaired_asset.checksum.as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        assert_eq!(repaired_asset.size_bytes, Some(11));
        assert!(repaired_asset.last_modified_at_source.is_some());
        // The repair never touches lifecycle state.
        assert_eq!(repaired_asset.state, AssetState::Unscanned);
    }

    #[tokio::test]
    async fn uploaded_assets_are_left_alone() {
        let fixture = Fixture::new().await;
        let mut asset = Asset::new("a.txt");
        asset.state = AssetState::Uploaded;
        fixture.repo.create(&asset).await.unwrap();

        fixture.worker().perform(asset.id).await.unwrap();
        assert_eq!(fixture.repo.find(asset.id).await.unwrap().checksum, None);
    }

    #[tokio::test]
    async fn a_walk_tolerates_per_asset_failures() {
        let fixture = Fixture::new().await;

        // This asset's local file is missing entirely.
        let broken = Asset::new("broken.txt");
        fixture.repo.create(&broken).await.unwrap();

        let intact = Asset::new("intact.txt");
        fixture.repo.create(&intact).await.unwrap();
        let path = intact.local_path(fixture.uploads.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"ok").await.unwrap();

        let repaired = fixture.worker().perform_all().await.unwrap();
        assert_eq!(repaired, 1);
        assert!(fixture.repo.find(intact.id).await.unwrap().checksum.is_some());
        assert!(fixture.repo.find(broken.id).await.unwrap().checksum.is_none());
    }
}
