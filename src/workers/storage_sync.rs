//! Cloud-sync task: push a clean asset's bytes to the storage gateway.

use crate::models::asset::AssetState;
use crate::services::asset_repository::AssetRepository;
use crate::services::cloud_storage::StorageGateway;
use crate::services::lifecycle::AssetLifecycle;
use crate::workers::WorkerError;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Uploads a `clean` asset and records the success.
///
/// `save` itself is idempotent (checksum-compared), and an asset in any
/// other state is skipped, so redelivery costs at most one HEAD request.
pub struct SaveToCloudWorker {
    repo: AssetRepository,
    gateway: Arc<dyn StorageGateway>,
    lifecycle: AssetLifecycle,
}

impl SaveToCloudWorker {
    pub fn new(
        repo: AssetRepository,
        gateway: Arc<dyn StorageGateway>,
        lifecycle: AssetLifecycle,
    ) -> Self {
        Self {
            repo,
            gateway,
            lifecycle,
        }
    }

    pub async fn perform(&self, asset_id: Uuid) -> Result<(), WorkerError> {
        let asset = self.repo.find(asset_id).await?;
        if asset.state != AssetState::Clean {
            debug!("asset {} is {:?}; skipping cloud sync", asset.id, asset.state);
            return Ok(());
        }

        self.gateway.save(&asset).await?;
        self.lifecycle.upload_success(&asset).await?;
        Ok(())
    }
}
