//! The asset lifecycle: `unscanned → {clean, infected}`, `clean → uploaded`.
//!
//! Transitions are looked up in the table on `AssetState`; an event arriving
//! in the wrong state is a successful no-op, never an error. The queue
//! redelivers tasks at least once, so every worker leans on that.
//!
//! Side effects are ordered deliberately: a clean verdict persists the state
//! before scheduling the upload, and a finished upload persists the state
//! before the local bytes are released. Until the `uploaded` row is durable,
//! the local file is the only copy we can trust.

use crate::models::asset::{Asset, AssetState, LifecycleEvent};
use crate::queue::{DispatchError, TaskDispatcher, TaskKind};
use crate::services::asset_repository::{AssetRepository, RepositoryError};
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Drives state transitions and their side effects.
#[derive(Clone)]
pub struct AssetLifecycle {
    repo: AssetRepository,
    dispatcher: Arc<dyn TaskDispatcher>,
    uploads_root: PathBuf,
}

impl AssetLifecycle {
    pub fn new(
        repo: AssetRepository,
        dispatcher: Arc<dyn TaskDispatcher>,
        uploads_root: PathBuf,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            uploads_root,
        }
    }

    /// A file was just attached (first intake or a replacement) and its row
    /// persisted. Schedules the virus scan; the asset sits in `unscanned`
    /// until the verdict lands. Call only after the record is durable, so a
    /// fast worker cannot race the insert.
    pub async fn file_attached(&self, asset: &Asset) -> Result<(), LifecycleError> {
        if asset.state != AssetState::Unscanned {
            debug!("asset {} is {:?}; no scan to schedule", asset.id, asset.state);
            return Ok(());
        }
        self.dispatcher
            .enqueue(TaskKind::VirusScan, asset.id)
            .await?;
        Ok(())
    }

    /// The scanner found nothing. Moves to `clean` and schedules the cloud
    /// sync. Returns whether the transition happened.
    pub async fn scanned_clean(&self, asset: &Asset) -> Result<bool, LifecycleError> {
        let Some(next) = asset.state.next(LifecycleEvent::ScannedClean) else {
            debug!("asset {} is {:?}; ignoring clean verdict", asset.id, asset.state);
            return Ok(false);
        };
        self.repo.set_state(asset.id, next).await?;
        self.dispatcher
            .enqueue(TaskKind::SaveToCloud, asset.id)
            .await?;
        Ok(true)
    }

    /// The scanner flagged the file. Moves to `infected` (a sink) and raises
    /// the operator alert.
    pub async fn scanned_infected(
        &self,
        asset: &Asset,
        details: &str,
    ) -> Result<bool, LifecycleError> {
        let Some(next) = asset.state.next(LifecycleEvent::ScannedInfected) else {
            debug!("asset {} is {:?}; ignoring infected verdict", asset.id, asset.state);
            return Ok(false);
        };
        self.repo.set_state(asset.id, next).await?;
        error!(
            asset_id = %asset.id,
            filename = asset.filename(),
            details,
            "virus scanner flagged asset as infected"
        );
        Ok(true)
    }

    /// The cloud copy is durable. Moves to `uploaded`, then releases the
    /// local bytes. Persist first: if the state write fails, the file must
    /// survive.
    pub async fn upload_success(&self, asset: &Asset) -> Result<bool, LifecycleError> {
        let Some(next) = asset.state.next(LifecycleEvent::UploadSuccess) else {
            debug!("asset {} is {:?}; ignoring upload success", asset.id, asset.state);
            return Ok(false);
        };
        self.repo.set_state(asset.id, next).await?;

        let path = asset.local_path(&self.uploads_root);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("released local copy {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("local copy {} already gone", path.display());
            }
            Err(err) => return Err(err.into()),
        }
        // The per-asset intake directory is empty now; drop it best-effort.
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        Ok(true)
    }
}
