//! Queue-facing entry points.
//!
//! Each worker exposes an idempotent `perform(asset_id)` the external queue
//! can call under its own per-asset locking and deduplication. Workers react
//! only to the error kinds they understand; anything else propagates so the
//! queue retries the delivery.

use crate::services::asset_repository::RepositoryError;
use crate::services::cloud_storage::GatewayError;
use crate::services::content::ContentError;
use crate::services::lifecycle::LifecycleError;
use crate::services::virus_scanner::ScanError;
use thiserror::Error;

pub mod metadata_repair;
pub mod scan;
pub mod storage_sync;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Content(#[from] ContentError),
}
