//! Cross-region replication nudging and auditing.
//!
//! The object store replicates on its own schedule, but objects written
//! before replication was switched on never catch up by themselves. It does
//! treat any metadata mutation as a reason to re-replicate, so writing and
//! immediately removing a throwaway key is enough to kick an object into the
//! pipeline without changing it.

use crate::models::asset::Asset;
use crate::services::cloud_storage::{GatewayError, GatewayResult, StorageGateway};
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Throwaway metadata key used to trigger re-replication.
pub const REPLICATION_NUDGE_KEY: &str = "replication-requested-at";

/// How many assets the audit inspects concurrently.
const AUDIT_CONCURRENCY: usize = 8;

/// Operator-facing report from an audit walk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplicationAudit {
    /// Uploaded assets with no remote object at all.
    pub missing: Vec<Uuid>,
    /// Remote objects present but never replicated.
    pub unreplicated: Vec<Uuid>,
    /// Assets that could not be inspected this walk.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct ReplicationCoordinator {
    gateway: Arc<dyn StorageGateway>,
}

impl ReplicationCoordinator {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        Self { gateway }
    }

    /// Kick-start replication for an asset whose remote object was never
    /// replicated. Add-then-remove of the same key, in that order; the
    /// object's metadata ends up exactly where it started. Returns whether a
    /// nudge was issued. `ObjectNotFound` propagates: a missing object is
    /// not a pending one.
    pub async fn ensure_replicated(&self, asset: &Asset) -> GatewayResult<bool> {
        if !self.gateway.never_replicated(asset).await? {
            return Ok(false);
        }
        let stamp = Utc::now().to_rfc3339();
        self.gateway
            .add_metadata(asset, REPLICATION_NUDGE_KEY, &stamp)
            .await?;
        self.gateway
            .remove_metadata(asset, REPLICATION_NUDGE_KEY)
            .await?;
        Ok(true)
    }

    /// Partition uploaded assets into "no remote object" and "present but
    /// never replicated". Per-asset gateway failures are logged and skipped;
    /// one flaky object must not abort the whole walk.
    pub async fn audit(&self, assets: &[Asset]) -> ReplicationAudit {
        let outcomes: Vec<(Uuid, AuditOutcome)> = stream::iter(assets)
            .map(|asset| self.classify(asset))
            .buffered(AUDIT_CONCURRENCY)
            .collect()
            .await;

        let mut report = ReplicationAudit::default();
        for (id, outcome) in outcomes {
            match outcome {
                AuditOutcome::Replicated => {}
                AuditOutcome::Missing => report.missing.push(id),
                AuditOutcome::Unreplicated => report.unreplicated.push(id),
                AuditOutcome::Skipped => report.skipped += 1,
            }
        }
        report
    }

    async fn classify(&self, asset: &Asset) -> (Uuid, AuditOutcome) {
        let outcome = match self.gateway.never_replicated(asset).await {
            Ok(false) => AuditOutcome::Replicated,
            Ok(true) => AuditOutcome::Unreplicated,
            Err(GatewayError::ObjectNotFound(_)) => AuditOutcome::Missing,
            Err(err) => {
                warn!("skipping asset {} in replication audit: {}", asset.id, err);
                AuditOutcome::Skipped
            }
        };
        (asset.id, outcome)
    }
}

enum AuditOutcome {
    Replicated,
    Missing,
    Unreplicated,
    Skipped,
}
