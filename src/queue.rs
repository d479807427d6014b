//! Boundary to the background task queue.
//!
//! The transport itself is an external collaborator: durable, at-least-once,
//! no ordering across tasks, free to redeliver after partial failure. The
//! core only ever hands it a task name and an asset id, and keeps every
//! worker entry point idempotent so redelivery is harmless.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// The background tasks this pipeline schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    VirusScan,
    SaveToCloud,
}

impl TaskKind {
    /// Queue-facing task name.
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::VirusScan => "virus_scan",
            TaskKind::SaveToCloud => "save_to_cloud",
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task queue unavailable: {0}")]
    Unavailable(String),
}

/// Hands tasks to the external queue.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn enqueue(&self, task: TaskKind, asset_id: Uuid) -> Result<(), DispatchError>;
}

/// Dispatcher for maintenance runs with no queue attached: logs and drops.
pub struct NullDispatcher;

#[async_trait]
impl TaskDispatcher for NullDispatcher {
    async fn enqueue(&self, task: TaskKind, asset_id: Uuid) -> Result<(), DispatchError> {
        debug!("no task queue attached; dropping {} for {}", task.name(), asset_id);
        Ok(())
    }
}
