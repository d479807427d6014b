//! In-process doubles shared by the unit tests: an in-memory storage gateway,
//! a task dispatcher that records what it was handed, and a migrated
//! in-memory database pool.

use crate::models::asset::Asset;
use crate::queue::{DispatchError, TaskDispatcher, TaskKind};
use crate::services::cloud_storage::{
    AccessMethod, CHECKSUM_METADATA_KEY, GatewayError, GatewayResult, StorageGateway,
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Default, Clone)]
struct RemoteObject {
    checksum: Option<String>,
    metadata: HashMap<String, String>,
    replicated: bool,
}

/// Gateway double holding objects in a map, with counters and a metadata
/// write log so tests can assert on upload and mutation behavior.
#[derive(Default)]
pub struct InMemoryGateway {
    objects: Mutex<HashMap<Uuid, RemoteObject>>,
    uploads: AtomicUsize,
    metadata_writes: Mutex<Vec<HashMap<String, String>>>,
}

impl InMemoryGateway {
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn metadata_writes(&self) -> Vec<HashMap<String, String>> {
        self.metadata_writes.lock().unwrap().clone()
    }

    pub fn mark_replicated(&self, uuid: Uuid) {
        if let Some(object) = self.objects.lock().unwrap().get_mut(&uuid) {
            object.replicated = true;
        }
    }
}

#[async_trait]
impl StorageGateway for InMemoryGateway {
    async fn save(&self, asset: &Asset) -> GatewayResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let checksum = asset.effective_checksum().map(str::to_string);
        if let Some(existing) = objects.get(&asset.uuid) {
            if existing.checksum.is_some() && existing.checksum == checksum {
                return Ok(());
            }
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let mut metadata = HashMap::new();
        if let Some(checksum) = &checksum {
            metadata.insert(CHECKSUM_METADATA_KEY.to_string(), checksum.clone());
        }
        objects.insert(
            asset.uuid,
            RemoteObject {
                checksum,
                metadata,
                replicated: false,
            },
        );
        Ok(())
    }

    async fn exists(&self, asset: &Asset) -> GatewayResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(&asset.uuid))
    }

    async fn metadata_for(&self, asset: &Asset) -> GatewayResult<HashMap<String, String>> {
        self.objects
            .lock()
            .unwrap()
            .get(&asset.uuid)
            .map(|object| object.metadata.clone())
            .ok_or(GatewayError::ObjectNotFound(asset.uuid))
    }

    async fn set_metadata(
        &self,
        asset: &Asset,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&asset.uuid)
            .ok_or(GatewayError::ObjectNotFound(asset.uuid))?;
        object.metadata = metadata.clone();
        self.metadata_writes.lock().unwrap().push(metadata);
        Ok(())
    }

    async fn presigned_url_for(&self, asset: &Asset, _method: AccessMethod) -> GatewayResult<String> {
        if !self.objects.lock().unwrap().contains_key(&asset.uuid) {
            return Err(GatewayError::ObjectNotFound(asset.uuid));
        }
        Ok(format!("https://signed.test/{}", asset.uuid))
    }

    async fn never_replicated(&self, asset: &Asset) -> GatewayResult<bool> {
        self.objects
            .lock()
            .unwrap()
            .get(&asset.uuid)
            .map(|object| !object.replicated)
            .ok_or(GatewayError::ObjectNotFound(asset.uuid))
    }
}

/// Dispatcher double that records every enqueue.
#[derive(Default)]
pub struct RecordingDispatcher {
    enqueued: Mutex<Vec<(TaskKind, Uuid)>>,
}

impl RecordingDispatcher {
    pub fn tasks(&self) -> Vec<(TaskKind, Uuid)> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn enqueue(&self, task: TaskKind, asset_id: Uuid) -> Result<(), DispatchError> {
        self.enqueued.lock().unwrap().push((task, asset_id));
        Ok(())
    }
}

/// Fresh in-memory database with the schema applied. A single connection so
/// every query sees the same in-memory file.
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    for statement in include_str!("../../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement).execute(&pool).await.expect("migration");
    }

    Arc::new(pool)
}
