//! src/services/asset_repository.rs
//!
//! Persistence rules for assets on top of SQLite: validation at mutation
//! time, soft delete and restore, legacy-path resolution, and
//! replacement-chain maintenance. Rows are never physically deleted in
//! normal operation; every default query filters on `deleted_at IS NULL`
//! and the explicit `*_any` lookups include retired rows.

use crate::models::asset::{Asset, AssetState, AssetValidationError, LEGACY_URL_PREFIX};
use crate::services::content::FileDigest;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const ASSET_COLUMNS: &str = "id, uuid, state, filename_history, checksum, \
    last_modified_at_source, size_bytes, draft, access_limited, auth_bypass_ids, \
    replacement_id, redirect_url, parent_document_url, legacy_url_path, \
    legacy_etag, legacy_last_modified, deleted_at, created_at, updated_at";

/// Replacement chains longer than this are treated as corrupt rather than
/// walked forever.
const MAX_REPLACEMENT_HOPS: usize = 8;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("asset `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Validation(#[from] AssetValidationError),
    #[error("replacement `{0}` does not reference an existing asset")]
    UnknownReplacement(Uuid),
    #[error("legacy url path `{0}` is already taken by a live asset")]
    DuplicateLegacyPath(String),
    #[error("replacement chain through `{0}` does not terminate")]
    ReplacementCycle(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Build the canonical legacy lookup key from a request path and optional
/// format suffix.
pub fn legacy_key(path: &str, format: Option<&str>) -> String {
    match format {
        Some(format) => format!("{}/{}.{}", LEGACY_URL_PREFIX, path, format),
        None => format!("{}/{}", LEGACY_URL_PREFIX, path),
    }
}

/// Repository over the `assets` table.
#[derive(Clone)]
pub struct AssetRepository {
    db: Arc<SqlitePool>,
}

impl AssetRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Persist a brand-new asset after validating it.
    pub async fn create(&self, asset: &Asset) -> RepositoryResult<()> {
        asset.validate(None)?;
        self.ensure_replacement_exists(asset).await?;
        if let Some(path) = &asset.legacy_url_path {
            if self.live_asset_at_legacy_path(path).await?.is_some() {
                return Err(RepositoryError::DuplicateLegacyPath(path.clone()));
            }
        }
        self.insert(asset).await
    }

    /// Persist a legacy asset, retiring any live asset already holding its
    /// legacy key. At most one live asset may own a legacy path.
    pub async fn create_legacy_replacing(&self, asset: &Asset) -> RepositoryResult<()> {
        asset.validate(None)?;
        self.ensure_replacement_exists(asset).await?;
        if let Some(path) = &asset.legacy_url_path {
            if let Some(existing) = self.live_asset_at_legacy_path(path).await? {
                self.soft_delete(existing.id).await?;
            }
        }
        self.insert(asset).await
    }

    /// Persist changes to an existing asset; flattens replacement chains
    /// synchronously after the row is written.
    pub async fn update(&self, asset: &Asset) -> RepositoryResult<()> {
        let previous = self.find_any(asset.id).await?;
        asset.validate(Some(&previous))?;
        self.ensure_replacement_exists(asset).await?;
        if let Some(path) = &asset.legacy_url_path {
            if let Some(holder) = self.live_asset_at_legacy_path(path).await? {
                if holder.id != asset.id {
                    return Err(RepositoryError::DuplicateLegacyPath(path.clone()));
                }
            }
        }

        sqlx::query(
            "UPDATE assets SET state = ?, filename_history = ?, checksum = ?, \
             last_modified_at_source = ?, size_bytes = ?, draft = ?, \
             access_limited = ?, auth_bypass_ids = ?, replacement_id = ?, \
             redirect_url = ?, parent_document_url = ?, legacy_url_path = ?, \
             legacy_etag = ?, legacy_last_modified = ?, deleted_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(asset.state)
        .bind(asset.filename_history.clone())
        .bind(&asset.checksum)
        .bind(asset.last_modified_at_source)
        .bind(asset.size_bytes)
        .bind(asset.draft)
        .bind(asset.access_limited.clone())
        .bind(asset.auth_bypass_ids.clone())
        .bind(asset.replacement_id)
        .bind(&asset.redirect_url)
        .bind(&asset.parent_document_url)
        .bind(&asset.legacy_url_path)
        .bind(&asset.legacy_etag)
        .bind(asset.legacy_last_modified)
        .bind(asset.deleted_at)
        .bind(Utc::now())
        .bind(asset.id)
        .execute(&*self.db)
        .await?;

        if asset.replacement_id != previous.replacement_id {
            self.flatten_replacement_chain(asset).await?;
        }
        Ok(())
    }

    /// Fetch a live asset. Soft-deleted rows are invisible here.
    pub async fn find(&self, id: Uuid) -> RepositoryResult<Asset> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ? AND deleted_at IS NULL");
        sqlx::query_as::<_, Asset>(&sql)
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => RepositoryError::NotFound(id),
                other => RepositoryError::Sqlx(other),
            })
    }

    /// Fetch an asset whether or not it has been soft-deleted. The
    /// administrative lookup path.
    pub async fn find_any(&self, id: Uuid) -> RepositoryResult<Asset> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?");
        sqlx::query_as::<_, Asset>(&sql)
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => RepositoryError::NotFound(id),
                other => RepositoryError::Sqlx(other),
            })
    }

    /// Fetch a live asset by its storage-key uuid.
    pub async fn find_by_uuid(&self, uuid: Uuid) -> RepositoryResult<Option<Asset>> {
        let sql =
            format!("SELECT {ASSET_COLUMNS} FROM assets WHERE uuid = ? AND deleted_at IS NULL");
        Ok(sqlx::query_as::<_, Asset>(&sql)
            .bind(uuid)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Mark an asset deleted. The row stays addressable via `find_any`.
    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<Asset> {
        let now = Utc::now();
        let result =
            sqlx::query("UPDATE assets SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now)
                .bind(now)
                .bind(id)
                .execute(&*self.db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        self.find_any(id).await
    }

    /// Bring a soft-deleted asset back.
    pub async fn restore(&self, id: Uuid) -> RepositoryResult<Asset> {
        let result =
            sqlx::query("UPDATE assets SET deleted_at = NULL, updated_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(id)
                .execute(&*self.db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        self.find_any(id).await
    }

    /// Resolve a legacy request path (plus optional format suffix) to an
    /// asset. Prefers the live holder of the key; falls back to the most
    /// recently deleted one so redirects and audits keep working shortly
    /// after removal.
    pub async fn resolve_legacy(
        &self,
        path: &str,
        format: Option<&str>,
    ) -> RepositoryResult<Option<Asset>> {
        self.find_by_legacy_path(&legacy_key(path, format)).await
    }

    /// Lookup by full legacy key, live rows first, then the most recently
    /// deleted.
    pub async fn find_by_legacy_path(&self, path: &str) -> RepositoryResult<Option<Asset>> {
        if let Some(live) = self.live_asset_at_legacy_path(path).await? {
            return Ok(Some(live));
        }
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE legacy_url_path = ? \
             AND deleted_at IS NOT NULL ORDER BY deleted_at DESC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, Asset>(&sql)
            .bind(path)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// The final target of an asset's replacement chain, if it has one.
    pub async fn effective_replacement(&self, id: Uuid) -> RepositoryResult<Option<Asset>> {
        let asset = self.find_any(id).await?;
        let Some(start) = asset.replacement_id else {
            return Ok(None);
        };
        let final_id = self.final_replacement_of(start, id).await?;
        Ok(Some(self.find_any(final_id).await?))
    }

    /// Live assets that have reached cloud storage; the replication audit
    /// feed.
    pub async fn all_uploaded(&self) -> RepositoryResult<Vec<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE state = ? AND deleted_at IS NULL \
             ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, Asset>(&sql)
            .bind(AssetState::Uploaded)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Live assets sharing one content checksum, oldest first; the feed for
    /// duplicate-content audits.
    pub async fn find_by_checksum(&self, checksum: &str) -> RepositoryResult<Vec<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE checksum = ? AND deleted_at IS NULL \
             ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, Asset>(&sql)
            .bind(checksum)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Live assets still held locally whose content metadata was never
    /// captured; the repair-worker feed.
    pub async fn assets_missing_content_metadata(&self) -> RepositoryResult<Vec<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE state != ? AND deleted_at IS NULL \
             AND (checksum IS NULL OR size_bytes IS NULL OR last_modified_at_source IS NULL) \
             ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, Asset>(&sql)
            .bind(AssetState::Uploaded)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Atomic refresh of the captured content metadata.
    pub async fn save_content_metadata(
        &self,
        id: Uuid,
        digest: &FileDigest,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE assets SET checksum = ?, size_bytes = ?, last_modified_at_source = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&digest.checksum)
        .bind(digest.size_bytes)
        .bind(digest.last_modified)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    /// Atomic state write. Per-asset ordering is last-writer-wins; workers
    /// re-check state before acting so redelivered tasks are no-ops.
    pub async fn set_state(&self, id: Uuid, state: AssetState) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE assets SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state)
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn insert(&self, asset: &Asset) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO assets (id, uuid, state, filename_history, checksum, \
             last_modified_at_source, size_bytes, draft, access_limited, auth_bypass_ids, \
             replacement_id, redirect_url, parent_document_url, legacy_url_path, \
             legacy_etag, legacy_last_modified, deleted_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(asset.id)
        .bind(asset.uuid)
        .bind(asset.state)
        .bind(asset.filename_history.clone())
        .bind(&asset.checksum)
        .bind(asset.last_modified_at_source)
        .bind(asset.size_bytes)
        .bind(asset.draft)
        .bind(asset.access_limited.clone())
        .bind(asset.auth_bypass_ids.clone())
        .bind(asset.replacement_id)
        .bind(&asset.redirect_url)
        .bind(&asset.parent_document_url)
        .bind(&asset.legacy_url_path)
        .bind(&asset.legacy_etag)
        .bind(asset.legacy_last_modified)
        .bind(asset.deleted_at)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn live_asset_at_legacy_path(&self, path: &str) -> RepositoryResult<Option<Asset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE legacy_url_path = ? AND deleted_at IS NULL"
        );
        Ok(sqlx::query_as::<_, Asset>(&sql)
            .bind(path)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn ensure_replacement_exists(&self, asset: &Asset) -> RepositoryResult<()> {
        let Some(replacement_id) = asset.replacement_id else {
            return Ok(());
        };
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM assets WHERE id = ?)")
            .bind(replacement_id)
            .fetch_one(&*self.db)
            .await?;
        if !exists {
            return Err(RepositoryError::UnknownReplacement(replacement_id));
        }
        Ok(())
    }

    /// Re-point every asset that referenced `asset` as its replacement at
    /// the final target of the new chain, so a reader never has to follow
    /// more than one hop.
    async fn flatten_replacement_chain(&self, asset: &Asset) -> RepositoryResult<()> {
        let Some(target) = asset.replacement_id else {
            return Ok(());
        };
        let final_id = self.final_replacement_of(target, asset.id).await?;
        let now = Utc::now();

        if final_id != target {
            sqlx::query("UPDATE assets SET replacement_id = ?, updated_at = ? WHERE id = ?")
                .bind(final_id)
                .bind(now)
                .bind(asset.id)
                .execute(&*self.db)
                .await?;
        }

        sqlx::query(
            "UPDATE assets SET replacement_id = ?, updated_at = ? \
             WHERE replacement_id = ? AND id != ?",
        )
        .bind(final_id)
        .bind(now)
        .bind(asset.id)
        .bind(final_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Walk the chain from `start` to its terminal asset. Bounded; a
    /// revisited id or an over-long chain is a data-integrity error, never
    /// an endless loop.
    async fn final_replacement_of(&self, start: Uuid, origin: Uuid) -> RepositoryResult<Uuid> {
        let mut seen = HashSet::from([origin]);
        let mut current = start;
        for _ in 0..MAX_REPLACEMENT_HOPS {
            if !seen.insert(current) {
                return Err(RepositoryError::ReplacementCycle(current));
            }
            let next: Option<Option<Uuid>> =
                sqlx::query_scalar("SELECT replacement_id FROM assets WHERE id = ?")
                    .bind(current)
                    .fetch_optional(&*self.db)
                    .await?;
            match next {
                Some(Some(next_id)) => current = next_id,
                Some(None) => return Ok(current),
                None => return Err(RepositoryError::UnknownReplacement(current)),
            }
        }
        Err(RepositoryError::ReplacementCycle(start))
    }
}
