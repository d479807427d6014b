//! src/services/cloud_storage.rs
//!
//! The sole boundary to durable object storage. Everything is keyed by the
//! asset's `uuid`, never its public `id`. Three backends share one contract:
//! the real S3 client, a local fake that shuffles bytes between directories
//! for development, and a disabled backend for environments with no bucket
//! configured. Which one runs is decided once at startup from config.

use crate::config::MediaPolicy;
use crate::models::asset::Asset;
use crate::services::content::FileDigest;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::MetadataDirective;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// User-metadata key carrying the content checksum on the remote object.
/// `save` compares against it to decide whether an upload is needed.
pub const CHECKSUM_METADATA_KEY: &str = "md5-hexdigest";

/// Presigned URLs hand the read path off to a reverse proxy; they only need
/// to outlive one redirect.
const PRESIGNED_URL_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no remote object for asset uuid `{0}`")]
    ObjectNotFound(Uuid),
    #[error("cloud storage is not configured")]
    NotConfigured,
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
    #[error("cloud storage request failed: {0}")]
    Client(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// HTTP verb a presigned URL is minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethod {
    Get,
    Head,
}

/// Idempotent object-storage operations, keyed by asset `uuid`.
///
/// `save` must never re-upload an unchanged file; the metadata operations
/// must never create objects as a side effect.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Upload the asset's local file unless the remote copy already carries
    /// the same checksum.
    async fn save(&self, asset: &Asset) -> GatewayResult<()>;

    async fn exists(&self, asset: &Asset) -> GatewayResult<bool>;

    /// User metadata of the remote object. `ObjectNotFound` if absent.
    async fn metadata_for(&self, asset: &Asset) -> GatewayResult<HashMap<String, String>>;

    /// Replace the remote object's user metadata. `ObjectNotFound` if
    /// absent; must not create the object.
    async fn set_metadata(
        &self,
        asset: &Asset,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<()>;

    /// Short-lived signed URL for direct retrieval by a reverse proxy.
    async fn presigned_url_for(&self, asset: &Asset, method: AccessMethod) -> GatewayResult<String>;

    /// True when the remote object carries no replication status yet.
    /// `ObjectNotFound` when the object itself is absent, which is a
    /// different condition from "not yet replicated".
    async fn never_replicated(&self, asset: &Asset) -> GatewayResult<bool>;

    async fn add_metadata(&self, asset: &Asset, key: &str, value: &str) -> GatewayResult<()> {
        let mut metadata = self.metadata_for(asset).await?;
        metadata.insert(key.to_string(), value.to_string());
        self.set_metadata(asset, metadata).await
    }

    async fn remove_metadata(&self, asset: &Asset, key: &str) -> GatewayResult<()> {
        let mut metadata = self.metadata_for(asset).await?;
        metadata.remove(key);
        self.set_metadata(asset, metadata).await
    }
}

/// Real backend: an S3 bucket, one object per asset `uuid`.
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    uploads_root: PathBuf,
    media: MediaPolicy,
}

impl S3Storage {
    /// Build a client from the default credential chain.
    pub async fn new(
        bucket: String,
        region: String,
        uploads_root: PathBuf,
        media: MediaPolicy,
    ) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;
        Self::from_client(S3Client::new(&sdk_config), bucket, uploads_root, media)
    }

    /// Wrap a pre-configured client (custom endpoints, tests).
    pub fn from_client(
        client: S3Client,
        bucket: String,
        uploads_root: PathBuf,
        media: MediaPolicy,
    ) -> Self {
        Self {
            client,
            bucket,
            uploads_root,
            media,
        }
    }

    fn key_for(asset: &Asset) -> String {
        asset.uuid.to_string()
    }

    /// HEAD the object; `None` means it does not exist.
    async fn head(&self, asset: &Asset) -> GatewayResult<Option<HeadObjectOutput>> {
        let request = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::key_for(asset));

        match request.send().await {
            Ok(output) => Ok(Some(output)),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(GatewayError::Client(service_err.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl StorageGateway for S3Storage {
    async fn save(&self, asset: &Asset) -> GatewayResult<()> {
        let key = Self::key_for(asset);
        if let Some(head) = self.head(asset).await? {
            let remote_checksum = head
                .metadata()
                .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
                .map(String::as_str);
            if remote_checksum.is_some() && remote_checksum == asset.effective_checksum() {
                debug!("asset {} unchanged in {}, skipping upload", asset.uuid, self.bucket);
                return Ok(());
            }
        }

        let body = ByteStream::from_path(asset.local_path(&self.uploads_root))
            .await
            .map_err(|err| GatewayError::Client(err.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(&self.media.default_content_type);
        if let Some(checksum) = asset.effective_checksum() {
            request = request.metadata(CHECKSUM_METADATA_KEY, checksum);
        }

        request
            .send()
            .await
            .map_err(|err| GatewayError::Client(err.to_string()))?;
        debug!("uploaded asset {} to {}", asset.uuid, self.bucket);
        Ok(())
    }

    async fn exists(&self, asset: &Asset) -> GatewayResult<bool> {
        Ok(self.head(asset).await?.is_some())
    }

    async fn metadata_for(&self, asset: &Asset) -> GatewayResult<HashMap<String, String>> {
        let head = self
            .head(asset)
            .await?
            .ok_or(GatewayError::ObjectNotFound(asset.uuid))?;
        Ok(head.metadata().cloned().unwrap_or_default())
    }

    async fn set_metadata(
        &self,
        asset: &Asset,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<()> {
        let key = Self::key_for(asset);
        if self.head(asset).await?.is_none() {
            return Err(GatewayError::ObjectNotFound(asset.uuid));
        }

        // S3 metadata is immutable in place; a self-copy with REPLACE is the
        // supported mutation path and cannot create a missing object.
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, key))
            .key(&key)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|err| GatewayError::Client(err.to_string()))?;
        Ok(())
    }

    async fn presigned_url_for(&self, asset: &Asset, method: AccessMethod) -> GatewayResult<String> {
        let presigning = PresigningConfig::expires_in(PRESIGNED_URL_TTL)
            .map_err(|err| GatewayError::Client(err.to_string()))?;
        let key = Self::key_for(asset);

        let uri = match method {
            AccessMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .response_cache_control(self.media.cache_control())
                .response_content_disposition(self.media.content_disposition_for(asset.filename()))
                .presigned(presigning)
                .await
                .map_err(|err| GatewayError::Client(err.to_string()))?
                .uri()
                .to_string(),
            AccessMethod::Head => self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .presigned(presigning)
                .await
                .map_err(|err| GatewayError::Client(err.to_string()))?
                .uri()
                .to_string(),
        };
        Ok(uri)
    }

    async fn never_replicated(&self, asset: &Asset) -> GatewayResult<bool> {
        let head = self
            .head(asset)
            .await?
            .ok_or(GatewayError::ObjectNotFound(asset.uuid))?;
        Ok(head.replication_status().is_none())
    }
}

/// Development backend: emulates remote storage by copying bytes between two
/// local directory roots. There is no replication concept locally, so the
/// metadata surface fails loudly rather than pretending.
pub struct LocalFakeStorage {
    root: PathBuf,
    uploads_root: PathBuf,
    base_url: String,
}

impl LocalFakeStorage {
    pub fn new(root: PathBuf, uploads_root: PathBuf, base_url: String) -> Self {
        Self {
            root,
            uploads_root,
            base_url,
        }
    }

    fn object_path(&self, asset: &Asset) -> PathBuf {
        self.root.join(asset.uuid.to_string())
    }

    fn unsupported(operation: &'static str) -> GatewayError {
        GatewayError::Unsupported {
            backend: "local fake",
            operation,
        }
    }
}

#[async_trait]
impl StorageGateway for LocalFakeStorage {
    async fn save(&self, asset: &Asset) -> GatewayResult<()> {
        let target = self.object_path(asset);
        if fs::try_exists(&target).await? {
            let existing = FileDigest::from_file(&target)
                .await
                .map_err(|err| GatewayError::Client(err.to_string()))?;
            if asset.effective_checksum() == Some(existing.checksum.as_str()) {
                debug!("asset {} unchanged in fake storage, skipping copy", asset.uuid);
                return Ok(());
            }
        }

        fs::create_dir_all(&self.root).await?;
        fs::copy(asset.local_path(&self.uploads_root), &target).await?;
        Ok(())
    }

    async fn exists(&self, asset: &Asset) -> GatewayResult<bool> {
        Ok(fs::try_exists(self.object_path(asset)).await?)
    }

    async fn metadata_for(&self, _asset: &Asset) -> GatewayResult<HashMap<String, String>> {
        Err(Self::unsupported("metadata_for"))
    }

    async fn set_metadata(
        &self,
        _asset: &Asset,
        _metadata: HashMap<String, String>,
    ) -> GatewayResult<()> {
        Err(Self::unsupported("set_metadata"))
    }

    async fn presigned_url_for(
        &self,
        asset: &Asset,
        _method: AccessMethod,
    ) -> GatewayResult<String> {
        Ok(format!("{}/fake-storage/{}", self.base_url, asset.uuid))
    }

    async fn never_replicated(&self, _asset: &Asset) -> GatewayResult<bool> {
        Err(Self::unsupported("never_replicated"))
    }
}

/// Backend for environments with no bucket configured. Writes are silently
/// absorbed so intake keeps working; reads fail hard so the missing
/// configuration is visible the moment anything depends on it.
pub struct DisabledStorage;

#[async_trait]
impl StorageGateway for DisabledStorage {
    async fn save(&self, asset: &Asset) -> GatewayResult<()> {
        debug!(
            "cloud storage not configured; dropping save for asset {}",
            asset.uuid
        );
        Ok(())
    }

    async fn exists(&self, _asset: &Asset) -> GatewayResult<bool> {
        Err(GatewayError::NotConfigured)
    }

    async fn metadata_for(&self, _asset: &Asset) -> GatewayResult<HashMap<String, String>> {
        Err(GatewayError::NotConfigured)
    }

    async fn set_metadata(
        &self,
        _asset: &Asset,
        _metadata: HashMap<String, String>,
    ) -> GatewayResult<()> {
        Err(GatewayError::NotConfigured)
    }

    async fn presigned_url_for(
        &self,
        _asset: &Asset,
        _method: AccessMethod,
    ) -> GatewayResult<String> {
        Err(GatewayError::NotConfigured)
    }

    async fn never_replicated(&self, _asset: &Asset) -> GatewayResult<bool> {
        Err(GatewayError::NotConfigured)
    }
}
