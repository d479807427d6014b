//! Content identity for local files: checksum, size and source mtime.
//!
//! Captured once when a file is attached and refreshed only by the explicit
//! metadata-repair path. Assets that have already surrendered their local
//! copy are addressed through storage-gateway metadata instead.

use chrono::{DateTime, Utc};
use md5::Context;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("asset no longer has a local copy to digest")]
    NoLocalCopy,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Checksum, size and mtime of one local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// MD5 hex digest of the file contents.
    pub checksum: String,
    pub size_bytes: i64,
    pub last_modified: DateTime<Utc>,
}

impl FileDigest {
    /// Digest a file on disk, streaming it through MD5 in fixed-size chunks
    /// so large uploads never sit in memory whole.
    pub async fn from_file(path: &Path) -> Result<Self, ContentError> {
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified = DateTime::<Utc>::from(metadata.modified()?);

        let mut file = File::open(path).await?;
        let mut digest = Context::new();
        let mut size_bytes: i64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            size_bytes += read as i64;
            digest.consume(&buf[..read]);
        }

        Ok(Self {
            checksum: format!("{:x}", digest.compute()),
            size_bytes,
            last_modified,
        })
    }
}

/// Digest the local copy backing `asset`. Refuses for uploaded assets,
/// whose bytes have already been released; remote-only objects are
/// inspected through storage metadata, not here.
pub async fn digest_for_asset(
    asset: &crate::models::asset::Asset,
    uploads_root: &Path,
) -> Result<FileDigest, ContentError> {
    if !asset.has_local_copy() {
        return Err(ContentError::NoLocalCopy);
    }
    FileDigest::from_file(&asset.local_path(uploads_root)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::asset::{Asset, AssetState};

    #[tokio::test]
    async fn digests_checksum_and_size_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let digest = FileDigest::from_file(&path).await.unwrap();
        assert_eq!(digest.checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(digest.size_bytes, 11);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileDigest::from_file(&dir.path().join("absent")).await;
        assert!(matches!(err, Err(ContentError::Io(_))));
    }

    #[tokio::test]
    async fn refuses_to_digest_an_uploaded_asset() {
        let dir = tempfile::tempdir().unwrap();
        let mut asset = Asset::new("a.png");
        asset.state = AssetState::Uploaded;

        let err = digest_for_asset(&asset, dir.path()).await;
        assert!(matches!(err, Err(ContentError::NoLocalCopy)));
    }
}
