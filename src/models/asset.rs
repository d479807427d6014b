//! The asset record: one uploaded file and everything about its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Required prefix for legacy URL paths carried over from the old uploads
/// hierarchy.
pub const LEGACY_URL_PREFIX: &str = "/government/uploads";

/// Where an asset sits in the scan/upload pipeline.
///
/// Stored as lowercase TEXT. `Infected` is a sink; nothing reaches
/// `Uploaded` without passing through `Clean`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Unscanned,
    Clean,
    Infected,
    Uploaded,
}

/// Events that may move an asset between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    ScannedClean,
    ScannedInfected,
    UploadSuccess,
}

impl AssetState {
    /// The transition table. Returns `None` for any pair the lifecycle does
    /// not permit; callers treat that as a no-op, never an error.
    pub fn next(self, event: LifecycleEvent) -> Option<AssetState> {
        match (self, event) {
            (AssetState::Unscanned, LifecycleEvent::ScannedClean) => Some(AssetState::Clean),
            (AssetState::Unscanned, LifecycleEvent::ScannedInfected) => Some(AssetState::Infected),
            (AssetState::Clean, LifecycleEvent::UploadSuccess) => Some(AssetState::Uploaded),
            _ => None,
        }
    }
}

/// Validation failures reported at mutation time. The record is left
/// unmodified when any of these fire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetValidationError {
    #[error("cannot set an asset back to draft once it has a replacement or redirect")]
    DraftAfterSupersession,
    #[error("`{field}` is not an absolute http(s) URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("legacy url path `{0}` must start with /government/uploads")]
    InvalidLegacyPath(String),
    #[error("an asset must carry at least one filename")]
    MissingFilename,
}

/// A single uploaded file tracked from intake through scanning to cloud
/// storage.
///
/// `id` is the stable public identifier (it appears in `/media/{id}/{name}`
/// paths); `uuid` is an independent RFC4122 identifier used as the remote
/// object key. Neither ever changes. A legacy asset is the same row with
/// `legacy_url_path` populated.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Asset {
    /// Stable public identifier, assigned at creation.
    pub id: Uuid,

    /// Secondary identifier used as the cloud-storage object key.
    pub uuid: Uuid,

    /// Position in the scan/upload lifecycle.
    pub state: AssetState,

    /// Every filename ever attached, oldest first. The current filename is
    /// the last entry; older entries keep superseded links working.
    pub filename_history: Json<Vec<String>>,

    /// MD5 hex digest of the file contents, captured at attach time.
    pub checksum: Option<String>,

    /// Source file mtime, captured at attach time.
    pub last_modified_at_source: Option<DateTime<Utc>>,

    /// File size in bytes, captured at attach time.
    pub size_bytes: Option<i64>,

    /// Draft assets are invisible to the public read path.
    pub draft: bool,

    /// Principals allowed to view this asset while it is draft. Empty means
    /// unrestricted (subject to `draft`).
    pub access_limited: Json<Vec<String>>,

    /// Subjects accepted via a signed bypass token, independent of the
    /// principal allow-list.
    pub auth_bypass_ids: Json<Vec<String>>,

    /// Asset that supersedes this one, if any.
    pub replacement_id: Option<Uuid>,

    /// External redirect target, if any.
    pub redirect_url: Option<String>,

    /// Document this asset belongs to. Absolute http(s) URL when present.
    pub parent_document_url: Option<String>,

    /// Historical uploads path for legacy assets (`/government/uploads/...`).
    pub legacy_url_path: Option<String>,

    /// Checksum supplied by the legacy system; preferred over `checksum`
    /// when present.
    pub legacy_etag: Option<String>,

    /// Last-modified supplied by the legacy system; preferred over
    /// `last_modified_at_source` when present.
    pub legacy_last_modified: Option<DateTime<Utc>>,

    /// Soft-delete marker. Set means deleted; rows are never dropped in
    /// normal operation.
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Create a fresh asset in `unscanned` state with `filename` as its
    /// first attached name.
    pub fn new(filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            uuid: Uuid::new_v4(),
            state: AssetState::Unscanned,
            filename_history: Json(vec![filename.into()]),
            checksum: None,
            last_modified_at_source: None,
            size_bytes: None,
            draft: false,
            access_limited: Json(Vec::new()),
            auth_bypass_ids: Json(Vec::new()),
            replacement_id: None,
            redirect_url: None,
            parent_document_url: None,
            legacy_url_path: None,
            legacy_etag: None,
            legacy_last_modified: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a legacy asset addressed by its historical uploads path.
    pub fn new_legacy(legacy_url_path: impl Into<String>, filename: impl Into<String>) -> Self {
        let mut asset = Self::new(filename);
        asset.legacy_url_path = Some(legacy_url_path.into());
        asset
    }

    /// The current filename (last entry of the history).
    pub fn filename(&self) -> &str {
        self.filename_history
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// True if `name` is the current filename or any prior one.
    pub fn has_ever_been_named(&self, name: &str) -> bool {
        self.filename_history.iter().any(|f| f == name)
    }

    /// Record a newly attached file: append the name to the history (when it
    /// changed) and send the asset back through the scan pipeline. Content
    /// metadata must be refreshed separately by the caller.
    pub fn attach_file(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        if self.filename() != filename {
            self.filename_history.push(filename);
        }
        self.checksum = None;
        self.last_modified_at_source = None;
        self.size_bytes = None;
        self.state = AssetState::Unscanned;
    }

    /// Checksum to trust: the legacy-supplied value wins over the computed
    /// one.
    pub fn effective_checksum(&self) -> Option<&str> {
        self.legacy_etag.as_deref().or(self.checksum.as_deref())
    }

    /// Last-modified to trust: the legacy-supplied value wins over the
    /// computed one.
    pub fn effective_last_modified(&self) -> Option<DateTime<Utc>> {
        self.legacy_last_modified.or(self.last_modified_at_source)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy_url_path.is_some()
    }

    /// True while the asset still owns a local copy of its bytes.
    pub fn has_local_copy(&self) -> bool {
        self.state != AssetState::Uploaded
    }

    /// Canonical public path for this asset.
    pub fn public_url_path(&self) -> String {
        format!("/media/{}/{}", self.id, self.filename())
    }

    /// Where the not-yet-uploaded bytes live beneath the intake root.
    pub fn local_path(&self, uploads_root: &std::path::Path) -> PathBuf {
        uploads_root.join(self.id.to_string()).join(self.filename())
    }

    /// Field-level validation. `previous` is the persisted row for updates,
    /// `None` on create. Cross-record rules (replacement existence, legacy
    /// path uniqueness) live in the repository where they can query.
    pub fn validate(&self, previous: Option<&Asset>) -> Result<(), AssetValidationError> {
        if self.filename_history.is_empty() {
            return Err(AssetValidationError::MissingFilename);
        }

        // An asset that has been superseded cannot be un-published back to
        // draft.
        let becoming_draft = self.draft && previous.is_some_and(|prev| !prev.draft);
        if becoming_draft && (self.replacement_id.is_some() || self.redirect_url.is_some()) {
            return Err(AssetValidationError::DraftAfterSupersession);
        }

        if let Some(parent) = &self.parent_document_url {
            ensure_http_url("parent_document_url", parent)?;
        }
        if let Some(redirect) = &self.redirect_url {
            ensure_http_url("redirect_url", redirect)?;
        }

        if let Some(path) = &self.legacy_url_path {
            if !path.starts_with(LEGACY_URL_PREFIX) {
                return Err(AssetValidationError::InvalidLegacyPath(path.clone()));
            }
        }

        Ok(())
    }
}

fn ensure_http_url(field: &'static str, value: &str) -> Result<(), AssetValidationError> {
    let parsed = Url::parse(value).map_err(|_| AssetValidationError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AssetValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
