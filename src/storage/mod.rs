//! Artifact storage - where release files live and how they get there.
//!
//! The release store talks to storage only through two traits: [`ArtifactUploader`]
//! for the create flow and [`ObjectStorage`] for removal. [`resumable::StorageClient`]
//! implements both against the hosted storage service; tests substitute in-memory fakes.

/// Resumable (tus) upload client for the hosted storage service
pub mod resumable;

use crate::errors::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Folder inside the bucket that holds release artifacts.
pub const RELEASES_PREFIX: &str = "releases";

/// A local file to be uploaded as a release artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Path of the file on disk
    pub path: PathBuf,
    /// File name recorded on the release (usually the original name)
    pub file_name: String,
    /// MIME type sent to storage
    pub content_type: String,
}

impl UploadRequest {
    /// Builds a request for `path`, using its file name and a generic binary content type.
    ///
    /// # Errors
    /// Returns a validation error if the path has no usable file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| Error::validation(format!("{} has no file name", path.display())))?
            .to_string();

        Ok(Self {
            path,
            file_name,
            content_type: "application/octet-stream".to_string(),
        })
    }

    /// Overrides the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Path of the file on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    /// Stable public URL of the object
    pub public_url: String,
    /// Original file name
    pub file_name: String,
    /// Object key inside the bucket
    pub storage_path: String,
    /// Bytes uploaded
    pub file_size: u64,
}

/// Progress snapshot reported after every acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Cumulative bytes the server has acknowledged
    pub bytes_uploaded: u64,
    /// Size of the whole file
    pub bytes_total: u64,
    /// Time since the first chunk was sent
    pub elapsed: Duration,
}

impl UploadProgress {
    /// Completion as a percentage in `0.0..=100.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.bytes_total as f64 * 100.0).min(100.0)
    }

    /// Observed throughput, or `None` before anything measurable was sent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bytes_per_second(&self) -> Option<f64> {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 || self.bytes_uploaded == 0 {
            return None;
        }
        Some(self.bytes_uploaded as f64 / seconds)
    }

    /// Advisory time left at the observed throughput.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn remaining(&self) -> Option<Duration> {
        let rate = self.bytes_per_second()?;
        let left = self.bytes_total.saturating_sub(self.bytes_uploaded) as f64;
        Duration::try_from_secs_f64(left / rate).ok()
    }
}

/// Uploads release artifacts.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Uploads the file described by `request`, calling `progress` after every chunk.
    ///
    /// Once `cancel` fires the call resolves to [`Error::Cancelled`] and `progress` is
    /// not called again.
    ///
    /// # Errors
    /// Returns `Cancelled`, `Transport` on network/auth failures, `Io` if the file
    /// cannot be read.
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: &mut (dyn FnMut(UploadProgress) + Send),
        cancel: &CancellationToken,
    ) -> Result<UploadedArtifact>;
}

/// Object storage operations the release store needs besides uploading.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Removes the object at `path` inside the release bucket.
    ///
    /// # Errors
    /// Returns `Storage` when the service rejects the removal.
    async fn remove(&self, path: &str) -> Result<()>;
}

/// Replaces every character other than ASCII alphanumerics, `.`, `-` and `_` with `_`.
#[must_use]
pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Object key for a new artifact: `releases/<unix-millis>-<sanitized-file-name>`.
#[must_use]
pub fn object_path(file_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{RELEASES_PREFIX}/{}-{}",
        now.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}
