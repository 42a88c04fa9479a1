//! Upload staging storage
//!
//! Each upload is written to its own directory under the storage root:
//!
//! ```text
//! <storage_root>/<request-uuid>/<sanitized-file-name>
//! ```
//!
//! The per-request directory keeps concurrent uploads that share a file name
//! apart, and sanitizing the caller-supplied name keeps writes inside that
//! directory. The engine still sees the original base name (and extension).

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartError};
use malviz_common::config::RetentionPolicy;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Substitute for caller-supplied names that carry no usable file name
pub const FALLBACK_FILE_NAME: &str = "upload";

/// Longest staged file name kept, in characters
const MAX_FILE_NAME_CHARS: usize = 200;

/// Staging errors
#[derive(Debug, Error)]
pub enum StagingError {
    /// Creating, writing, or flushing the staged file failed
    #[error("Failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload stream broke off or exceeded the body limit
    #[error("Failed to read upload: {0}")]
    Upload(#[from] MultipartError),
}

/// Incremental source of upload bytes
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, or `None` once the upload is complete
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, MultipartError>;
}

#[async_trait]
impl<'a> ChunkSource for Field<'a> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        self.chunk().await
    }
}

/// A fully written upload, ready for the engine
///
/// Under [`RetentionPolicy::Delete`] the request directory is removed when
/// the value is dropped without going through [`StagingArea::release`],
/// e.g. when the client disconnects while the engine is still running.
#[derive(Debug)]
pub struct StagedFile {
    /// Absolute or root-relative path handed to the engine
    pub path: PathBuf,
    /// File name as supplied by the caller
    pub original_name: String,
    /// Bytes written
    pub size_bytes: u64,
    request_dir: PathBuf,
    remove_on_drop: bool,
}

impl StagedFile {
    /// Per-request directory holding the staged file
    pub fn request_dir(&self) -> &Path {
        &self.request_dir
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }

        match std::fs::remove_dir_all(&self.request_dir) {
            Ok(()) => debug!(
                request_dir = %self.request_dir.display(),
                "Abandoned staged upload removed"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                request_dir = %self.request_dir.display(),
                error = %e,
                "Failed to remove abandoned staged upload"
            ),
        }
    }
}

/// Staging directory for uploads awaiting analysis
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    retention: RetentionPolicy,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, retention: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Stream an upload to disk
    ///
    /// The file is flushed and synced before this returns, so the engine
    /// never sees a partially written file. On failure the request
    /// directory is removed.
    pub async fn stage<S>(
        &self,
        original_name: &str,
        source: &mut S,
    ) -> Result<StagedFile, StagingError>
    where
        S: ChunkSource + ?Sized,
    {
        let request_dir = self.root.join(Uuid::new_v4().to_string());
        let path = request_dir.join(sanitize_file_name(original_name));

        fs::create_dir_all(&request_dir)
            .await
            .map_err(|source| StagingError::Write {
                path: request_dir.clone(),
                source,
            })?;

        match write_chunks(&path, source).await {
            Ok(size_bytes) => {
                debug!(
                    original_name,
                    staged_path = %path.display(),
                    size_bytes,
                    "Upload staged"
                );
                Ok(StagedFile {
                    path,
                    original_name: original_name.to_string(),
                    size_bytes,
                    request_dir,
                    remove_on_drop: self.retention == RetentionPolicy::Delete,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&request_dir).await {
                    warn!(
                        request_dir = %request_dir.display(),
                        error = %cleanup,
                        "Failed to remove partial upload"
                    );
                }
                Err(e)
            }
        }
    }

    /// Apply the retention policy once the engine has finished with a file
    pub async fn release(&self, mut staged: StagedFile) {
        if !staged.remove_on_drop {
            return;
        }
        staged.remove_on_drop = false;

        match fs::remove_dir_all(&staged.request_dir).await {
            Ok(()) => debug!(request_dir = %staged.request_dir.display(), "Staged upload removed"),
            Err(e) => warn!(
                request_dir = %staged.request_dir.display(),
                error = %e,
                "Failed to remove staged upload"
            ),
        }
    }
}

async fn write_chunks<S>(path: &Path, source: &mut S) -> Result<u64, StagingError>
where
    S: ChunkSource + ?Sized,
{
    let write_err = |source: std::io::Error| StagingError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(path).await.map_err(write_err)?;
    let mut written = 0u64;

    while let Some(chunk) = source.next_chunk().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;

    Ok(written)
}

/// Reduce a caller-supplied name to a single safe path component
///
/// Directory parts (either separator style) are dropped, control characters
/// removed, and names that would resolve outside the request directory
/// (`""`, `"."`, `".."`) replaced with [`FALLBACK_FILE_NAME`].
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        other => other.to_string(),
    }
}
