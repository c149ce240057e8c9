//! Artifact persistence collaborator.
//!
//! Workflows hand screenshots, captured markup, and extracted records to an
//! [`ArtifactSink`]; the engine never touches the filesystem directly. Files
//! are keyed by a label plus timestamp so consecutive runs never clobber each
//! other.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::fs;

use crate::extract::ExtractedRecord;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to write artifact {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode record artifact")]
    Encode(#[from] serde_json::Error),
}

/// Durable storage for run artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save_screenshot(&self, label: &str, bytes: &[u8]) -> Result<(), ArtifactError>;

    async fn save_markup(&self, label: &str, html: &str) -> Result<(), ArtifactError>;

    async fn save_record(&self, label: &str, record: &ExtractedRecord)
    -> Result<(), ArtifactError>;
}

/// Filesystem sink writing `{label}_{timestamp}.{ext}` under one directory.
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stamped(&self, label: &str, extension: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.dir.join(format!("{label}_{stamp}.{extension}"))
    }

    async fn write(&self, path: PathBuf, bytes: &[u8]) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| {
                ArtifactError::Io {
                    path: parent.to_path_buf(),
                    source,
                }
            })?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|source| ArtifactError::Io { path, source })
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn save_screenshot(&self, label: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.write(self.stamped(label, "png"), bytes).await
    }

    async fn save_markup(&self, label: &str, html: &str) -> Result<(), ArtifactError> {
        // Wrap the fragment so the saved file opens with the right charset.
        let document = format!(
            "<!DOCTYPE html>\n<html lang=\"ja\">\n<head>\n<meta charset=\"UTF-8\">\n\
             <title>{label}</title>\n</head>\n<body>\n{html}\n</body>\n</html>\n"
        );
        self.write(self.stamped(label, "html"), document.as_bytes())
            .await
    }

    async fn save_record(
        &self,
        label: &str,
        record: &ExtractedRecord,
    ) -> Result<(), ArtifactError> {
        let encoded = serde_json::to_vec_pretty(record)?;
        self.write(self.stamped(label, "json"), &encoded).await
    }
}

/// Sink that drops everything; the default when no artifact directory is
/// configured.
pub struct NullArtifactSink;

#[async_trait]
impl ArtifactSink for NullArtifactSink {
    async fn save_screenshot(&self, _label: &str, _bytes: &[u8]) -> Result<(), ArtifactError> {
        Ok(())
    }

    async fn save_markup(&self, _label: &str, _html: &str) -> Result<(), ArtifactError> {
        Ok(())
    }

    async fn save_record(
        &self,
        _label: &str,
        _record: &ExtractedRecord,
    ) -> Result<(), ArtifactError> {
        Ok(())
    }
}
