//! Playback reference (`.strm`) files
//!
//! Media servers treat `<title>/backdrops/*.strm` as a backdrop video and
//! stream whatever URL the file contains.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::file_utils::write_atomic;

pub const BACKDROPS_DIR: &str = "backdrops";

/// What a write did on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Created,
    Updated,
    Unchanged,
}

/// Writes reference files into title folders
#[derive(Debug, Clone)]
pub struct ReferenceWriter {
    filename: String,
}

impl ReferenceWriter {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }

    /// Where the reference for a title folder lives
    pub fn path_for(&self, title_dir: &Path) -> PathBuf {
        title_dir.join(BACKDROPS_DIR).join(&self.filename)
    }

    /// Write `url` for `title_dir`, touching the file only if its content changes
    pub async fn write(&self, title_dir: &Path, url: &str, start_offset: u32) -> Result<WriteStatus> {
        let path = self.path_for(title_dir);
        let content = reference_content(url, start_offset);

        let status = match tokio::fs::read_to_string(&path).await {
            Ok(existing) if existing.trim() == content => {
                debug!(path = %path.display(), "Reference file already current");
                return Ok(WriteStatus::Unchanged);
            }
            Ok(_) => WriteStatus::Updated,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WriteStatus::Created,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        write_atomic(&path, &content).await?;

        info!(path = %path.display(), status = ?status, "Reference file written");
        Ok(status)
    }
}

/// File content: the URL with a media fragment for the start offset
pub fn reference_content(url: &str, start_offset: u32) -> String {
    if start_offset == 0 {
        url.to_string()
    } else {
        format!("{}#t={}", url, start_offset)
    }
}
