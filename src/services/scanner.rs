//! Library scanner
//!
//! Walks the scan root and yields one [ScanUnit] per tagged title folder.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::identifier::{self, TitleIdentifier};
use super::reference::BACKDROPS_DIR;

/// A title folder discovered during one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanUnit {
    pub dir: PathBuf,
    pub id: TitleIdentifier,
}

fn is_backdrops(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == BACKDROPS_DIR
}

/// Collect every tagged title folder under `root`, sorted by path
pub fn scan(root: &Path) -> Vec<ScanUnit> {
    let mut units: Vec<ScanUnit> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_backdrops(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| identifier::is_tagged_folder(entry.path()))
        .filter_map(|entry| {
            identifier::extract(entry.path()).map(|id| ScanUnit {
                dir: entry.into_path(),
                id,
            })
        })
        .collect();

    units.sort_by(|a, b| a.dir.cmp(&b.dir));
    info!(root = %root.display(), titles = units.len(), "Library scan complete");
    units
}
