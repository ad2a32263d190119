//! Per-run cache of identifier resolutions
//!
//! Entries never expire: the cache lives for one process run and is dropped
//! with it. Each identifier owns a once-cell so concurrent workers asking for
//! the same identifier share a single upstream lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OnceCell;

use super::identifier::{ResolvedTitle, TitleIdentifier};

/// Cached outcome of a lookup. `None` records that upstream has no mapping.
pub type CachedResolution = Option<ResolvedTitle>;

type Slot = Arc<OnceCell<CachedResolution>>;

/// Resolution cache keyed by the raw identifier
#[derive(Default)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<TitleIdentifier, Slot>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the slot for an identifier, creating an empty one if needed
    pub(crate) fn slot(&self, id: &TitleIdentifier) -> Slot {
        if let Some(slot) = self.entries.read().get(id) {
            return slot.clone();
        }
        self.entries
            .write()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Get a settled resolution, if one exists
    pub fn get(&self, id: &TitleIdentifier) -> Option<CachedResolution> {
        self.entries
            .read()
            .get(id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of settled resolutions
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared cache instance type
pub type SharedResolutionCache = Arc<ResolutionCache>;
