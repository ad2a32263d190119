//! Identifier resolution onto the primary (IMDb) namespace

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{ResolutionCache, SharedResolutionCache};
use super::identifier::{IdNamespace, ResolvedTitle, TitleIdentifier};
use super::rate_limiter::Retryable;

#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// Upstream has no mapping; retrying will not help
    #[error("no IMDb mapping: {0}")]
    NotFound(String),
    /// Network failure or rate limiting
    #[error("resolution failed: {0}")]
    Transient(String),
}

impl ResolutionError {
    /// Classify a failed response body read. A body that arrived but does not
    /// match the expected shape will not parse on the next attempt either.
    pub(crate) fn from_body(what: &str, e: reqwest::Error) -> Self {
        if e.is_decode() {
            warn!(error = %e, "Unexpected {} response", what);
            ResolutionError::NotFound(format!("unexpected {} response: {}", what, e))
        } else {
            ResolutionError::Transient(format!("failed to read {} response: {}", what, e))
        }
    }
}

impl Retryable for ResolutionError {
    fn is_transient(&self) -> bool {
        matches!(self, ResolutionError::Transient(_))
    }
}

/// Maps an identifier from one secondary namespace onto an IMDb title id
#[async_trait]
pub trait ExternalIdLookup: Send + Sync {
    fn namespace(&self) -> IdNamespace;

    async fn lookup(&self, id: &str) -> Result<ResolvedTitle, ResolutionError>;
}

/// Resolves identifiers, caching lookups for the lifetime of the resolver's cache
pub struct IdentifierResolver {
    lookups: HashMap<IdNamespace, Arc<dyn ExternalIdLookup>>,
    cache: SharedResolutionCache,
}

impl IdentifierResolver {
    pub fn new(cache: SharedResolutionCache) -> Self {
        Self {
            lookups: HashMap::new(),
            cache,
        }
    }

    /// Register the lookup for a secondary namespace
    pub fn with_lookup(mut self, lookup: Arc<dyn ExternalIdLookup>) -> Self {
        self.lookups.insert(lookup.namespace(), lookup);
        self
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub async fn resolve(&self, id: &TitleIdentifier) -> Result<ResolvedTitle, ResolutionError> {
        if id.namespace().is_primary() {
            return ResolvedTitle::parse(id.value())
                .ok_or_else(|| ResolutionError::NotFound(format!("{} is not an IMDb title id", id)));
        }

        let lookup = self.lookups.get(&id.namespace()).ok_or_else(|| {
            ResolutionError::NotFound(format!("no resolver configured for {}", id.namespace()))
        })?;

        let slot = self.cache.slot(id);
        let resolution = slot
            .get_or_try_init(|| async {
                match lookup.lookup(id.value()).await {
                    Ok(title) => {
                        info!(id = %id, title = %title, "Resolved identifier");
                        Ok(Some(title))
                    }
                    Err(ResolutionError::NotFound(reason)) => {
                        info!(id = %id, reason = %reason, "Identifier has no IMDb mapping");
                        Ok(None)
                    }
                    // Transient failures leave the slot empty for the next attempt
                    Err(e) => Err(e),
                }
            })
            .await?;

        debug!(id = %id, resolved = ?resolution, "Resolution served");
        resolution
            .clone()
            .ok_or_else(|| ResolutionError::NotFound(format!("{} has no IMDb mapping", id)))
    }
}
