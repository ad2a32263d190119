//! Link lifecycle decisions
//!
//! For one resolved title the manager decides whether the stored link is still
//! good, fetches a replacement when it is not, and remembers titles without a
//! trailer. The whole read-decide-write sequence runs under the store's
//! per-title lock, so duplicate folders of a title never fetch twice.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::catalog::{CatalogError, TrailerCatalog, select_trailer};
pub use super::clock::{Clock, SystemClock};
use super::identifier::ResolvedTitle;
use super::link_store::{LinkRecord, LinkStore};

/// Why a title needs no reference write this time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Marked as having no trailer
    Ignored,
    /// Stored link is valid past the safety margin
    Fresh { url: String, remaining: Duration },
    /// Catalog has nothing for the title; it is now ignored
    NoTrailer,
    /// Catalog unreachable and no usable stored link
    TransientError,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Ignored => f.write_str("ignored"),
            SkipReason::Fresh { .. } => f.write_str("fresh"),
            SkipReason::NoTrailer => f.write_str("no-trailer"),
            SkipReason::TransientError => f.write_str("transient-error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Skip(SkipReason),
    /// Point the reference file at `url`, starting playback at `start_offset` seconds
    Write { url: String, start_offset: u32 },
}

/// Result of one refresh decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub action: Action,
    /// The catalog failed transiently; the caller should try again later
    pub retry: bool,
}

impl RefreshOutcome {
    fn done(action: Action) -> Self {
        Self {
            action,
            retry: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Links expiring within this margin are treated as stale
    pub safety_margin: Duration,
    /// Playback start offset embedded in written references, in seconds
    pub start_offset: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::minutes(5),
            start_offset: 8,
        }
    }
}

pub struct LinkLifecycleManager {
    store: Arc<LinkStore>,
    catalog: Arc<dyn TrailerCatalog>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl LinkLifecycleManager {
    pub fn new(
        store: Arc<LinkStore>,
        catalog: Arc<dyn TrailerCatalog>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &LinkStore {
        &self.store
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Decide what to do for `title`. Errors only come from persisting state.
    pub async fn refresh(&self, title: &ResolvedTitle) -> Result<RefreshOutcome> {
        let _guard = self.store.lock_title(title).await;
        let now = self.clock.now();
        let existing = self.store.get(title);

        if let Some(record) = &existing {
            if record.unavailable {
                info!(title = %title, "Title has no trailer, skipping");
                return Ok(RefreshOutcome::done(Action::Skip(SkipReason::Ignored)));
            }

            if record.is_fresh(now, self.config.safety_margin)
                && let (Some(url), Some(remaining)) = (&record.url, record.remaining(now))
            {
                info!(
                    title = %title,
                    remaining_mins = remaining.num_minutes(),
                    "Trailer link still valid"
                );
                return Ok(RefreshOutcome::done(Action::Skip(SkipReason::Fresh {
                    url: url.clone(),
                    remaining,
                })));
            }
        }

        info!(title = %title, "Refreshing trailer link");
        let candidates = match self.catalog.fetch_candidates(title).await {
            Ok(candidates) => candidates,
            Err(CatalogError::NotFound(_)) => {
                return self.mark_no_trailer(title, now, "title not in catalog").await;
            }
            Err(e @ CatalogError::Transient(_)) => {
                return Ok(self.serve_stale(title, existing.as_ref(), now, &e));
            }
        };

        let Some(selected) = select_trailer(&candidates) else {
            return self.mark_no_trailer(title, now, "catalog lists no videos").await;
        };

        if selected.expires_at.is_none() {
            warn!(
                title = %title,
                "Trailer URL carries no expiry, it will be refreshed next pass"
            );
        }

        self.store
            .put(
                title,
                LinkRecord::available(selected.url.clone(), selected.expires_at, now),
            )
            .await?;

        info!(
            title = %title,
            kind = ?selected.kind,
            expires_at = ?selected.expires_at,
            "Stored new trailer link"
        );

        Ok(RefreshOutcome::done(Action::Write {
            url: selected.url.clone(),
            start_offset: self.config.start_offset,
        }))
    }

    async fn mark_no_trailer(
        &self,
        title: &ResolvedTitle,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<RefreshOutcome> {
        self.store.mark_unavailable(title, now).await?;
        info!(title = %title, reason = %reason, "No trailer available, title ignored");
        Ok(RefreshOutcome::done(Action::Skip(SkipReason::NoTrailer)))
    }

    /// Keep the stored record untouched and hand out its link while it works
    fn serve_stale(
        &self,
        title: &ResolvedTitle,
        existing: Option<&LinkRecord>,
        now: DateTime<Utc>,
        error: &CatalogError,
    ) -> RefreshOutcome {
        // A link without a known expiry is served until a fetch replaces it
        let usable = existing
            .filter(|r| !r.unavailable && !r.is_expired(now))
            .and_then(|r| r.url.clone());

        let action = match usable {
            Some(url) => {
                warn!(title = %title, error = %error, "Catalog unavailable, serving stale link");
                Action::Write {
                    url,
                    start_offset: self.config.start_offset,
                }
            }
            None => {
                warn!(title = %title, error = %error, "Catalog unavailable, no link to serve");
                Action::Skip(SkipReason::TransientError)
            }
        };

        RefreshOutcome {
            action,
            retry: true,
        }
    }
}
