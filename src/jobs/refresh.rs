//! One refresh pass over the discovered title folders
//!
//! Units are resolved to IMDb ids, grouped so every title is refreshed once,
//! and the resulting decision is applied to each folder of the title. Both
//! stages run on a bounded pool of `workers` concurrent tasks.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::identifier::ResolvedTitle;
use crate::services::lifecycle::{Action, LinkLifecycleManager, RefreshOutcome, SkipReason};
use crate::services::rate_limiter::{RetryConfig, Retryable, retry_async};
use crate::services::reference::{ReferenceWriter, WriteStatus};
use crate::services::resolver::{IdentifierResolver, ResolutionError};
use crate::services::scanner::ScanUnit;

/// Counters reported at the end of a pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    /// Title folders discovered
    pub units: usize,
    /// Distinct resolved titles
    pub titles: usize,
    /// Folders without an IMDb mapping
    pub unresolved: usize,
    /// Reference files created or changed
    pub written: usize,
    /// Reference files already current
    pub unchanged: usize,
    pub fresh: usize,
    pub ignored: usize,
    pub no_trailer: usize,
    /// Titles or folders left for the next pass after transient failures
    pub deferred: usize,
    /// Folders that failed for non-transient reasons (I/O, state persistence)
    pub failed: usize,
    /// Units not started because of shutdown
    pub cancelled: usize,
}

impl AddAssign for PassSummary {
    fn add_assign(&mut self, other: Self) {
        self.units += other.units;
        self.titles += other.titles;
        self.unresolved += other.unresolved;
        self.written += other.written;
        self.unchanged += other.unchanged;
        self.fresh += other.fresh;
        self.ignored += other.ignored;
        self.no_trailer += other.no_trailer;
        self.deferred += other.deferred;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// Failure of a single refresh attempt, as seen by the retry loop
enum AttemptError {
    /// Catalog failed transiently; carries the decision made without it
    Retry(RefreshOutcome),
    Store(anyhow::Error),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Retry(outcome) => write!(f, "catalog unavailable ({:?})", outcome.action),
            AttemptError::Store(e) => write!(f, "{:#}", e),
        }
    }
}

impl Retryable for AttemptError {
    fn is_transient(&self) -> bool {
        matches!(self, AttemptError::Retry(_))
    }
}

/// Runs passes: resolve, dedupe, refresh, write
pub struct TrailerRefresher {
    resolver: Arc<IdentifierResolver>,
    manager: Arc<LinkLifecycleManager>,
    writer: ReferenceWriter,
    workers: usize,
    retry: RetryConfig,
}

impl TrailerRefresher {
    pub fn new(
        resolver: Arc<IdentifierResolver>,
        manager: Arc<LinkLifecycleManager>,
        writer: ReferenceWriter,
        workers: usize,
    ) -> Self {
        Self {
            resolver,
            manager,
            writer,
            workers: workers.max(1),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run_pass(&self, units: Vec<ScanUnit>, cancel: &CancellationToken) -> PassSummary {
        let mut summary = PassSummary {
            units: units.len(),
            ..Default::default()
        };

        // Hand edits to the ignore list take effect from this pass on
        self.manager.store().reload_ignore_list();

        let resolved: Vec<Option<(ScanUnit, Result<ResolvedTitle, ResolutionError>)>> =
            stream::iter(units)
                .map(|unit| async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let result = retry_async(
                        || self.resolver.resolve(&unit.id),
                        &self.retry,
                        "resolve_identifier",
                    )
                    .await;
                    Some((unit, result))
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        let mut groups: BTreeMap<ResolvedTitle, Vec<PathBuf>> = BTreeMap::new();
        for entry in resolved {
            let Some((unit, result)) = entry else {
                summary.cancelled += 1;
                continue;
            };
            match result {
                Ok(title) => groups.entry(title).or_default().push(unit.dir),
                Err(e @ ResolutionError::NotFound(_)) => {
                    info!(dir = %unit.dir.display(), id = %unit.id, reason = %e, "Skipping unresolvable folder");
                    summary.unresolved += 1;
                }
                Err(e @ ResolutionError::Transient(_)) => {
                    warn!(dir = %unit.dir.display(), id = %unit.id, error = %e, "Resolution deferred to next pass");
                    summary.deferred += 1;
                }
            }
        }

        summary.titles = groups.len();
        debug!(titles = summary.titles, "Grouped folders by title");

        let reports: Vec<PassSummary> = stream::iter(groups)
            .map(|(title, dirs)| async move {
                if cancel.is_cancelled() {
                    return PassSummary {
                        cancelled: dirs.len(),
                        ..Default::default()
                    };
                }
                self.process_title(&title, &dirs).await
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for report in reports {
            summary += report;
        }

        info!(
            units = summary.units,
            titles = summary.titles,
            written = summary.written,
            unchanged = summary.unchanged,
            fresh = summary.fresh,
            ignored = summary.ignored,
            no_trailer = summary.no_trailer,
            unresolved = summary.unresolved,
            deferred = summary.deferred,
            failed = summary.failed,
            cancelled = summary.cancelled,
            stored_links = self.manager.store().len(),
            cached_ids = self.resolver.cache().len(),
            "Pass complete"
        );

        summary
    }

    async fn process_title(&self, title: &ResolvedTitle, dirs: &[PathBuf]) -> PassSummary {
        let mut report = PassSummary::default();

        let attempt = retry_async(
            || async {
                match self.manager.refresh(title).await {
                    Ok(outcome) if outcome.retry => Err(AttemptError::Retry(outcome)),
                    Ok(outcome) => Ok(outcome),
                    Err(e) => Err(AttemptError::Store(e)),
                }
            },
            &self.retry,
            "refresh_title",
        )
        .await;

        let action = match attempt {
            Ok(outcome) => outcome.action,
            Err(AttemptError::Retry(outcome)) => {
                warn!(title = %title, "Catalog still unavailable, title deferred to next pass");
                report.deferred += 1;
                outcome.action
            }
            Err(AttemptError::Store(e)) => {
                error!(title = %title, error = %format!("{:#}", e), "Failed to record link state");
                report.failed += dirs.len();
                return report;
            }
        };

        let (url, start_offset) = match action {
            Action::Write { url, start_offset } => (url, start_offset),
            Action::Skip(SkipReason::Fresh { url, .. }) => {
                report.fresh += 1;
                (url, self.manager.config().start_offset)
            }
            Action::Skip(SkipReason::Ignored) => {
                report.ignored += 1;
                return report;
            }
            Action::Skip(SkipReason::NoTrailer) => {
                report.no_trailer += 1;
                return report;
            }
            Action::Skip(SkipReason::TransientError) => return report,
        };

        for dir in dirs {
            match self.writer.write(dir, &url, start_offset).await {
                Ok(WriteStatus::Unchanged) => report.unchanged += 1,
                Ok(status) => {
                    info!(title = %title, dir = %dir.display(), status = ?status, "Trailer reference updated");
                    report.written += 1;
                }
                Err(e) => {
                    error!(title = %title, dir = %dir.display(), error = %format!("{:#}", e), "Failed to write trailer reference");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::ResolutionCache;
    use crate::services::catalog::{VideoCandidate, VideoKind};
    use crate::services::identifier::{IdNamespace, TitleIdentifier};
    use crate::services::lifecycle::LifecycleConfig;
    use crate::services::lifecycle::testing::{FakeCatalog, ManualClock, Scripted};
    use crate::services::link_store::LinkStore;
    use crate::services::resolver::ExternalIdLookup;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TmdbFake {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExternalIdLookup for TmdbFake {
        fn namespace(&self) -> IdNamespace {
            IdNamespace::Tmdb
        }

        async fn lookup(&self, id: &str) -> Result<ResolvedTitle, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match id {
                "603" => Ok(ResolvedTitle::parse("tt0133093").unwrap()),
                "500" => Err(ResolutionError::Transient("503".into())),
                _ => Err(ResolutionError::NotFound(id.to_string())),
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        catalog: Arc<FakeCatalog>,
        tmdb: Arc<TmdbFake>,
        refresher: TrailerRefresher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LinkStore::open(&dir.path().join("state")).unwrap());
        let catalog = Arc::new(FakeCatalog::default());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let manager = Arc::new(LinkLifecycleManager::new(
            store,
            catalog.clone(),
            clock,
            LifecycleConfig {
                safety_margin: Duration::minutes(5),
                start_offset: 10,
            },
        ));
        let tmdb = Arc::new(TmdbFake {
            calls: AtomicUsize::new(0),
        });
        let resolver = Arc::new(
            IdentifierResolver::new(Arc::new(ResolutionCache::new())).with_lookup(tmdb.clone()),
        );
        let refresher = TrailerRefresher::new(resolver, manager, ReferenceWriter::new("trailer.strm"), 4)
            .with_retry(RetryConfig::immediate(3));
        Fixture {
            dir,
            catalog,
            tmdb,
            refresher,
        }
    }

    fn unit(fixture: &Fixture, folder: &str, id: TitleIdentifier) -> ScanUnit {
        let dir = fixture.dir.path().join("library").join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        ScanUnit { dir, id }
    }

    fn trailer_url() -> String {
        "https://imdb-video.example/vi1.mp4?Expires=1700003600".to_string()
    }

    #[tokio::test]
    async fn test_shared_title_fetched_once_and_written_everywhere() {
        let f = fixture();
        let matrix = ResolvedTitle::parse("tt0133093").unwrap();
        f.catalog.answer(
            &matrix,
            Scripted::Candidates(vec![VideoCandidate::new(VideoKind::Trailer, trailer_url())]),
        );

        let units = vec![
            unit(&f, "Movies/The Matrix {imdb-tt0133093}", TitleIdentifier::imdb("tt0133093")),
            unit(&f, "Movies 4K/The Matrix {tmdb-603}", TitleIdentifier::tmdb("603")),
            unit(&f, "Extras/The Matrix {tmdb-603}", TitleIdentifier::tmdb("603")),
        ];
        let dirs: Vec<PathBuf> = units.iter().map(|u| u.dir.clone()).collect();

        let summary = f.refresher.run_pass(units, &CancellationToken::new()).await;

        assert_eq!(f.catalog.calls(), 1);
        assert_eq!(f.tmdb.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.titles, 1);
        assert_eq!(summary.written, 3);
        for dir in dirs {
            assert_eq!(
                std::fs::read_to_string(dir.join("backdrops/trailer.strm")).unwrap(),
                format!("{}#t=10", trailer_url())
            );
        }
    }

    #[tokio::test]
    async fn test_fresh_title_repairs_new_folder() {
        let f = fixture();
        let matrix = ResolvedTitle::parse("tt0133093").unwrap();
        f.catalog.answer(
            &matrix,
            Scripted::Candidates(vec![VideoCandidate::new(VideoKind::Trailer, trailer_url())]),
        );

        let first = unit(&f, "Movies/The Matrix {imdb-tt0133093}", TitleIdentifier::imdb("tt0133093"));
        f.refresher.run_pass(vec![first.clone()], &CancellationToken::new()).await;

        let second = unit(&f, "Movies 4K/The Matrix {tmdb-603}", TitleIdentifier::tmdb("603"));
        let summary = f
            .refresher
            .run_pass(vec![first, second.clone()], &CancellationToken::new())
            .await;

        assert_eq!(f.catalog.calls(), 1);
        assert_eq!(summary.fresh, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.written, 1);
        assert!(second.dir.join("backdrops/trailer.strm").exists());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let f = fixture();
        let matrix = ResolvedTitle::parse("tt0133093").unwrap();
        f.catalog.answer(
            &matrix,
            Scripted::Candidates(vec![VideoCandidate::new(VideoKind::Trailer, trailer_url())]),
        );
        let flaky = ResolvedTitle::parse("tt0000503").unwrap();
        f.catalog.answer(&flaky, Scripted::Transient);

        let units = vec![
            unit(&f, "A {imdb-tt0133093}", TitleIdentifier::imdb("tt0133093")),
            unit(&f, "B {imdb-tt0000503}", TitleIdentifier::imdb("tt0000503")),
            unit(&f, "C {tmdb-404}", TitleIdentifier::tmdb("404")),
            unit(&f, "D {tmdb-500}", TitleIdentifier::tmdb("500")),
        ];

        let summary = f.refresher.run_pass(units, &CancellationToken::new()).await;

        assert_eq!(summary.written, 1);
        assert_eq!(summary.unresolved, 1);
        // One deferred resolution, one deferred title
        assert_eq!(summary.deferred, 2);
        // Three catalog attempts for the flaky title, one for the good one
        assert_eq!(f.catalog.calls(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_pass_starts_nothing() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let units = vec![unit(&f, "A {imdb-tt0133093}", TitleIdentifier::imdb("tt0133093"))];
        let summary = f.refresher.run_pass(units, &cancel).await;

        assert_eq!(summary.cancelled, 1);
        assert_eq!(f.catalog.calls(), 0);
    }
}
