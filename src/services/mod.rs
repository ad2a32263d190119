//! Title resolution, trailer lookup, link state, and reference file services

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod file_utils;
pub mod identifier;
pub mod imdb;
pub mod lifecycle;
pub mod link_store;
pub mod logging;
pub mod rate_limiter;
pub mod reference;
pub mod resolver;
pub mod scanner;
#[cfg(test)]
pub(crate) mod test_server;
pub mod tmdb;
pub mod tvdb;

pub use cache::{ResolutionCache, SharedResolutionCache};
pub use catalog::{CatalogError, TrailerCatalog, VideoCandidate, VideoKind};
pub use identifier::{IdNamespace, ResolvedTitle, TitleIdentifier};
pub use imdb::ImdbCatalog;
pub use clock::{Clock, SystemClock};
pub use lifecycle::{Action, LifecycleConfig, LinkLifecycleManager, RefreshOutcome, SkipReason};
pub use link_store::{IgnoreList, LinkRecord, LinkStore};
pub use logging::{LogFormat, init_tracing};
pub use rate_limiter::{RateLimitedClient, RetryConfig, Retryable, retry_async};
pub use reference::{ReferenceWriter, WriteStatus};
pub use resolver::{ExternalIdLookup, IdentifierResolver, ResolutionError};
pub use scanner::{ScanUnit, scan};
pub use tmdb::TmdbClient;
pub use tvdb::TvdbClient;
