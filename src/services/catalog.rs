//! Trailer catalog abstraction and trailer selection policy

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::identifier::ResolvedTitle;
use super::rate_limiter::Retryable;

/// Kind of video listed for a title. Declaration order is preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    Trailer,
    Clip,
}

/// One fetchable video for a title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCandidate {
    pub kind: VideoKind,
    pub url: String,
    /// Parsed from the signed URL; `None` when the URL carries no window
    pub expires_at: Option<DateTime<Utc>>,
}

impl VideoCandidate {
    pub fn new(kind: VideoKind, url: impl Into<String>) -> Self {
        let url = url.into();
        let expires_at = link_expiration(&url);
        Self {
            kind,
            url,
            expires_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("title {0} not found in catalog")]
    NotFound(ResolvedTitle),
    #[error("catalog request failed: {0}")]
    Transient(String),
}

impl Retryable for CatalogError {
    fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        CatalogError::Transient(e.to_string())
    }
}

/// Source of playable videos for a title
#[async_trait]
pub trait TrailerCatalog: Send + Sync {
    /// All candidates for a title, in catalog order. An empty list means the
    /// title exists but lists nothing playable.
    async fn fetch_candidates(
        &self,
        title: &ResolvedTitle,
    ) -> Result<Vec<VideoCandidate>, CatalogError>;
}

/// Pick the preferred video: trailers before clips, first listed within a kind
pub fn select_trailer(candidates: &[VideoCandidate]) -> Option<&VideoCandidate> {
    // min_by_key keeps the first of equal keys, so catalog order breaks ties
    candidates.iter().min_by_key(|c| c.kind)
}

/// Read the validity window embedded in a signed URL (`Expires=<unix seconds>`)
pub fn link_expiration(raw: &str) -> Option<DateTime<Utc>> {
    let url = Url::parse(raw).ok()?;
    let expires = url
        .query_pairs()
        .find(|(key, _)| key == "Expires")
        .map(|(_, value)| value.into_owned())?;
    let seconds: i64 = expires.trim().parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}
