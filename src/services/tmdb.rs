//! TMDB (The Movie Database) external id lookups
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Only the `external_ids` endpoints are used: they map a TMDB movie or TV
//! id onto its IMDb title id. TMDB allows ~40 requests per 10 seconds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::identifier::{IdNamespace, ResolvedTitle};
use super::rate_limiter::{RateLimitedClient, ResponseExt};
use super::resolver::{ExternalIdLookup, ResolutionError};

/// TMDB API client
pub struct TmdbClient {
    client: RateLimitedClient,
    base_url: String,
    api_key: String,
}

/// External ids attached to a TMDB movie or show
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbExternalIds {
    pub id: i64,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
}

/// Which TMDB collection an id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmdbMediaType {
    Movie,
    Tv,
}

impl TmdbMediaType {
    fn path(&self) -> &'static str {
        match self {
            TmdbMediaType::Movie => "movie",
            TmdbMediaType::Tv => "tv",
        }
    }
}

impl TmdbClient {
    /// Create a new TMDB client with the given API key
    pub fn new(api_key: String) -> reqwest::Result<Self> {
        Ok(Self {
            client: RateLimitedClient::for_tmdb()?,
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
        })
    }

    /// Point the client at another API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Check if the client has a valid API key configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Fetch external ids. `Ok(None)` when TMDB has no such id.
    pub async fn get_external_ids(
        &self,
        media_type: TmdbMediaType,
        tmdb_id: &str,
    ) -> Result<Option<TmdbExternalIds>, ResolutionError> {
        let url = format!("{}/{}/{}/external_ids", self.base_url, media_type.path(), tmdb_id);
        debug!(tmdb_id = %tmdb_id, media_type = media_type.path(), "Fetching TMDB external ids");

        let response = self
            .client
            .get_with_query(&url, &[("api_key", self.api_key.as_str())])
            .await
            .map_err(|e| ResolutionError::Transient(e.to_string()))?;

        if response.is_rate_limited() {
            warn!("TMDB rate limit hit, will retry");
        }
        if response.is_transient_error() {
            return Err(ResolutionError::Transient(format!(
                "TMDB external ids failed with status: {}",
                response.status()
            )));
        }

        match response.status().as_u16() {
            404 => return Ok(None),
            401 => {
                return Err(ResolutionError::NotFound(
                    "TMDB API key is invalid".to_string(),
                ));
            }
            _ => {}
        }

        if !response.status().is_success() {
            return Err(ResolutionError::NotFound(format!(
                "TMDB external ids failed with status: {}",
                response.status()
            )));
        }

        let ids: TmdbExternalIds = response
            .json()
            .await
            .map_err(|e| ResolutionError::from_body("TMDB external ids", e))?;

        Ok(Some(ids))
    }
}

#[async_trait]
impl ExternalIdLookup for TmdbClient {
    fn namespace(&self) -> IdNamespace {
        IdNamespace::Tmdb
    }

    async fn lookup(&self, id: &str) -> Result<ResolvedTitle, ResolutionError> {
        if !self.has_api_key() {
            warn!(id = %id, "TMDB API key not configured, cannot resolve");
            return Err(ResolutionError::NotFound(
                "TMDB API key not configured".to_string(),
            ));
        }

        // Folder tags do not say whether the id is a movie or a show
        for media_type in [TmdbMediaType::Movie, TmdbMediaType::Tv] {
            if let Some(ids) = self.get_external_ids(media_type, id).await? {
                return ids
                    .imdb_id
                    .as_deref()
                    .and_then(ResolvedTitle::parse)
                    .ok_or_else(|| {
                        ResolutionError::NotFound(format!("TMDB {} has no IMDb id", id))
                    });
            }
        }

        Err(ResolutionError::NotFound(format!("TMDB id {} not found", id)))
    }
}
