//! TheTVDB v4 API client for IMDb id lookups
//!
//! Base URL: https://api4.thetvdb.com/v4
//!
//! The v4 API wants a bearer token obtained from `/login` with the project
//! API key. Tokens last a month, so one login per run is enough.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::identifier::{IdNamespace, ResolvedTitle};
use super::rate_limiter::{RateLimitedClient, ResponseExt};
use super::resolver::{ExternalIdLookup, ResolutionError};

/// TVDB API client
pub struct TvdbClient {
    client: RateLimitedClient,
    base_url: String,
    api_key: String,
    token: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TvdbEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TvdbLogin {
    token: String,
}

/// Series record, trimmed to what id mapping needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvdbSeries {
    pub id: i64,
    pub name: Option<String>,
    /// TVDB sends `null` rather than `[]` for series without remote ids
    #[serde(default)]
    pub remote_ids: Option<Vec<TvdbRemoteId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvdbRemoteId {
    pub id: String,
    pub source_name: Option<String>,
}

impl TvdbSeries {
    /// IMDb id among the series' remote ids
    pub fn imdb_id(&self) -> Option<ResolvedTitle> {
        self.remote_ids
            .iter()
            .flatten()
            .filter(|r| r.source_name.as_deref() == Some("IMDB"))
            .find_map(|r| ResolvedTitle::parse(&r.id))
    }
}

impl TvdbClient {
    pub fn new(api_key: String) -> reqwest::Result<Self> {
        Ok(Self {
            client: RateLimitedClient::for_tvdb()?,
            base_url: "https://api4.thetvdb.com/v4".to_string(),
            api_key,
            token: Mutex::new(None),
        })
    }

    /// Point the client at another API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn token(&self) -> Result<String, ResolutionError> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        let request = self
            .client
            .inner()
            .post(format!("{}/login", self.base_url))
            .json(&serde_json::json!({ "apikey": self.api_key }));
        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| ResolutionError::Transient(e.to_string()))?;

        if response.is_transient_error() {
            return Err(ResolutionError::Transient(format!(
                "TVDB login failed with status: {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(ResolutionError::NotFound(format!(
                "TVDB login rejected with status: {}",
                response.status()
            )));
        }

        let login: TvdbEnvelope<TvdbLogin> = response
            .json()
            .await
            .map_err(|e| ResolutionError::from_body("TVDB login", e))?;

        info!("Authenticated with TVDB");
        *token = Some(login.data.token.clone());
        Ok(login.data.token)
    }

    /// Fetch a series record. `Ok(None)` when TVDB has no such id.
    pub async fn get_series(&self, tvdb_id: &str) -> Result<Option<TvdbSeries>, ResolutionError> {
        let token = self.token().await?;
        debug!(tvdb_id = %tvdb_id, "Fetching TVDB series");

        let request = self
            .client
            .inner()
            .get(format!("{}/series/{}/extended", self.base_url, tvdb_id))
            .query(&[("short", "true")])
            .bearer_auth(token);
        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| ResolutionError::Transient(e.to_string()))?;

        match response.status().as_u16() {
            401 => {
                warn!("TVDB token rejected, logging in again");
                *self.token.lock().await = None;
                return Err(ResolutionError::Transient("TVDB token expired".to_string()));
            }
            404 => return Ok(None),
            _ => {}
        }

        if response.is_transient_error() {
            return Err(ResolutionError::Transient(format!(
                "TVDB series failed with status: {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(ResolutionError::NotFound(format!(
                "TVDB series failed with status: {}",
                response.status()
            )));
        }

        let series: TvdbEnvelope<TvdbSeries> = response
            .json()
            .await
            .map_err(|e| ResolutionError::from_body("TVDB series", e))?;

        Ok(Some(series.data))
    }
}

#[async_trait]
impl ExternalIdLookup for TvdbClient {
    fn namespace(&self) -> IdNamespace {
        IdNamespace::Tvdb
    }

    async fn lookup(&self, id: &str) -> Result<ResolvedTitle, ResolutionError> {
        if !self.has_api_key() {
            warn!(id = %id, "TVDB API key not configured, cannot resolve");
            return Err(ResolutionError::NotFound(
                "TVDB API key not configured".to_string(),
            ));
        }

        let series = self
            .get_series(id)
            .await?
            .ok_or_else(|| ResolutionError::NotFound(format!("TVDB id {} not found", id)))?;

        series
            .imdb_id()
            .ok_or_else(|| ResolutionError::NotFound(format!("TVDB {} has no IMDb id", id)))
    }
}
