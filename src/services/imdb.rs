//! IMDb video gallery scraper
//!
//! IMDb has no public trailer API. The gallery page lists videos for a title
//! and each video page embeds its signed playback URLs in the `__NEXT_DATA__`
//! JSON blob:
//! - Gallery: https://www.imdb.com/title/{id}/videogallery/?sort=date,asc
//! - Video:   https://www.imdb.com/video/{vi id}/

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use super::catalog::{CatalogError, TrailerCatalog, VideoCandidate, VideoKind};
use super::identifier::ResolvedTitle;
use super::rate_limiter::{RateLimitedClient, ResponseExt};

const BASE_URL: &str = "https://www.imdb.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static NEXT_DATA_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script#__NEXT_DATA__"#).unwrap());
static VIDEO_HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/video/(vi\d+)").unwrap());

/// A video listed on a title's gallery page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoListing {
    pub video_id: String,
    pub kind: VideoKind,
}

impl VideoListing {
    pub fn page_url(&self, base_url: &str) -> String {
        format!("{}/video/{}/", base_url, self.video_id)
    }
}

/// Trailer catalog backed by the IMDb website
pub struct ImdbCatalog {
    client: RateLimitedClient,
    base_url: String,
}

impl ImdbCatalog {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            client: RateLimitedClient::for_imdb(browser_headers())?,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the catalog at another site root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_page(&self, url: &str) -> Result<Option<String>, CatalogError> {
        let response = self.client.get(url).await?;
        let status = response.status().as_u16();

        // IMDb answers bot-suspected requests with 403; those clear up on their own
        if response.is_transient_error() || status == 403 {
            warn!(url = %url, status, "IMDb request failed, will retry");
            return Err(CatalogError::Transient(format!("{} returned {}", url, status)));
        }

        if !response.status().is_success() {
            debug!(url = %url, status, "IMDb page unavailable");
            return Ok(None);
        }

        Ok(Some(response.text().await?))
    }

    async fn resolve_listing(
        &self,
        listing: &VideoListing,
    ) -> Result<Option<VideoCandidate>, CatalogError> {
        let page_url = listing.page_url(&self.base_url);
        let Some(html) = self.fetch_page(&page_url).await? else {
            return Ok(None);
        };

        match parse_playback_url(&html) {
            Some(url) => Ok(Some(VideoCandidate::new(listing.kind, url))),
            None => {
                warn!(video = %listing.video_id, "No playback URLs on video page");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TrailerCatalog for ImdbCatalog {
    async fn fetch_candidates(
        &self,
        title: &ResolvedTitle,
    ) -> Result<Vec<VideoCandidate>, CatalogError> {
        let gallery_url = format!("{}/title/{}/videogallery/?sort=date,asc", self.base_url, title);
        let html = self
            .fetch_page(&gallery_url)
            .await?
            .ok_or_else(|| CatalogError::NotFound(title.clone()))?;

        let listings = parse_gallery(&html);
        info!(title = %title, videos = listings.len(), "Fetched IMDb video gallery");

        // Only the first listing of each kind can win selection, so only
        // those video pages are worth fetching
        let mut representatives: Vec<&VideoListing> = Vec::new();
        for kind in [VideoKind::Trailer, VideoKind::Clip] {
            if let Some(listing) = listings.iter().find(|l| l.kind == kind) {
                representatives.push(listing);
            }
        }

        let mut candidates = Vec::new();
        for listing in representatives {
            if let Some(candidate) = self.resolve_listing(listing).await? {
                let is_trailer = candidate.kind == VideoKind::Trailer;
                candidates.push(candidate);
                if is_trailer {
                    break;
                }
            }
        }

        Ok(candidates)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::REFERER, HeaderValue::from_static("https://www.imdb.com/"));
    headers
}

/// Extract video listings from a gallery page, in page order, one per video id
pub fn parse_gallery(html: &str) -> Vec<VideoListing> {
    let document = Html::parse_document(html);
    let mut listings: Vec<VideoListing> = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(caps) = VIDEO_HREF_RE.captures(href) else {
            continue;
        };
        let video_id = caps[1].to_string();
        let text = anchor.text().collect::<String>().to_lowercase();
        let kind = if text.contains("trailer") {
            VideoKind::Trailer
        } else {
            VideoKind::Clip
        };

        // Galleries link the same video from the thumbnail and the caption;
        // a trailer caption upgrades an earlier untitled thumbnail link
        match listings.iter_mut().find(|l| l.video_id == video_id) {
            Some(existing) => existing.kind = existing.kind.min(kind),
            None => listings.push(VideoListing { video_id, kind }),
        }
    }

    listings
}

/// Pick the best playback URL from a video page
pub fn parse_playback_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let script = document.select(&NEXT_DATA_SELECTOR).next()?;
    let json: JsonValue = serde_json::from_str(&script.text().collect::<String>()).ok()?;

    let playback = json
        .pointer("/props/pageProps/videoPlaybackData/video/playbackURLs")?
        .as_array()?;

    let best_mp4 = playback
        .iter()
        .filter(|item| item.get("videoMimeType").and_then(|v| v.as_str()) == Some("MP4"))
        .enumerate()
        // Highest definition wins, earlier entries win ties
        .max_by_key(|(index, item)| (definition_rank(item), std::cmp::Reverse(*index)))
        .map(|(_, item)| item);

    best_mp4
        .or_else(|| playback.first())
        .and_then(|item| item.get("url"))
        .and_then(|url| url.as_str())
        .map(str::to_string)
}

fn definition_rank(item: &JsonValue) -> u8 {
    let definition = item
        .get("videoDefinition")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if definition.contains("1080") {
        3
    } else if definition.contains("720") {
        2
    } else if definition.contains("480") {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_server::TestServer;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const GALLERY: &str = r#"
        <html><body>
          <a href="/video/vi1111/?ref_=vi_gal"><img alt="thumb"></a>
          <a href="/video/vi1111/?ref_=vi_gal">Behind the scenes</a>
          <a href="/video/vi2222/?ref_=vi_gal"><img alt="thumb"></a>
          <a href="/video/vi2222/?ref_=vi_gal">Official Trailer</a>
          <a href="/title/tt0133093/">Back to title</a>
          <a href="/video/vi3333/">Theatrical Trailer #2</a>
        </body></html>
    "#;

    #[test]
    fn test_parse_gallery() {
        let listings = parse_gallery(GALLERY);
        assert_eq!(
            listings,
            vec![
                VideoListing { video_id: "vi1111".into(), kind: VideoKind::Clip },
                VideoListing { video_id: "vi2222".into(), kind: VideoKind::Trailer },
                VideoListing { video_id: "vi3333".into(), kind: VideoKind::Trailer },
            ]
        );
        assert_eq!(listings[1].page_url(BASE_URL), "https://www.imdb.com/video/vi2222/");
    }

    #[test]
    fn test_parse_gallery_empty() {
        assert!(parse_gallery("<html><body><p>No videos</p></body></html>").is_empty());
    }

    fn video_page(playback: &str) -> String {
        format!(
            r#"<html><head><script id="__NEXT_DATA__" type="application/json">
            {{"props":{{"pageProps":{{"videoPlaybackData":{{"video":{{"playbackURLs":{}}}}}}}}}}}
            </script></head></html>"#,
            playback
        )
    }

    #[test]
    fn test_parse_playback_prefers_high_definition_mp4() {
        let html = video_page(
            r#"[
                {"videoMimeType":"M3U8","videoDefinition":"DEF_AUTO","url":"https://v.example/a.m3u8"},
                {"videoMimeType":"MP4","videoDefinition":"DEF_480p","url":"https://v.example/480.mp4"},
                {"videoMimeType":"MP4","videoDefinition":"DEF_1080p","url":"https://v.example/1080.mp4?Expires=1700000000"},
                {"videoMimeType":"MP4","videoDefinition":"DEF_720p","url":"https://v.example/720.mp4"}
            ]"#,
        );
        assert_eq!(
            parse_playback_url(&html).as_deref(),
            Some("https://v.example/1080.mp4?Expires=1700000000")
        );
    }

    #[test]
    fn test_parse_playback_falls_back_to_first_entry() {
        let html = video_page(
            r#"[{"videoMimeType":"M3U8","videoDefinition":"DEF_AUTO","url":"https://v.example/a.m3u8"}]"#,
        );
        assert_eq!(parse_playback_url(&html).as_deref(), Some("https://v.example/a.m3u8"));
    }

    #[test]
    fn test_parse_playback_missing_data() {
        assert_eq!(parse_playback_url("<html></html>"), None);
        assert_eq!(parse_playback_url(&video_page("[]")), None);
    }

    const MATRIX_GALLERY: &str = "/title/tt0133093/videogallery/";

    fn catalog(server: &TestServer) -> ImdbCatalog {
        ImdbCatalog::new().unwrap().with_base_url(server.base_url())
    }

    fn matrix() -> ResolvedTitle {
        ResolvedTitle::parse("tt0133093").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_candidates_resolves_trailer_page() {
        let server = TestServer::start().await;
        server.respond(MATRIX_GALLERY, 200, GALLERY);
        server.respond(
            "/video/vi2222/",
            200,
            video_page(
                r#"[{"videoMimeType":"MP4","videoDefinition":"DEF_720p","url":"https://v.example/720.mp4?Expires=1700003600"}]"#,
            ),
        );

        let candidates = catalog(&server).fetch_candidates(&matrix()).await.unwrap();
        assert_eq!(
            candidates,
            vec![VideoCandidate::new(
                VideoKind::Trailer,
                "https://v.example/720.mp4?Expires=1700003600"
            )]
        );
        assert!(candidates[0].expires_at.is_some());
        // The trailer wins, so the clip page is never fetched
        assert_eq!(server.hits("/video/vi1111/"), 0);
    }

    #[tokio::test]
    async fn test_empty_gallery_has_no_candidates() {
        let server = TestServer::start().await;
        server.respond(MATRIX_GALLERY, 200, "<html><body><p>No videos</p></body></html>");

        let candidates = catalog(&server).fetch_candidates(&matrix()).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_missing_title_is_not_found() {
        let server = TestServer::start().await;
        let err = catalog(&server).fetch_candidates(&matrix()).await.unwrap_err();
        assert_matches!(err, CatalogError::NotFound(ref t) if *t == matrix());
    }

    #[tokio::test]
    async fn test_throttling_and_server_errors_are_transient() {
        for status in [403, 429, 503] {
            let server = TestServer::start().await;
            server.respond(MATRIX_GALLERY, status, "");

            let err = catalog(&server).fetch_candidates(&matrix()).await.unwrap_err();
            assert_matches!(err, CatalogError::Transient(_), "status {}", status);
        }
    }
}
