//! Content discovery: blog link scraping and playlist enumeration.

use async_trait::async_trait;
use readstash_core::SourceKind;
use readstash_storage::{FetchError, HttpFetcher};
use scraper::{Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const CRATE_NAME: &str = "readstash-adapters";

/// Playlist item pages are requested at this fixed size; only the first page
/// is consumed.
pub const PLAYLIST_PAGE_SIZE: u32 = 50;

const DEFAULT_PLAYLIST_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Candidate URLs in discovery order plus the labels derived from the source
/// itself (host, kind, playlist metadata). Duplicates are not removed here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedItems {
    pub items: Vec<String>,
    pub labels: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid source url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("playlist api response: {0}")]
    Api(String),
}

/// Discovery seam; the reconciler only sees this trait, so tests substitute
/// canned fetchers.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source_url: &str, kind: SourceKind)
        -> Result<FetchedItems, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct PlaylistApiConfig {
    pub base_url: String,
    pub api_key: String,
}

impl PlaylistApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_PLAYLIST_API_BASE.to_string(),
            api_key: api_key.into(),
        }
    }
}

/// Live fetcher backed by [`HttpFetcher`]: one GET for a blog page, one item
/// page plus one metadata lookup for a playlist.
pub struct HttpSourceFetcher {
    http: HttpFetcher,
    playlist_api: PlaylistApiConfig,
}

impl HttpSourceFetcher {
    pub fn new(http: HttpFetcher, playlist_api: PlaylistApiConfig) -> Self {
        Self { http, playlist_api }
    }

    async fn fetch_blog(&self, source_url: &str) -> Result<FetchedItems, AdapterError> {
        let origin = page_origin(source_url)?;
        let body = self.http.fetch_text(source_url).await?;
        let items = extract_same_origin_links(&body, &origin);

        let mut labels = Vec::new();
        if let Some(host) = origin.host_str() {
            labels.push(host.to_string());
        }
        labels.push("Blog".to_string());

        Ok(FetchedItems { items, labels })
    }

    async fn fetch_playlist(&self, source_url: &str) -> Result<FetchedItems, AdapterError> {
        let parsed = parse_source_url(source_url)?;
        let playlist_id =
            extract_playlist_id(&parsed).ok_or_else(|| AdapterError::InvalidUrl {
                url: source_url.to_string(),
                reason: "missing `list` query parameter".to_string(),
            })?;

        let items_url = format!(
            "{}/playlistItems?part=contentDetails&maxResults={}&playlistId={}&key={}",
            self.playlist_api.base_url, PLAYLIST_PAGE_SIZE, playlist_id, self.playlist_api.api_key
        );
        let items_body = self.http.fetch_text(&items_url).await?;
        let items = parse_playlist_items_page(&items_body)?;

        let mut labels = Vec::new();
        if let Some(host) = parsed.host_str() {
            labels.push(host.to_string());
        }
        labels.push("Playlist".to_string());

        // Metadata enriches labels but its absence never blocks discovery.
        let meta_url = format!(
            "{}/playlists?part=snippet&id={}&key={}",
            self.playlist_api.base_url, playlist_id, self.playlist_api.api_key
        );
        match self.http.fetch_text(&meta_url).await {
            Ok(body) => {
                if let Some(meta) = parse_playlist_metadata(&body) {
                    labels.push(meta.title);
                    labels.push(meta.channel_title);
                }
            }
            Err(err) => {
                tracing::warn!(%playlist_id, %err, "playlist metadata lookup failed");
            }
        }

        Ok(FetchedItems { items, labels })
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        kind: SourceKind,
    ) -> Result<FetchedItems, AdapterError> {
        match kind {
            SourceKind::Blog => self.fetch_blog(source_url).await,
            SourceKind::Playlist => self.fetch_playlist(source_url).await,
            SourceKind::Unknown => Ok(FetchedItems::default()),
        }
    }
}

fn parse_source_url(source_url: &str) -> Result<Url, AdapterError> {
    Url::parse(source_url).map_err(|err| AdapterError::InvalidUrl {
        url: source_url.to_string(),
        reason: err.to_string(),
    })
}

/// Scheme + host of the page, used both as the resolution base for relative
/// hrefs and as the same-origin filter.
pub fn page_origin(source_url: &str) -> Result<Url, AdapterError> {
    let parsed = parse_source_url(source_url)?;
    let host = parsed.host_str().ok_or_else(|| AdapterError::InvalidUrl {
        url: source_url.to_string(),
        reason: "no host".to_string(),
    })?;
    let origin = format!("{}://{}", parsed.scheme(), host);
    Url::parse(&origin).map_err(|err| AdapterError::InvalidUrl {
        url: origin,
        reason: err.to_string(),
    })
}

/// Every anchor href in document order, resolved against `origin`, keeping
/// same-origin URLs that are not the bare origin root.
pub fn extract_same_origin_links(html: &str, origin: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").expect("static selector");

    document
        .select(&anchors)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| origin.join(href.trim()).ok())
        .filter(|resolved| resolved.origin() == origin.origin() && !is_origin_root(resolved))
        .map(Into::into)
        .collect()
}

fn is_origin_root(url: &Url) -> bool {
    url.path() == "/" && url.query().is_none() && url.fragment().is_none()
}

/// Pulls the playlist identifier out of the `list` query parameter.
pub fn extract_playlist_id(source_url: &Url) -> Option<String> {
    source_url
        .query_pairs()
        .find(|(key, _)| key == "list")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Deserialize)]
struct PlaylistItemsPage {
    #[serde(default)]
    items: Vec<PlaylistItemEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemEntry {
    #[serde(rename = "contentDetails")]
    content_details: PlaylistItemDetails,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistListPage {
    #[serde(default)]
    items: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
    #[serde(rename = "channelTitle")]
    channel_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistMetadata {
    pub title: String,
    pub channel_title: String,
}

/// Maps one page of the items API to canonical watch URLs, preserving the
/// API's ordering.
pub fn parse_playlist_items_page(body: &str) -> Result<Vec<String>, AdapterError> {
    let page: PlaylistItemsPage =
        serde_json::from_str(body).map_err(|err| AdapterError::Api(err.to_string()))?;
    Ok(page
        .items
        .into_iter()
        .map(|entry| {
            format!(
                "https://www.youtube.com/watch?v={}",
                entry.content_details.video_id
            )
        })
        .collect())
}

/// Title + channel from the metadata API, or `None` for an empty or
/// unparseable response.
pub fn parse_playlist_metadata(body: &str) -> Option<PlaylistMetadata> {
    let page: PlaylistListPage = serde_json::from_str(body).ok()?;
    page.items.into_iter().next().map(|entry| PlaylistMetadata {
        title: entry.snippet.title,
        channel_title: entry.snippet.channel_title,
    })
}
