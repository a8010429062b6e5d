//! Newznab/Torznab feed provider
//!
//! Newznab is the standard API for Usenet indexers; Torznab is the same API
//! serving torrents (Jackett, Prowlarr). One implementation covers both, the
//! configured [`ProviderKind`] decides which kind of results it yields.
//!
//! # Configuration
//!
//! Providers are listed in the providers file, in priority order:
//!
//! ```json
//! [{ "id": "geek", "name": "NZBGeek", "api_url": "https://api.nzbgeek.info",
//!    "api_key": "...", "kind": "nzb" }]
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{ProviderKind, SearchResult, SearchSpec};
use super::{CookieAuthenticated, Searchable};
use crate::error::ProviderError;

/// TV SD and HD categories
const DEFAULT_CATEGORIES: [i32; 2] = [5030, 5040];

fn default_true() -> bool {
    true
}

fn default_kind() -> ProviderKind {
    ProviderKind::Torrent
}

/// Provider definition as stored in the providers file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewznabConfig {
    pub id: String,
    pub name: String,
    /// API base URL (e.g., "https://api.nzbgeek.info")
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_kind")]
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub supports_backlog: bool,
    #[serde(default)]
    pub categories: Vec<i32>,
    /// Cookie string for sites behind a login
    #[serde(default)]
    pub cookies: Option<String>,
}

/// Newznab/Torznab provider
pub struct NewznabProvider {
    config: NewznabConfig,
    client: Client,
}

impl NewznabProvider {
    /// Create a new provider instance
    pub fn new(config: NewznabConfig) -> anyhow::Result<Self> {
        if config.api_url.trim().is_empty() {
            anyhow::bail!("API URL is required for provider {}", config.id);
        }
        let parsed = url::Url::parse(config.api_url.trim())
            .map_err(|e| anyhow::anyhow!("Invalid API URL for provider {}: {}", config.id, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("API URL for provider {} must be http or https", config.id);
        }

        let client = Client::builder().gzip(true).build()?;

        info!(
            provider = %config.id,
            provider_name = %config.name,
            api_url = %config.api_url,
            kind = %config.kind,
            "Created Newznab provider"
        );

        Ok(Self { config, client })
    }

    /// Build the API URL with query parameters
    fn build_api_url(&self, params: &[(&str, &str)]) -> String {
        let base = self.config.api_url.trim_end_matches('/');
        let mut url = format!("{}/api?apikey={}", base, self.config.api_key);

        for (key, value) in params {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }

        url
    }

    fn categories(&self) -> String {
        let cats: &[i32] = if self.config.categories.is_empty() {
            &DEFAULT_CATEGORIES
        } else {
            &self.config.categories
        };
        cats.iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn fetch(&self, query: &str) -> Result<String, ProviderError> {
        let cats = self.categories();
        let url = self.build_api_url(&[("t", "search"), ("q", query), ("cat", &cats)]);

        debug!(provider = %self.config.id, query = %query, "Searching Newznab provider");

        let mut request = self.client.get(&url);
        if let Some(cookies) = &self.config.cookies {
            request = request.header(reqwest::header::COOKIE, cookies);
        }

        let response = request.send().await.map_err(|source| ProviderError::Http {
            provider: self.config.id.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.config.id.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| ProviderError::Http {
            provider: self.config.id.clone(),
            source,
        })
    }

    /// Parse a Newznab/Torznab RSS response
    pub fn parse_response(&self, xml: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let parse_error = |message: String| ProviderError::Parse {
            provider: self.config.id.clone(),
            message,
        };

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut releases = Vec::new();
        let mut current_item: Option<ResultBuilder> = None;
        let mut current_tag = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    if tag_name == "item" {
                        current_item = Some(ResultBuilder::default());
                    } else if let Some(ref mut item) = current_item {
                        item.apply_element(&tag_name, e);
                    }
                    current_tag = tag_name;
                }
                Ok(Event::Empty(ref e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    if tag_name == "error" {
                        let description = attribute(e, "description")
                            .unwrap_or_else(|| "unknown API error".to_string());
                        return Err(ProviderError::Rejected {
                            provider: self.config.id.clone(),
                            message: description,
                        });
                    }
                    if let Some(ref mut item) = current_item {
                        item.apply_element(&tag_name, e);
                    }
                }
                Ok(Event::Text(ref e)) => {
                    if let Some(ref mut item) = current_item {
                        let text = e.unescape().unwrap_or_default().to_string();
                        if !text.is_empty() {
                            match current_tag.as_str() {
                                "title" => item.title = Some(text),
                                "guid" => item.guid = item.guid.take().or(Some(text)),
                                "link" => item.link = item.link.take().or(Some(text)),
                                "pubDate" => item.pub_date = parse_rfc822_date(&text),
                                _ => {}
                            }
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                    if tag_name == "item" {
                        if let Some(release) =
                            current_item.take().and_then(|item| item.build(self.config.kind))
                        {
                            releases.push(release);
                        }
                    }
                    current_tag.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(parse_error(format!("XML parse error: {}", e))),
                _ => {}
            }
        }

        Ok(releases)
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

/// Helper to build a SearchResult from parsed XML
#[derive(Default)]
struct ResultBuilder {
    title: Option<String>,
    guid: Option<String>,
    link: Option<String>,
    magnet: Option<String>,
    info_hash: Option<String>,
    pub_date: Option<DateTime<Utc>>,
    size: Option<i64>,
    seeders: Option<i32>,
    peers: Option<i32>,
}

impl ResultBuilder {
    /// Handle `<enclosure>` and `<newznab:attr>`/`<torznab:attr>` elements
    fn apply_element(&mut self, tag_name: &str, e: &BytesStart<'_>) {
        match tag_name {
            "newznab:attr" | "torznab:attr" => {
                let name = attribute(e, "name").unwrap_or_default();
                let value = attribute(e, "value").unwrap_or_default();
                self.set_attr(&name, &value);
            }
            "enclosure" => {
                if let Some(url) = attribute(e, "url") {
                    self.link = Some(url);
                }
                if let Some(size) = attribute(e, "length").and_then(|l| l.parse::<i64>().ok()) {
                    if size > 0 {
                        self.size = Some(size);
                    }
                }
            }
            _ => {}
        }
    }

    fn set_attr(&mut self, name: &str, value: &str) {
        match name {
            "size" => {
                if let Ok(size) = value.parse::<i64>() {
                    self.size = Some(size);
                }
            }
            "seeders" => {
                if let Ok(s) = value.parse::<i32>() {
                    self.seeders = Some(s);
                }
            }
            "peers" => {
                if let Ok(p) = value.parse::<i32>() {
                    self.peers = Some(p);
                }
            }
            "magneturl" => self.magnet = Some(value.to_string()),
            "infohash" => self.info_hash = Some(value.to_string()),
            "usenetdate" => {
                if let Some(date) = parse_rfc822_date(value) {
                    self.pub_date = Some(date);
                }
            }
            _ => {
                debug!(attr_name = name, attr_value = value, "Ignoring newznab attribute");
            }
        }
    }

    fn build(self, kind: ProviderKind) -> Option<SearchResult> {
        let title = self.title?;
        let guid = self.guid.unwrap_or_else(|| title.clone());

        let mut result = SearchResult::new(title, guid, kind);
        result.link = match kind {
            ProviderKind::Torrent => self.magnet.or(self.link),
            ProviderKind::Nzb => self.link,
        };
        result.info_hash = self.info_hash;
        result.size = self.size;
        result.publish_date = self.pub_date;
        if kind == ProviderKind::Torrent {
            result.seeders = self.seeders;
            result.peers = self.peers;
        }
        Some(result)
    }
}

/// Parse RFC 822 date format (common in RSS/Atom feeds)
fn parse_rfc822_date(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",  // RFC 822
        "%Y-%m-%dT%H:%M:%S%z",       // ISO 8601
    ];

    for format in &formats {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    warn!(date_string = s, "Failed to parse date");
    None
}

#[async_trait]
impl Searchable for NewznabProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn supports_backlog(&self) -> bool {
        self.config.supports_backlog
    }

    async fn search(&self, spec: &SearchSpec) -> Result<Vec<SearchResult>, ProviderError> {
        let mut results = Vec::new();

        for query in spec.query_strings() {
            let body = self.fetch(&query).await?;
            let mut releases = self.parse_response(&body)?;

            debug!(
                provider = %self.config.id,
                query = %query,
                releases_found = releases.len(),
                "Newznab query complete"
            );
            results.append(&mut releases);
        }

        Ok(results)
    }

    fn cookie_auth(&self) -> Option<&dyn CookieAuthenticated> {
        self.config.cookies.as_ref().map(|_| self as &dyn CookieAuthenticated)
    }
}

impl CookieAuthenticated for NewznabProvider {
    fn cookies(&self) -> &str {
        self.config.cookies.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quality::Quality;

    fn provider(kind: ProviderKind) -> NewznabProvider {
        NewznabProvider::new(NewznabConfig {
            id: "test".to_string(),
            name: "Test".to_string(),
            api_url: "https://api.example.com/".to_string(),
            api_key: "myapikey".to_string(),
            kind,
            enabled: true,
            supports_backlog: true,
            categories: vec![],
            cookies: None,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_rfc822_date() {
        assert!(parse_rfc822_date("Sat, 18 Jan 2025 14:30:00 +0000").is_some());
        assert!(parse_rfc822_date("2025-01-18T14:30:00Z").is_some());
        assert!(parse_rfc822_date("yesterday").is_none());
    }

    #[test]
    fn test_rejects_bad_api_url() {
        let mut config = NewznabConfig {
            id: "bad".to_string(),
            name: "Bad".to_string(),
            api_url: "not a url".to_string(),
            api_key: String::new(),
            kind: ProviderKind::Nzb,
            enabled: true,
            supports_backlog: true,
            categories: vec![],
            cookies: None,
        };
        assert!(NewznabProvider::new(config.clone()).is_err());

        config.api_url = "ftp://indexer.example.com".to_string();
        assert!(NewznabProvider::new(config).is_err());
    }

    #[test]
    fn test_build_api_url() {
        let url = provider(ProviderKind::Nzb).build_api_url(&[("t", "search"), ("q", "test query")]);
        assert!(url.starts_with("https://api.example.com/api?apikey=myapikey"));
        assert!(url.contains("t=search"));
        assert!(url.contains("q=test%20query"));
    }

    #[test]
    fn test_parse_torznab_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Dexter.S05E07.720p.BluRay.X264-REWARD</title>
      <guid>abc123</guid>
      <link>https://tracker.example/dl/abc123.torrent</link>
      <pubDate>Sat, 18 Jan 2025 14:30:00 +0000</pubDate>
      <enclosure url="https://tracker.example/dl/abc123.torrent" length="1500000000" type="application/x-bittorrent"/>
      <torznab:attr name="seeders" value="42"/>
      <torznab:attr name="peers" value="50"/>
      <torznab:attr name="magneturl" value="magnet:?xt=urn:btih:abc123"/>
    </item>
    <item>
      <guid>no-title</guid>
    </item>
  </channel>
</rss>"#;

        let results = provider(ProviderKind::Torrent).parse_response(xml).unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.guid, "abc123");
        assert_eq!(r.size, Some(1_500_000_000));
        assert_eq!(r.seeders, Some(42));
        assert_eq!(r.leechers(), Some(8));
        assert!(r.is_magnet());
        assert_eq!(r.quality(), Quality::HdBluRay);
        assert!(r.publish_date.is_some());
    }

    #[test]
    fn test_parse_api_error() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?><error code="100" description="Incorrect user credentials"/>"#;
        let err = provider(ProviderKind::Nzb).parse_response(xml).unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert_eq!(err.provider(), "test");
    }

    #[test]
    fn test_cookie_auth_only_when_configured() {
        let plain = provider(ProviderKind::Torrent);
        assert!(plain.cookie_auth().is_none());

        let mut config = plain.config.clone();
        config.cookies = Some("uid=1; pass=2".to_string());
        let with_cookies = NewznabProvider::new(config).unwrap();
        assert!(with_cookies.cookie_auth().unwrap().validate_cookies().is_ok());
    }
}
