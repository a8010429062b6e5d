//! Core types for provider searches
//!
//! A [`SearchSpec`] describes what to look for, a [`SearchResult`] is one
//! candidate release returned by a provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{EpisodeRecord, ShowRecord};
use crate::services::quality::Quality;
use crate::services::release_parser::{ParsedRelease, parse_release, release_signature_title};

/// Which kind of content a provider serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Nzb,
    Torrent,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Nzb => write!(f, "nzb"),
            ProviderKind::Torrent => write!(f, "torrent"),
        }
    }
}

/// Why a search is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Newly aired episodes
    Daily,
    /// Older wanted episodes
    Backlog,
    /// User-triggered, snatches the winner
    Forced,
    /// User-triggered, stores ranked candidates for the user to pick from
    Manual,
    /// Proper/repack upgrades for downloaded episodes
    Proper,
}

impl SearchMode {
    /// Forced and manual searches are started by a user
    pub fn is_user_initiated(self) -> bool {
        matches!(self, SearchMode::Forced | SearchMode::Manual)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Daily => "daily",
            SearchMode::Backlog => "backlog",
            SearchMode::Forced => "forced",
            SearchMode::Manual => "manual",
            SearchMode::Proper => "proper",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to search for
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub show: ShowRecord,
    /// Episodes the search is for, all from `show`
    pub episodes: Vec<EpisodeRecord>,
    pub mode: SearchMode,
    /// Multi-episode releases are acceptable when all covered episodes are in `episodes`
    pub allow_multi: bool,
    /// Whole-season search: season packs are acceptable
    pub season_search: bool,
}

impl SearchSpec {
    pub fn new(show: ShowRecord, episodes: Vec<EpisodeRecord>, mode: SearchMode) -> Self {
        Self {
            show,
            episodes,
            mode,
            allow_multi: false,
            season_search: false,
        }
    }

    pub fn with_multi(mut self, allow: bool) -> Self {
        self.allow_multi = allow;
        self
    }

    pub fn with_season_search(mut self, season_search: bool) -> Self {
        self.season_search = season_search;
        self
    }

    /// Search strings sent to providers
    pub fn query_strings(&self) -> Vec<String> {
        let mut queries = Vec::new();

        if self.season_search {
            let mut seasons: Vec<i32> = self.episodes.iter().map(|e| e.season).collect();
            seasons.sort_unstable();
            seasons.dedup();
            for season in seasons {
                queries.push(format!("{} S{:02}", self.show.name, season));
            }
        }

        for episode in &self.episodes {
            let query = match (self.show.air_by_date, episode.air_date()) {
                (true, Some(date)) => format!("{} {}", self.show.name, date.format("%Y %m %d")),
                _ => format!("{} {}", self.show.name, episode.label()),
            };
            if !queries.contains(&query) {
                queries.push(query);
            }
        }

        queries
    }

    /// Cache key for one provider's response to this spec
    pub fn cache_key(&self, provider_id: &str) -> String {
        let mut ids: Vec<String> = self.episodes.iter().map(|e| e.id.to_string()).collect();
        ids.sort();
        format!(
            "{}:{}:{}:{}:{}",
            provider_id,
            self.mode,
            self.show.id,
            self.season_search,
            ids.join(",")
        )
    }
}

/// One candidate release returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Release title
    pub title: String,

    /// Unique identifier within the provider
    pub guid: String,

    /// Download link: NZB/torrent URL or magnet URI
    pub link: Option<String>,

    /// Torrent info hash
    pub info_hash: Option<String>,

    /// Size in bytes
    pub size: Option<i64>,

    /// Number of seeders (torrent)
    pub seeders: Option<i32>,
    /// Number of peers, seeders + leechers (torrent)
    pub peers: Option<i32>,

    /// Publication date, which is also the usenet post date
    pub publish_date: Option<DateTime<Utc>>,

    pub kind: ProviderKind,

    /// The provider that found this release, filled in by the aggregator
    pub provider_id: String,
    pub provider_name: String,
    /// Higher means earlier in the configured provider order
    pub provider_weight: i32,

    pub parsed: ParsedRelease,
}

impl SearchResult {
    /// Create a result with the release name parsed
    pub fn new(title: impl Into<String>, guid: impl Into<String>, kind: ProviderKind) -> Self {
        let title = title.into();
        let parsed = parse_release(&title);
        Self {
            title,
            guid: guid.into(),
            link: None,
            info_hash: None,
            size: None,
            seeders: None,
            peers: None,
            publish_date: None,
            kind,
            provider_id: String::new(),
            provider_name: String::new(),
            provider_weight: 0,
            parsed,
        }
    }

    pub fn quality(&self) -> Quality {
        self.parsed.quality
    }

    pub fn release_group(&self) -> Option<&str> {
        self.parsed.release_group.as_deref()
    }

    pub fn proper_count(&self) -> u32 {
        self.parsed.proper_count
    }

    pub fn is_proper(&self) -> bool {
        self.parsed.is_proper()
    }

    pub fn is_magnet(&self) -> bool {
        self.link.as_deref().is_some_and(|l| l.starts_with("magnet:"))
    }

    /// Get the number of leechers
    pub fn leechers(&self) -> Option<i32> {
        match (self.peers, self.seeders) {
            (Some(peers), Some(seeders)) => Some((peers - seeders).max(0)),
            _ => None,
        }
    }

    /// Age in whole days, if the publish date is known
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.publish_date.map(|d| (now - d).num_days())
    }

    /// Normalized title + size, identical for the same release on different providers
    pub fn signature(&self) -> (String, Option<i64>) {
        (release_signature_title(&self.title), self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_strings() {
        let show = ShowRecord::new("Dexter");
        let ep = EpisodeRecord::new(show.id, 5, 7);
        let spec = SearchSpec::new(show, vec![ep], SearchMode::Backlog);
        assert_eq!(spec.query_strings(), vec!["Dexter S05E07".to_string()]);

        let spec = spec.with_season_search(true);
        assert_eq!(
            spec.query_strings(),
            vec!["Dexter S05".to_string(), "Dexter S05E07".to_string()]
        );
    }

    #[test]
    fn test_air_by_date_query() {
        let mut show = ShowRecord::new("The Daily Show");
        show.air_by_date = true;
        let mut ep = EpisodeRecord::new(show.id, 2026, 3);
        ep.aired_at = Some(Utc.with_ymd_and_hms(2026, 1, 7, 23, 0, 0).unwrap());
        let spec = SearchSpec::new(show, vec![ep], SearchMode::Daily);
        assert_eq!(spec.query_strings(), vec!["The Daily Show 2026 01 07".to_string()]);
    }

    #[test]
    fn test_leechers_and_signature() {
        let mut a = SearchResult::new("Show.S01E01.720p.WEB-DL-GRP", "a", ProviderKind::Torrent);
        a.seeders = Some(10);
        a.peers = Some(14);
        a.size = Some(1_000);
        assert_eq!(a.leechers(), Some(4));

        let mut b = SearchResult::new("Show S01E01 720p WEB DL GRP", "b", ProviderKind::Nzb);
        b.size = Some(1_000);
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.quality(), Quality::HdWebDl);
    }
}
