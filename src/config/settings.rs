//! Search settings snapshot
//!
//! Jobs never read global configuration directly. Each scheduler tick takes
//! an `Arc<SearchSettings>` from the [`SettingsStore`] and uses that snapshot
//! for the whole run; a reload swaps in a new snapshot for the next tick.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lowest accepted daily search frequency, in minutes
pub const MIN_DAILYSEARCH_FREQUENCY: u64 = 10;
pub const DEFAULT_DAILYSEARCH_FREQUENCY: u64 = 40;
pub const DEFAULT_BACKLOG_FREQUENCY: u64 = 720;
const BACKLOG_FLOOR: u64 = 720;

/// Shortest backlog cycle (minutes) allowed for a given daily frequency
pub fn min_backlog_frequency(daily_frequency: u64) -> u64 {
    (daily_frequency * 2 + 7).max(BACKLOG_FLOOR)
}

/// How often the proper finder runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProperInterval {
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "45m")]
    FortyFiveMinutes,
    #[serde(rename = "90m")]
    NinetyMinutes,
    #[serde(rename = "4h")]
    FourHours,
    #[default]
    #[serde(rename = "daily")]
    Daily,
}

impl ProperInterval {
    pub fn cycle(self) -> Duration {
        let minutes = match self {
            ProperInterval::FifteenMinutes => 15,
            ProperInterval::FortyFiveMinutes => 45,
            ProperInterval::NinetyMinutes => 90,
            ProperInterval::FourHours => 240,
            ProperInterval::Daily => 24 * 60,
        };
        Duration::from_secs(minutes * 60)
    }

    /// Parse a configured value, falling back to daily for unknown values
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl FromStr for ProperInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "15m" => Ok(ProperInterval::FifteenMinutes),
            "45m" => Ok(ProperInterval::FortyFiveMinutes),
            "90m" => Ok(ProperInterval::NinetyMinutes),
            "4h" => Ok(ProperInterval::FourHours),
            "daily" => Ok(ProperInterval::Daily),
            _ => Err(anyhow::anyhow!("Unknown proper interval: {}", s)),
        }
    }
}

/// Immutable-per-tick search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub use_nzbs: bool,
    pub use_torrents: bool,
    pub randomize_providers: bool,
    pub download_propers: bool,
    pub use_subtitles: bool,

    /// Minutes between daily searches
    pub daily_search_frequency: u64,
    /// Minutes between backlog searches, never below [`min_backlog_frequency`]
    pub backlog_frequency: u64,
    pub proper_interval: ProperInterval,
    /// Hour of day the show updater runs
    pub show_update_hour: u32,

    pub provider_timeout: Duration,
    pub snatch_timeout: Duration,

    pub minimum_seeders: u32,
    pub minimum_leechers: u32,
    /// Usenet retention in days, 0 = unlimited
    pub usenet_retention_days: u32,

    pub require_words: Vec<String>,
    pub ignore_words: Vec<String>,
    pub preferred_words: Vec<String>,
    pub undesired_words: Vec<String>,

    /// How far back the daily searcher looks for newly aired episodes
    pub daily_lookback_hours: i64,
    /// How far back the proper finder looks for downloaded episodes
    pub proper_search_days: i64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            use_nzbs: false,
            use_torrents: true,
            randomize_providers: false,
            download_propers: true,
            use_subtitles: false,
            daily_search_frequency: DEFAULT_DAILYSEARCH_FREQUENCY,
            backlog_frequency: DEFAULT_BACKLOG_FREQUENCY,
            proper_interval: ProperInterval::Daily,
            show_update_hour: 3,
            provider_timeout: Duration::from_secs(30),
            snatch_timeout: Duration::from_secs(30),
            minimum_seeders: 1,
            minimum_leechers: 0,
            usenet_retention_days: 0,
            require_words: Vec::new(),
            ignore_words: Vec::new(),
            preferred_words: Vec::new(),
            undesired_words: Vec::new(),
            daily_lookback_hours: 24,
            proper_search_days: 2,
        }
    }
}

impl SearchSettings {
    /// Apply the frequency floors. Values below a floor are clamped up.
    pub fn normalized(mut self) -> Self {
        self.daily_search_frequency = self.daily_search_frequency.max(MIN_DAILYSEARCH_FREQUENCY);
        self.backlog_frequency = self
            .backlog_frequency
            .max(min_backlog_frequency(self.daily_search_frequency));
        self.show_update_hour = self.show_update_hour.min(23);
        self
    }

    pub fn daily_cycle(&self) -> Duration {
        Duration::from_secs(self.daily_search_frequency * 60)
    }

    pub fn backlog_cycle(&self) -> Duration {
        Duration::from_secs(self.backlog_frequency * 60)
    }

    pub fn show_update_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.show_update_hour, 0, 0)
    }

    pub fn daily_lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.daily_lookback_hours)
    }

    pub fn proper_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.proper_search_days)
    }
}

/// Holder of the current settings snapshot
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<SearchSettings>>,
}

impl SettingsStore {
    pub fn new(settings: SearchSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings.normalized())),
        }
    }

    /// Current snapshot; callers keep it for the duration of a run
    pub fn snapshot(&self) -> Arc<SearchSettings> {
        self.current.read().clone()
    }

    /// Swap in new settings for subsequent ticks
    pub fn replace(&self, settings: SearchSettings) -> Arc<SearchSettings> {
        let next = Arc::new(settings.normalized());
        *self.current.write() = next.clone();
        next
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(SearchSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_backlog_frequency() {
        assert_eq!(min_backlog_frequency(40), 720);
        assert_eq!(min_backlog_frequency(400), 807);
    }

    #[test]
    fn test_backlog_below_minimum_is_clamped() {
        let settings = SearchSettings {
            backlog_frequency: 60,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.backlog_frequency, 720);

        let settings = SearchSettings {
            daily_search_frequency: 500,
            backlog_frequency: 800,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.backlog_frequency, 1007);
    }

    #[test]
    fn test_daily_frequency_floor() {
        let settings = SearchSettings {
            daily_search_frequency: 2,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.daily_search_frequency, MIN_DAILYSEARCH_FREQUENCY);
        assert_eq!(settings.daily_cycle(), Duration::from_secs(600));
    }

    #[test]
    fn test_proper_interval() {
        assert_eq!(ProperInterval::parse_lenient("4h").cycle(), Duration::from_secs(4 * 3600));
        assert_eq!(ProperInterval::parse_lenient("weekly"), ProperInterval::Daily);
        assert_eq!(ProperInterval::Daily.cycle(), Duration::from_secs(24 * 3600));
        assert_eq!(ProperInterval::FifteenMinutes.cycle(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_settings_store_swaps_snapshot() {
        let store = SettingsStore::default();
        let before = store.snapshot();
        assert!(before.use_torrents);

        store.replace(SearchSettings {
            use_torrents: false,
            ..Default::default()
        });

        assert!(before.use_torrents);
        assert!(!store.snapshot().use_torrents);
    }
}
