//! Application configuration management

pub mod settings;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

pub use settings::{
    MIN_DAILYSEARCH_FREQUENCY, ProperInterval, SearchSettings, SettingsStore,
    min_backlog_frequency,
};

use crate::services::logging::LoggingConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind host
    pub host: String,

    /// Server port
    pub port: u16,

    pub logging: LoggingConfig,

    /// Optional JSON library seed for the in-memory store
    pub library_file: Option<PathBuf>,

    /// Optional JSON list of provider definitions
    pub providers_file: Option<PathBuf>,

    /// Directory NZB files are dropped into
    pub nzb_blackhole_dir: PathBuf,

    /// Directory torrent and magnet files are dropped into
    pub torrent_blackhole_dir: PathBuf,

    /// Initial search settings
    pub search: SearchSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let blackhole_default = "./data/blackhole".to_string();

        let search = SearchSettings {
            use_nzbs: env_bool("USE_NZBS", false),
            use_torrents: env_bool("USE_TORRENTS", true),
            randomize_providers: env_bool("RANDOMIZE_PROVIDERS", false),
            download_propers: env_bool("DOWNLOAD_PROPERS", true),
            use_subtitles: env_bool("USE_SUBTITLES", false),
            daily_search_frequency: env_parse("DAILYSEARCH_FREQUENCY", 40)?,
            backlog_frequency: env_parse("BACKLOG_FREQUENCY", 720)?,
            proper_interval: ProperInterval::parse_lenient(
                &env::var("CHECK_PROPERS_INTERVAL").unwrap_or_else(|_| "daily".to_string()),
            ),
            show_update_hour: env_parse("SHOWUPDATE_HOUR", 3)?,
            provider_timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 30)?),
            snatch_timeout: Duration::from_secs(env_parse("SNATCH_TIMEOUT_SECS", 30)?),
            minimum_seeders: env_parse("MINIMUM_SEEDERS", 1)?,
            minimum_leechers: env_parse("MINIMUM_LEECHERS", 0)?,
            usenet_retention_days: env_parse("USENET_RETENTION_DAYS", 0)?,
            require_words: env_list("REQUIRE_WORDS"),
            ignore_words: env_list("IGNORE_WORDS"),
            preferred_words: env_list("PREFERRED_WORDS"),
            undesired_words: env_list("UNDESIRED_WORDS"),
            daily_lookback_hours: env_parse("DAILY_LOOKBACK_HOURS", 24)?,
            proper_search_days: env_parse("PROPER_SEARCH_DAYS", 2)?,
        }
        .normalized();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("Invalid PORT")?,

            logging: LoggingConfig {
                json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
                filter: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "snatcher=info,tower_http=info".to_string()),
            },

            library_file: env::var("LIBRARY_FILE").ok().map(PathBuf::from),

            providers_file: env::var("PROVIDERS_FILE").ok().map(PathBuf::from),

            nzb_blackhole_dir: PathBuf::from(
                env::var("NZB_BLACKHOLE_DIR").unwrap_or_else(|_| blackhole_default.clone()),
            ),

            torrent_blackhole_dir: PathBuf::from(
                env::var("TORRENT_BLACKHOLE_DIR").unwrap_or(blackhole_default),
            ),

            search,
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list, empty entries dropped
fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| split_list(&v))
        .unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}
