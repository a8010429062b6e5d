//! Release-name parser for scene-style names
//!
//! Parses names like:
//! - "Chicago.Fire.S14E08.1080p.WEB.h264-ETHEL"
//! - "Hells.Kitchen.S06E14E15.HDTV.XviD-ASAP" (multi-episode)
//! - "House.4x5.720p.HDTV.X264-DIMENSION"
//! - "The.Daily.Show.2026.01.07.720p.WEB.h264-EDITH" (air-by-date)
//! - "Show.S02.1080p.BluRay.x264-GRP" (season pack)

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::services::quality::Quality;

static SXXEXX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.*?)[\s._-]*\bs(?P<season>\d{1,3})[\s._-]*e(?P<first>\d{1,4})(?P<extra>(?:[\s._-]*e\d{1,4}|-\d{1,3}\b)*)",
    )
    .unwrap()
});

static NXNN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.*?)[\s._-]*\b(?P<season>\d{1,2})x(?P<first>\d{1,3})(?P<extra>(?:[\s._-]*x\d{1,3}|-\d{1,3}\b)*)",
    )
    .unwrap()
});

static AIR_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.*?)[\s._-]*\b(?P<year>(?:19|20)\d{2})[\s._-](?P<month>\d{2})[\s._-](?P<day>\d{2})\b",
    )
    .unwrap()
});

static SEASON_PACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.*?)[\s._-]*\b(?:s(?P<season>\d{1,3})|season[\s._-]*(?P<season_long>\d{1,3}))\b",
    )
    .unwrap()
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-([A-Za-z0-9]+)(?:\.[A-Za-z0-9]{2,4})?$").unwrap());

static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[._]+").unwrap());
static SPECIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// Tails of hyphenated source tags (WEB-DL, WEB-Rip, Blu-Ray, HD-TV), never a group
const SOURCE_TAILS: [&str; 4] = ["dl", "rip", "ray", "tv"];

const PROPER_TAGS: [&str; 4] = ["proper", "repack", "real", "rerip"];

/// Structured information extracted from a release name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRelease {
    pub show_name: Option<String>,
    pub season: Option<u32>,
    /// Episodes covered, ascending. Empty for season packs and dated releases.
    pub episodes: Vec<u32>,
    pub air_date: Option<NaiveDate>,
    pub season_pack: bool,
    pub quality: Quality,
    pub release_group: Option<String>,
    /// Number of PROPER/REPACK/REAL/RERIP tags after the episode marker
    pub proper_count: u32,
}

impl ParsedRelease {
    pub fn is_proper(&self) -> bool {
        self.proper_count > 0
    }

    pub fn is_multi_episode(&self) -> bool {
        self.episodes.len() > 1
    }

    /// Whether this release covers the given season/episode
    pub fn covers(&self, season: i32, episode: i32) -> bool {
        let Some(parsed_season) = self.season else {
            return false;
        };
        if parsed_season as i64 != season as i64 {
            return false;
        }
        if self.season_pack {
            return true;
        }
        self.episodes.iter().any(|e| *e as i64 == episode as i64)
    }
}

/// Parse a release name
pub fn parse_release(name: &str) -> ParsedRelease {
    let mut parsed = ParsedRelease {
        quality: Quality::from_release_name(name),
        release_group: parse_group(name),
        ..Default::default()
    };

    // Byte offset where the episode marker ends; tags before it belong to the title
    let mut marker_end = 0;

    if let Some(caps) = SXXEXX_RE.captures(name) {
        apply_numbered(&mut parsed, &caps);
        marker_end = caps.get(0).map_or(0, |m| m.end());
    } else if let Some(caps) = AIR_DATE_RE.captures(name) {
        parsed.show_name = capture_name(&caps);
        let date = (|| {
            let year = caps.name("year")?.as_str().parse().ok()?;
            let month = caps.name("month")?.as_str().parse().ok()?;
            let day = caps.name("day")?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })();
        parsed.air_date = date;
        marker_end = caps.get(0).map_or(0, |m| m.end());
    } else if let Some(caps) = NXNN_RE.captures(name) {
        apply_numbered(&mut parsed, &caps);
        marker_end = caps.get(0).map_or(0, |m| m.end());
    } else if let Some(caps) = SEASON_PACK_RE.captures(name) {
        parsed.show_name = capture_name(&caps);
        parsed.season = caps
            .name("season")
            .or_else(|| caps.name("season_long"))
            .and_then(|m| m.as_str().parse().ok());
        parsed.season_pack = parsed.season.is_some();
        marker_end = caps.get(0).map_or(0, |m| m.end());
    }

    if marker_end > 0 {
        parsed.proper_count = count_proper_tags(&name[marker_end..]);
    }

    trace!(
        release = name,
        show = ?parsed.show_name,
        season = ?parsed.season,
        episodes = ?parsed.episodes,
        quality = %parsed.quality,
        proper_count = parsed.proper_count,
        "Parsed release name"
    );

    parsed
}

fn parse_group(name: &str) -> Option<String> {
    let group = GROUP_RE.captures(name)?.get(1)?.as_str();
    if SOURCE_TAILS.iter().any(|tail| group.eq_ignore_ascii_case(tail)) {
        return None;
    }
    Some(group.to_string())
}

fn apply_numbered(parsed: &mut ParsedRelease, caps: &Captures<'_>) {
    parsed.show_name = capture_name(caps);
    parsed.season = caps.name("season").and_then(|m| m.as_str().parse().ok());

    let first: Option<u32> = caps.name("first").and_then(|m| m.as_str().parse().ok());
    let Some(first) = first else {
        return;
    };
    let last = caps
        .name("extra")
        .and_then(|m| NUMBER_RE.find_iter(m.as_str()).last())
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|last| *last > first)
        .unwrap_or(first);

    parsed.episodes = (first..=last).collect();
}

fn capture_name(caps: &Captures<'_>) -> Option<String> {
    caps.name("name")
        .map(|m| clean_show_name(m.as_str()))
        .filter(|n| !n.is_empty())
}

fn count_proper_tags(tail: &str) -> u32 {
    tail.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| PROPER_TAGS.iter().any(|tag| token.eq_ignore_ascii_case(tag)))
        .count() as u32
}

/// Turn a dotted scene title into a readable one
fn clean_show_name(name: &str) -> String {
    let spaced = SEPARATOR_RE.replace_all(name, " ");
    let spaced = SPACE_RE.replace_all(&spaced, " ");
    spaced.trim().trim_end_matches('-').trim().to_string()
}

/// Lowercase, article-free, punctuation-free form of a show name
pub fn normalize_show_name(name: &str) -> String {
    let mut normalized = SEPARATOR_RE.replace_all(&name.to_lowercase(), " ").to_string();
    normalized = normalized.replace('-', " ");

    for article in ["the ", "a ", "an "] {
        if let Some(rest) = normalized.strip_prefix(article) {
            normalized = rest.to_string();
            break;
        }
    }

    normalized = SPECIAL_RE.replace_all(&normalized, "").to_string();
    normalized = SPACE_RE.replace_all(&normalized, " ").to_string();
    normalized.trim().to_string()
}

/// Whitespace-free comparison key, so "S.H.I.E.L.D" and "SHIELD" agree
pub fn show_name_key(name: &str) -> String {
    normalize_show_name(name).replace(' ', "")
}

/// Normalized title used to recognise the same release across providers
pub fn release_signature_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let trimmed = lower
        .strip_suffix(".nzb")
        .or_else(|| lower.strip_suffix(".torrent"))
        .unwrap_or(&lower);
    trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}
