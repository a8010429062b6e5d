//! Release selector
//!
//! Filters candidate releases for a [`SearchSpec`] and ranks the survivors.
//! Filtering is a fixed sequence of hard rules (relevance, peers/retention,
//! words, release group, quality, propriety). Ranking is a total order so
//! the same candidates and settings always produce the same winner.
//!
//! Preferred and undesired words never exclude a release. They add
//! `10 * preferred_hits - 10 * undesired_hits` to a word score that ranks
//! right below quality.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::SearchSettings;
use crate::db::{EpisodeRecord, ShowRecord};
use crate::indexer::types::{ProviderKind, SearchMode, SearchResult, SearchSpec};
use crate::services::quality::Quality;

const WORD_WEIGHT: i32 = 10;

/// Global settings merged with the show's own rules
#[derive(Debug, Default, Clone)]
pub struct EffectiveRules {
    pub require_words: Vec<String>,
    pub ignore_words: Vec<String>,
    pub preferred_words: Vec<String>,
    pub undesired_words: Vec<String>,
    pub release_group_blacklist: Vec<String>,
    pub release_group_whitelist: Vec<String>,
    pub minimum_seeders: u32,
    pub minimum_leechers: u32,
    pub usenet_retention_days: u32,
}

impl EffectiveRules {
    pub fn from_settings_and_show(settings: &SearchSettings, show: &ShowRecord) -> Self {
        let merge = |global: &[String], local: &[String]| -> Vec<String> {
            let mut words: Vec<String> = global.iter().chain(local).cloned().collect();
            words.sort();
            words.dedup();
            words
        };

        Self {
            require_words: merge(&settings.require_words, &show.required_words),
            ignore_words: merge(&settings.ignore_words, &show.ignored_words),
            preferred_words: merge(&settings.preferred_words, &show.preferred_words),
            undesired_words: merge(&settings.undesired_words, &show.undesired_words),
            release_group_blacklist: show.release_group_blacklist.clone(),
            release_group_whitelist: show.release_group_whitelist.clone(),
            minimum_seeders: settings.minimum_seeders,
            minimum_leechers: settings.minimum_leechers,
            usenet_retention_days: settings.usenet_retention_days,
        }
    }
}

/// Why a candidate was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    WrongShow,
    WrongEpisode,
    MultiEpisodeNotAllowed,
    SeasonPackNotAllowed,
    TooFewSeeders,
    TooFewLeechers,
    OutsideRetention,
    MissingRequiredWord,
    IgnoredWord(String),
    BlacklistedGroup(String),
    GroupNotWhitelisted(String),
    UnwantedQuality(Quality),
    AlreadySatisfied,
    NotProper,
    ProperNotBetter,
}

/// A candidate that survived filtering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub result: SearchResult,
    /// Searched episodes this release covers
    pub episode_ids: Vec<Uuid>,
    pub word_score: i32,
}

/// Filters and ranks candidates for one search
pub struct ReleaseSelector<'a> {
    spec: &'a SearchSpec,
    rules: EffectiveRules,
    now: DateTime<Utc>,
}

impl<'a> ReleaseSelector<'a> {
    pub fn new(spec: &'a SearchSpec, settings: &SearchSettings, now: DateTime<Utc>) -> Self {
        Self {
            spec,
            rules: EffectiveRules::from_settings_and_show(settings, &spec.show),
            now,
        }
    }

    /// Run every hard filter, returning the covered episodes on success
    pub fn evaluate(&self, result: &SearchResult) -> Result<Vec<Uuid>, Rejection> {
        let covered = self.relevant_episodes(result)?;
        self.check_peers(result)?;
        self.check_words(result)?;
        self.check_group(result)?;
        self.check_quality(result, &covered)?;
        Ok(covered.iter().map(|e| e.id).collect())
    }

    /// Surviving candidates, best first
    pub fn rank(&self, candidates: &[SearchResult]) -> Vec<RankedResult> {
        let mut ranked: Vec<RankedResult> = candidates
            .iter()
            .filter_map(|candidate| match self.evaluate(candidate) {
                Ok(episode_ids) => Some(RankedResult {
                    word_score: self.word_score(candidate),
                    result: candidate.clone(),
                    episode_ids,
                }),
                Err(reason) => {
                    debug!(
                        release = %candidate.title,
                        provider = %candidate.provider_id,
                        reason = ?reason,
                        "Release rejected"
                    );
                    None
                }
            })
            .collect();

        // Provider sizes are untrusted, so sum wide
        let sizes: Vec<i64> = ranked.iter().filter_map(|r| r.result.size).collect();
        let average_size = if sizes.is_empty() {
            None
        } else {
            let total: i128 = sizes.iter().map(|s| *s as i128).sum();
            Some((total / sizes.len() as i128) as i64)
        };

        let proper_mode = self.spec.mode == SearchMode::Proper;
        ranked.sort_by(|a, b| compare_ranked(a, b, average_size, proper_mode));
        ranked
    }

    /// The single best candidate, or `None` when nothing is acceptable
    pub fn pick_best(&self, candidates: &[SearchResult]) -> Option<RankedResult> {
        self.rank(candidates).into_iter().next()
    }

    fn relevant_episodes(&self, result: &SearchResult) -> Result<Vec<&'a EpisodeRecord>, Rejection> {
        let parsed = &result.parsed;
        let show = &self.spec.show;

        match parsed.show_name.as_deref() {
            Some(name) if show.matches_name(name) => {}
            _ => return Err(Rejection::WrongShow),
        }

        if show.air_by_date {
            if let Some(date) = parsed.air_date {
                let covered: Vec<&EpisodeRecord> = self
                    .spec
                    .episodes
                    .iter()
                    .filter(|e| e.air_date() == Some(date))
                    .collect();
                return if covered.is_empty() {
                    Err(Rejection::WrongEpisode)
                } else {
                    Ok(covered)
                };
            }
        }

        let Some(season) = parsed.season else {
            return Err(Rejection::WrongEpisode);
        };

        if parsed.season_pack {
            if !self.spec.season_search {
                return Err(Rejection::SeasonPackNotAllowed);
            }
            let covered: Vec<&EpisodeRecord> = self
                .spec
                .episodes
                .iter()
                .filter(|e| e.season as i64 == season as i64)
                .collect();
            return if covered.is_empty() {
                Err(Rejection::WrongEpisode)
            } else {
                Ok(covered)
            };
        }

        let mut covered = Vec::with_capacity(parsed.episodes.len());
        for number in &parsed.episodes {
            match self
                .spec
                .episodes
                .iter()
                .find(|e| e.season as i64 == season as i64 && e.episode as i64 == *number as i64)
            {
                Some(episode) => covered.push(episode),
                // A multi-episode release must not cover episodes outside the search
                None if parsed.is_multi_episode() => return Err(Rejection::WrongEpisode),
                None => {}
            }
        }

        if covered.is_empty() {
            return Err(Rejection::WrongEpisode);
        }
        if parsed.is_multi_episode() && !self.spec.allow_multi {
            return Err(Rejection::MultiEpisodeNotAllowed);
        }
        Ok(covered)
    }

    fn check_peers(&self, result: &SearchResult) -> Result<(), Rejection> {
        match result.kind {
            ProviderKind::Torrent => {
                if let Some(seeders) = result.seeders {
                    if (seeders.max(0) as u32) < self.rules.minimum_seeders {
                        return Err(Rejection::TooFewSeeders);
                    }
                }
                if let Some(leechers) = result.leechers() {
                    if (leechers as u32) < self.rules.minimum_leechers {
                        return Err(Rejection::TooFewLeechers);
                    }
                }
            }
            ProviderKind::Nzb => {
                if self.rules.usenet_retention_days > 0 {
                    if let Some(age) = result.age_days(self.now) {
                        if age > self.rules.usenet_retention_days as i64 {
                            return Err(Rejection::OutsideRetention);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_words(&self, result: &SearchResult) -> Result<(), Rejection> {
        if !self.rules.require_words.is_empty()
            && !self
                .rules
                .require_words
                .iter()
                .any(|w| contains_word(&result.title, w))
        {
            return Err(Rejection::MissingRequiredWord);
        }

        if let Some(word) = self
            .rules
            .ignore_words
            .iter()
            .find(|w| contains_word(&result.title, w))
        {
            return Err(Rejection::IgnoredWord(word.clone()));
        }

        Ok(())
    }

    fn check_group(&self, result: &SearchResult) -> Result<(), Rejection> {
        let Some(group) = result.release_group() else {
            return Ok(());
        };
        let normalized = group.to_lowercase();

        if self
            .rules
            .release_group_blacklist
            .iter()
            .any(|blocked| blocked.to_lowercase() == normalized)
        {
            return Err(Rejection::BlacklistedGroup(group.to_string()));
        }

        if !self.rules.release_group_whitelist.is_empty()
            && !self
                .rules
                .release_group_whitelist
                .iter()
                .any(|allowed| allowed.to_lowercase() == normalized)
        {
            return Err(Rejection::GroupNotWhitelisted(group.to_string()));
        }

        Ok(())
    }

    fn check_quality(
        &self,
        result: &SearchResult,
        covered: &[&EpisodeRecord],
    ) -> Result<(), Rejection> {
        let quality = result.quality();
        if !self.spec.show.wants_quality(quality) {
            return Err(Rejection::UnwantedQuality(quality));
        }

        match self.spec.mode {
            SearchMode::Proper => {
                if !result.is_proper() {
                    return Err(Rejection::NotProper);
                }
                for episode in covered {
                    if !is_better_proper(result, episode) {
                        return Err(Rejection::ProperNotBetter);
                    }
                }
            }
            SearchMode::Daily | SearchMode::Backlog => {
                let satisfied = covered.iter().any(|episode| {
                    (episode.status.is_downloaded() || episode.status.is_snatched())
                        && episode.quality.is_some_and(|have| have >= quality)
                });
                if satisfied {
                    return Err(Rejection::AlreadySatisfied);
                }
            }
            // User-initiated searches may replace anything
            SearchMode::Forced | SearchMode::Manual => {}
        }

        Ok(())
    }

    fn word_score(&self, result: &SearchResult) -> i32 {
        let hits = |words: &[String]| {
            words
                .iter()
                .filter(|w| contains_word(&result.title, w))
                .count() as i32
        };
        WORD_WEIGHT * hits(&self.rules.preferred_words)
            - WORD_WEIGHT * hits(&self.rules.undesired_words)
    }
}

/// A proper replaces a download only if it is strictly newer and no worse
fn is_better_proper(result: &SearchResult, episode: &EpisodeRecord) -> bool {
    let current_quality = episode.quality.unwrap_or(Quality::Unknown);
    if result.quality() < current_quality {
        return false;
    }
    if result.proper_count() <= episode.proper_count {
        return false;
    }
    match (result.publish_date, episode.snatched_at) {
        (Some(published), Some(snatched)) => published > snatched,
        (None, Some(_)) => false,
        (_, None) => true,
    }
}

/// Case-insensitive whole-word match; separators in titles count as spaces
pub fn contains_word(title: &str, word: &str) -> bool {
    let normalize = |s: &str| -> String {
        let spaced: String = s
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        spaced.split_whitespace().collect::<Vec<_>>().join(" ")
    };
    let word = normalize(word);
    if word.is_empty() {
        return false;
    }
    format!(" {} ", normalize(title)).contains(&format!(" {} ", word))
}

fn compare_ranked(
    a: &RankedResult,
    b: &RankedResult,
    average_size: Option<i64>,
    proper_mode: bool,
) -> Ordering {
    let (ra, rb) = (&a.result, &b.result);

    let seeders = |r: &SearchResult| match r.kind {
        ProviderKind::Torrent => r.seeders.unwrap_or(0),
        ProviderKind::Nzb => 0,
    };
    let size_distance = |r: &SearchResult| match (r.size, average_size) {
        (Some(size), Some(avg)) => size.abs_diff(avg),
        _ => u64::MAX,
    };

    rb.quality()
        .cmp(&ra.quality())
        .then(b.word_score.cmp(&a.word_score))
        .then(rb.provider_weight.cmp(&ra.provider_weight))
        .then(rb.proper_count().cmp(&ra.proper_count()))
        .then_with(|| {
            if proper_mode {
                rb.publish_date.cmp(&ra.publish_date)
            } else {
                Ordering::Equal
            }
        })
        .then(seeders(rb).cmp(&seeders(ra)))
        .then(size_distance(ra).cmp(&size_distance(rb)))
        .then(ra.title.cmp(&rb.title))
        .then(ra.provider_id.cmp(&rb.provider_id))
        .then(ra.guid.cmp(&rb.guid))
}
