//! Episode records and status lifecycle

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::quality::Quality;

/// Episode status as tracked by the store
///
/// The core only ever moves an episode forward through this lifecycle.
/// Moving backwards (e.g. DOWNLOADED back to WANTED) is a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Unaired,
    #[default]
    Wanted,
    Skipped,
    Ignored,
    Snatched,
    SnatchedProper,
    Downloaded,
    Archived,
}

impl EpisodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Unaired => "unaired",
            EpisodeStatus::Wanted => "wanted",
            EpisodeStatus::Skipped => "skipped",
            EpisodeStatus::Ignored => "ignored",
            EpisodeStatus::Snatched => "snatched",
            EpisodeStatus::SnatchedProper => "snatched_proper",
            EpisodeStatus::Downloaded => "downloaded",
            EpisodeStatus::Archived => "archived",
        }
    }

    pub fn is_snatched(self) -> bool {
        matches!(self, EpisodeStatus::Snatched | EpisodeStatus::SnatchedProper)
    }

    /// Has a file on disk (or had one and it was archived)
    pub fn is_downloaded(self) -> bool {
        matches!(self, EpisodeStatus::Downloaded | EpisodeStatus::Archived)
    }

    /// Whether the core may move an episode from `self` to `next`
    ///
    /// `forced` marks user-initiated work, which may re-snatch an episode
    /// that is already snatched or downloaded.
    pub fn can_transition(self, next: EpisodeStatus, forced: bool) -> bool {
        use EpisodeStatus::*;
        match (self, next) {
            (Unaired, Wanted) => true,
            (Wanted, Snatched | SnatchedProper) => true,
            (Snatched | SnatchedProper, Downloaded) => true,
            (Downloaded | Archived, SnatchedProper) => true,
            (Snatched | SnatchedProper | Downloaded | Archived | Skipped | Ignored, Snatched)
            | (Snatched | SnatchedProper | Skipped | Ignored, SnatchedProper) => forced,
            (Unaired, Snatched | SnatchedProper) => forced,
            _ => false,
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Episode record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub id: Uuid,
    pub tv_show_id: Uuid,
    pub season: i32,
    pub episode: i32,
    #[serde(default)]
    pub title: Option<String>,
    /// When the episode aired (or will air)
    #[serde(default)]
    pub aired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: EpisodeStatus,
    /// Quality of the snatched or downloaded release
    #[serde(default)]
    pub quality: Option<Quality>,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub proper_count: u32,
    #[serde(default)]
    pub snatched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl EpisodeRecord {
    /// Create a wanted episode with no air time
    pub fn new(tv_show_id: Uuid, season: i32, episode: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tv_show_id,
            season,
            episode,
            title: None,
            aired_at: None,
            status: EpisodeStatus::Wanted,
            quality: None,
            release_name: None,
            proper_count: 0,
            snatched_at: None,
            downloaded_at: None,
        }
    }

    pub fn air_date(&self) -> Option<NaiveDate> {
        self.aired_at.map(|t| t.date_naive())
    }

    pub fn has_aired(&self, now: DateTime<Utc>) -> bool {
        self.aired_at.is_some_and(|t| t <= now)
    }

    /// `S01E02` style label used in logs
    pub fn label(&self) -> String {
        format!("S{:02}E{:02}", self.season, self.episode)
    }

    /// Queue conflict key for work that mutates this episode
    pub fn target_key(&self) -> String {
        episode_target_key(self.id)
    }
}

pub fn episode_target_key(id: Uuid) -> String {
    format!("episode:{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(EpisodeStatus::Unaired.can_transition(EpisodeStatus::Wanted, false));
        assert!(EpisodeStatus::Wanted.can_transition(EpisodeStatus::Snatched, false));
        assert!(EpisodeStatus::Snatched.can_transition(EpisodeStatus::Downloaded, false));
        assert!(EpisodeStatus::Downloaded.can_transition(EpisodeStatus::SnatchedProper, false));
    }

    #[test]
    fn test_core_never_regresses() {
        assert!(!EpisodeStatus::Downloaded.can_transition(EpisodeStatus::Wanted, false));
        assert!(!EpisodeStatus::Snatched.can_transition(EpisodeStatus::Wanted, true));
        assert!(!EpisodeStatus::Wanted.can_transition(EpisodeStatus::Unaired, true));
        assert!(!EpisodeStatus::Downloaded.can_transition(EpisodeStatus::Snatched, false));
    }

    #[test]
    fn test_forced_resnatch_of_downloaded() {
        assert!(EpisodeStatus::Downloaded.can_transition(EpisodeStatus::Snatched, true));
        assert!(EpisodeStatus::Snatched.can_transition(EpisodeStatus::Snatched, true));
        assert!(!EpisodeStatus::Snatched.can_transition(EpisodeStatus::Snatched, false));
    }

    #[test]
    fn test_label_and_target_key() {
        let show = Uuid::new_v4();
        let ep = EpisodeRecord::new(show, 1, 5);
        assert_eq!(ep.label(), "S01E05");
        assert_eq!(ep.target_key(), format!("episode:{}", ep.id));
    }
}
