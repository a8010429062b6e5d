//! Persistence collaborator
//!
//! The search core never issues queries of its own: everything it needs
//! from durable state goes through [`EpisodeStore`]. [`MemoryStore`] is the
//! in-process implementation used by the binary and the tests.

pub mod episodes;
pub mod history;
pub mod memory;
pub mod tv_shows;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::indexer::types::SearchResult;
use crate::services::quality::Quality;

pub use episodes::{EpisodeRecord, EpisodeStatus, episode_target_key};
pub use history::{HistoryAction, HistoryRecord};
pub use memory::{LibrarySeed, MemoryStore};
pub use tv_shows::{ShowRecord, show_target_key};

/// Air-time window for wanted-episode lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WantedWindow {
    /// Exclusive lower bound on air time
    pub aired_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on air time
    pub aired_until: Option<DateTime<Utc>>,
}

impl WantedWindow {
    pub fn between(after: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            aired_after: Some(after),
            aired_until: Some(until),
        }
    }

    pub fn aired_until(until: DateTime<Utc>) -> Self {
        Self {
            aired_after: None,
            aired_until: Some(until),
        }
    }

    pub fn contains(&self, aired_at: DateTime<Utc>) -> bool {
        self.aired_after.is_none_or(|after| aired_at > after)
            && self.aired_until.is_none_or(|until| aired_at <= until)
    }
}

/// Storage operations the search core depends on
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// WANTED episodes whose air time falls in the window, ordered by air time
    async fn load_wanted_episodes(&self, window: &WantedWindow) -> Result<Vec<EpisodeRecord>>;

    async fn load_episode(&self, episode_id: Uuid) -> Result<Option<EpisodeRecord>>;

    async fn load_show(&self, show_id: Uuid) -> Result<Option<ShowRecord>>;

    async fn list_shows(&self) -> Result<Vec<ShowRecord>>;

    /// All episodes of a show, ordered by season and episode
    async fn load_show_episodes(&self, show_id: Uuid) -> Result<Vec<EpisodeRecord>>;

    /// DOWNLOADED episodes snatched at or after `since`
    async fn load_recent_downloads(&self, since: DateTime<Utc>) -> Result<Vec<EpisodeRecord>>;

    /// Persist a status change, recording the release when one caused it
    async fn save_episode_status(
        &self,
        episode_id: Uuid,
        status: EpisodeStatus,
        result: Option<&SearchResult>,
    ) -> Result<()>;

    async fn record_history(&self, record: HistoryRecord) -> Result<()>;

    /// Whether a release of this quality was already snatched for the episode
    async fn was_snatched(&self, episode_id: Uuid, quality: Quality) -> Result<bool>;

    /// Move UNAIRED episodes whose air time has passed to WANTED
    async fn promote_aired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_wanted_window_bounds() {
        let now = Utc::now();
        let window = WantedWindow::between(now - Duration::hours(24), now);
        assert!(window.contains(now));
        assert!(window.contains(now - Duration::hours(1)));
        assert!(!window.contains(now - Duration::hours(24)));
        assert!(!window.contains(now + Duration::seconds(1)));

        let open = WantedWindow::aired_until(now);
        assert!(open.contains(now - Duration::days(365)));
    }
}
