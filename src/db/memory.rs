//! In-memory episode store
//!
//! Backs the binary when no external database is wired in, and every test.
//! Can be seeded from a JSON library file.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    EpisodeRecord, EpisodeStatus, EpisodeStore, HistoryRecord, ShowRecord, WantedWindow,
};
use crate::indexer::types::SearchResult;
use crate::services::quality::Quality;

/// Library file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrarySeed {
    #[serde(default)]
    pub shows: Vec<ShowRecord>,
    #[serde(default)]
    pub episodes: Vec<EpisodeRecord>,
}

#[derive(Default)]
struct MemoryState {
    shows: HashMap<Uuid, ShowRecord>,
    episodes: HashMap<Uuid, EpisodeRecord>,
    history: Vec<HistoryRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: LibrarySeed) -> Self {
        let store = Self::new();
        for show in seed.shows {
            store.insert_show(show);
        }
        for episode in seed.episodes {
            store.insert_episode(episode);
        }
        store
    }

    /// Load a library seed from a JSON file
    pub fn load_json(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read library file {}", path.display()))?;
        let seed: LibrarySeed = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse library file {}", path.display()))?;

        info!(
            path = %path.display(),
            shows = seed.shows.len(),
            episodes = seed.episodes.len(),
            "Loaded library seed"
        );

        Ok(Self::from_seed(seed))
    }

    pub fn insert_show(&self, show: ShowRecord) {
        self.state.write().shows.insert(show.id, show);
    }

    pub fn insert_episode(&self, episode: EpisodeRecord) {
        self.state.write().episodes.insert(episode.id, episode);
    }

    /// Snapshot of the history log, oldest first
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.state.read().history.clone()
    }

    /// Directly overwrite an episode status, as a user reset would
    pub fn set_status(&self, episode_id: Uuid, status: EpisodeStatus) {
        if let Some(ep) = self.state.write().episodes.get_mut(&episode_id) {
            ep.status = status;
        }
    }
}

fn sort_by_air_time(episodes: &mut [EpisodeRecord]) {
    episodes.sort_by(|a, b| {
        a.aired_at
            .cmp(&b.aired_at)
            .then(a.tv_show_id.cmp(&b.tv_show_id))
            .then(a.season.cmp(&b.season))
            .then(a.episode.cmp(&b.episode))
    });
}

#[async_trait]
impl EpisodeStore for MemoryStore {
    async fn load_wanted_episodes(&self, window: &WantedWindow) -> Result<Vec<EpisodeRecord>> {
        let state = self.state.read();
        let mut episodes: Vec<EpisodeRecord> = state
            .episodes
            .values()
            .filter(|ep| ep.status == EpisodeStatus::Wanted)
            .filter(|ep| ep.aired_at.is_some_and(|t| window.contains(t)))
            .cloned()
            .collect();
        sort_by_air_time(&mut episodes);
        Ok(episodes)
    }

    async fn load_episode(&self, episode_id: Uuid) -> Result<Option<EpisodeRecord>> {
        Ok(self.state.read().episodes.get(&episode_id).cloned())
    }

    async fn load_show(&self, show_id: Uuid) -> Result<Option<ShowRecord>> {
        Ok(self.state.read().shows.get(&show_id).cloned())
    }

    async fn list_shows(&self) -> Result<Vec<ShowRecord>> {
        let mut shows: Vec<ShowRecord> = self.state.read().shows.values().cloned().collect();
        shows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(shows)
    }

    async fn load_show_episodes(&self, show_id: Uuid) -> Result<Vec<EpisodeRecord>> {
        let mut episodes: Vec<EpisodeRecord> = self
            .state
            .read()
            .episodes
            .values()
            .filter(|ep| ep.tv_show_id == show_id)
            .cloned()
            .collect();
        episodes.sort_by(|a, b| a.season.cmp(&b.season).then(a.episode.cmp(&b.episode)));
        Ok(episodes)
    }

    async fn load_recent_downloads(&self, since: DateTime<Utc>) -> Result<Vec<EpisodeRecord>> {
        let state = self.state.read();
        let mut episodes: Vec<EpisodeRecord> = state
            .episodes
            .values()
            .filter(|ep| ep.status == EpisodeStatus::Downloaded)
            .filter(|ep| ep.snatched_at.is_some_and(|t| t >= since))
            .cloned()
            .collect();
        sort_by_air_time(&mut episodes);
        Ok(episodes)
    }

    async fn save_episode_status(
        &self,
        episode_id: Uuid,
        status: EpisodeStatus,
        result: Option<&SearchResult>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let episode = state
            .episodes
            .get_mut(&episode_id)
            .with_context(|| format!("Episode {} not found", episode_id))?;

        debug!(
            episode_id = %episode_id,
            from = %episode.status,
            to = %status,
            "Saving episode status"
        );

        episode.status = status;
        match status {
            EpisodeStatus::Snatched | EpisodeStatus::SnatchedProper => {
                if let Some(result) = result {
                    episode.quality = Some(result.quality());
                    episode.release_name = Some(result.title.clone());
                    episode.proper_count = result.proper_count();
                }
                episode.snatched_at = Some(Utc::now());
            }
            EpisodeStatus::Downloaded => {
                episode.downloaded_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    async fn record_history(&self, record: HistoryRecord) -> Result<()> {
        self.state.write().history.push(record);
        Ok(())
    }

    async fn was_snatched(&self, episode_id: Uuid, quality: Quality) -> Result<bool> {
        Ok(self
            .state
            .read()
            .history
            .iter()
            .any(|h| h.episode_id == episode_id && h.quality == quality && h.is_snatch()))
    }

    async fn promote_aired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut state = self.state.write();
        let mut promoted = Vec::new();
        for episode in state.episodes.values_mut() {
            if episode.status == EpisodeStatus::Unaired && episode.has_aired(now) {
                episode.status = EpisodeStatus::Wanted;
                promoted.push(episode.id);
            }
        }
        promoted.sort();
        Ok(promoted)
    }
}
