//! Shared search pipeline
//!
//! Every search mode goes through the same steps: aggregate provider
//! results, run them through the [`ReleaseSelector`], then either queue the
//! winners on the snatch queue or, for manual searches, keep the ranked
//! candidates for the user to choose from.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{EpisodeStore, episode_target_key};
use crate::error::QueueError;
use crate::indexer::{ProviderAggregator, SearchMode, SearchSpec};
use crate::services::job_queue::{TargetGuard, TargetLocks};
use crate::services::queues::{SnatchItem, SnatchQueue};
use crate::services::scheduler::JobContext;
use crate::services::selector::{RankedResult, ReleaseSelector};
use crate::services::snatch::{SnatchRequest, Snatcher};

/// Counters for one search pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchReport {
    /// Episodes searched for
    pub searched: usize,
    /// Candidates that passed the selector
    pub matched: usize,
    /// Snatches queued
    pub queued: usize,
    /// Winners dropped (already snatched, snatch already pending)
    pub skipped: usize,
    /// Providers that failed
    pub failed: usize,
}

impl SearchReport {
    pub fn merge(&mut self, other: SearchReport) {
        self.searched += other.searched;
        self.matched += other.matched;
        self.queued += other.queued;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Ranked candidates kept from a manual search
#[derive(Debug, Clone, Serialize)]
pub struct ManualSearchResults {
    pub episode_id: Uuid,
    pub show_id: Uuid,
    pub searched_at: DateTime<Utc>,
    pub candidates: Vec<RankedResult>,
}

/// Latest manual search results per episode
#[derive(Default)]
pub struct ManualResults {
    by_episode: RwLock<HashMap<Uuid, ManualSearchResults>>,
}

impl ManualResults {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, spec: &SearchSpec, ranked: &[RankedResult]) {
        let now = Utc::now();
        let mut by_episode = self.by_episode.write();
        for episode in &spec.episodes {
            let candidates = ranked
                .iter()
                .filter(|r| r.episode_ids.contains(&episode.id))
                .cloned()
                .collect();
            by_episode.insert(
                episode.id,
                ManualSearchResults {
                    episode_id: episode.id,
                    show_id: spec.show.id,
                    searched_at: now,
                    candidates,
                },
            );
        }
    }

    pub fn get(&self, episode_id: Uuid) -> Option<ManualSearchResults> {
        self.by_episode.read().get(&episode_id).cloned()
    }

    /// Drop the results for episodes a manual pick has been queued for
    pub fn forget(&self, episode_ids: &[Uuid]) {
        let mut by_episode = self.by_episode.write();
        for id in episode_ids {
            by_episode.remove(id);
        }
    }

    /// Candidate with the given guid from the episode's last manual search
    pub fn find(&self, episode_id: Uuid, guid: &str) -> Option<(Uuid, RankedResult)> {
        let by_episode = self.by_episode.read();
        let results = by_episode.get(&episode_id)?;
        results
            .candidates
            .iter()
            .find(|c| c.result.guid == guid)
            .map(|c| (results.show_id, c.clone()))
    }
}

/// Aggregate, select, snatch
pub struct SearchPipeline {
    store: Arc<dyn EpisodeStore>,
    aggregator: Arc<ProviderAggregator>,
    snatcher: Arc<Snatcher>,
    snatch_queue: Arc<SnatchQueue>,
    manual_results: Arc<ManualResults>,
    locks: TargetLocks,
}

impl SearchPipeline {
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        aggregator: Arc<ProviderAggregator>,
        snatcher: Arc<Snatcher>,
        snatch_queue: Arc<SnatchQueue>,
        manual_results: Arc<ManualResults>,
        locks: TargetLocks,
    ) -> Self {
        Self {
            store,
            aggregator,
            snatcher,
            snatch_queue,
            manual_results,
            locks,
        }
    }

    pub fn store(&self) -> &Arc<dyn EpisodeStore> {
        &self.store
    }

    pub fn manual_results(&self) -> &ManualResults {
        &self.manual_results
    }

    /// Lock whichever of `episode_ids` are free, for automatic passes
    ///
    /// Episodes held by a user-triggered search are left out.
    pub fn try_lock_episodes(&self, episode_ids: &[Uuid]) -> (Vec<Uuid>, Vec<TargetGuard>) {
        let mut locked = Vec::with_capacity(episode_ids.len());
        let mut guards = Vec::with_capacity(episode_ids.len());
        for id in episode_ids {
            if let Some(guard) = self.locks.try_acquire(&[episode_target_key(*id)]) {
                locked.push(*id);
                guards.push(guard);
            }
        }
        (locked, guards)
    }

    pub fn enqueue_snatch(&self, request: SnatchRequest) -> Result<Uuid, QueueError> {
        self.snatch_queue
            .add(SnatchItem::new(self.snatcher.clone(), request))
    }

    /// Run one search and act on the outcome
    pub async fn search(&self, spec: &SearchSpec, ctx: &JobContext) -> Result<SearchReport> {
        let aggregate = self
            .aggregator
            .search(spec, &ctx.settings, &ctx.cancel)
            .await;

        let selector = ReleaseSelector::new(spec, &ctx.settings, Utc::now());
        let ranked = selector.rank(&aggregate.results);

        let mut report = SearchReport {
            searched: spec.episodes.len(),
            matched: ranked.len(),
            failed: aggregate.failures.len(),
            ..Default::default()
        };

        debug!(
            mode = %spec.mode,
            show_name = %spec.show.name,
            episodes = spec.episodes.len(),
            providers = aggregate.providers_queried,
            candidates = aggregate.results.len(),
            matched = ranked.len(),
            "Search complete"
        );

        if spec.mode == SearchMode::Manual {
            self.manual_results.record(spec, &ranked);
            return Ok(report);
        }

        let forced = spec.mode == SearchMode::Forced;
        for pick in self.choose(spec, ranked).await? {
            let request =
                SnatchRequest::new(spec.show.id, pick.episode_ids.clone(), pick.result.clone())
                    .forced(forced);

            match self.enqueue_snatch(request) {
                Ok(_) => {
                    info!(
                        mode = %spec.mode,
                        show_name = %spec.show.name,
                        release = %pick.result.title,
                        quality = %pick.result.quality(),
                        provider = %pick.result.provider_id,
                        "Queued snatch"
                    );
                    report.queued += 1;
                }
                Err(e) => {
                    debug!(release = %pick.result.title, error = %e, "Snatch not queued");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Winners for the searched episodes: season packs first, then the best
    /// remaining candidates, each episode covered at most once
    async fn choose(&self, spec: &SearchSpec, ranked: Vec<RankedResult>) -> Result<Vec<RankedResult>> {
        let check_history = matches!(spec.mode, SearchMode::Daily | SearchMode::Backlog);
        let mut remaining: HashSet<Uuid> = spec.episodes.iter().map(|e| e.id).collect();

        let (packs, singles): (Vec<_>, Vec<_>) =
            ranked.into_iter().partition(|r| r.result.parsed.season_pack);

        let mut picks = Vec::new();
        for candidate in packs.into_iter().chain(singles) {
            if remaining.is_empty() {
                break;
            }
            if !candidate.episode_ids.iter().all(|id| remaining.contains(id)) {
                continue;
            }
            if check_history && self.already_snatched(&candidate).await? {
                debug!(release = %candidate.result.title, "Already snatched at this quality");
                continue;
            }
            for id in &candidate.episode_ids {
                remaining.remove(id);
            }
            picks.push(candidate);
        }

        Ok(picks)
    }

    async fn already_snatched(&self, candidate: &RankedResult) -> Result<bool> {
        for id in &candidate.episode_ids {
            if self.store.was_snatched(*id, candidate.result.quality()).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Forced or manual search for a single episode
///
/// Waits for any automatic pass holding the episode, so the two never
/// search the same episode at once.
pub async fn run_episode_search(
    pipeline: &SearchPipeline,
    episode_id: Uuid,
    mode: SearchMode,
    ctx: &JobContext,
) -> Result<SearchReport> {
    let Some(_guard) = pipeline
        .locks
        .acquire(&[episode_target_key(episode_id)], &ctx.cancel)
        .await
    else {
        debug!(episode_id = %episode_id, "Search cancelled while waiting for episode");
        return Ok(SearchReport::default());
    };

    let episode = pipeline
        .store
        .load_episode(episode_id)
        .await?
        .with_context(|| format!("Episode {} not found", episode_id))?;
    let show = pipeline
        .store
        .load_show(episode.tv_show_id)
        .await?
        .with_context(|| format!("Show {} not found", episode.tv_show_id))?;

    info!(
        job = "forced_search",
        mode = %mode,
        show_name = %show.name,
        episode = %episode.label(),
        "Searching for episode"
    );

    let spec = SearchSpec::new(show, vec![episode], mode);
    pipeline.search(&spec, ctx).await
}
