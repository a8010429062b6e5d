//! Daily searcher
//!
//! Each tick promotes episodes that have aired to WANTED, then queues one
//! search pass for the wanted episodes that aired since the previous pass
//! (bounded by the daily lookback). A tick with nothing newly aired queues
//! nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::search::{SearchPipeline, SearchReport};
use crate::db::{EpisodeRecord, EpisodeStatus, WantedWindow};
use crate::indexer::{SearchMode, SearchSpec};
use crate::services::queues::{SearchQueue, SearchQueueItem};
use crate::services::scheduler::{JobContext, ScheduledJob};

pub struct DailySearcher {
    pipeline: Arc<SearchPipeline>,
    search_queue: Arc<SearchQueue>,
    last_pass: Mutex<Option<DateTime<Utc>>>,
}

impl DailySearcher {
    pub fn new(pipeline: Arc<SearchPipeline>, search_queue: Arc<SearchQueue>) -> Self {
        Self {
            pipeline,
            search_queue,
            last_pass: Mutex::new(None),
        }
    }

    /// Queue a pass for newly aired episodes; returns the queued episode ids
    pub async fn tick(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let store = self.pipeline.store();

        let promoted = store.promote_aired(now).await?;
        if !promoted.is_empty() {
            info!(job = "daily_search", count = promoted.len(), "Promoted aired episodes to wanted");
        }

        let earliest = now - ctx.settings.daily_lookback();
        let after = match *self.last_pass.lock() {
            Some(last) => last.max(earliest),
            None => earliest,
        };

        let episodes = store
            .load_wanted_episodes(&WantedWindow::between(after, now))
            .await?;
        if episodes.is_empty() {
            debug!(job = "daily_search", "No newly aired episodes");
            *self.last_pass.lock() = Some(now);
            return Ok(Vec::new());
        }

        let episode_ids: Vec<Uuid> = episodes.iter().map(|e| e.id).collect();
        let item = SearchQueueItem::Daily {
            pipeline: self.pipeline.clone(),
            episode_ids: episode_ids.clone(),
        };

        match self.search_queue.add(item) {
            Ok(job_id) => {
                info!(
                    job = "daily_search",
                    job_id = %job_id,
                    episodes = episode_ids.len(),
                    "Queued daily search"
                );
                *self.last_pass.lock() = Some(now);
                Ok(episode_ids)
            }
            Err(e) => {
                debug!(job = "daily_search", error = %e, "Daily search already queued");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl ScheduledJob for DailySearcher {
    fn name(&self) -> &str {
        "daily_search"
    }

    async fn run(&self, ctx: &JobContext) -> Result<()> {
        self.tick(ctx, Utc::now()).await?;
        Ok(())
    }
}

/// Search the given episodes, grouped by show
///
/// Episodes that are no longer WANTED, belong to a paused show or are held by
/// a user-triggered search are skipped.
pub async fn run_daily_pass(
    pipeline: &SearchPipeline,
    episode_ids: &[Uuid],
    ctx: &JobContext,
) -> Result<SearchReport> {
    let store = pipeline.store();

    let mut by_show: BTreeMap<Uuid, Vec<EpisodeRecord>> = BTreeMap::new();
    for id in episode_ids {
        match store.load_episode(*id).await? {
            Some(episode) if episode.status == EpisodeStatus::Wanted => {
                by_show.entry(episode.tv_show_id).or_default().push(episode);
            }
            _ => debug!(job = "daily_search", episode_id = %id, "Episode no longer wanted"),
        }
    }

    let mut report = SearchReport::default();
    for (show_id, episodes) in by_show {
        if ctx.cancel.is_cancelled() {
            info!(job = "daily_search", "Daily search cancelled");
            break;
        }

        let Some(show) = store.load_show(show_id).await? else {
            continue;
        };
        if show.paused {
            debug!(job = "daily_search", show_name = %show.name, "Skipping paused show");
            continue;
        }

        let ids: Vec<Uuid> = episodes.iter().map(|e| e.id).collect();
        let (locked, _guards) = pipeline.try_lock_episodes(&ids);
        let episodes: Vec<EpisodeRecord> = episodes
            .into_iter()
            .filter(|e| locked.contains(&e.id))
            .collect();
        if episodes.is_empty() {
            continue;
        }

        info!(
            job = "daily_search",
            show_name = %show.name,
            episodes = episodes.len(),
            "Searching newly aired episodes"
        );
        let spec = SearchSpec::new(show, episodes, SearchMode::Daily).with_multi(true);
        report.merge(pipeline.search(&spec, ctx).await?);
    }

    info!(
        job = "daily_search",
        searched = report.searched,
        matched = report.matched,
        queued = report.queued,
        failed_providers = report.failed,
        "Daily search complete"
    );
    Ok(report)
}
