//! Backlog searcher
//!
//! Periodically searches every WANTED episode that aired before the daily
//! lookback window. A season whose aired episodes are all still wanted is
//! searched as a whole so season packs can win.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::search::{SearchPipeline, SearchReport};
use crate::db::{EpisodeRecord, EpisodeStatus, WantedWindow};
use crate::indexer::{SearchMode, SearchSpec};
use crate::services::queues::{SearchQueue, SearchQueueItem};
use crate::services::scheduler::{JobContext, ScheduledJob};

pub struct BacklogSearcher {
    pipeline: Arc<SearchPipeline>,
    search_queue: Arc<SearchQueue>,
}

impl BacklogSearcher {
    pub fn new(pipeline: Arc<SearchPipeline>, search_queue: Arc<SearchQueue>) -> Self {
        Self {
            pipeline,
            search_queue,
        }
    }
}

#[async_trait]
impl ScheduledJob for BacklogSearcher {
    fn name(&self) -> &str {
        "backlog_search"
    }

    async fn run(&self, _ctx: &JobContext) -> Result<()> {
        let item = SearchQueueItem::Backlog {
            pipeline: self.pipeline.clone(),
        };
        match self.search_queue.add(item) {
            Ok(job_id) => info!(job = "backlog_search", job_id = %job_id, "Queued backlog search"),
            Err(e) => debug!(job = "backlog_search", error = %e, "Backlog search already queued"),
        }
        Ok(())
    }
}

/// One backlog pass over every show with old wanted episodes
pub async fn run_backlog_pass(pipeline: &SearchPipeline, ctx: &JobContext) -> Result<SearchReport> {
    let store = pipeline.store();
    let now = Utc::now();
    let cutoff = now - ctx.settings.daily_lookback();

    let wanted = store
        .load_wanted_episodes(&WantedWindow::aired_until(cutoff))
        .await?;

    let mut by_show: BTreeMap<Uuid, BTreeMap<i32, Vec<EpisodeRecord>>> = BTreeMap::new();
    for episode in wanted {
        by_show
            .entry(episode.tv_show_id)
            .or_default()
            .entry(episode.season)
            .or_default()
            .push(episode);
    }

    let mut report = SearchReport::default();
    'shows: for (show_id, seasons) in by_show {
        let Some(show) = store.load_show(show_id).await? else {
            continue;
        };
        if show.paused {
            debug!(job = "backlog_search", show_name = %show.name, "Skipping paused show");
            continue;
        }

        let all_episodes = store.load_show_episodes(show_id).await?;

        for (season, episodes) in seasons {
            if ctx.cancel.is_cancelled() {
                info!(job = "backlog_search", "Backlog search cancelled");
                break 'shows;
            }

            let ids: Vec<Uuid> = episodes.iter().map(|e| e.id).collect();
            let (locked, _guards) = pipeline.try_lock_episodes(&ids);
            if locked.len() < ids.len() {
                debug!(
                    job = "backlog_search",
                    show_name = %show.name,
                    season,
                    held = ids.len() - locked.len(),
                    "Skipping episodes held by another search"
                );
            }
            let episodes: Vec<EpisodeRecord> = episodes
                .into_iter()
                .filter(|e| locked.contains(&e.id))
                .collect();
            if episodes.is_empty() {
                continue;
            }

            let season_search = locked.len() == ids.len()
                && wants_whole_season(&all_episodes, season, episodes.len(), now);

            info!(
                job = "backlog_search",
                show_name = %show.name,
                season,
                episodes = episodes.len(),
                season_search,
                "Searching backlog"
            );

            let spec = SearchSpec::new(show.clone(), episodes, SearchMode::Backlog)
                .with_multi(true)
                .with_season_search(season_search);
            report.merge(pipeline.search(&spec, ctx).await?);
        }
    }

    info!(
        job = "backlog_search",
        searched = report.searched,
        matched = report.matched,
        queued = report.queued,
        failed_providers = report.failed,
        "Backlog search complete"
    );
    Ok(report)
}

/// Every aired episode of the season is wanted and there is more than one
fn wants_whole_season(
    all_episodes: &[EpisodeRecord],
    season: i32,
    wanted_count: usize,
    now: chrono::DateTime<Utc>,
) -> bool {
    let aired: Vec<&EpisodeRecord> = all_episodes
        .iter()
        .filter(|e| e.season == season && e.has_aired(now))
        .collect();
    aired.len() > 1
        && aired.len() == wanted_count
        && aired.iter().all(|e| e.status == EpisodeStatus::Wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn aired(show: Uuid, season: i32, episode: i32, status: EpisodeStatus) -> EpisodeRecord {
        let mut e = EpisodeRecord::new(show, season, episode);
        e.aired_at = Some(Utc::now() - Duration::days(30));
        e.status = status;
        e
    }

    #[test]
    fn test_wants_whole_season() {
        let show = Uuid::new_v4();
        let now = Utc::now();
        let mut episodes = vec![
            aired(show, 1, 1, EpisodeStatus::Wanted),
            aired(show, 1, 2, EpisodeStatus::Wanted),
        ];
        assert!(wants_whole_season(&episodes, 1, 2, now));

        // Unaired episodes do not block a season search
        let mut future = EpisodeRecord::new(show, 1, 3);
        future.aired_at = Some(now + Duration::days(7));
        future.status = EpisodeStatus::Unaired;
        episodes.push(future);
        assert!(wants_whole_season(&episodes, 1, 2, now));

        episodes.push(aired(show, 1, 4, EpisodeStatus::Downloaded));
        assert!(!wants_whole_season(&episodes, 1, 2, now));

        let single = vec![aired(show, 2, 1, EpisodeStatus::Wanted)];
        assert!(!wants_whole_season(&single, 2, 1, now));
    }
}
