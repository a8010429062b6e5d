//! Proper finder
//!
//! Looks for PROPER/REPACK releases of episodes downloaded within the
//! configured window. The selector only lets through propers that are
//! strictly newer than what was snatched and no worse in quality.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::search::{SearchPipeline, SearchReport};
use crate::db::EpisodeRecord;
use crate::indexer::{SearchMode, SearchSpec};
use crate::services::scheduler::{JobContext, ScheduledJob};

pub struct ProperFinder {
    pipeline: Arc<SearchPipeline>,
}

impl ProperFinder {
    pub fn new(pipeline: Arc<SearchPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn find_propers(&self, ctx: &JobContext) -> Result<SearchReport> {
        let store = self.pipeline.store();
        let since = Utc::now() - ctx.settings.proper_window();

        let mut by_show: BTreeMap<Uuid, Vec<EpisodeRecord>> = BTreeMap::new();
        for episode in store.load_recent_downloads(since).await? {
            by_show.entry(episode.tv_show_id).or_default().push(episode);
        }

        let mut report = SearchReport::default();
        for (show_id, episodes) in by_show {
            if ctx.cancel.is_cancelled() {
                info!(job = "proper_finder", "Proper search cancelled");
                break;
            }

            let Some(show) = store.load_show(show_id).await? else {
                continue;
            };
            if show.paused {
                continue;
            }

            let ids: Vec<Uuid> = episodes.iter().map(|e| e.id).collect();
            let (locked, _guards) = self.pipeline.try_lock_episodes(&ids);
            let episodes: Vec<EpisodeRecord> = episodes
                .into_iter()
                .filter(|e| locked.contains(&e.id))
                .collect();
            if episodes.is_empty() {
                continue;
            }

            debug!(
                job = "proper_finder",
                show_name = %show.name,
                episodes = episodes.len(),
                "Searching for propers"
            );
            let spec = SearchSpec::new(show, episodes, SearchMode::Proper).with_multi(true);
            report.merge(self.pipeline.search(&spec, ctx).await?);
        }

        info!(
            job = "proper_finder",
            searched = report.searched,
            matched = report.matched,
            queued = report.queued,
            "Proper search complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl ScheduledJob for ProperFinder {
    fn name(&self) -> &str {
        "proper_finder"
    }

    async fn run(&self, ctx: &JobContext) -> Result<()> {
        self.find_propers(ctx).await?;
        Ok(())
    }
}
