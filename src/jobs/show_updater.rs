//! Show updater and subtitle finder
//!
//! Both are daily housekeeping jobs that only queue show actions; the show
//! queue serializes them with any other work on the same show.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::db::EpisodeStore;
use crate::services::queues::{ShowAction, ShowMaintainer, ShowQueue, ShowQueueItem};
use crate::services::scheduler::{JobContext, ScheduledJob};

/// Queue `action` for every show selected by `include`; returns how many were queued
async fn queue_for_shows(
    job: &str,
    store: &Arc<dyn EpisodeStore>,
    show_queue: &ShowQueue,
    maintainer: &Arc<dyn ShowMaintainer>,
    action: ShowAction,
    include_paused: bool,
) -> Result<usize> {
    let mut queued = 0;
    for show in store.list_shows().await? {
        if show.paused && !include_paused {
            continue;
        }
        let item = ShowQueueItem::new(show.id, show.name.clone(), action, maintainer.clone());
        match show_queue.add(item) {
            Ok(_) => queued += 1,
            Err(e) => debug!(job, show_name = %show.name, error = %e, "Show busy, skipping"),
        }
    }
    Ok(queued)
}

pub struct ShowUpdater {
    store: Arc<dyn EpisodeStore>,
    show_queue: Arc<ShowQueue>,
    maintainer: Arc<dyn ShowMaintainer>,
}

impl ShowUpdater {
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        show_queue: Arc<ShowQueue>,
        maintainer: Arc<dyn ShowMaintainer>,
    ) -> Self {
        Self {
            store,
            show_queue,
            maintainer,
        }
    }
}

#[async_trait]
impl ScheduledJob for ShowUpdater {
    fn name(&self) -> &str {
        "show_updater"
    }

    async fn run(&self, _ctx: &JobContext) -> Result<()> {
        let queued = queue_for_shows(
            "show_updater",
            &self.store,
            &self.show_queue,
            &self.maintainer,
            ShowAction::Update,
            true,
        )
        .await?;
        info!(job = "show_updater", queued, "Queued show updates");
        Ok(())
    }
}

pub struct SubtitleFinder {
    store: Arc<dyn EpisodeStore>,
    show_queue: Arc<ShowQueue>,
    maintainer: Arc<dyn ShowMaintainer>,
}

impl SubtitleFinder {
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        show_queue: Arc<ShowQueue>,
        maintainer: Arc<dyn ShowMaintainer>,
    ) -> Self {
        Self {
            store,
            show_queue,
            maintainer,
        }
    }
}

#[async_trait]
impl ScheduledJob for SubtitleFinder {
    fn name(&self) -> &str {
        "subtitle_finder"
    }

    async fn run(&self, _ctx: &JobContext) -> Result<()> {
        let queued = queue_for_shows(
            "subtitle_finder",
            &self.store,
            &self.show_queue,
            &self.maintainer,
            ShowAction::Subtitle,
            false,
        )
        .await?;
        info!(job = "subtitle_finder", queued, "Queued subtitle searches");
        Ok(())
    }
}
