//! Composition root
//!
//! [`App`] owns the queues, schedulers and collaborators, and exposes the
//! control surface used by the HTTP layer: forced and manual searches,
//! manual snatches, queue pause/resume/status, show actions, scheduler
//! force-runs, settings reload and the download-completion hook.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{SearchSettings, SettingsStore};
use crate::db::{EpisodeStatus, EpisodeStore, HistoryRecord, show_target_key};
use crate::error::ControlError;
use crate::indexer::{ProviderAggregator, SearchMode, Searchable};
use crate::jobs::{
    BacklogSearcher, DailySearcher, ManualResults, ManualSearchResults, ProperFinder,
    SearchPipeline, ShowUpdater, SubtitleFinder,
};
use crate::services::job_queue::{DrainMode, JobPriority, JobQueue, QueueItemView, TargetLocks};
use crate::services::notifications::{NotificationService, Notifier};
use crate::services::queues::{
    ForcedSearchItem, ForcedSearchQueue, QueueName, SearchQueue, ShowAction, ShowMaintainer,
    ShowQueue, ShowQueueItem, SnatchQueue,
};
use crate::services::scheduler::{ScheduleSpec, ScheduledJob, Scheduler, SchedulerStatus};
use crate::services::snatch::{DownloadClient, SnatchRequest, Snatcher};

/// How often queue drivers pull work
pub const QUEUE_TICK: Duration = Duration::from_secs(3);

/// Per-scheduler join timeout on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const SHOW_UPDATE_CYCLE: Duration = Duration::from_secs(60 * 60);
const SUBTITLE_CYCLE: Duration = Duration::from_secs(60 * 60);

pub const DAILY_SEARCH: &str = "daily_search";
pub const BACKLOG_SEARCH: &str = "backlog_search";
pub const PROPER_FINDER: &str = "proper_finder";
pub const SHOW_UPDATER: &str = "show_updater";
pub const SUBTITLE_FINDER: &str = "subtitle_finder";

/// External collaborators the core is wired to
pub struct Collaborators {
    pub store: Arc<dyn EpisodeStore>,
    pub providers: Vec<Arc<dyn Searchable>>,
    pub download_clients: Vec<Arc<dyn DownloadClient>>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub maintainer: Arc<dyn ShowMaintainer>,
}

pub struct App {
    settings: Arc<SettingsStore>,
    store: Arc<dyn EpisodeStore>,
    aggregator: Arc<ProviderAggregator>,
    notifications: Arc<NotificationService>,
    pipeline: Arc<SearchPipeline>,
    maintainer: Arc<dyn ShowMaintainer>,
    show_queue: Arc<ShowQueue>,
    search_queue: Arc<SearchQueue>,
    forced_queue: Arc<ForcedSearchQueue>,
    snatch_queue: Arc<SnatchQueue>,
    schedulers: Vec<Scheduler>,
}

impl App {
    pub fn new(settings: SearchSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            providers,
            download_clients,
            notifiers,
            maintainer,
        } = collaborators;

        let settings = Arc::new(SettingsStore::new(settings));
        let aggregator = Arc::new(ProviderAggregator::new(providers));
        let notifications = Arc::new(NotificationService::new(notifiers));
        let snatcher = Arc::new(Snatcher::new(
            store.clone(),
            download_clients,
            notifications.clone(),
        ));

        let show_queue: Arc<ShowQueue> =
            Arc::new(JobQueue::new(QueueName::Show.as_str(), DrainMode::UntilEmpty));
        let search_queue: Arc<SearchQueue> =
            Arc::new(JobQueue::new(QueueName::Search.as_str(), DrainMode::OnePerTick));
        let forced_queue: Arc<ForcedSearchQueue> =
            Arc::new(JobQueue::new(QueueName::ForcedSearch.as_str(), DrainMode::OnePerTick));
        let snatch_queue: Arc<SnatchQueue> =
            Arc::new(JobQueue::new(QueueName::Snatch.as_str(), DrainMode::OnePerTick));

        let pipeline = Arc::new(SearchPipeline::new(
            store.clone(),
            aggregator.clone(),
            snatcher,
            snatch_queue.clone(),
            Arc::new(ManualResults::new()),
            TargetLocks::new(),
        ));

        let current = settings.snapshot();
        let mut app = Self {
            settings,
            store,
            aggregator,
            notifications,
            pipeline,
            maintainer,
            show_queue,
            search_queue,
            forced_queue,
            snatch_queue,
            schedulers: Vec::new(),
        };
        app.schedulers = app.build_schedulers(&current);
        app
    }

    fn build_schedulers(&self, settings: &SearchSettings) -> Vec<Scheduler> {
        let store = &self.settings;
        let queues: [Arc<dyn ScheduledJob>; 4] = [
            self.show_queue.clone(),
            self.search_queue.clone(),
            self.forced_queue.clone(),
            self.snatch_queue.clone(),
        ];

        let mut schedulers: Vec<Scheduler> = queues
            .into_iter()
            .map(|queue| Scheduler::new(queue, ScheduleSpec::every(QUEUE_TICK), store.clone()))
            .collect();

        schedulers.push(Scheduler::new(
            Arc::new(DailySearcher::new(self.pipeline.clone(), self.search_queue.clone())),
            ScheduleSpec::every(settings.daily_cycle()).with_run_delay(settings.daily_cycle()),
            store.clone(),
        ));

        schedulers.push(Scheduler::new(
            Arc::new(BacklogSearcher::new(self.pipeline.clone(), self.search_queue.clone())),
            ScheduleSpec::every(settings.backlog_cycle()).with_run_delay(settings.backlog_cycle()),
            store.clone(),
        ));

        let proper_cycle = settings.proper_interval.cycle();
        let proper_spec = ScheduleSpec::every(proper_cycle).with_run_delay(proper_cycle);
        schedulers.push(Scheduler::new(
            Arc::new(ProperFinder::new(self.pipeline.clone())),
            if settings.download_propers {
                proper_spec
            } else {
                proper_spec.disabled_silently()
            },
            store.clone(),
        ));

        schedulers.push(Scheduler::new(
            Arc::new(ShowUpdater::new(
                self.store.clone(),
                self.show_queue.clone(),
                self.maintainer.clone(),
            )),
            ScheduleSpec::every(SHOW_UPDATE_CYCLE).with_start_time(settings.show_update_time()),
            store.clone(),
        ));

        let subtitle_spec = ScheduleSpec::every(SUBTITLE_CYCLE).with_run_delay(SUBTITLE_CYCLE);
        schedulers.push(Scheduler::new(
            Arc::new(SubtitleFinder::new(
                self.store.clone(),
                self.show_queue.clone(),
                self.maintainer.clone(),
            )),
            if settings.use_subtitles {
                subtitle_spec
            } else {
                subtitle_spec.disabled_silently()
            },
            store.clone(),
        ));

        schedulers
    }

    /// Start every scheduler
    pub fn start(&self) {
        for scheduler in &self.schedulers {
            scheduler.start();
        }
        info!(schedulers = self.schedulers.len(), "Search core started");
    }

    /// Signal every scheduler, then join each with a timeout
    pub async fn halt(&self) {
        info!("Stopping schedulers");
        for scheduler in &self.schedulers {
            scheduler.signal_stop();
        }
        for scheduler in &self.schedulers {
            if !scheduler.join(SHUTDOWN_TIMEOUT).await {
                warn!(scheduler = scheduler.name(), "Abandoning scheduler after timeout");
            }
        }
        info!("Search core stopped");
    }

    pub fn settings(&self) -> Arc<SearchSettings> {
        self.settings.snapshot()
    }

    pub fn store(&self) -> &Arc<dyn EpisodeStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &Arc<ProviderAggregator> {
        &self.aggregator
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    pub fn scheduler(&self, name: &str) -> Option<&Scheduler> {
        self.schedulers.iter().find(|s| s.name() == name)
    }

    pub fn scheduler_status(&self) -> Vec<SchedulerStatus> {
        self.schedulers.iter().map(|s| s.status()).collect()
    }

    /// Run a scheduler's job on its next check
    pub fn force_scheduler(&self, name: &str) -> Result<(), ControlError> {
        let scheduler = self
            .scheduler(name)
            .ok_or_else(|| ControlError::NotFound(format!("scheduler {}", name)))?;
        scheduler.force_run();
        Ok(())
    }

    fn wake_queue(&self, queue: QueueName) {
        if let Some(scheduler) = self.scheduler(queue.as_str()) {
            scheduler.force_run();
        }
    }

    async fn require_episode(&self, episode_id: Uuid) -> Result<(), ControlError> {
        match self.store.load_episode(episode_id).await? {
            Some(_) => Ok(()),
            None => Err(ControlError::NotFound(format!("episode {}", episode_id))),
        }
    }

    /// Queue a forced search that snatches the best result
    pub async fn force_search(&self, episode_id: Uuid) -> Result<Uuid, ControlError> {
        self.queue_episode_search(episode_id, SearchMode::Forced).await
    }

    /// Queue a manual search whose ranked results are kept for the user
    pub async fn manual_search(&self, episode_id: Uuid) -> Result<Uuid, ControlError> {
        self.queue_episode_search(episode_id, SearchMode::Manual).await
    }

    async fn queue_episode_search(&self, episode_id: Uuid, mode: SearchMode) -> Result<Uuid, ControlError> {
        self.require_episode(episode_id).await?;
        let id = self
            .forced_queue
            .add(ForcedSearchItem::new(self.pipeline.clone(), episode_id, mode))?;
        info!(episode_id = %episode_id, mode = %mode, job_id = %id, "Queued user search");
        self.wake_queue(QueueName::ForcedSearch);
        Ok(id)
    }

    pub fn manual_results(&self, episode_id: Uuid) -> Option<ManualSearchResults> {
        self.pipeline.manual_results().get(episode_id)
    }

    /// Snatch a candidate picked from the episode's manual search results
    pub fn manual_snatch(&self, episode_id: Uuid, guid: &str) -> Result<Uuid, ControlError> {
        let (show_id, candidate) = self
            .pipeline
            .manual_results()
            .find(episode_id, guid)
            .ok_or_else(|| ControlError::NotFound(format!("result {} for episode {}", guid, episode_id)))?;

        let mut covered = candidate.episode_ids.clone();
        covered.push(episode_id);
        let request = SnatchRequest::new(show_id, candidate.episode_ids, candidate.result).forced(true);
        let id = self.pipeline.enqueue_snatch(request)?;
        self.pipeline.manual_results().forget(&covered);
        self.wake_queue(QueueName::Snatch);
        Ok(id)
    }

    pub fn pause_queue(&self, queue: QueueName) {
        match queue {
            QueueName::Show => self.show_queue.pause(),
            QueueName::Search => self.search_queue.pause(),
            QueueName::ForcedSearch => self.forced_queue.pause(),
            QueueName::Snatch => self.snatch_queue.pause(),
        }
    }

    pub fn resume_queue(&self, queue: QueueName) {
        match queue {
            QueueName::Show => self.show_queue.resume(),
            QueueName::Search => self.search_queue.resume(),
            QueueName::ForcedSearch => self.forced_queue.resume(),
            QueueName::Snatch => self.snatch_queue.resume(),
        }
    }

    pub fn is_queue_paused(&self, queue: QueueName) -> bool {
        match queue {
            QueueName::Show => self.show_queue.is_paused(),
            QueueName::Search => self.search_queue.is_paused(),
            QueueName::ForcedSearch => self.forced_queue.is_paused(),
            QueueName::Snatch => self.snatch_queue.is_paused(),
        }
    }

    /// Running, queued and recent items of every queue
    pub fn queue_status(&self) -> Vec<QueueItemView> {
        let mut items = self.show_queue.snapshot();
        items.extend(self.search_queue.snapshot());
        items.extend(self.forced_queue.snapshot());
        items.extend(self.snatch_queue.snapshot());
        items
    }

    pub fn abort_queue_item(&self, queue: QueueName, id: Uuid) -> bool {
        match queue {
            QueueName::Show => self.show_queue.abort(id),
            QueueName::Search => self.search_queue.abort(id),
            QueueName::ForcedSearch => self.forced_queue.abort(id),
            QueueName::Snatch => self.snatch_queue.abort(id),
        }
    }

    /// Queue a user-requested show action
    pub async fn queue_show_action(&self, show_id: Uuid, action: ShowAction) -> Result<Uuid, ControlError> {
        let show_name = match self.store.load_show(show_id).await? {
            Some(show) => show.name,
            None if action == ShowAction::Add => show_id.to_string(),
            None => return Err(ControlError::NotFound(format!("show {}", show_id))),
        };

        let item = ShowQueueItem::new(show_id, show_name, action, self.maintainer.clone())
            .with_priority(JobPriority::High);
        let id = self.show_queue.add(item)?;
        self.wake_queue(QueueName::Show);
        Ok(id)
    }

    /// Whether any show action for this show is queued or running
    pub fn is_in_show_queue(&self, show_id: Uuid) -> bool {
        self.show_queue.is_active(&show_target_key(show_id))
    }

    /// Swap in new settings; schedulers pick up new cycles and toggles
    pub fn reload_settings(&self, settings: SearchSettings) -> Arc<SearchSettings> {
        let next = self.settings.replace(settings);

        if let Some(s) = self.scheduler(DAILY_SEARCH) {
            s.set_cycle_time(next.daily_cycle());
        }
        if let Some(s) = self.scheduler(BACKLOG_SEARCH) {
            s.set_cycle_time(next.backlog_cycle());
        }
        if let Some(s) = self.scheduler(PROPER_FINDER) {
            s.set_cycle_time(next.proper_interval.cycle());
            if next.download_propers {
                s.enable();
            } else {
                s.disable();
            }
        }
        if let Some(s) = self.scheduler(SHOW_UPDATER) {
            s.set_start_time(next.show_update_time());
        }
        if let Some(s) = self.scheduler(SUBTITLE_FINDER) {
            if next.use_subtitles {
                s.enable();
            } else {
                s.disable();
            }
        }

        info!(
            daily_minutes = next.daily_search_frequency,
            backlog_minutes = next.backlog_frequency,
            proper_interval = ?next.proper_interval,
            "Settings reloaded"
        );
        next
    }

    /// Mark a snatched episode as downloaded and notify
    pub async fn complete_download(&self, episode_id: Uuid) -> Result<(), ControlError> {
        let episode = self
            .store
            .load_episode(episode_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("episode {}", episode_id)))?;

        if !episode.status.can_transition(EpisodeStatus::Downloaded, false) {
            return Err(ControlError::InvalidState(format!(
                "episode {} is {}, not snatched",
                episode_id, episode.status
            )));
        }

        let show = self
            .store
            .load_show(episode.tv_show_id)
            .await?
            .ok_or_else(|| anyhow!("show {} missing for episode {}", episode.tv_show_id, episode_id))?;

        self.store
            .save_episode_status(episode_id, EpisodeStatus::Downloaded, None)
            .await?;
        self.store
            .record_history(HistoryRecord::downloaded(
                episode_id,
                show.id,
                episode.quality.unwrap_or_default(),
            ))
            .await?;

        let updated = self.store.load_episode(episode_id).await?.unwrap_or(episode);
        info!(show_name = %show.name, episode = %updated.label(), "Download complete");
        self.notifications.downloaded(&show, &updated).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EpisodeRecord, MemoryStore, ShowRecord};
    use crate::error::ProviderError;
    use crate::indexer::{ProviderKind, SearchResult, SearchSpec};
    use crate::services::queues::LogMaintainer;
    use crate::services::scheduler::JobContext;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    fn app_with_episode() -> (App, Arc<MemoryStore>, ShowRecord, EpisodeRecord) {
        let store = Arc::new(MemoryStore::new());
        let show = ShowRecord::new("Dexter");
        let episode = EpisodeRecord::new(show.id, 5, 7);
        store.insert_show(show.clone());
        store.insert_episode(episode.clone());

        let app = App::new(
            SearchSettings::default(),
            Collaborators {
                store: store.clone(),
                providers: Vec::new(),
                download_clients: Vec::new(),
                notifiers: Vec::new(),
                maintainer: Arc::new(LogMaintainer),
            },
        );
        (app, store, show, episode)
    }

    #[tokio::test]
    async fn test_force_search_conflict() {
        let (app, _, _, episode) = app_with_episode();

        app.force_search(episode.id).await.unwrap();
        let err = app.force_search(episode.id).await.unwrap_err();
        assert_matches!(err, ControlError::Conflict(ref e) if e.user_message() == "already in progress");

        assert_matches!(
            app.force_search(Uuid::new_v4()).await,
            Err(ControlError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_show_actions_and_membership() {
        let (app, _, show, _) = app_with_episode();
        assert!(!app.is_in_show_queue(show.id));

        app.queue_show_action(show.id, ShowAction::Refresh).await.unwrap();
        assert!(app.is_in_show_queue(show.id));
        assert_matches!(
            app.queue_show_action(show.id, ShowAction::Rename).await,
            Err(ControlError::Conflict(_))
        );
        assert_matches!(
            app.queue_show_action(Uuid::new_v4(), ShowAction::Update).await,
            Err(ControlError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_pause_and_status() {
        let (app, _, _, episode) = app_with_episode();
        app.pause_queue(QueueName::ForcedSearch);
        assert!(app.is_queue_paused(QueueName::ForcedSearch));

        app.manual_search(episode.id).await.unwrap();
        let status = app.queue_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].queue, "forced_search");
        assert_eq!(status[0].action, "manual_search");

        app.resume_queue(QueueName::ForcedSearch);
        assert!(!app.is_queue_paused(QueueName::ForcedSearch));
    }

    #[tokio::test]
    async fn test_complete_download() {
        let (app, store, _, episode) = app_with_episode();

        assert_matches!(
            app.complete_download(episode.id).await,
            Err(ControlError::InvalidState(_))
        );

        store.set_status(episode.id, EpisodeStatus::Snatched);
        let mut events = app.notifications().subscribe();
        app.complete_download(episode.id).await.unwrap();

        let saved = store.load_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(saved.status, EpisodeStatus::Downloaded);
        assert!(saved.downloaded_at.is_some());
        assert_eq!(events.recv().await.unwrap().episode_id, episode.id);
    }

    #[tokio::test]
    async fn test_reload_settings_updates_schedulers() {
        let (app, _, _, _) = app_with_episode();
        assert!(app.scheduler(PROPER_FINDER).unwrap().spec().enabled);
        assert!(!app.scheduler(SUBTITLE_FINDER).unwrap().spec().enabled);

        let next = app.reload_settings(SearchSettings {
            daily_search_frequency: 5,
            backlog_frequency: 30,
            download_propers: false,
            use_subtitles: true,
            ..Default::default()
        });

        assert_eq!(next.daily_search_frequency, 10);
        assert_eq!(next.backlog_frequency, 720);
        assert_eq!(
            app.scheduler(DAILY_SEARCH).unwrap().spec().cycle_time,
            Duration::from_secs(600)
        );
        assert!(!app.scheduler(PROPER_FINDER).unwrap().spec().enabled);
        assert!(app.scheduler(SUBTITLE_FINDER).unwrap().spec().enabled);
    }

    #[tokio::test]
    async fn test_unknown_scheduler() {
        let (app, _, _, _) = app_with_episode();
        assert!(app.force_scheduler(DAILY_SEARCH).is_ok());
        assert_matches!(app.force_scheduler("nope"), Err(ControlError::NotFound(_)));
        assert_eq!(app.scheduler_status().len(), 9);
    }

    struct StaticProvider(Vec<SearchResult>);

    #[async_trait]
    impl Searchable for StaticProvider {
        fn id(&self) -> &str {
            "static"
        }

        fn name(&self) -> &str {
            "static"
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Torrent
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn search(&self, _spec: &SearchSpec) -> Result<Vec<SearchResult>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_manual_snatch_evicts_results() {
        let store = Arc::new(MemoryStore::new());
        let show = ShowRecord::new("Dexter");
        let episode = EpisodeRecord::new(show.id, 5, 7);
        store.insert_show(show.clone());
        store.insert_episode(episode.clone());

        let mut release = SearchResult::new("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", ProviderKind::Torrent);
        release.link = Some("magnet:?xt=urn:btih:a1".to_string());
        release.seeders = Some(20);
        release.peers = Some(25);

        let app = App::new(
            SearchSettings::default(),
            Collaborators {
                store: store.clone(),
                providers: vec![Arc::new(StaticProvider(vec![release]))],
                download_clients: Vec::new(),
                notifiers: Vec::new(),
                maintainer: Arc::new(LogMaintainer),
            },
        );

        app.manual_search(episode.id).await.unwrap();
        let ctx = JobContext::new(app.settings.snapshot());
        assert!(app.forced_queue.run_next(&ctx).await.is_some());
        assert_eq!(app.manual_results(episode.id).unwrap().candidates.len(), 1);

        app.manual_snatch(episode.id, "a1").unwrap();
        assert!(app.manual_results(episode.id).is_none());
        assert_matches!(
            app.manual_snatch(episode.id, "a1"),
            Err(ControlError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_proper_finder_waits_one_cycle() {
        let (app, _, _, _) = app_with_episode();
        let spec = app.scheduler(PROPER_FINDER).unwrap().spec();
        assert_eq!(spec.cycle_time, Duration::from_secs(24 * 60 * 60));
        assert_eq!(spec.run_delay, spec.cycle_time);
        assert_eq!(spec.start_time, None);
    }

    #[tokio::test]
    async fn test_start_and_halt() {
        let (app, _, _, _) = app_with_episode();
        app.start();
        app.halt().await;
    }
}
