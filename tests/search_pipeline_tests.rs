//! Integration tests for the search pipeline
//!
//! These drive the library API end to end with fake providers, a recording
//! download client and the in-memory store:
//! - Provider aggregation, dedupe and selection
//! - Proper searches gated on publish time
//! - Daily pass idempotence
//! - Queue priority, conflicts and cross-queue episode locking

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use snatcher::app::{App, Collaborators};
use snatcher::config::SearchSettings;
use snatcher::db::{EpisodeRecord, EpisodeStatus, EpisodeStore, MemoryStore, ShowRecord, episode_target_key};
use snatcher::error::{ControlError, HandoffError, ProviderError};
use snatcher::indexer::{ProviderAggregator, ProviderKind, SearchMode, SearchResult, SearchSpec, Searchable};
use snatcher::jobs::{DailySearcher, ManualResults, ProperFinder, SearchPipeline, backlog, search};
use snatcher::services::job_queue::{DrainMode, ItemStatus, JobPriority, JobQueue, TargetLocks};
use snatcher::services::notifications::NotificationService;
use snatcher::services::quality::Quality;
use snatcher::services::queues::{
    ForcedSearchItem, ForcedSearchQueue, LogMaintainer, SearchQueue, SearchQueueItem, ShowAction,
    ShowMaintainer, ShowQueue, ShowQueueItem, SnatchQueue,
};
use snatcher::services::scheduler::JobContext;
use snatcher::services::snatch::{DownloadClient, SnatchRequest, Snatcher};

// ============================================================================
// Fakes
// ============================================================================

struct FakeProvider {
    id: String,
    results: Vec<SearchResult>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn new(id: &str, results: Vec<SearchResult>) -> Self {
        Self {
            id: id.to_string(),
            results,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(id, Vec::new())
        }
    }
}

#[async_trait]
impl Searchable for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Torrent
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn search(&self, _spec: &SearchSpec) -> Result<Vec<SearchResult>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Status {
                provider: self.id.clone(),
                status: 503,
            });
        }
        Ok(self.results.clone())
    }
}

#[derive(Default)]
struct RecordingClient {
    snatched: Mutex<Vec<String>>,
}

#[async_trait]
impl DownloadClient for RecordingClient {
    fn name(&self) -> &str {
        "recording"
    }

    fn handles(&self, _kind: ProviderKind) -> bool {
        true
    }

    async fn snatch(&self, result: &SearchResult) -> Result<(), HandoffError> {
        self.snatched.lock().push(result.title.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingMaintainer {
    performed: Mutex<Vec<(ShowAction, Uuid)>>,
}

#[async_trait]
impl ShowMaintainer for RecordingMaintainer {
    async fn perform(&self, action: ShowAction, show_id: Uuid) -> anyhow::Result<()> {
        self.performed.lock().push((action, show_id));
        Ok(())
    }
}

struct Harness {
    client: Arc<RecordingClient>,
    snatch_queue: Arc<SnatchQueue>,
    locks: TargetLocks,
    pipeline: Arc<SearchPipeline>,
    ctx: JobContext,
}

impl Harness {
    fn new(store: Arc<MemoryStore>, providers: Vec<Arc<dyn Searchable>>) -> Self {
        let client = Arc::new(RecordingClient::default());
        let snatcher = Arc::new(Snatcher::new(
            store.clone(),
            vec![client.clone() as Arc<dyn DownloadClient>],
            Arc::new(NotificationService::default()),
        ));
        let snatch_queue: Arc<SnatchQueue> = Arc::new(JobQueue::new("snatch", DrainMode::OnePerTick));
        let locks = TargetLocks::new();
        let pipeline = Arc::new(SearchPipeline::new(
            store.clone(),
            Arc::new(ProviderAggregator::new(providers)),
            snatcher,
            snatch_queue.clone(),
            Arc::new(ManualResults::new()),
            locks.clone(),
        ));

        Self {
            client,
            snatch_queue,
            locks,
            pipeline,
            ctx: JobContext::new(Arc::new(SearchSettings::default())),
        }
    }

    /// Run every queued snatch
    async fn drain_snatches(&self) -> Vec<ItemStatus> {
        let mut statuses = Vec::new();
        while let Some((_, status)) = self.snatch_queue.run_next(&self.ctx).await {
            statuses.push(status);
        }
        statuses
    }
}

fn release(title: &str, guid: &str, size: i64) -> SearchResult {
    let mut result = SearchResult::new(title, guid, ProviderKind::Torrent);
    result.link = Some(format!("magnet:?xt=urn:btih:{}", guid));
    result.size = Some(size);
    result.seeders = Some(20);
    result.peers = Some(25);
    result
}

fn seed_episode(store: &MemoryStore, aired_at: DateTime<Utc>, status: EpisodeStatus) -> (ShowRecord, EpisodeRecord) {
    let show = ShowRecord::new("Dexter");
    let mut episode = EpisodeRecord::new(show.id, 5, 7);
    episode.aired_at = Some(aired_at);
    episode.status = status;
    store.insert_show(show.clone());
    store.insert_episode(episode.clone());
    (show, episode)
}

// ============================================================================
// Aggregation and selection
// ============================================================================

#[tokio::test]
async fn test_three_providers_dedupe_and_pick_best_quality() {
    let store = Arc::new(MemoryStore::new());
    let (show, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

    let hdtv = release("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", 1_200_000_000);
    let webdl = release("Dexter.S05E07.1080p.WEB-DL.x264-NTb", "b1", 2_400_000_000);
    let mut hdtv_again = hdtv.clone();
    hdtv_again.guid = "b2".to_string();

    let providers: Vec<Arc<dyn Searchable>> = vec![
        Arc::new(FakeProvider::new("alpha", vec![hdtv])),
        Arc::new(FakeProvider::new("beta", vec![hdtv_again, webdl])),
        Arc::new(FakeProvider::failing("gamma")),
    ];
    let harness = Harness::new(store.clone(), providers);

    let spec = SearchSpec::new(show, vec![episode.clone()], SearchMode::Backlog);
    let report = harness.pipeline.search(&spec, &harness.ctx).await.unwrap();

    assert_eq!(report.matched, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.queued, 1);

    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);
    assert_eq!(
        *harness.client.snatched.lock(),
        vec!["Dexter.S05E07.1080p.WEB-DL.x264-NTb".to_string()]
    );

    let saved = store.load_episode(episode.id).await.unwrap().unwrap();
    assert_eq!(saved.status, EpisodeStatus::Snatched);
    assert_eq!(saved.quality, Some(Quality::FullHdWebDl));
    assert!(store.was_snatched(episode.id, Quality::FullHdWebDl).await.unwrap());
}

#[tokio::test]
async fn test_no_results_leaves_episode_wanted() {
    let store = Arc::new(MemoryStore::new());
    let (show, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

    let providers: Vec<Arc<dyn Searchable>> = vec![Arc::new(FakeProvider::failing("alpha"))];
    let harness = Harness::new(store.clone(), providers);

    let spec = SearchSpec::new(show, vec![episode.clone()], SearchMode::Backlog);
    let report = harness.pipeline.search(&spec, &harness.ctx).await.unwrap();

    assert_eq!(report.queued, 0);
    assert!(harness.snatch_queue.is_empty());
    let saved = store.load_episode(episode.id).await.unwrap().unwrap();
    assert_eq!(saved.status, EpisodeStatus::Wanted);
}

// ============================================================================
// Propers
// ============================================================================

fn downloaded_episode(store: &MemoryStore, snatched_at: DateTime<Utc>) -> EpisodeRecord {
    let (_, mut episode) = seed_episode(store, snatched_at - Duration::days(1), EpisodeStatus::Downloaded);
    episode.quality = Some(Quality::HdTv);
    episode.release_name = Some("Dexter.S05E07.720p.HDTV.x264-CTU".to_string());
    episode.snatched_at = Some(snatched_at);
    episode.downloaded_at = Some(snatched_at + Duration::hours(1));
    store.insert_episode(episode.clone());
    episode
}

#[tokio::test]
async fn test_proper_newer_than_snatch_is_taken() {
    let store = Arc::new(MemoryStore::new());
    let snatched_at = Utc::now() - Duration::hours(12);
    let episode = downloaded_episode(&store, snatched_at);

    let mut proper = release("Dexter.S05E07.PROPER.720p.HDTV.x264-CTU", "p1", 1_200_000_000);
    proper.publish_date = Some(snatched_at + Duration::hours(3));
    let providers: Vec<Arc<dyn Searchable>> = vec![Arc::new(FakeProvider::new("alpha", vec![proper]))];
    let harness = Harness::new(store.clone(), providers);

    let finder = ProperFinder::new(harness.pipeline.clone());
    let report = finder.find_propers(&harness.ctx).await.unwrap();
    assert_eq!(report.queued, 1);

    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);
    let saved = store.load_episode(episode.id).await.unwrap().unwrap();
    assert_eq!(saved.status, EpisodeStatus::SnatchedProper);
    assert_eq!(saved.proper_count, 1);
}

#[tokio::test]
async fn test_proper_published_at_snatch_time_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let snatched_at = Utc::now() - Duration::hours(12);
    let episode = downloaded_episode(&store, snatched_at);

    let mut proper = release("Dexter.S05E07.PROPER.720p.HDTV.x264-CTU", "p1", 1_200_000_000);
    proper.publish_date = Some(snatched_at);
    let providers: Vec<Arc<dyn Searchable>> = vec![Arc::new(FakeProvider::new("alpha", vec![proper]))];
    let harness = Harness::new(store.clone(), providers);

    let report = ProperFinder::new(harness.pipeline.clone())
        .find_propers(&harness.ctx)
        .await
        .unwrap();

    assert_eq!(report.matched, 0);
    assert_eq!(report.queued, 0);
    let saved = store.load_episode(episode.id).await.unwrap().unwrap();
    assert_eq!(saved.status, EpisodeStatus::Downloaded);
}

// ============================================================================
// Daily searcher
// ============================================================================

#[tokio::test]
async fn test_daily_pass_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let (_, episode) = seed_episode(&store, now - Duration::hours(1), EpisodeStatus::Unaired);

    let providers: Vec<Arc<dyn Searchable>> = vec![Arc::new(FakeProvider::new(
        "alpha",
        vec![release("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", 1_200_000_000)],
    ))];
    let harness = Harness::new(store.clone(), providers);
    let search_queue: Arc<SearchQueue> = Arc::new(JobQueue::new("search", DrainMode::OnePerTick));
    let daily = DailySearcher::new(harness.pipeline.clone(), search_queue.clone());

    let first = daily.tick(&harness.ctx, now).await.unwrap();
    assert_eq!(first, vec![episode.id]);
    let promoted = store.load_episode(episode.id).await.unwrap().unwrap();
    assert_eq!(promoted.status, EpisodeStatus::Wanted);

    // Same instant again: nothing newly aired, nothing queued
    assert!(daily.tick(&harness.ctx, now).await.unwrap().is_empty());
    assert_eq!(search_queue.len(), 1);

    assert_matches!(search_queue.run_next(&harness.ctx).await, Some((_, ItemStatus::Success)));
    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);

    let later = now + Duration::minutes(40);
    assert!(daily.tick(&harness.ctx, later).await.unwrap().is_empty());
    assert!(search_queue.is_empty());
    assert_eq!(harness.client.snatched.lock().len(), 1);
}

// ============================================================================
// Queues and locking
// ============================================================================

#[tokio::test]
async fn test_show_queue_runs_high_priority_first() {
    let maintainer = Arc::new(RecordingMaintainer::default());
    let queue: Arc<ShowQueue> = Arc::new(JobQueue::new("show", DrainMode::UntilEmpty));
    let ctx = JobContext::new(Arc::new(SearchSettings::default()));
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    queue
        .add(ShowQueueItem::new(a, "A", ShowAction::Update, maintainer.clone()))
        .unwrap();
    queue
        .add(ShowQueueItem::new(b, "B", ShowAction::Refresh, maintainer.clone()).with_priority(JobPriority::High))
        .unwrap();
    queue
        .add(ShowQueueItem::new(c, "C", ShowAction::Update, maintainer.clone()))
        .unwrap();

    while queue.run_next(&ctx).await.is_some() {}

    assert_eq!(
        *maintainer.performed.lock(),
        vec![
            (ShowAction::Refresh, b),
            (ShowAction::Update, a),
            (ShowAction::Update, c),
        ]
    );
}

#[tokio::test]
async fn test_backlog_skips_episode_held_by_forced_search() {
    let store = Arc::new(MemoryStore::new());
    let (_, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

    let provider = Arc::new(FakeProvider::new(
        "alpha",
        vec![release("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", 1_200_000_000)],
    ));
    let harness = Harness::new(store.clone(), vec![provider.clone() as Arc<dyn Searchable>]);

    let guard = harness
        .locks
        .try_acquire(&[episode_target_key(episode.id)])
        .unwrap();

    let report = backlog::run_backlog_pass(&harness.pipeline, &harness.ctx).await.unwrap();
    assert_eq!(report.searched, 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

    // A forced search waits for the holder instead of skipping
    let pipeline = harness.pipeline.clone();
    let ctx = harness.ctx.clone();
    let forced = tokio::spawn(async move {
        search::run_episode_search(&pipeline, episode.id, SearchMode::Forced, &ctx).await
    });
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(!forced.is_finished());

    drop(guard);
    let report = tokio::time::timeout(StdDuration::from_secs(5), forced)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.queued, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_forced_search_supersedes_queued_backlog() {
    let store = Arc::new(MemoryStore::new());
    let (_, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

    let provider = Arc::new(FakeProvider::new(
        "alpha",
        vec![release("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", 1_200_000_000)],
    ));
    let harness = Harness::new(store.clone(), vec![provider.clone() as Arc<dyn Searchable>]);

    let search_queue: Arc<SearchQueue> = Arc::new(JobQueue::new("search", DrainMode::OnePerTick));
    let forced_queue: Arc<ForcedSearchQueue> = Arc::new(JobQueue::new("forced_search", DrainMode::OnePerTick));

    search_queue
        .add(SearchQueueItem::Backlog {
            pipeline: harness.pipeline.clone(),
        })
        .unwrap();
    // Different queue, so no conflict with the pending backlog pass
    forced_queue
        .add(ForcedSearchItem::new(harness.pipeline.clone(), episode.id, SearchMode::Forced))
        .unwrap();

    assert_matches!(forced_queue.run_next(&harness.ctx).await, Some((_, ItemStatus::Success)));
    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);

    // The backlog pass no longer finds the episode wanted
    assert_matches!(search_queue.run_next(&harness.ctx).await, Some((_, ItemStatus::Success)));
    assert!(harness.snatch_queue.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.client.snatched.lock().len(), 1);
}

#[tokio::test]
async fn test_forced_search_resnatches_same_quality() {
    let store = Arc::new(MemoryStore::new());
    let (_, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

    let providers: Vec<Arc<dyn Searchable>> = vec![Arc::new(FakeProvider::new(
        "alpha",
        vec![release("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", 1_200_000_000)],
    ))];
    let harness = Harness::new(store.clone(), providers);

    backlog::run_backlog_pass(&harness.pipeline, &harness.ctx).await.unwrap();
    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);

    // The backlog never repeats a snatch
    let report = backlog::run_backlog_pass(&harness.pipeline, &harness.ctx).await.unwrap();
    assert_eq!(report.queued, 0);

    let report = search::run_episode_search(&harness.pipeline, episode.id, SearchMode::Forced, &harness.ctx)
        .await
        .unwrap();
    assert_eq!(report.queued, 1);
    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);

    let snatches = store.history().iter().filter(|h| h.is_snatch()).count();
    assert_eq!(snatches, 2);
}

#[tokio::test]
async fn test_manual_search_then_manual_snatch() {
    let store = Arc::new(MemoryStore::new());
    let (_, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

    let providers: Vec<Arc<dyn Searchable>> = vec![Arc::new(FakeProvider::new(
        "alpha",
        vec![
            release("Dexter.S05E07.720p.HDTV.x264-CTU", "a1", 1_200_000_000),
            release("Dexter.S05E07.1080p.WEB-DL.x264-NTb", "a2", 2_400_000_000),
        ],
    ))];
    let harness = Harness::new(store.clone(), providers);

    let report = search::run_episode_search(&harness.pipeline, episode.id, SearchMode::Manual, &harness.ctx)
        .await
        .unwrap();
    assert_eq!(report.queued, 0);
    assert!(harness.snatch_queue.is_empty());

    let results = harness.pipeline.manual_results().get(episode.id).unwrap();
    let guids: Vec<&str> = results.candidates.iter().map(|c| c.result.guid.as_str()).collect();
    assert_eq!(guids, vec!["a2", "a1"]);

    // The user picks the lower-ranked candidate
    let (show_id, pick) = harness.pipeline.manual_results().find(episode.id, "a1").unwrap();
    let request = SnatchRequest::new(show_id, pick.episode_ids, pick.result).forced(true);
    harness.pipeline.enqueue_snatch(request).unwrap();
    assert_eq!(harness.drain_snatches().await, vec![ItemStatus::Success]);

    let saved = store.load_episode(episode.id).await.unwrap().unwrap();
    assert_eq!(saved.quality, Some(Quality::HdTv));
}

#[tokio::test]
async fn test_app_conflict_is_reported_as_in_progress() {
    let store = Arc::new(MemoryStore::new());
    let (show, episode) = seed_episode(&store, Utc::now() - Duration::days(30), EpisodeStatus::Wanted);

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

    app.force_search(episode.id).await.unwrap();
    let err = app.force_search(episode.id).await.unwrap_err();
    assert_matches!(&err, ControlError::Conflict(e) if e.user_message() == "already in progress");

    app.queue_show_action(show.id, ShowAction::Update).await.unwrap();
    assert!(app.is_in_show_queue(show.id));
    assert_matches!(
        app.queue_show_action(show.id, ShowAction::Refresh).await,
        Err(ControlError::Conflict(_))
    );
}
