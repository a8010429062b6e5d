//! Priority job queue with per-target mutual exclusion
//!
//! Items are drawn strictly by priority (high before normal before low) and
//! FIFO within a priority. An item names the targets it mutates; adding an
//! item whose targets overlap a queued or running item fails with
//! [`QueueError::Conflict`].
//!
//! A queue is driven by a [`Scheduler`](super::scheduler::Scheduler) through
//! its [`ScheduledJob`] impl. Every item ends up in a terminal state or stays
//! queued while the queue is paused or stopped.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::scheduler::{JobContext, ScheduledJob};
use crate::error::QueueError;

/// Terminal items kept for introspection
pub const HISTORY_LIMIT: usize = 100;

/// Job priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

/// Lifecycle of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    InProgress,
    Success,
    Failed,
    Aborted,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Failed | ItemStatus::Aborted)
    }
}

/// Work that can be placed on a [`JobQueue`]
#[async_trait]
pub trait QueueItem: Send + Sync + 'static {
    /// Resources this item mutates, usually exactly one
    fn target_keys(&self) -> Vec<String>;

    /// Short action name for logs and status, e.g. `backlog_search`
    fn action(&self) -> &str;

    fn describe(&self) -> String;

    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()>;
}

/// An item and its bookkeeping
pub struct Job<T> {
    pub id: Uuid,
    pub priority: JobPriority,
    pub payload: Arc<T>,
    pub status: ItemStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl<T: QueueItem> Job<T> {
    fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: payload.priority(),
            payload: Arc::new(payload),
            status: ItemStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            message: None,
        }
    }

    fn view(&self, queue: &str) -> QueueItemView {
        QueueItemView {
            id: self.id,
            queue: queue.to_string(),
            action: self.payload.action().to_string(),
            description: self.payload.describe(),
            target_keys: self.payload.target_keys(),
            priority: self.priority,
            status: self.status,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            message: self.message.clone(),
        }
    }
}

/// Serializable snapshot of one item
#[derive(Debug, Clone, Serialize)]
pub struct QueueItemView {
    pub id: Uuid,
    pub queue: String,
    pub action: String,
    pub description: String,
    pub target_keys: Vec<String>,
    pub priority: JobPriority,
    pub status: ItemStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// How many items one scheduler tick executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// At most one item per tick
    OnePerTick,
    /// Keep pulling until the queue is empty, paused or cancelled
    UntilEmpty,
}

struct QueueState<T> {
    queued: BTreeMap<(Reverse<JobPriority>, u64), Job<T>>,
    in_progress: HashMap<Uuid, Job<T>>,
    history: VecDeque<Job<T>>,
    next_seq: u64,
    paused: bool,
}

impl<T: QueueItem> QueueState<T> {
    fn active_keys(&self) -> HashSet<String> {
        self.queued
            .values()
            .chain(self.in_progress.values())
            .flat_map(|job| job.payload.target_keys())
            .collect()
    }

    fn push_history(&mut self, job: Job<T>) {
        self.history.push_back(job);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}

/// A named priority queue of [`QueueItem`]s
pub struct JobQueue<T> {
    name: String,
    drain: DrainMode,
    state: Mutex<QueueState<T>>,
}

impl<T: QueueItem> JobQueue<T> {
    pub fn new(name: impl Into<String>, drain: DrainMode) -> Self {
        Self {
            name: name.into(),
            drain,
            state: Mutex::new(QueueState {
                queued: BTreeMap::new(),
                in_progress: HashMap::new(),
                history: VecDeque::new(),
                next_seq: 0,
                paused: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an item unless one of its targets is already active
    pub fn add(&self, item: T) -> Result<Uuid, QueueError> {
        let mut state = self.state.lock();

        let active = state.active_keys();
        if let Some(target) = item.target_keys().into_iter().find(|k| active.contains(k)) {
            debug!(queue = %self.name, target = %target, action = item.action(), "Enqueue conflict");
            return Err(QueueError::Conflict {
                queue: self.name.clone(),
                target,
            });
        }

        let job = Job::new(item);
        let id = job.id;
        let seq = state.next_seq;
        state.next_seq += 1;

        debug!(
            queue = %self.name,
            job_id = %id,
            priority = ?job.priority,
            action = job.payload.action(),
            "Job submitted"
        );
        state.queued.insert((Reverse(job.priority), seq), job);
        Ok(id)
    }

    /// Whether a queued or running item covers `target`
    pub fn is_active(&self, target: &str) -> bool {
        let state = self.state.lock();
        state
            .queued
            .values()
            .chain(state.in_progress.values())
            .any(|job| job.payload.target_keys().iter().any(|k| k == target))
    }

    /// Items matching `predicate` that are queued or running
    pub fn find_active(&self, predicate: impl Fn(&T) -> bool) -> Vec<QueueItemView> {
        let state = self.state.lock();
        state
            .in_progress
            .values()
            .chain(state.queued.values())
            .filter(|job| predicate(&job.payload))
            .map(|job| job.view(&self.name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
        info!(queue = %self.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
        info!(queue = %self.name, "Queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Abort a queued item; running items cannot be aborted
    pub fn abort(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let key = state
            .queued
            .iter()
            .find(|(_, job)| job.id == id)
            .map(|(key, _)| *key);

        let Some(mut job) = key.and_then(|k| state.queued.remove(&k)) else {
            return false;
        };
        job.status = ItemStatus::Aborted;
        job.finished_at = Some(Utc::now());
        info!(queue = %self.name, job_id = %id, "Job aborted");
        state.push_history(job);
        true
    }

    /// Running items first, then queued in dequeue order, then history newest first
    pub fn snapshot(&self) -> Vec<QueueItemView> {
        let state = self.state.lock();
        state
            .in_progress
            .values()
            .chain(state.queued.values())
            .chain(state.history.iter().rev())
            .map(|job| job.view(&self.name))
            .collect()
    }

    /// Execute the highest-priority queued item, if any and not paused
    pub async fn run_next(&self, ctx: &JobContext) -> Option<(Uuid, ItemStatus)> {
        let (id, payload) = {
            let mut state = self.state.lock();
            if state.paused {
                return None;
            }
            let (_, mut job) = state.queued.pop_first()?;
            job.status = ItemStatus::InProgress;
            job.started_at = Some(Utc::now());
            let entry = (job.id, job.payload.clone());
            state.in_progress.insert(job.id, job);
            entry
        };

        debug!(queue = %self.name, job_id = %id, action = payload.action(), "Processing job");

        let task_ctx = ctx.clone();
        let outcome = tokio::spawn(async move { payload.execute(&task_ctx).await }).await;

        let (status, message) = match outcome {
            Ok(Ok(())) => (ItemStatus::Success, None),
            Ok(Err(e)) => (ItemStatus::Failed, Some(format!("{:#}", e))),
            Err(join_error) if join_error.is_panic() => {
                (ItemStatus::Failed, Some("job panicked".to_string()))
            }
            Err(_) => (ItemStatus::Aborted, Some("job cancelled".to_string())),
        };

        let mut state = self.state.lock();
        if let Some(mut job) = state.in_progress.remove(&id) {
            match &message {
                Some(message) => warn!(
                    queue = %self.name,
                    job_id = %id,
                    action = job.payload.action(),
                    error = %message,
                    "Job failed"
                ),
                None => debug!(queue = %self.name, job_id = %id, "Job completed"),
            }
            job.status = status;
            job.message = message;
            job.finished_at = Some(Utc::now());
            state.push_history(job);
        }

        Some((id, status))
    }
}

#[async_trait]
impl<T: QueueItem> ScheduledJob for JobQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &JobContext) -> Result<()> {
        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if self.run_next(ctx).await.is_none() || self.drain == DrainMode::OnePerTick {
                break;
            }
        }
        Ok(())
    }
}

/// Exclusive locks on target keys shared across queues
///
/// Queues only exclude their own items. Work in different queues that must
/// not touch the same episode at the same time takes these locks.
#[derive(Clone, Default)]
pub struct TargetLocks {
    held: Arc<Mutex<HashSet<String>>>,
    released: Arc<Notify>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every key, or none if any is held
    pub fn try_acquire(&self, keys: &[String]) -> Option<TargetGuard> {
        let mut held = self.held.lock();
        if keys.iter().any(|k| held.contains(k)) {
            return None;
        }
        held.extend(keys.iter().cloned());
        Some(TargetGuard {
            keys: keys.to_vec(),
            locks: self.clone(),
        })
    }

    /// Wait until every key is free; `None` if cancelled first
    pub async fn acquire(&self, keys: &[String], cancel: &CancellationToken) -> Option<TargetGuard> {
        loop {
            let released = self.released.notified();
            if let Some(guard) = self.try_acquire(keys) {
                return Some(guard);
            }
            tokio::select! {
                _ = released => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }
}

/// Releases its keys on drop
pub struct TargetGuard {
    keys: Vec<String>,
    locks: TargetLocks,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchSettings;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct TestItem {
        key: String,
        priority: JobPriority,
        fail: bool,
        panic: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl TestItem {
        fn new(key: &str, priority: JobPriority, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                key: key.to_string(),
                priority,
                fail: false,
                panic: false,
                log: log.clone(),
            }
        }
    }

    #[async_trait]
    impl QueueItem for TestItem {
        fn target_keys(&self) -> Vec<String> {
            vec![self.key.clone()]
        }

        fn action(&self) -> &str {
            "test"
        }

        fn describe(&self) -> String {
            format!("test {}", self.key)
        }

        fn priority(&self) -> JobPriority {
            self.priority
        }

        async fn execute(&self, _ctx: &JobContext) -> Result<()> {
            self.log.lock().push(self.key.clone());
            if self.panic {
                panic!("boom");
            }
            if self.fail {
                anyhow::bail!("provider exploded");
            }
            Ok(())
        }
    }

    fn ctx() -> JobContext {
        JobContext::new(Arc::new(SearchSettings::default()))
    }

    fn queue() -> (JobQueue<TestItem>, Arc<Mutex<Vec<String>>>) {
        (
            JobQueue::new("test", DrainMode::OnePerTick),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    #[test]
    fn test_conflicting_target_rejected() {
        let (queue, log) = queue();
        queue.add(TestItem::new("episode:1", JobPriority::Low, &log)).unwrap();

        let err = queue
            .add(TestItem::new("episode:1", JobPriority::High, &log))
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::Conflict {
                queue: "test".to_string(),
                target: "episode:1".to_string()
            }
        );
        assert_eq!(err.user_message(), "already in progress");

        assert!(queue.add(TestItem::new("episode:2", JobPriority::Low, &log)).is_ok());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_target_free_again_after_completion() {
        let (queue, log) = queue();
        queue.add(TestItem::new("daily", JobPriority::Normal, &log)).unwrap();
        assert!(queue.is_active("daily"));

        assert_matches!(queue.run_next(&ctx()).await, Some((_, ItemStatus::Success)));
        assert!(!queue.is_active("daily"));
        assert!(queue.add(TestItem::new("daily", JobPriority::Normal, &log)).is_ok());
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let (queue, log) = queue();
        queue.add(TestItem::new("low", JobPriority::Low, &log)).unwrap();
        queue.add(TestItem::new("normal-1", JobPriority::Normal, &log)).unwrap();
        queue.add(TestItem::new("high", JobPriority::High, &log)).unwrap();
        queue.add(TestItem::new("normal-2", JobPriority::Normal, &log)).unwrap();

        while queue.run_next(&ctx()).await.is_some() {}

        assert_eq!(
            *log.lock(),
            vec!["high", "normal-1", "normal-2", "low"]
        );
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_terminal() {
        let (queue, log) = queue();
        let mut failing = TestItem::new("a", JobPriority::Normal, &log);
        failing.fail = true;
        let mut panicking = TestItem::new("b", JobPriority::Normal, &log);
        panicking.panic = true;
        queue.add(failing).unwrap();
        queue.add(panicking).unwrap();

        assert_matches!(queue.run_next(&ctx()).await, Some((_, ItemStatus::Failed)));
        assert_matches!(queue.run_next(&ctx()).await, Some((_, ItemStatus::Failed)));
        assert!(queue.run_next(&ctx()).await.is_none());

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|v| v.status == ItemStatus::Failed));
        assert_eq!(snapshot[1].message.as_deref(), Some("provider exploded"));
        assert!(!queue.is_active("a"));
        assert!(!queue.is_active("b"));
    }

    #[tokio::test]
    async fn test_pause_keeps_items_queued() {
        let (queue, log) = queue();
        queue.add(TestItem::new("a", JobPriority::Normal, &log)).unwrap();
        queue.pause();

        assert!(queue.run_next(&ctx()).await.is_none());
        assert_eq!(queue.len(), 1);

        queue.resume();
        assert!(queue.run_next(&ctx()).await.is_some());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_abort_queued_item() {
        let (queue, log) = queue();
        let id = queue.add(TestItem::new("a", JobPriority::Normal, &log)).unwrap();

        assert!(queue.abort(id));
        assert!(!queue.abort(id));
        assert!(queue.run_next(&ctx()).await.is_none());
        assert!(log.lock().is_empty());

        let snapshot = queue.snapshot();
        assert_eq!(snapshot[0].status, ItemStatus::Aborted);
        assert!(queue.add(TestItem::new("a", JobPriority::Normal, &log)).is_ok());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (queue, log) = queue();
        for i in 0..(HISTORY_LIMIT + 20) {
            queue.add(TestItem::new(&i.to_string(), JobPriority::Normal, &log)).unwrap();
            queue.run_next(&ctx()).await;
        }
        assert_eq!(queue.snapshot().len(), HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_drain_mode_as_scheduled_job() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let one = JobQueue::new("one", DrainMode::OnePerTick);
        let all = JobQueue::new("all", DrainMode::UntilEmpty);
        for key in ["a", "b", "c"] {
            one.add(TestItem::new(key, JobPriority::Normal, &log)).unwrap();
            all.add(TestItem::new(key, JobPriority::Normal, &log)).unwrap();
        }

        one.run(&ctx()).await.unwrap();
        all.run(&ctx()).await.unwrap();
        assert_eq!(one.len(), 2);
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_target_locks() {
        let locks = TargetLocks::new();
        let keys = vec!["episode:1".to_string()];

        let guard = locks.try_acquire(&keys).unwrap();
        assert!(locks.try_acquire(&keys).is_none());
        assert!(locks.is_held("episode:1"));

        let waiter = {
            let locks = locks.clone();
            let keys = keys.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                locks.acquire(&keys, &cancel).await.is_some()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap());
        assert!(!locks.is_held("episode:1"));
    }

    #[tokio::test]
    async fn test_target_lock_wait_cancelled() {
        let locks = TargetLocks::new();
        let keys = vec!["episode:1".to_string()];
        let _guard = locks.try_acquire(&keys).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(locks.acquire(&keys, &cancel).await.is_none());
    }
}
