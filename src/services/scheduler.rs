//! Periodic job scheduler
//!
//! A [`Scheduler`] owns one [`ScheduledJob`] and runs it on its own tokio
//! task, once per cycle, optionally gated to a time of day. Runs never
//! overlap. A job that fails or panics is logged and the schedule keeps
//! going.
//!
//! Each run receives a fresh [`JobContext`] holding the settings snapshot
//! taken at the start of the tick and the scheduler's cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{SearchSettings, SettingsStore};
use crate::error::SchedulerJobError;

/// Upper bound on how long the loop sleeps between due checks
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a job run gets from its scheduler
#[derive(Clone)]
pub struct JobContext {
    /// Settings snapshot for this run
    pub settings: Arc<SearchSettings>,
    /// Cancelled when the scheduler is stopped
    pub cancel: CancellationToken,
    /// The run was requested through `force_run`
    pub forced: bool,
}

impl JobContext {
    pub fn new(settings: Arc<SearchSettings>) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
            forced: false,
        }
    }
}

/// A unit of periodic work
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &JobContext) -> Result<()>;
}

/// When and whether a job fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub cycle_time: Duration,
    /// Time-of-day gate for once-a-day jobs
    pub start_time: Option<NaiveTime>,
    /// Delay before the first run after `start`
    pub run_delay: Duration,
    pub enabled: bool,
    /// Disabled schedulers with `silent` set produce no log output
    pub silent: bool,
}

impl ScheduleSpec {
    pub fn every(cycle_time: Duration) -> Self {
        Self {
            cycle_time,
            start_time: None,
            run_delay: Duration::ZERO,
            enabled: true,
            silent: false,
        }
    }

    pub fn with_start_time(mut self, start_time: Option<NaiveTime>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_run_delay(mut self, run_delay: Duration) -> Self {
        self.run_delay = run_delay;
        self
    }

    /// Disabled feature: the loop keeps ticking but does nothing
    pub fn disabled_silently(mut self) -> Self {
        self.enabled = false;
        self.silent = true;
        self
    }

    fn poll_interval(&self) -> Duration {
        self.cycle_time.min(MAX_POLL_INTERVAL).max(Duration::from_millis(10))
    }
}

/// Whether a job last fired at `last_run` is due at `now`
///
/// With a start time the job fires at most once per day, on the first
/// check after that time of day, and still no sooner than one cycle after
/// the previous run.
pub fn is_due(now: NaiveDateTime, last_run: NaiveDateTime, spec: &ScheduleSpec) -> bool {
    let cycle = chrono::Duration::from_std(spec.cycle_time).unwrap_or(chrono::Duration::MAX);
    if now - last_run < cycle {
        return false;
    }

    match spec.start_time {
        None => true,
        Some(start) => {
            let todays_start = now.date().and_time(start);
            now >= todays_start && last_run < todays_start
        }
    }
}

/// Point-in-time view of a scheduler, for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub cycle_secs: u64,
    pub start_time: Option<NaiveTime>,
    pub last_run: Option<NaiveDateTime>,
    pub force_pending: bool,
}

/// State shared between the handle and the tick loop
struct Shared {
    name: String,
    job: Arc<dyn ScheduledJob>,
    settings: Arc<SettingsStore>,
    spec: RwLock<ScheduleSpec>,
    last_run: RwLock<Option<NaiveDateTime>>,
    force_requested: AtomicBool,
    in_flight: AtomicBool,
    wake: Notify,
}

/// Periodic runner for one job
pub struct Scheduler {
    shared: Arc<Shared>,
    cancel: RwLock<Option<CancellationToken>>,
    join_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn ScheduledJob>, spec: ScheduleSpec, settings: Arc<SettingsStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: job.name().to_string(),
                job,
                settings,
                spec: RwLock::new(spec),
                last_run: RwLock::new(None),
                force_requested: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            cancel: RwLock::new(None),
            join_handle: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Begin ticking; a no-op while already running
    pub fn start(&self) {
        let mut handle = self.join_handle.write();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(scheduler = %self.shared.name, "Scheduler already running");
            return;
        }

        let spec = self.shared.spec.read().clone();
        let now = Local::now().naive_local();
        let first_due = chrono::Duration::from_std(spec.run_delay).unwrap_or(chrono::Duration::zero())
            - chrono::Duration::from_std(spec.cycle_time).unwrap_or(chrono::Duration::zero());
        self.shared.last_run.write().get_or_insert(now + first_due);

        let cancel = CancellationToken::new();
        *self.cancel.write() = Some(cancel.clone());
        *handle = Some(tokio::spawn(tick_loop(self.shared.clone(), cancel)));

        if !spec.silent {
            info!(
                scheduler = %self.shared.name,
                cycle_secs = spec.cycle_time.as_secs(),
                start_time = ?spec.start_time,
                enabled = spec.enabled,
                "Scheduler started"
            );
        }
    }

    /// Request cancellation without waiting
    pub fn signal_stop(&self) {
        if let Some(cancel) = self.cancel.read().as_ref() {
            cancel.cancel();
        }
    }

    /// Wait for the loop to finish, up to `timeout`
    ///
    /// Returns false when the in-flight run did not finish in time. The task
    /// is left to complete on its own.
    pub async fn join(&self, timeout: Duration) -> bool {
        let handle = self.join_handle.write().take();
        let Some(handle) = handle else {
            return true;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => {
                debug!(scheduler = %self.shared.name, "Scheduler stopped");
                true
            }
            Err(_) => {
                warn!(
                    scheduler = %self.shared.name,
                    timeout_secs = timeout.as_secs(),
                    "Scheduler did not stop in time"
                );
                false
            }
        }
    }

    /// Signal and join with a timeout
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.signal_stop();
        self.join(timeout).await
    }

    /// Run on the next check regardless of the cycle
    ///
    /// A request made during a run fires once right after it finishes.
    pub fn force_run(&self) {
        self.shared.force_requested.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        debug!(scheduler = %self.shared.name, "Forced run requested");
    }

    pub fn enable(&self) {
        let mut spec = self.shared.spec.write();
        spec.enabled = true;
        spec.silent = false;
    }

    pub fn disable(&self) {
        self.shared.spec.write().enabled = false;
    }

    pub fn set_cycle_time(&self, cycle_time: Duration) {
        self.shared.spec.write().cycle_time = cycle_time;
    }

    pub fn set_start_time(&self, start_time: Option<NaiveTime>) {
        self.shared.spec.write().start_time = start_time;
    }

    pub fn spec(&self) -> ScheduleSpec {
        self.shared.spec.read().clone()
    }

    pub fn is_running_job(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        let spec = self.shared.spec.read().clone();
        SchedulerStatus {
            name: self.shared.name.clone(),
            enabled: spec.enabled,
            running: self.is_running_job(),
            cycle_secs: spec.cycle_time.as_secs(),
            start_time: spec.start_time,
            last_run: *self.shared.last_run.read(),
            force_pending: self.shared.force_requested.load(Ordering::SeqCst),
        }
    }
}

async fn tick_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let spec = shared.spec.read().clone();

        if cancel.is_cancelled() {
            break;
        }

        let forced = shared.force_requested.swap(false, Ordering::SeqCst);
        let now = Local::now().naive_local();
        let last_run = shared.last_run.read().unwrap_or(now);

        if !spec.enabled {
            if forced && !spec.silent {
                debug!(scheduler = %shared.name, "Scheduler disabled, ignoring forced run");
            }
        } else if forced || is_due(now, last_run, &spec) {
            *shared.last_run.write() = Some(now);
            run_once(&shared, &cancel, forced).await;
            // A force requested during the run is handled right away
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(spec.poll_interval()) => {}
        }
    }
}

async fn run_once(shared: &Arc<Shared>, cancel: &CancellationToken, forced: bool) {
    let ctx = JobContext {
        settings: shared.settings.snapshot(),
        cancel: cancel.child_token(),
        forced,
    };

    shared.in_flight.store(true, Ordering::SeqCst);
    let job = shared.job.clone();
    let outcome = tokio::spawn(async move { job.run(&ctx).await }).await;
    shared.in_flight.store(false, Ordering::SeqCst);

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(source)) => Some(SchedulerJobError::Failed {
            job: shared.name.clone(),
            source,
        }),
        Err(join_error) if join_error.is_panic() => Some(SchedulerJobError::Panicked {
            job: shared.name.clone(),
        }),
        Err(_) => None,
    };

    if let Some(err) = failure {
        error!(scheduler = %shared.name, error = ?err, "Scheduled job failed");
    }
}
