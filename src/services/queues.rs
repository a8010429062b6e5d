//! Application-specific work queues
//!
//! Concrete [`QueueItem`]s for the four queues the core runs, built on the
//! generic [`JobQueue`]:
//!
//! | queue           | target                  | items                           |
//! |-----------------|-------------------------|---------------------------------|
//! | `show`          | `show:{id}`             | add/remove/update/refresh/...   |
//! | `search`        | `daily` / `backlog`     | one automatic search pass       |
//! | `forced_search` | `episode:{id}`          | user forced/manual searches     |
//! | `snatch`        | `episode:{id}` per ep.  | hand-off of a selected release  |

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::job_queue::{JobPriority, JobQueue, QueueItem};
use super::scheduler::JobContext;
use super::snatch::{SnatchRequest, Snatcher};
use crate::db::{episode_target_key, show_target_key};
use crate::indexer::SearchMode;
use crate::jobs::{SearchPipeline, backlog, daily_search, search};

pub const DAILY_TARGET: &str = "daily";
pub const BACKLOG_TARGET: &str = "backlog";

/// The queues the control surface can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Show,
    Search,
    ForcedSearch,
    Snatch,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Show,
        QueueName::Search,
        QueueName::ForcedSearch,
        QueueName::Snatch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Show => "show",
            QueueName::Search => "search",
            QueueName::ForcedSearch => "forced_search",
            QueueName::Snatch => "snatch",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "show" => Ok(QueueName::Show),
            "search" => Ok(QueueName::Search),
            "forced_search" | "manual_search" => Ok(QueueName::ForcedSearch),
            "snatch" => Ok(QueueName::Snatch),
            other => Err(format!("unknown queue '{}'", other)),
        }
    }
}

/// Structural work on a show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowAction {
    Add,
    Remove,
    Update,
    Refresh,
    Rename,
    Subtitle,
}

impl ShowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ShowAction::Add => "add",
            ShowAction::Remove => "remove",
            ShowAction::Update => "update",
            ShowAction::Refresh => "refresh",
            ShowAction::Rename => "rename",
            ShowAction::Subtitle => "subtitle",
        }
    }
}

impl FromStr for ShowAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "add" => Ok(ShowAction::Add),
            "remove" => Ok(ShowAction::Remove),
            "update" => Ok(ShowAction::Update),
            "refresh" => Ok(ShowAction::Refresh),
            "rename" => Ok(ShowAction::Rename),
            "subtitle" => Ok(ShowAction::Subtitle),
            other => Err(format!("unknown show action '{}'", other)),
        }
    }
}

/// Performs the on-disk and metadata side of show actions
#[async_trait]
pub trait ShowMaintainer: Send + Sync {
    async fn perform(&self, action: ShowAction, show_id: Uuid) -> Result<()>;
}

/// Maintainer that only records the action in the log
pub struct LogMaintainer;

#[async_trait]
impl ShowMaintainer for LogMaintainer {
    async fn perform(&self, action: ShowAction, show_id: Uuid) -> Result<()> {
        info!(show_id = %show_id, action = action.as_str(), "Show action performed");
        Ok(())
    }
}

pub struct ShowQueueItem {
    pub show_id: Uuid,
    pub show_name: String,
    pub action: ShowAction,
    pub priority: JobPriority,
    maintainer: Arc<dyn ShowMaintainer>,
}

impl ShowQueueItem {
    pub fn new(
        show_id: Uuid,
        show_name: impl Into<String>,
        action: ShowAction,
        maintainer: Arc<dyn ShowMaintainer>,
    ) -> Self {
        Self {
            show_id,
            show_name: show_name.into(),
            action,
            priority: JobPriority::Normal,
            maintainer,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl QueueItem for ShowQueueItem {
    fn target_keys(&self) -> Vec<String> {
        vec![show_target_key(self.show_id)]
    }

    fn action(&self) -> &str {
        self.action.as_str()
    }

    fn describe(&self) -> String {
        format!("{} {}", self.action.as_str(), self.show_name)
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<()> {
        self.maintainer.perform(self.action, self.show_id).await
    }
}

/// An automatic search pass
pub enum SearchQueueItem {
    /// Newly aired episodes picked when the pass was queued
    Daily {
        pipeline: Arc<SearchPipeline>,
        episode_ids: Vec<Uuid>,
    },
    /// Every wanted episode past the daily lookback
    Backlog { pipeline: Arc<SearchPipeline> },
}

#[async_trait]
impl QueueItem for SearchQueueItem {
    fn target_keys(&self) -> Vec<String> {
        match self {
            SearchQueueItem::Daily { .. } => vec![DAILY_TARGET.to_string()],
            SearchQueueItem::Backlog { .. } => vec![BACKLOG_TARGET.to_string()],
        }
    }

    fn action(&self) -> &str {
        match self {
            SearchQueueItem::Daily { .. } => "daily_search",
            SearchQueueItem::Backlog { .. } => "backlog_search",
        }
    }

    fn describe(&self) -> String {
        match self {
            SearchQueueItem::Daily { episode_ids, .. } => {
                format!("daily search for {} episodes", episode_ids.len())
            }
            SearchQueueItem::Backlog { .. } => "backlog search".to_string(),
        }
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        match self {
            SearchQueueItem::Daily {
                pipeline,
                episode_ids,
            } => daily_search::run_daily_pass(pipeline, episode_ids, ctx).await?,
            SearchQueueItem::Backlog { pipeline } => backlog::run_backlog_pass(pipeline, ctx).await?,
        };
        Ok(())
    }
}

/// A user-requested search for one episode
pub struct ForcedSearchItem {
    pub episode_id: Uuid,
    /// `Forced` snatches the winner, `Manual` stores the ranked candidates
    pub mode: SearchMode,
    pipeline: Arc<SearchPipeline>,
}

impl ForcedSearchItem {
    pub fn new(pipeline: Arc<SearchPipeline>, episode_id: Uuid, mode: SearchMode) -> Self {
        Self {
            episode_id,
            mode,
            pipeline,
        }
    }
}

#[async_trait]
impl QueueItem for ForcedSearchItem {
    fn target_keys(&self) -> Vec<String> {
        vec![episode_target_key(self.episode_id)]
    }

    fn action(&self) -> &str {
        match self.mode {
            SearchMode::Manual => "manual_search",
            _ => "forced_search",
        }
    }

    fn describe(&self) -> String {
        format!("{} search for episode {}", self.mode, self.episode_id)
    }

    fn priority(&self) -> JobPriority {
        JobPriority::High
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        search::run_episode_search(&self.pipeline, self.episode_id, self.mode, ctx).await?;
        Ok(())
    }
}

/// Hand-off of one selected release
pub struct SnatchItem {
    pub request: SnatchRequest,
    snatcher: Arc<Snatcher>,
}

impl SnatchItem {
    pub fn new(snatcher: Arc<Snatcher>, request: SnatchRequest) -> Self {
        Self { request, snatcher }
    }
}

#[async_trait]
impl QueueItem for SnatchItem {
    fn target_keys(&self) -> Vec<String> {
        self.request
            .episode_ids
            .iter()
            .map(|id| episode_target_key(*id))
            .collect()
    }

    fn action(&self) -> &str {
        "snatch"
    }

    fn describe(&self) -> String {
        format!("snatch {}", self.request.result.title)
    }

    fn priority(&self) -> JobPriority {
        if self.request.forced {
            JobPriority::High
        } else {
            JobPriority::Normal
        }
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        self.snatcher.snatch(&self.request, &ctx.settings).await?;
        Ok(())
    }
}

pub type ShowQueue = JobQueue<ShowQueueItem>;
pub type SearchQueue = JobQueue<SearchQueueItem>;
pub type ForcedSearchQueue = JobQueue<ForcedSearchItem>;
pub type SnatchQueue = JobQueue<SnatchItem>;
