//! Error taxonomy for the search, snatch and scheduling core
//!
//! Errors are local to the unit of work that produced them: a provider
//! failure is excluded from the aggregate, a hand-off failure leaves the
//! episode wanted, a job failure is swallowed at the scheduler boundary.
//! Only [`QueueError::Conflict`] is surfaced synchronously to callers.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single content provider during a search
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("provider {provider} request failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("provider {provider} returned HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("provider {provider} returned an unparseable response: {message}")]
    Parse { provider: String, message: String },

    #[error("provider {provider} rejected the request: {message}")]
    Rejected { provider: String, message: String },

    #[error("search on provider {provider} was cancelled")]
    Cancelled { provider: String },

    #[error("search task for provider {provider} panicked")]
    Panicked { provider: String },
}

impl ProviderError {
    /// Identifier of the provider that failed
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Timeout { provider, .. }
            | ProviderError::Http { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::Parse { provider, .. }
            | ProviderError::Rejected { provider, .. }
            | ProviderError::Cancelled { provider }
            | ProviderError::Panicked { provider } => provider,
        }
    }
}

/// Enqueue rejected by a job queue
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// An item for the same target is already queued or running
    #[error("{target} is already queued or in progress on the {queue} queue")]
    Conflict { queue: String, target: String },
}

impl QueueError {
    /// Message shown to users for manual actions that hit a conflict
    pub fn user_message(&self) -> &'static str {
        match self {
            QueueError::Conflict { .. } => "already in progress",
        }
    }
}

/// Failure handing a release to a download client or blackhole
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("download client {client} rejected {release}")]
    Rejected { client: String, release: String },

    #[error("download client {client} timed out after {after:?}")]
    Timeout { client: String, after: Duration },

    #[error("release {release} has no usable download link")]
    MissingLink { release: String },

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("blackhole write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure inside a scheduled job's run, logged at the scheduler boundary
#[derive(Debug, Error)]
pub enum SchedulerJobError {
    #[error("job {job} failed: {source:#}")]
    Failed {
        job: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job} panicked")]
    Panicked { job: String },
}

/// Failure of a control-surface action requested by the UI layer
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Conflict(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
