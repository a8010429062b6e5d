//! Snatch hand-off
//!
//! [`Snatcher`] hands a selected release to a [`DownloadClient`] and, only
//! once the client confirms, advances the covered episodes to SNATCHED,
//! records history and notifies. A failed hand-off leaves the episodes as
//! they were so the next backlog pass picks them up again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SearchSettings;
use crate::db::{EpisodeRecord, EpisodeStatus, EpisodeStore, HistoryRecord};
use crate::error::HandoffError;
use crate::indexer::{ProviderKind, SearchResult};
use crate::services::notifications::NotificationService;

/// Download client contract
#[async_trait]
pub trait DownloadClient: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this client accepts releases of the given kind
    fn handles(&self, kind: ProviderKind) -> bool;

    async fn snatch(&self, result: &SearchResult) -> Result<(), HandoffError>;
}

/// Drops releases into watched directories
///
/// Magnets are written as `.magnet` files; other links are downloaded and
/// written as `.nzb` or `.torrent`.
pub struct BlackholeClient {
    nzb_dir: PathBuf,
    torrent_dir: PathBuf,
    http: Client,
}

impl BlackholeClient {
    pub fn new(nzb_dir: impl Into<PathBuf>, torrent_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            nzb_dir: nzb_dir.into(),
            torrent_dir: torrent_dir.into(),
            http: Client::builder().gzip(true).build()?,
        })
    }

    fn target_path(&self, result: &SearchResult, extension: &str) -> PathBuf {
        let dir = match result.kind {
            ProviderKind::Nzb => &self.nzb_dir,
            ProviderKind::Torrent => &self.torrent_dir,
        };
        dir.join(format!("{}.{}", sanitize_filename::sanitize(&result.title), extension))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), HandoffError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        info!(path = %path.display(), "Release written to blackhole");
        Ok(())
    }
}

/// Magnet URI for a torrent result, built from the info hash when no link is given
pub fn magnet_uri(result: &SearchResult) -> Option<String> {
    if result.is_magnet() {
        return result.link.clone();
    }
    result.info_hash.as_ref().map(|hash| {
        format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            hash,
            urlencoding::encode(&result.title)
        )
    })
}

#[async_trait]
impl DownloadClient for BlackholeClient {
    fn name(&self) -> &str {
        "blackhole"
    }

    fn handles(&self, _kind: ProviderKind) -> bool {
        true
    }

    async fn snatch(&self, result: &SearchResult) -> Result<(), HandoffError> {
        if result.kind == ProviderKind::Torrent {
            let prefer_magnet = result.is_magnet() || result.link.is_none();
            if prefer_magnet {
                let magnet = magnet_uri(result).ok_or_else(|| HandoffError::MissingLink {
                    release: result.title.clone(),
                })?;
                let path = self.target_path(result, "magnet");
                return self.write(&path, magnet.as_bytes()).await;
            }
        }

        let url = result.link.as_deref().ok_or_else(|| HandoffError::MissingLink {
            release: result.title.clone(),
        })?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| HandoffError::Fetch {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "Release download failed");
            return Err(HandoffError::Rejected {
                client: self.name().to_string(),
                release: result.title.clone(),
            });
        }

        let body = response.bytes().await.map_err(|source| HandoffError::Fetch {
            url: url.to_string(),
            source,
        })?;

        let extension = match result.kind {
            ProviderKind::Nzb => "nzb",
            ProviderKind::Torrent => "torrent",
        };
        let path = self.target_path(result, extension);
        self.write(&path, &body).await
    }
}

/// A release chosen for one or more episodes of a show
#[derive(Debug, Clone, Serialize)]
pub struct SnatchRequest {
    pub show_id: Uuid,
    pub episode_ids: Vec<Uuid>,
    pub result: SearchResult,
    /// User-initiated: may re-snatch snatched or downloaded episodes
    pub forced: bool,
}

impl SnatchRequest {
    pub fn new(show_id: Uuid, episode_ids: Vec<Uuid>, result: SearchResult) -> Self {
        Self {
            show_id,
            episode_ids,
            result,
            forced: false,
        }
    }

    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }
}

/// What happened to a snatch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnatchOutcome {
    Snatched { status: EpisodeStatus, episodes: usize },
    /// The episodes no longer need this release
    Skipped { reason: String },
}

/// Performs snatches against the configured download clients
pub struct Snatcher {
    store: Arc<dyn EpisodeStore>,
    clients: Vec<Arc<dyn DownloadClient>>,
    notifications: Arc<NotificationService>,
}

impl Snatcher {
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        clients: Vec<Arc<dyn DownloadClient>>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            store,
            clients,
            notifications,
        }
    }

    fn client_for(&self, kind: ProviderKind) -> Option<&Arc<dyn DownloadClient>> {
        self.clients.iter().find(|c| c.handles(kind))
    }

    /// Hand the release off and persist the new episode state
    ///
    /// Episode state is re-read first: an episode that stopped needing the
    /// release since it was selected turns the request into a no-op.
    pub async fn snatch(&self, request: &SnatchRequest, settings: &SearchSettings) -> Result<SnatchOutcome> {
        let result = &request.result;
        let show = self
            .store
            .load_show(request.show_id)
            .await?
            .with_context(|| format!("Show {} not found", request.show_id))?;

        let mut episodes = Vec::with_capacity(request.episode_ids.len());
        for id in &request.episode_ids {
            let episode = self
                .store
                .load_episode(*id)
                .await?
                .with_context(|| format!("Episode {} not found", id))?;
            episodes.push(episode);
        }

        let status = if result.is_proper()
            && episodes.iter().all(|e| e.status.is_downloaded())
        {
            EpisodeStatus::SnatchedProper
        } else {
            EpisodeStatus::Snatched
        };

        if let Some(reason) = self.skip_reason(&episodes, status, result, request.forced).await? {
            debug!(
                show_name = %show.name,
                release = %result.title,
                reason = %reason,
                "Snatch skipped"
            );
            return Ok(SnatchOutcome::Skipped { reason });
        }

        let client = self
            .client_for(result.kind)
            .ok_or_else(|| HandoffError::Rejected {
                client: "none".to_string(),
                release: result.title.clone(),
            })?;

        match tokio::time::timeout(settings.snatch_timeout, client.snatch(result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    show_name = %show.name,
                    release = %result.title,
                    client = client.name(),
                    error = %e,
                    "Hand-off failed, episodes stay wanted"
                );
                return Err(e.into());
            }
            Err(_) => {
                let e = HandoffError::Timeout {
                    client: client.name().to_string(),
                    after: settings.snatch_timeout,
                };
                warn!(
                    show_name = %show.name,
                    release = %result.title,
                    error = %e,
                    "Hand-off timed out, episodes stay wanted"
                );
                return Err(e.into());
            }
        }

        // The client already has the release, so one episode's store error
        // must not stop the rest from being marked
        let proper = status == EpisodeStatus::SnatchedProper;
        let mut persisted = 0;
        for episode in &episodes {
            if let Err(e) = self
                .store
                .save_episode_status(episode.id, status, Some(result))
                .await
            {
                warn!(
                    episode_id = %episode.id,
                    release = %result.title,
                    error = %e,
                    "Failed to save snatched status"
                );
                continue;
            }
            persisted += 1;

            if let Err(e) = self
                .store
                .record_history(HistoryRecord::snatched(episode.id, show.id, result, proper))
                .await
            {
                warn!(episode_id = %episode.id, error = %e, "Failed to record snatch history");
            }

            let updated = match self.store.load_episode(episode.id).await {
                Ok(Some(updated)) => updated,
                _ => episode.clone(),
            };
            self.notifications.snatched(&show, &updated, result).await;
        }

        info!(
            show_name = %show.name,
            release = %result.title,
            quality = %result.quality(),
            provider = %result.provider_id,
            episodes = persisted,
            status = %status,
            "Release snatched"
        );

        Ok(SnatchOutcome::Snatched {
            status,
            episodes: persisted,
        })
    }

    async fn skip_reason(
        &self,
        episodes: &[EpisodeRecord],
        status: EpisodeStatus,
        result: &SearchResult,
        forced: bool,
    ) -> Result<Option<String>> {
        for episode in episodes {
            if !episode.status.can_transition(status, forced) {
                return Ok(Some(format!(
                    "{} is {}, not {}",
                    episode.label(),
                    episode.status,
                    if forced { "snatchable" } else { "wanted" }
                )));
            }
            // Propers are gated by the strictly-newer rule instead
            if !forced
                && status == EpisodeStatus::Snatched
                && self.store.was_snatched(episode.id, result.quality()).await?
            {
                return Ok(Some(format!(
                    "{} was already snatched at {}",
                    episode.label(),
                    result.quality()
                )));
            }
        }
        Ok(None)
    }
}
