//! Snatch and download notifications
//!
//! Notifier back-ends are external collaborators. The core calls them after a
//! successful status change and never lets their failures leak back into the
//! search or snatch state machine. Every notification is also broadcast as a
//! [`NotificationEvent`] for in-process subscribers.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{EpisodeRecord, ShowRecord};
use crate::indexer::SearchResult;
use crate::services::quality::Quality;

/// Broadcast channel capacity
const CHANNEL_CAPACITY: usize = 256;

/// Type of notification event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Snatch,
    Download,
}

/// Event broadcast for every notification sent
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub episode_id: Uuid,
    pub show_name: String,
    pub episode: String,
    pub release_name: Option<String>,
    pub quality: Option<Quality>,
    pub provider: Option<String>,
    pub at: DateTime<Utc>,
}

/// A notification back-end
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify_snatch(
        &self,
        show: &ShowRecord,
        episode: &EpisodeRecord,
        result: &SearchResult,
    ) -> Result<()>;

    async fn notify_download(&self, show: &ShowRecord, episode: &EpisodeRecord) -> Result<()>;
}

/// Notifier that writes to the application log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify_snatch(
        &self,
        show: &ShowRecord,
        episode: &EpisodeRecord,
        result: &SearchResult,
    ) -> Result<()> {
        info!(
            show_name = %show.name,
            episode = %episode.label(),
            release = %result.title,
            quality = %result.quality(),
            provider = %result.provider_id,
            "Snatched"
        );
        Ok(())
    }

    async fn notify_download(&self, show: &ShowRecord, episode: &EpisodeRecord) -> Result<()> {
        info!(show_name = %show.name, episode = %episode.label(), "Downloaded");
        Ok(())
    }
}

/// Fans notifications out to every configured back-end
pub struct NotificationService {
    notifiers: Vec<Arc<dyn Notifier>>,
    event_tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationService {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { notifiers, event_tx }
    }

    /// Subscribe to notification events
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.event_tx.subscribe()
    }

    pub async fn snatched(&self, show: &ShowRecord, episode: &EpisodeRecord, result: &SearchResult) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify_snatch(show, episode, result).await {
                warn!(
                    notifier = notifier.name(),
                    episode_id = %episode.id,
                    error = %e,
                    "Snatch notification failed"
                );
            }
        }

        self.broadcast(NotificationEvent {
            kind: NotificationKind::Snatch,
            episode_id: episode.id,
            show_name: show.name.clone(),
            episode: episode.label(),
            release_name: Some(result.title.clone()),
            quality: Some(result.quality()),
            provider: Some(result.provider_id.clone()),
            at: Utc::now(),
        });
    }

    pub async fn downloaded(&self, show: &ShowRecord, episode: &EpisodeRecord) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify_download(show, episode).await {
                warn!(
                    notifier = notifier.name(),
                    episode_id = %episode.id,
                    error = %e,
                    "Download notification failed"
                );
            }
        }

        self.broadcast(NotificationEvent {
            kind: NotificationKind::Download,
            episode_id: episode.id,
            show_name: show.name.clone(),
            episode: episode.label(),
            release_name: episode.release_name.clone(),
            quality: episode.quality,
            provider: None,
            at: Utc::now(),
        });
    }

    fn broadcast(&self, event: NotificationEvent) {
        // No subscribers is fine
        if self.event_tx.send(event).is_err() {
            debug!("No notification subscribers");
        }
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(vec![Arc::new(LogNotifier)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::ProviderKind;

    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        fn name(&self) -> &str {
            "broken"
        }

        async fn notify_snatch(&self, _: &ShowRecord, _: &EpisodeRecord, _: &SearchResult) -> Result<()> {
            anyhow::bail!("smtp unreachable")
        }

        async fn notify_download(&self, _: &ShowRecord, _: &EpisodeRecord) -> Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_broadcast() {
        let service = NotificationService::new(vec![Arc::new(BrokenNotifier), Arc::new(LogNotifier)]);
        let mut events = service.subscribe();

        let show = ShowRecord::new("Dexter");
        let episode = EpisodeRecord::new(show.id, 5, 7);
        let result = SearchResult::new("Dexter.S05E07.720p.HDTV.x264-GRP", "g1", ProviderKind::Torrent);

        service.snatched(&show, &episode, &result).await;
        service.downloaded(&show, &episode).await;

        let snatch = events.recv().await.unwrap();
        assert_eq!(snatch.kind, NotificationKind::Snatch);
        assert_eq!(snatch.episode, "S05E07");
        assert_eq!(snatch.quality, Some(Quality::HdTv));

        let download = events.recv().await.unwrap();
        assert_eq!(download.kind, NotificationKind::Download);
        assert_eq!(download.episode_id, episode.id);
    }
}
