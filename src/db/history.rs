//! Snatch/download history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indexer::types::SearchResult;
use crate::services::quality::Quality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Snatched,
    SnatchedProper,
    Downloaded,
}

/// History entry written after a confirmed hand-off or completed download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub tv_show_id: Uuid,
    pub action: HistoryAction,
    pub quality: Quality,
    pub release_name: Option<String>,
    pub provider_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn snatched(
        episode_id: Uuid,
        tv_show_id: Uuid,
        result: &SearchResult,
        proper: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            episode_id,
            tv_show_id,
            action: if proper {
                HistoryAction::SnatchedProper
            } else {
                HistoryAction::Snatched
            },
            quality: result.quality(),
            release_name: Some(result.title.clone()),
            provider_id: Some(result.provider_id.clone()),
            recorded_at: Utc::now(),
        }
    }

    pub fn downloaded(episode_id: Uuid, tv_show_id: Uuid, quality: Quality) -> Self {
        Self {
            id: Uuid::new_v4(),
            episode_id,
            tv_show_id,
            action: HistoryAction::Downloaded,
            quality,
            release_name: None,
            provider_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_snatch(&self) -> bool {
        matches!(
            self.action,
            HistoryAction::Snatched | HistoryAction::SnatchedProper
        )
    }
}
