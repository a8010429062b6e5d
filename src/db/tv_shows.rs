//! TV show records and per-show search rules

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::quality::Quality;
use crate::services::release_parser::show_name_key;

/// TV show record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowRecord {
    pub id: Uuid,
    pub name: String,
    /// Alternative scene names releases may use
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Paused shows are skipped by automatic searches
    #[serde(default)]
    pub paused: bool,
    /// Releases are named by air date instead of SxxEyy
    #[serde(default)]
    pub air_by_date: bool,
    /// Qualities worth snatching. Empty means any detected quality.
    #[serde(default)]
    pub wanted_qualities: Vec<Quality>,
    #[serde(default)]
    pub required_words: Vec<String>,
    #[serde(default)]
    pub ignored_words: Vec<String>,
    #[serde(default)]
    pub preferred_words: Vec<String>,
    #[serde(default)]
    pub undesired_words: Vec<String>,
    #[serde(default)]
    pub release_group_blacklist: Vec<String>,
    #[serde(default)]
    pub release_group_whitelist: Vec<String>,
}

impl ShowRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            aliases: Vec::new(),
            paused: false,
            air_by_date: false,
            wanted_qualities: Vec::new(),
            required_words: Vec::new(),
            ignored_words: Vec::new(),
            preferred_words: Vec::new(),
            undesired_words: Vec::new(),
            release_group_blacklist: Vec::new(),
            release_group_whitelist: Vec::new(),
        }
    }

    /// Whether a parsed release show name refers to this show
    pub fn matches_name(&self, parsed_name: &str) -> bool {
        let candidate = show_name_key(parsed_name);
        if candidate.is_empty() {
            return false;
        }
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .any(|name| show_name_key(name) == candidate)
    }

    pub fn wants_quality(&self, quality: Quality) -> bool {
        if self.wanted_qualities.is_empty() {
            return quality != Quality::Unknown;
        }
        self.wanted_qualities.contains(&quality)
    }

    /// Queue conflict key for work that mutates this show
    pub fn target_key(&self) -> String {
        show_target_key(self.id)
    }
}

pub fn show_target_key(id: Uuid) -> String {
    format!("show:{}", id)
}
