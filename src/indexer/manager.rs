//! Provider Aggregator
//!
//! The ProviderAggregator is responsible for:
//! - Picking the providers that match a search (kind, enabled, backlog support)
//! - Querying them concurrently, each under its own deadline
//! - Collecting per-provider failures without failing the search
//! - Merging results and collapsing the same release seen on several providers
//! - Caching daily-search responses for a short time

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{SearchMode, SearchResult, SearchSpec};
use super::{ProviderKind, Searchable};
use crate::config::SearchSettings;
use crate::error::ProviderError;

/// Default cache TTL (5 minutes)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Result from a single provider
#[derive(Debug)]
pub struct ProviderSearchOutcome {
    pub provider_id: String,
    pub provider_name: String,
    pub provider_weight: i32,
    pub releases: Vec<SearchResult>,
    /// Time taken to search (milliseconds)
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub error: Option<ProviderError>,
}

/// Merged result of one aggregate search
#[derive(Debug, Default)]
pub struct AggregateSearch {
    /// Deduplicated results, in provider order
    pub results: Vec<SearchResult>,
    /// Providers that failed; their results are excluded
    pub failures: Vec<ProviderError>,
    /// Number of providers queried (including cache hits and failures)
    pub providers_queried: usize,
}

/// Fans a search out to every matching provider
pub struct ProviderAggregator {
    /// Providers in configured priority order (first = most preferred)
    providers: RwLock<Vec<Arc<dyn Searchable>>>,
    cache: SearchCache,
}

impl ProviderAggregator {
    pub fn new(providers: Vec<Arc<dyn Searchable>>) -> Self {
        Self {
            providers: RwLock::new(providers),
            cache: SearchCache::new(DEFAULT_CACHE_TTL),
        }
    }

    /// Replace the configured providers, keeping their order
    pub fn set_providers(&self, providers: Vec<Arc<dyn Searchable>>) {
        *self.providers.write() = providers;
        self.cache.clear();
    }

    pub fn providers(&self) -> Vec<Arc<dyn Searchable>> {
        self.providers.read().clone()
    }

    /// Providers eligible for this search, each with its priority weight
    fn eligible(
        &self,
        spec: &SearchSpec,
        settings: &SearchSettings,
    ) -> Vec<(i32, Arc<dyn Searchable>)> {
        let providers = self.providers.read();
        let count = providers.len() as i32;

        let mut eligible: Vec<(i32, Arc<dyn Searchable>)> = providers
            .iter()
            .enumerate()
            .map(|(idx, provider)| (count - idx as i32, provider.clone()))
            .filter(|(_, provider)| provider.is_enabled())
            .filter(|(_, provider)| match provider.kind() {
                ProviderKind::Nzb => settings.use_nzbs,
                ProviderKind::Torrent => settings.use_torrents,
            })
            .filter(|(_, provider)| {
                spec.mode != SearchMode::Backlog || provider.supports_backlog()
            })
            .filter(|(_, provider)| match provider.cookie_auth() {
                Some(auth) => match auth.validate_cookies() {
                    Ok(()) => true,
                    Err(reason) => {
                        warn!(
                            provider = provider.id(),
                            reason = %reason,
                            "Skipping provider with invalid cookies"
                        );
                        false
                    }
                },
                None => true,
            })
            .collect();

        if settings.randomize_providers {
            eligible.shuffle(&mut rand::thread_rng());
        }

        eligible
    }

    /// Search every eligible provider concurrently and merge the results
    pub async fn search(
        &self,
        spec: &SearchSpec,
        settings: &SearchSettings,
        cancel: &CancellationToken,
    ) -> AggregateSearch {
        let eligible = self.eligible(spec, settings);
        if eligible.is_empty() {
            debug!(mode = %spec.mode, show = %spec.show.name, "No eligible providers");
            return AggregateSearch::default();
        }

        let use_cache = spec.mode == SearchMode::Daily;
        let mut handles = Vec::with_capacity(eligible.len());

        for (weight, provider) in eligible {
            let spec = spec.clone();
            let cache = self.cache.clone();
            let timeout = settings.provider_timeout;
            let cancel = cancel.clone();
            let provider_id = provider.id().to_string();
            let provider_name = provider.name().to_string();

            let handle = tokio::spawn(async move {
                Self::search_single(provider, weight, &spec, cache, use_cache, timeout, cancel)
                    .await
            });
            handles.push(((provider_id, provider_name, weight), handle));
        }

        let (meta, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();

        let mut outcomes = Vec::with_capacity(handles.len());
        for ((provider_id, provider_name, weight), joined) in
            meta.into_iter().zip(join_all(handles).await)
        {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(provider = %provider_id, error = %e, "Provider search task panicked");
                    outcomes.push(ProviderSearchOutcome {
                        provider_id: provider_id.clone(),
                        provider_name,
                        provider_weight: weight,
                        releases: vec![],
                        elapsed_ms: 0,
                        from_cache: false,
                        error: Some(ProviderError::Panicked {
                            provider: provider_id,
                        }),
                    });
                }
            }
        }

        let merged = merge_outcomes(outcomes);

        info!(
            mode = %spec.mode,
            show = %spec.show.name,
            providers = merged.providers_queried,
            failed = merged.failures.len(),
            results = merged.results.len(),
            "Provider search complete"
        );

        merged
    }

    /// Search a single provider
    async fn search_single(
        provider: Arc<dyn Searchable>,
        weight: i32,
        spec: &SearchSpec,
        cache: SearchCache,
        use_cache: bool,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ProviderSearchOutcome {
        let start = Instant::now();
        let provider_id = provider.id().to_string();
        let provider_name = provider.name().to_string();
        let cache_key = spec.cache_key(&provider_id);

        let outcome = |releases, from_cache, error| ProviderSearchOutcome {
            provider_id: provider_id.clone(),
            provider_name: provider_name.clone(),
            provider_weight: weight,
            releases,
            elapsed_ms: start.elapsed().as_millis() as u64,
            from_cache,
            error,
        };

        if use_cache {
            if let Some(cached) = cache.get(&cache_key) {
                return outcome(cached, true, None);
            }
        }

        // Cancellation is checked before the call; an in-flight request
        // is left to finish or hit its deadline.
        if cancel.is_cancelled() {
            return outcome(
                vec![],
                false,
                Some(ProviderError::Cancelled {
                    provider: provider_id.clone(),
                }),
            );
        }

        match tokio::time::timeout(timeout, provider.search(spec)).await {
            Ok(Ok(mut releases)) => {
                for release in &mut releases {
                    release.provider_id = provider_id.clone();
                    release.provider_name = provider_name.clone();
                    release.provider_weight = weight;
                    release.kind = provider.kind();
                }

                if use_cache {
                    cache.insert(cache_key.clone(), releases.clone());
                }

                debug!(
                    provider = %provider_id,
                    releases = releases.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Provider search succeeded"
                );

                outcome(releases, false, None)
            }
            Ok(Err(e)) => {
                error!(provider = %provider_id, error = %e, "Search failed");
                outcome(vec![], false, Some(e))
            }
            Err(_) => {
                let e = ProviderError::Timeout {
                    provider: provider_id.clone(),
                    after: timeout,
                };
                warn!(provider = %provider_id, error = %e, "Search timed out");
                outcome(vec![], false, Some(e))
            }
        }
    }
}

/// Merge provider outcomes: highest-weight provider first, duplicates dropped
fn merge_outcomes(mut outcomes: Vec<ProviderSearchOutcome>) -> AggregateSearch {
    let providers_queried = outcomes.len();

    // Query order may be shuffled; merge order never is
    outcomes.sort_by(|a, b| {
        b.provider_weight
            .cmp(&a.provider_weight)
            .then(a.provider_id.cmp(&b.provider_id))
    });

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    let mut failures = Vec::new();

    for outcome in outcomes {
        if let Some(error) = outcome.error {
            failures.push(error);
            continue;
        }
        for release in outcome.releases {
            if seen.insert(release.signature()) {
                results.push(release);
            } else {
                debug!(
                    provider = %release.provider_id,
                    release = %release.title,
                    "Dropping duplicate release"
                );
            }
        }
    }

    AggregateSearch {
        results,
        failures,
        providers_queried,
    }
}

/// Simple in-memory search cache
#[derive(Clone)]
struct SearchCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

struct CacheEntry {
    releases: Vec<SearchResult>,
    expires_at: Instant,
}

impl SearchCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        let entries = self.entries.read();
        entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.releases.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, key: String, releases: Vec<SearchResult>) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            CacheEntry {
                releases,
                expires_at: now + self.ttl,
            },
        );
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

impl std::fmt::Debug for ProviderAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAggregator")
            .field("providers_count", &self.providers.read().len())
            .finish()
    }
}
