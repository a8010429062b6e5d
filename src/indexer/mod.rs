//! Content providers
//!
//! Every provider, whatever site or protocol sits behind it, is driven
//! through [`Searchable`]. Providers that log in with browser cookies also
//! expose [`CookieAuthenticated`] so the aggregator can skip them when their
//! cookies are malformed.

pub mod manager;
pub mod newznab;
pub mod types;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use manager::{AggregateSearch, ProviderAggregator, ProviderSearchOutcome};
pub use newznab::{NewznabConfig, NewznabProvider};
pub use types::{ProviderKind, SearchMode, SearchResult, SearchSpec};

/// Search capability every provider implements
#[async_trait]
pub trait Searchable: Send + Sync {
    /// Stable identifier, used in logs, cache keys and tie-breaks
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn is_enabled(&self) -> bool;

    /// Whether the provider can search older releases, not just its recent feed
    fn supports_backlog(&self) -> bool {
        true
    }

    async fn search(&self, spec: &SearchSpec) -> Result<Vec<SearchResult>, ProviderError>;

    /// Cookie login support, if the provider uses it
    fn cookie_auth(&self) -> Option<&dyn CookieAuthenticated> {
        None
    }
}

/// Providers authenticated by a `name=value; name2=value2` cookie string
pub trait CookieAuthenticated: Send + Sync {
    fn cookies(&self) -> &str;

    /// Check the cookie string is well formed before any request is made
    fn validate_cookies(&self) -> Result<(), String> {
        let raw = self.cookies().trim();
        if raw.is_empty() {
            return Err("no cookies configured".to_string());
        }
        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((name, _)) if !name.trim().is_empty() => {}
                _ => return Err(format!("malformed cookie '{}'", pair)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cookies(&'static str);

    impl CookieAuthenticated for Cookies {
        fn cookies(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_validate_cookies() {
        assert!(Cookies("uid=123; pass=abc").validate_cookies().is_ok());
        assert!(Cookies("uid=123;").validate_cookies().is_ok());
        assert!(Cookies("").validate_cookies().is_err());
        assert!(Cookies("uid=123; garbage").validate_cookies().is_err());
        assert!(Cookies("=value").validate_cookies().is_err());
    }
}
