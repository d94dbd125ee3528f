//! Site plugin registry.
//!
//! Three tables keyed by site name: fetcher factories, parsers, clients.
//! Resolution requires all three: a missing role is a configuration
//! error surfaced at startup, never a silent fallback.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use super::{Fetcher, Parser, SiteClient};
use crate::limiter::TokenBucket;
use crate::session::{FetchError, SessionConfig};

/// Inputs handed to a fetcher factory when a run starts.
///
/// The base [`SessionConfig`] is derived from the book request; factories
/// layer site specifics (encoding override, Referer) on top before
/// building their session. The token bucket is shared between the
/// fetcher's pagination loop and the orchestrator's fetch workers.
pub struct FetcherInit {
    /// Transport configuration derived from the book request.
    pub config: SessionConfig,
    /// The run's shared rate limiter.
    pub limiter: Arc<TokenBucket>,
}

/// Constructor for a site's fetcher, invoked once per run.
pub type FetcherFactory =
    Box<dyn Fn(&FetcherInit) -> Result<Arc<dyn Fetcher>, FetchError> + Send + Sync>;

/// The three resolved plugin roles for one site.
pub struct SiteTriad {
    /// Site-aware transport.
    pub fetcher: Arc<dyn Fetcher>,
    /// Markup-to-record parser.
    pub parser: Arc<dyn Parser>,
    /// Behavioral policies.
    pub client: Arc<dyn SiteClient>,
}

impl std::fmt::Debug for SiteTriad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteTriad").finish_non_exhaustive()
    }
}

/// Errors raised while resolving a site from the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No fetcher registered for the site.
    #[error("no fetcher registered for site {site:?}")]
    MissingFetcher {
        /// The unresolved site name.
        site: String,
    },

    /// No parser registered for the site.
    #[error("no parser registered for site {site:?}")]
    MissingParser {
        /// The unresolved site name.
        site: String,
    },

    /// No client registered for the site.
    #[error("no client registered for site {site:?}")]
    MissingClient {
        /// The unresolved site name.
        site: String,
    },

    /// The fetcher factory failed (bad template, unusable transport config).
    #[error("failed to initialize fetcher for site {site:?}: {source}")]
    FetcherInit {
        /// The site whose factory failed.
        site: String,
        /// The underlying configuration error.
        #[source]
        source: FetchError,
    },
}

/// In-process plugin registry, built once per process.
#[derive(Default)]
pub struct SiteRegistry {
    fetchers: HashMap<String, FetcherFactory>,
    parsers: HashMap<String, Arc<dyn Parser>>,
    clients: HashMap<String, Arc<dyn SiteClient>>,
}

impl SiteRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fetcher factory under `site`. Last registration wins.
    pub fn register_fetcher(&mut self, site: impl Into<String>, factory: FetcherFactory) {
        let site = site.into();
        debug!(site = %site, "fetcher registered");
        self.fetchers.insert(site, factory);
    }

    /// Registers a parser under `site`. Last registration wins.
    pub fn register_parser(&mut self, site: impl Into<String>, parser: Arc<dyn Parser>) {
        let site = site.into();
        debug!(site = %site, "parser registered");
        self.parsers.insert(site, parser);
    }

    /// Registers a client under `site`. Last registration wins.
    pub fn register_client(&mut self, site: impl Into<String>, client: Arc<dyn SiteClient>) {
        let site = site.into();
        debug!(site = %site, "client registered");
        self.clients.insert(site, client);
    }

    /// Returns the registered site names (those with at least one role).
    #[must_use]
    pub fn sites(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .fetchers
            .keys()
            .chain(self.parsers.keys())
            .chain(self.clients.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Resolves the full triad for `site`, constructing the fetcher.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] naming the first missing role, or
    /// [`RegistryError::FetcherInit`] if the factory rejects the
    /// configuration. All are fatal configuration errors.
    #[instrument(skip(self, init))]
    pub fn resolve(&self, site: &str, init: &FetcherInit) -> Result<SiteTriad, RegistryError> {
        let factory = self
            .fetchers
            .get(site)
            .ok_or_else(|| RegistryError::MissingFetcher {
                site: site.to_string(),
            })?;
        let parser = self
            .parsers
            .get(site)
            .ok_or_else(|| RegistryError::MissingParser {
                site: site.to_string(),
            })?;
        let client = self
            .clients
            .get(site)
            .ok_or_else(|| RegistryError::MissingClient {
                site: site.to_string(),
            })?;

        let fetcher = factory(init).map_err(|source| RegistryError::FetcherInit {
            site: site.to_string(),
            source,
        })?;

        Ok(SiteTriad {
            fetcher,
            parser: Arc::clone(parser),
            client: Arc::clone(client),
        })
    }
}

impl std::fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteRegistry")
            .field("sites", &self.sites())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{BookInfo, ChapterRecord};
    use async_trait::async_trait;

    struct NullFetcher;

    #[async_trait]
    impl Fetcher for NullFetcher {
        fn site_name(&self) -> &'static str {
            "null"
        }
        async fn get_book_info(&self, _book_id: &str) -> Result<Vec<String>, FetchError> {
            Ok(vec![String::new()])
        }
        async fn get_book_chapter(
            &self,
            _book_id: &str,
            _chapter_id: &str,
        ) -> Result<Vec<String>, FetchError> {
            Ok(vec![String::new()])
        }
        fn close(&self) {}
    }

    struct NullParser;

    impl Parser for NullParser {
        fn site_name(&self) -> &'static str {
            "null"
        }
        fn parse_book_info(&self, _pages: &[String]) -> Option<BookInfo> {
            None
        }
        fn parse_chapter(&self, _pages: &[String], _chapter_id: &str) -> Option<ChapterRecord> {
            None
        }
    }

    struct NullClient;

    impl SiteClient for NullClient {
        fn site_name(&self) -> &'static str {
            "null"
        }
    }

    fn test_init() -> FetcherInit {
        FetcherInit {
            config: SessionConfig::default(),
            limiter: Arc::new(TokenBucket::new(10.0, 10, 0.0).unwrap()),
        }
    }

    fn full_registry() -> SiteRegistry {
        let mut registry = SiteRegistry::new();
        registry.register_fetcher("null", Box::new(|_| Ok(Arc::new(NullFetcher))));
        registry.register_parser("null", Arc::new(NullParser));
        registry.register_client("null", Arc::new(NullClient));
        registry
    }

    #[test]
    fn test_resolve_full_triad() {
        let registry = full_registry();
        let triad = registry.resolve("null", &test_init()).unwrap();
        assert_eq!(triad.fetcher.site_name(), "null");
        assert_eq!(triad.parser.site_name(), "null");
        assert_eq!(triad.client.site_name(), "null");
    }

    #[test]
    fn test_resolve_unknown_site_is_missing_fetcher() {
        let registry = full_registry();
        let err = registry.resolve("nowhere", &test_init()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingFetcher { .. }));
    }

    #[test]
    fn test_resolve_requires_every_role() {
        let mut registry = SiteRegistry::new();
        registry.register_fetcher("partial", Box::new(|_| Ok(Arc::new(NullFetcher))));
        let err = registry.resolve("partial", &test_init()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingParser { .. }));

        registry.register_parser("partial", Arc::new(NullParser));
        let err = registry.resolve("partial", &test_init()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingClient { .. }));
    }

    #[test]
    fn test_factory_failure_surfaces_as_init_error() {
        let mut registry = full_registry();
        registry.register_fetcher(
            "null",
            Box::new(|_| Err(FetchError::config("broken template"))),
        );
        let err = registry.resolve("null", &test_init()).unwrap_err();
        assert!(matches!(err, RegistryError::FetcherInit { .. }));
    }

    #[test]
    fn test_sites_lists_registered_names() {
        let registry = full_registry();
        assert_eq!(registry.sites(), ["null"]);
    }
}
