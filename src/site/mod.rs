//! Site plugin contract: the Fetcher / Parser / Client triad.
//!
//! Every supported site implements three small polymorphic roles, resolved
//! together through the [`SiteRegistry`]:
//!
//! - [`Fetcher`]: site-aware transport, URL shapes, catalog page layout,
//!   multi-page chapter termination.
//! - [`Parser`]: pure functions from raw page lists to structured records.
//! - [`SiteClient`]: behavioral policies such as worker count, access-restriction
//!   and empty-page detection, post-parse refetch marking.
//!
//! Shared behavior lives in [`GenericFetcher`], which reads per-site
//! constants from a [`SiteProfile`] and exposes the pagination hooks as
//! function fields rather than a deep inheritance chain.

mod generic;
mod registry;

pub mod b520;
pub mod deqixs;

pub use generic::{GenericFetcher, PageContext, SiteProfile};
pub use registry::{FetcherFactory, FetcherInit, RegistryError, SiteRegistry, SiteTriad};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{BookInfo, ChapterRecord};
use crate::session::FetchError;

/// Default fetch concurrency for sites that do not demand otherwise.
pub const DEFAULT_SITE_WORKERS: usize = 4;

/// Credentials for [`Fetcher::login`].
///
/// Most sites only accept pre-baked cookies; username/password stay empty
/// for those.
#[derive(Debug, Clone, Default)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub cookies: HashMap<String, String>,
}

/// Site-aware transport.
///
/// Raw pages are always returned as an ordered, non-empty list: single-page
/// sites wrap their page in a one-element list, and the matching
/// [`Parser`] relies on that ordering for multi-page joining.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// The registry key this fetcher serves.
    fn site_name(&self) -> &'static str;

    /// Fetches the raw page(s) needed to recover [`BookInfo`].
    ///
    /// The shape of the returned list is fixed per site (info page alone,
    /// info page plus separate catalog page, ...) and known to that site's
    /// parser.
    async fn get_book_info(&self, book_id: &str) -> Result<Vec<String>, FetchError>;

    /// Fetches the raw page(s) for one chapter, in reading order.
    async fn get_book_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<String>, FetchError>;

    /// Injects credentials into the session.
    ///
    /// For cookie-only sites this merges the cookies and reports success
    /// without probing; check [`verifies_auth`](Self::verifies_auth) to
    /// know whether a `true` result was actually validated.
    async fn login(&self, credentials: &LoginCredentials) -> Result<bool, FetchError> {
        let _ = credentials;
        Err(FetchError::Unsupported { operation: "login" })
    }

    /// Whether [`login`](Self::login) validates authentication against the
    /// site rather than assuming injected cookies are good.
    fn verifies_auth(&self) -> bool {
        false
    }

    /// Fetches the authenticated user's library page(s).
    async fn get_bookcase(&self, page: usize) -> Result<Vec<String>, FetchError> {
        let _ = page;
        Err(FetchError::Unsupported {
            operation: "get_bookcase",
        })
    }

    /// Releases the underlying session. Idempotent.
    fn close(&self);
}

/// Pure parser from a fetcher's raw page list to structured records.
pub trait Parser: Send + Sync {
    /// The registry key this parser serves.
    fn site_name(&self) -> &'static str;

    /// Recovers book metadata and the ordered catalog.
    ///
    /// Returns `None` only for input that is not a book page at all;
    /// well-formed pages with missing optional fields yield empty strings
    /// and lists instead.
    fn parse_book_info(&self, pages: &[String]) -> Option<BookInfo>;

    /// Joins the chapter's pages in order and extracts title, content, and
    /// site-specific extras.
    ///
    /// Returns `None` when the input is clearly not a chapter page (login
    /// interstitial, captcha, wrong redirect) so the downloader can requeue.
    fn parse_chapter(&self, pages: &[String], chapter_id: &str) -> Option<ChapterRecord>;
}

/// Per-site behavioral policies not tied to URL shape or parsing.
pub trait SiteClient: Send + Sync {
    /// The registry key this client serves.
    fn site_name(&self) -> &'static str;

    /// Desired fetch concurrency for this site.
    fn workers(&self) -> usize {
        DEFAULT_SITE_WORKERS
    }

    /// Content-level access gate: VIP wall, encrypted-chapter marker,
    /// error body served with HTTP 200. A limited chapter is stored as a
    /// placeholder with `need_refetch = true`.
    fn is_access_limited(&self, pages: &[String]) -> bool {
        let _ = pages;
        false
    }

    /// Distinguishes "chapter intentionally empty" (store placeholder, do
    /// not retry) from a failed fetch (retry).
    fn skip_empty_chapter(&self, pages: &[String]) -> bool {
        let _ = pages;
        false
    }

    /// Post-parse predicate marking an apparently successful chapter as
    /// provisional. The default flags font-encrypted content advertised
    /// by the parser through `extra`.
    fn check_refetch(&self, record: &ChapterRecord) -> bool {
        record
            .extra
            .get("font_encrypt")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Builds the registry of bundled site plugins.
///
/// Embedding applications extend the returned registry with their own
/// sites before handing it to the downloader.
#[must_use]
pub fn build_default_registry() -> SiteRegistry {
    let mut registry = SiteRegistry::new();
    deqixs::register(&mut registry);
    b520::register(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct PlainClient;

    impl SiteClient for PlainClient {
        fn site_name(&self) -> &'static str {
            "plain"
        }
    }

    #[test]
    fn test_default_client_policies() {
        let client = PlainClient;
        let pages = vec!["<html>anything</html>".to_string()];
        assert_eq!(client.workers(), DEFAULT_SITE_WORKERS);
        assert!(!client.is_access_limited(&pages));
        assert!(!client.skip_empty_chapter(&pages));
    }

    #[test]
    fn test_default_check_refetch_honors_font_encrypt_extra() {
        let client = PlainClient;
        let mut record = crate::models::ChapterRecord::new("c1", "T", "body");
        assert!(!client.check_refetch(&record));

        record
            .extra
            .insert("font_encrypt".to_string(), Value::Bool(true));
        assert!(client.check_refetch(&record));

        record
            .extra
            .insert("font_encrypt".to_string(), Value::Bool(false));
        assert!(!client.check_refetch(&record));
    }

    #[test]
    fn test_default_registry_bundles_reference_sites() {
        let registry = build_default_registry();
        assert_eq!(registry.sites(), ["b520", "deqixs"]);
    }
}
