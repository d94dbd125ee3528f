//! Generic fetcher driven by per-site constants.
//!
//! Most sites differ only in URL templates, charset, and how multi-page
//! chapters terminate. [`SiteProfile`] captures those constants;
//! [`GenericFetcher`] turns a profile into a working [`Fetcher`], with the
//! two pagination decisions (next page's relative URL, whether to
//! continue) exposed as plain function fields so a site overrides exactly
//! what it needs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Fetcher, LoginCredentials};
use crate::limiter::TokenBucket;
use crate::session::{FetchError, Session, SessionConfig};

/// Upper bound on pages fetched for one chapter. A page that keeps
/// advertising its own next suffix must not spin forever.
const MAX_CHAPTER_PAGES: usize = 100;

/// Per-site constants read by [`GenericFetcher`].
///
/// URL templates use `{book_id}` and `{chapter_id}` placeholders. The
/// external book-id syntax stays simple; [`book_id_replacements`]
/// (e.g. `"-"` → `"/"`) are applied before interpolation for sites whose
/// URLs embed slashes.
///
/// [`book_id_replacements`]: Self::book_id_replacements
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub site_name: &'static str,
    /// Origin used to absolutize relative pagination suffixes.
    pub base_url: &'static str,
    pub book_info_url: &'static str,
    /// Separate catalog page template for sites whose info page does not
    /// carry the chapter list.
    pub book_catalog_url: Option<&'static str>,
    pub chapter_url: &'static str,
    /// Whether chapters span multiple pages joined by the parser.
    pub use_paginated_chapter: bool,
    /// Ordered `(from, to)` replacements applied to external book ids.
    pub book_id_replacements: &'static [(&'static str, &'static str)],
    /// Site-specific Referer sent with every request.
    pub referer: Option<&'static str>,
    /// Charset override label for sites serving legacy encodings.
    pub encoding: Option<&'static str>,
}

impl SiteProfile {
    /// Creates a profile with the required templates and default policies.
    #[must_use]
    pub const fn new(
        site_name: &'static str,
        base_url: &'static str,
        book_info_url: &'static str,
        chapter_url: &'static str,
    ) -> Self {
        Self {
            site_name,
            base_url,
            book_info_url,
            book_catalog_url: None,
            chapter_url,
            use_paginated_chapter: false,
            book_id_replacements: &[],
            referer: None,
            encoding: None,
        }
    }

    /// Adds a separate catalog page template.
    #[must_use]
    pub const fn with_catalog_url(mut self, url: &'static str) -> Self {
        self.book_catalog_url = Some(url);
        self
    }

    /// Marks chapters as paginated.
    #[must_use]
    pub const fn with_paginated_chapters(mut self) -> Self {
        self.use_paginated_chapter = true;
        self
    }

    /// Sets book-id replacements applied before URL interpolation.
    #[must_use]
    pub const fn with_book_id_replacements(
        mut self,
        replacements: &'static [(&'static str, &'static str)],
    ) -> Self {
        self.book_id_replacements = replacements;
        self
    }

    /// Sets a site-wide Referer header.
    #[must_use]
    pub const fn with_referer(mut self, referer: &'static str) -> Self {
        self.referer = Some(referer);
        self
    }

    /// Sets the charset override label.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: &'static str) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Applies the configured replacements to an external book id.
    #[must_use]
    pub fn url_book_id(&self, book_id: &str) -> String {
        let mut id = book_id.to_string();
        for (from, to) in self.book_id_replacements {
            id = id.replace(from, to);
        }
        id
    }

    /// Interpolated book info page URL.
    #[must_use]
    pub fn book_info_url_for(&self, book_id: &str) -> String {
        fill_template(self.book_info_url, &self.url_book_id(book_id), None)
    }

    /// Interpolated catalog page URL, when the site has a separate one.
    #[must_use]
    pub fn catalog_url_for(&self, book_id: &str) -> Option<String> {
        self.book_catalog_url
            .map(|template| fill_template(template, &self.url_book_id(book_id), None))
    }

    /// Interpolated chapter page URL.
    #[must_use]
    pub fn chapter_url_for(&self, book_id: &str, chapter_id: &str) -> String {
        fill_template(
            self.chapter_url,
            &self.url_book_id(book_id),
            Some(chapter_id),
        )
    }
}

fn fill_template(template: &str, book_id: &str, chapter_id: Option<&str>) -> String {
    let mut url = template.replace("{book_id}", book_id);
    if let Some(chapter_id) = chapter_id {
        url = url.replace("{chapter_id}", chapter_id);
    }
    url
}

/// Inputs to the pagination continuation decision.
#[derive(Debug)]
pub struct PageContext<'a> {
    /// HTML of the page fetched most recently.
    pub current_page: &'a str,
    /// Relative URL suffix of the candidate next page.
    pub next_suffix: &'a str,
    /// 1-based index of the candidate next page.
    pub next_index: usize,
}

/// Computes the relative URL suffix for one page of a chapter.
pub type ChapterSuffixFn = fn(&SiteProfile, &str, &str, usize) -> String;

/// Decides whether pagination continues to the next page.
pub type ContinuationFn = fn(&PageContext<'_>) -> bool;

/// Default page suffix: `{chapter_id}` for page 1, `{chapter_id}_{n}`
/// after, relative to the site origin.
fn default_relative_chapter_url(
    profile: &SiteProfile,
    book_id: &str,
    chapter_id: &str,
    page_index: usize,
) -> String {
    let paged_id = if page_index <= 1 {
        chapter_id.to_string()
    } else {
        format!("{chapter_id}_{page_index}")
    };
    let url = profile.chapter_url_for(book_id, &paged_id);
    match url.strip_prefix(profile.base_url) {
        Some(suffix) => suffix.to_string(),
        None => url,
    }
}

/// Default continuation: the next suffix is advertised somewhere in the
/// current page.
fn default_should_continue(ctx: &PageContext<'_>) -> bool {
    ctx.current_page.contains(ctx.next_suffix)
}

/// A [`Fetcher`] implementation parameterized by a [`SiteProfile`].
#[derive(Debug)]
pub struct GenericFetcher {
    profile: SiteProfile,
    session: Session,
    base: Url,
    limiter: Arc<TokenBucket>,
    relative_chapter_url: ChapterSuffixFn,
    should_continue: ContinuationFn,
}

impl GenericFetcher {
    /// Builds the fetcher, layering the profile's transport specifics
    /// (encoding override, Referer) onto the run's session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] for malformed templates, an
    /// unparseable base URL, or an unbuildable session.
    #[instrument(skip(config, limiter), fields(site = profile.site_name))]
    pub fn new(
        profile: SiteProfile,
        mut config: SessionConfig,
        limiter: Arc<TokenBucket>,
    ) -> Result<Self, FetchError> {
        if !profile.book_info_url.contains("{book_id}") {
            return Err(FetchError::config(format!(
                "book info template for {} lacks {{book_id}}: {:?}",
                profile.site_name, profile.book_info_url
            )));
        }
        if !profile.chapter_url.contains("{chapter_id}") {
            return Err(FetchError::config(format!(
                "chapter template for {} lacks {{chapter_id}}: {:?}",
                profile.site_name, profile.chapter_url
            )));
        }
        if let Some(catalog) = profile.book_catalog_url {
            if !catalog.contains("{book_id}") {
                return Err(FetchError::config(format!(
                    "catalog template for {} lacks {{book_id}}: {:?}",
                    profile.site_name, catalog
                )));
            }
        }
        let base = Url::parse(profile.base_url).map_err(|e| {
            FetchError::config(format!(
                "invalid base URL for {}: {e}",
                profile.site_name
            ))
        })?;

        if config.encoding.is_none() {
            config.encoding = profile.encoding.map(str::to_string);
        }
        if let Some(referer) = profile.referer {
            config
                .headers
                .push(("Referer".to_string(), referer.to_string()));
        }

        let session = Session::new(config)?;
        Ok(Self {
            profile,
            session,
            base,
            limiter,
            relative_chapter_url: default_relative_chapter_url,
            should_continue: default_should_continue,
        })
    }

    /// Overrides the per-page suffix hook.
    #[must_use]
    pub fn with_relative_chapter_url(mut self, hook: ChapterSuffixFn) -> Self {
        self.relative_chapter_url = hook;
        self
    }

    /// Overrides the pagination continuation hook.
    #[must_use]
    pub fn with_continuation(mut self, hook: ContinuationFn) -> Self {
        self.should_continue = hook;
        self
    }

    /// Read access to the site profile.
    #[must_use]
    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    async fn fetch_paginated_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<String>, FetchError> {
        let mut pages: Vec<String> = Vec::new();
        let mut index = 1usize;

        loop {
            let suffix = (self.relative_chapter_url)(&self.profile, book_id, chapter_id, index);
            if let Some(current) = pages.last() {
                let ctx = PageContext {
                    current_page: current,
                    next_suffix: &suffix,
                    next_index: index,
                };
                if !(self.should_continue)(&ctx) {
                    break;
                }
                // Every extra page is a full request: pay the shared
                // bucket before it, like the fetch workers do.
                self.limiter.wait().await;
            }

            let url = format!("{}{suffix}", self.profile.base_url);
            match self.session.fetch(&url).await {
                Ok(html) => pages.push(html),
                Err(err) if !pages.is_empty() => {
                    warn!(
                        site = self.profile.site_name,
                        chapter_id,
                        page = index,
                        error = %err,
                        "pagination fetch failed, keeping pages fetched so far"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }

            if pages.len() >= MAX_CHAPTER_PAGES {
                warn!(
                    site = self.profile.site_name,
                    chapter_id,
                    pages = pages.len(),
                    "chapter pagination hit page cap"
                );
                break;
            }
            index += 1;
        }

        debug!(
            site = self.profile.site_name,
            chapter_id,
            pages = pages.len(),
            "chapter pages fetched"
        );
        Ok(pages)
    }
}

#[async_trait]
impl Fetcher for GenericFetcher {
    fn site_name(&self) -> &'static str {
        self.profile.site_name
    }

    async fn get_book_info(&self, book_id: &str) -> Result<Vec<String>, FetchError> {
        let mut pages = vec![self.session.fetch(&self.profile.book_info_url_for(book_id)).await?];
        if let Some(catalog_url) = self.profile.catalog_url_for(book_id) {
            self.limiter.wait().await;
            pages.push(self.session.fetch(&catalog_url).await?);
        }
        Ok(pages)
    }

    async fn get_book_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<String>, FetchError> {
        if !self.profile.use_paginated_chapter {
            let url = self.profile.chapter_url_for(book_id, chapter_id);
            return Ok(vec![self.session.fetch(&url).await?]);
        }
        self.fetch_paginated_chapter(book_id, chapter_id).await
    }

    async fn login(&self, credentials: &LoginCredentials) -> Result<bool, FetchError> {
        if credentials.cookies.is_empty() {
            return Ok(false);
        }
        self.session.update_cookies(&self.base, &credentials.cookies);
        Ok(true)
    }

    fn close(&self) {
        self.session.close();
    }
}
