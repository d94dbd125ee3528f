//! Transport shapes for deqixs.

use std::sync::Arc;

use crate::session::FetchError;
use crate::site::generic::{GenericFetcher, SiteProfile};
use crate::site::registry::FetcherInit;
use crate::site::Fetcher;

/// URL shapes for deqixs. Chapter pages paginate.
const PROFILE: SiteProfile = SiteProfile::new(
    super::SITE_NAME,
    "https://www.deqixs.com",
    "https://www.deqixs.com/xiaoshuo/{book_id}/",
    "https://www.deqixs.com/xiaoshuo/{book_id}/{chapter_id}.html",
)
.with_paginated_chapters();

/// Builds the deqixs fetcher for one run.
///
/// # Errors
///
/// Returns [`FetchError::Config`] if the session cannot be built.
pub fn make_fetcher(init: &FetcherInit) -> Result<Arc<dyn Fetcher>, FetchError> {
    let fetcher = GenericFetcher::new(PROFILE, init.config.clone(), Arc::clone(&init.limiter))?
        .with_relative_chapter_url(paged_suffix);
    Ok(Arc::new(fetcher))
}

/// Page 1 is `{chapter_id}.html`; later pages append `-{n}`.
fn paged_suffix(
    profile: &SiteProfile,
    book_id: &str,
    chapter_id: &str,
    page_index: usize,
) -> String {
    let book_id = profile.url_book_id(book_id);
    let page_name = if page_index <= 1 {
        chapter_id.to_string()
    } else {
        format!("{chapter_id}-{page_index}")
    };
    format!("/xiaoshuo/{book_id}/{page_name}.html")
}
