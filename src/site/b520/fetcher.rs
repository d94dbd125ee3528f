//! Transport shapes for b520.

use std::sync::Arc;

use crate::session::FetchError;
use crate::site::generic::{GenericFetcher, SiteProfile};
use crate::site::registry::FetcherInit;
use crate::site::Fetcher;

/// URL shapes for b520. Pages are GBK-encoded; chapters are single-page.
const PROFILE: SiteProfile = SiteProfile::new(
    super::SITE_NAME,
    "http://www.b520.cc",
    "http://www.b520.cc/{book_id}/",
    "http://www.b520.cc/{book_id}/{chapter_id}.html",
)
.with_referer("http://www.b520.cc/")
.with_encoding("gbk");

/// Builds the b520 fetcher for one run.
///
/// # Errors
///
/// Returns [`FetchError::Config`] if the session cannot be built.
pub fn make_fetcher(init: &FetcherInit) -> Result<Arc<dyn Fetcher>, FetchError> {
    let fetcher = GenericFetcher::new(PROFILE, init.config.clone(), Arc::clone(&init.limiter))?;
    Ok(Arc::new(fetcher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_urls() {
        assert_eq!(PROFILE.book_info_url_for("8_8187"), "http://www.b520.cc/8_8187/");
        assert_eq!(
            PROFILE.chapter_url_for("8_8187", "5544018"),
            "http://www.b520.cc/8_8187/5544018.html"
        );
        assert!(!PROFILE.use_paginated_chapter);
        assert_eq!(PROFILE.encoding, Some("gbk"));
    }
}
