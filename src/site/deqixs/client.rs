//! Behavioral policies for deqixs.

use crate::site::SiteClient;

/// deqixs tolerates the default worker count and signals problems through
/// an interstitial notice page rather than error bodies.
pub struct DeqixsClient;

impl SiteClient for DeqixsClient {
    fn site_name(&self) -> &'static str {
        super::SITE_NAME
    }

    fn is_access_limited(&self, pages: &[String]) -> bool {
        pages
            .first()
            .is_some_and(|page| page.contains("章节内容加密") || page.contains("VIP章节"))
    }
}
