//! Behavioral policies for b520.

use crate::site::SiteClient;

/// The b520 origin degrades badly under parallel load, so fetches run on a
/// single worker, and its error page arrives as a 200 with a literal
/// `Bad GateWay` body.
pub struct B520Client;

impl SiteClient for B520Client {
    fn site_name(&self) -> &'static str {
        super::SITE_NAME
    }

    fn workers(&self) -> usize {
        1
    }

    fn is_access_limited(&self, pages: &[String]) -> bool {
        pages
            .first()
            .is_some_and(|page| page.contains("<h1>Bad GateWay</h1>"))
    }
}
