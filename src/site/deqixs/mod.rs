//! Site plugin for 得奇小说网 (www.deqixs.com).
//!
//! Chapters span multiple pages with `-{n}` suffixes; the info page
//! carries the full catalog.

mod client;
mod fetcher;
mod parser;

pub use client::DeqixsClient;
pub use parser::DeqixsParser;

use std::sync::Arc;

use super::SiteRegistry;

/// Registry key for this site.
pub const SITE_NAME: &str = "deqixs";

/// Registers the deqixs triad.
pub fn register(registry: &mut SiteRegistry) {
    registry.register_fetcher(SITE_NAME, Box::new(fetcher::make_fetcher));
    registry.register_parser(SITE_NAME, Arc::new(DeqixsParser));
    registry.register_client(SITE_NAME, Arc::new(DeqixsClient));
}
