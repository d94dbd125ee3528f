//! Site plugin for 笔趣阁 b520 (www.b520.cc).
//!
//! A GBK-encoded biquge-family site. Single-page chapters; the origin
//! intermittently serves a literal `Bad GateWay` body with HTTP 200, which
//! is treated as access-limited content rather than a transport error.

mod client;
mod fetcher;
mod parser;

pub use client::B520Client;
pub use parser::B520Parser;

use std::sync::Arc;

use super::SiteRegistry;

/// Registry key for this site.
pub const SITE_NAME: &str = "b520";

/// Registers the b520 triad.
pub fn register(registry: &mut SiteRegistry) {
    registry.register_fetcher(SITE_NAME, Box::new(fetcher::make_fetcher));
    registry.register_parser(SITE_NAME, Arc::new(B520Parser));
    registry.register_client(SITE_NAME, Arc::new(B520Client));
}
