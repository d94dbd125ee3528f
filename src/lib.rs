//! Concurrent acquisition pipeline for serialized web novels.
//!
//! Per book, the crate coordinates a fetch → parse → store machine: a
//! site-aware HTTP session with transport retry, a token-bucket rate
//! limiter shared by a bounded fetch worker pool, a single parse/store
//! worker writing to a durable per-book chapter store, and a small
//! per-site plugin triad (Fetcher / Parser / Client) that specializes URL
//! shapes, pagination termination, and access-restriction detection.
//!
//! # Architecture
//!
//! - [`session`] - HTTP transport: cookies, proxy, retry, pacing
//! - [`limiter`] - token-bucket rate limiting
//! - [`store`] - durable chapter records and the `book_info.json` sidecar
//! - [`site`] - the plugin contract and bundled reference sites
//! - [`download`] - the per-book orchestrator
//!
//! # Example
//!
//! ```no_run
//! use novel_dl::{BookDownloader, BookRequest, build_default_registry};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = build_default_registry();
//! let request = BookRequest::new("deqixs", "1234");
//! let downloader = BookDownloader::new(request, &registry, Path::new("./books")).await?;
//! let summary = downloader.run().await?;
//! println!("stored {} chapters", summary.completed);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cookies;
pub mod db;
pub mod download;
pub mod fsutil;
pub mod limiter;
pub mod models;
pub mod request;
pub mod session;
pub mod site;
pub mod store;

// Re-export commonly used types
pub use db::Database;
pub use download::{
    BookDownloader, CancelToken, DownloadSummary, EngineError, Progress, ProgressHook,
};
pub use limiter::TokenBucket;
pub use models::{BookInfo, ChapterRecord, ChapterRef, Volume};
pub use request::BookRequest;
pub use session::{FetchError, Session, SessionConfig};
pub use site::{
    Fetcher, FetcherInit, LoginCredentials, Parser, SiteClient, SiteRegistry,
    build_default_registry,
};
pub use store::ChapterStore;
