//! Per-book download request configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::download::ProgressHook;
use crate::session::SessionConfig;

/// Default cap on fetch and post-parse requeues per chapter.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default token-bucket refill rate (requests per second).
pub const DEFAULT_RATE: f64 = 4.0;

/// Default token-bucket capacity.
pub const DEFAULT_BURST: u32 = 10;

/// Default token-bucket jitter amplitude in seconds.
pub const DEFAULT_JITTER: f64 = 0.3;

/// The input driving one downloader run.
///
/// A request is created by the caller, drives one orchestrator run, and
/// is discarded. `site` and `book_id` are the routing keys; everything
/// else tunes transport and concurrency and has workable defaults.
#[derive(Clone)]
pub struct BookRequest {
    /// Site plugin key.
    pub site: String,
    /// External book id in the site's syntax.
    pub book_id: String,
    /// Pre-baked authentication cookies injected into the session.
    pub cookies: Option<HashMap<String, String>>,
    /// Fetch worker count; `None` defers to the site client's policy.
    pub workers: Option<usize>,
    /// Cap on fetch and post-parse requeues per chapter.
    pub max_retries: u32,
    /// Token-bucket refill rate, requests per second.
    pub rate: f64,
    /// Token-bucket capacity.
    pub burst: u32,
    /// Token-bucket jitter amplitude, seconds.
    pub jitter: f64,
    /// Per-request transport timeout.
    pub timeout: Duration,
    /// Transport-level retries inside the session, per request.
    pub transport_retries: u32,
    /// Base inter-request spacing.
    pub request_interval: Duration,
    /// Outbound proxy URL.
    pub proxy: Option<String>,
    /// Proxy basic-auth username.
    pub proxy_user: Option<String>,
    /// Proxy basic-auth password.
    pub proxy_pass: Option<String>,
    /// Whether TLS certificates are verified.
    pub verify_ssl: bool,
    /// Whether environment proxy variables are honored.
    pub trust_env: bool,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Extra default headers.
    pub headers: Vec<(String, String)>,
    /// Async callback invoked once per terminal chapter outcome.
    pub progress_hook: Option<ProgressHook>,
}

impl BookRequest {
    /// Creates a request with default tuning for `(site, book_id)`.
    #[must_use]
    pub fn new(site: impl Into<String>, book_id: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            book_id: book_id.into(),
            cookies: None,
            workers: None,
            max_retries: DEFAULT_MAX_RETRIES,
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            jitter: DEFAULT_JITTER,
            timeout: Duration::from_secs(30),
            transport_retries: 2,
            request_interval: Duration::from_millis(250),
            proxy: None,
            proxy_user: None,
            proxy_pass: None,
            verify_ssl: true,
            trust_env: true,
            user_agent: None,
            headers: Vec::new(),
            progress_hook: None,
        }
    }

    /// Attaches cookies given as a browser-style header string
    /// (`"k1=v1; k2=v2"`), e.g. pasted from developer tools.
    #[must_use]
    pub fn with_cookie_str(mut self, raw: &str) -> Self {
        self.cookies = Some(crate::cookies::parse_cookie_str(raw));
        self
    }

    /// Derives the base session configuration for this request.
    ///
    /// Site plugins layer their own specifics (encoding, Referer) on top.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            headers: self.headers.clone(),
            proxy: self.proxy.clone(),
            proxy_user: self.proxy_user.clone(),
            proxy_pass: self.proxy_pass.clone(),
            trust_env: self.trust_env,
            verify_ssl: self.verify_ssl,
            transport_retries: self.transport_retries,
            request_interval: self.request_interval,
            ..SessionConfig::default()
        }
    }
}

impl std::fmt::Debug for BookRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookRequest")
            .field("site", &self.site)
            .field("book_id", &self.book_id)
            .field("has_cookies", &self.cookies.is_some())
            .field("workers", &self.workers)
            .field("max_retries", &self.max_retries)
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("has_progress_hook", &self.progress_hook.is_some())
            .finish_non_exhaustive()
    }
}
