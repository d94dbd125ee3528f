//! Per-site HTTP session: cookies, proxy, timeouts, transport retry, and
//! browser-like request pacing.
//!
//! One [`Session`] serves all fetch workers of one book. It wraps a single
//! `reqwest::Client` (connection pooling, cookie jar, gzip) and adds the
//! two behaviors the plain client does not have:
//!
//! - **Transport retry**: each fetch is retried on timeout, connect-level
//!   failures, 5xx, and 429, with exponential backoff and jitter, honoring
//!   `Retry-After` when the server sends one.
//! - **Inter-request spacing**: after each successful call the session
//!   sleeps a small jittered interval. This pacing is distinct from the
//!   token-bucket rate limiter shared across workers.
//!
//! Sites that serve legacy charsets (GBK family) set an encoding override;
//! the session then decodes raw bytes itself instead of trusting
//! `Content-Type`.

mod error;

pub use error::FetchError;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, Method, Proxy};
use tracing::{debug, instrument, warn};
use url::Url;

/// Default User-Agent presented to sites.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// Default Accept header for HTML pages.
const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Default Accept-Language header.
const DEFAULT_ACCEPT_LANGUAGE: &str = "en,zh;q=0.9,zh-CN;q=0.8";

/// Maximum honored Retry-After delay; anything larger is capped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Maximum redirect hops when redirects are enabled.
const MAX_REDIRECTS: usize = 10;

/// Transport configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-request upper bound.
    pub timeout: Duration,
    /// Connect-phase upper bound.
    pub connect_timeout: Duration,
    /// User-Agent override; `None` uses [`DEFAULT_USER_AGENT`].
    pub user_agent: Option<String>,
    /// Extra default headers (e.g. a site-specific Referer).
    pub headers: Vec<(String, String)>,
    /// Outbound proxy URL.
    pub proxy: Option<String>,
    /// Proxy basic-auth username.
    pub proxy_user: Option<String>,
    /// Proxy basic-auth password.
    pub proxy_pass: Option<String>,
    /// Whether environment proxy variables are honored.
    pub trust_env: bool,
    /// Whether TLS certificates are verified.
    pub verify_ssl: bool,
    /// Whether redirects are followed (up to an internal hop limit).
    pub follow_redirects: bool,
    /// Upper bound on idle pooled connections per host.
    pub max_connections: usize,
    /// Transport retry attempts after the initial try.
    pub transport_retries: u32,
    /// Base delay for the transport backoff.
    pub backoff_base: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Uniform jitter applied to each backoff delay (`±`).
    pub backoff_jitter: Duration,
    /// Base inter-request spacing applied after successful calls.
    pub request_interval: Duration,
    /// Uniform jitter applied to the spacing (`±`).
    pub request_interval_jitter: Duration,
    /// Charset label override (e.g. `"gbk"`); `None` trusts the response.
    pub encoding: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            headers: Vec::new(),
            proxy: None,
            proxy_user: None,
            proxy_pass: None,
            trust_env: true,
            verify_ssl: true,
            follow_redirects: true,
            max_connections: 8,
            transport_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            backoff_jitter: Duration::from_millis(250),
            request_interval: Duration::from_millis(250),
            request_interval_jitter: Duration::from_millis(150),
            encoding: None,
        }
    }
}

/// HTTP session with retry and pacing, shared by reference across workers.
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
    default_headers: HeaderMap,
    config: SessionConfig,
    encoding: Option<&'static encoding_rs::Encoding>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds a session from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] for malformed headers, an unusable
    /// proxy URL, an unknown encoding label, or a client build failure.
    #[instrument(skip(config))]
    pub fn new(config: SessionConfig) -> Result<Self, FetchError> {
        let default_headers = build_header_map(&config)?;

        let encoding = match config.encoding.as_deref() {
            Some(label) => Some(
                encoding_rs::Encoding::for_label(label.as_bytes())
                    .ok_or_else(|| FetchError::config(format!("unknown encoding label {label:?}")))?,
            ),
            None => None,
        };

        let jar = Arc::new(Jar::default());
        let mut builder = ClientBuilder::new()
            .default_headers(default_headers.clone())
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .danger_accept_invalid_certs(!config.verify_ssl);

        builder = if config.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };

        if let Some(proxy_url) = &config.proxy {
            let mut proxy = Proxy::all(proxy_url)
                .map_err(|e| FetchError::config(format!("invalid proxy {proxy_url:?}: {e}")))?;
            if let (Some(user), Some(pass)) = (&config.proxy_user, &config.proxy_pass) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        } else if !config.trust_env {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            jar,
            default_headers,
            config,
            encoding,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns a copy of the session's default headers.
    ///
    /// A copy, so callers cannot mutate session state through the
    /// returned value.
    #[must_use]
    pub fn default_headers(&self) -> HeaderMap {
        self.default_headers.clone()
    }

    /// Merges cookies into the session's jar, scoped to `base`.
    pub fn update_cookies(&self, base: &Url, cookies: &HashMap<String, String>) {
        for (name, value) in cookies {
            self.jar.add_cookie_str(&format!("{name}={value}"), base);
        }
        debug!(count = cookies.len(), host = ?base.host_str(), "cookies merged into jar");
    }

    /// Fetches `url` and returns the decoded body text.
    ///
    /// Retries transient transport failures up to the configured attempt
    /// count, then sleeps the jittered inter-request interval before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns the final [`FetchError`] once transport retries are
    /// exhausted, or immediately for non-transient failures.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.request_text(Method::GET, url, &[], None).await
    }

    /// Fetches `url` with query parameters appended.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    #[instrument(skip(self, params), fields(url = %url))]
    pub async fn get(&self, url: &str, params: &[(String, String)]) -> Result<String, FetchError> {
        self.request_text(Method::GET, url, params, None).await
    }

    /// Sends a form-encoded POST and returns the decoded body text.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    #[instrument(skip(self, form), fields(url = %url))]
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<String, FetchError> {
        self.request_text(Method::POST, url, &[], Some(form)).await
    }

    /// Marks the session closed. Subsequent fetches fail with
    /// [`FetchError::SessionClosed`]. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("session closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request_text(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        form: Option<&[(String, String)]>,
    ) -> Result<String, FetchError> {
        if self.is_closed() {
            return Err(FetchError::SessionClosed);
        }
        Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        let mut attempt: u32 = 0;
        loop {
            let mut request = self.client.request(method.clone(), url);
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(fields) = form {
                request = request.form(fields);
            }

            match self.execute(request, url).await {
                Ok(body) => {
                    self.pace().await;
                    return Ok(body);
                }
                Err(err) if err.is_transient() && attempt < self.config.transport_retries => {
                    let delay = self
                        .retry_after_delay(&err)
                        .unwrap_or_else(|| self.backoff_delay(attempt));
                    attempt += 1;
                    warn!(
                        url = %url,
                        attempt,
                        max_attempts = self.config.transport_retries,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "transient transport failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<String, FetchError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(FetchError::http_status(url, status.as_u16(), retry_after));
        }

        self.decode_body(response, url).await
    }

    /// Decodes the response body, honoring the per-site encoding override.
    async fn decode_body(
        &self,
        response: reqwest::Response,
        url: &str,
    ) -> Result<String, FetchError> {
        match self.encoding {
            Some(encoding) => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| FetchError::network(url, e))?;
                let (text, _, had_errors) = encoding.decode(&bytes);
                if had_errors {
                    debug!(url = %url, encoding = encoding.name(), "lossy charset decode");
                }
                Ok(text.into_owned())
            }
            None => response.text().await.map_err(|e| FetchError::network(url, e)),
        }
    }

    /// Exponential backoff with uniform jitter, clamped non-negative.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_secs_f64();
        let delay = base * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter_amp = self.config.backoff_jitter.as_secs_f64();
        let jitter = if jitter_amp > 0.0 {
            rand::thread_rng().gen_range(-jitter_amp..=jitter_amp)
        } else {
            0.0
        };
        Duration::from_secs_f64((delay + jitter).max(0.0))
    }

    /// Extracts a usable Retry-After delay from an HTTP-status error.
    fn retry_after_delay(&self, err: &FetchError) -> Option<Duration> {
        let FetchError::HttpStatus {
            retry_after: Some(value),
            ..
        } = err
        else {
            return None;
        };
        parse_retry_after(value)
    }

    /// Sleeps the jittered inter-request interval.
    async fn pace(&self) {
        let base = self.config.request_interval.as_secs_f64();
        if base <= 0.0 {
            return;
        }
        let amp = self.config.request_interval_jitter.as_secs_f64();
        let jitter = if amp > 0.0 {
            rand::thread_rng().gen_range(-amp..=amp)
        } else {
            0.0
        };
        tokio::time::sleep(Duration::from_secs_f64((base + jitter).max(0.0))).await;
    }
}

/// Parses a Retry-After header value per RFC 7231.
///
/// Supports integer seconds and HTTP-date forms. Values are capped at one
/// hour; unparseable or negative values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let delay = datetime
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO);
        return Some(delay.min(MAX_RETRY_AFTER));
    }

    None
}

fn build_header_map(config: &SessionConfig) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
    );
    let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|_| FetchError::config(format!("invalid User-Agent {user_agent:?}")))?,
    );

    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::config(format!("invalid header name {name:?}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::config(format!("invalid value for header {name:?}")))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
