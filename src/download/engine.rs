//! The per-book download orchestrator.
//!
//! One [`BookDownloader`] instance serves one [`BookRequest`]: it resolves
//! the catalog, computes the working set, and runs the fetch → parse →
//! store pipeline over two bounded queues.
//!
//! # Pipeline shape
//!
//! - One **producer** enqueues every pending chapter id once on Q1, then,
//!   after every chapter has reached a terminal outcome, enqueues one
//!   stop token per fetch worker. Delaying the stop tokens is what keeps
//!   the parse-side requeue edge (Q2 → Q1) safe: a requeued task can never
//!   land behind the sentinels and starve.
//! - **N fetch workers** drain Q1, pay the shared token bucket, fetch the
//!   chapter pages, and push them on Q2. Transport failures requeue on Q1
//!   with the task's retry counter incremented, up to `max_retries`.
//! - **One parse/store worker** drains Q2, applies the site client's
//!   access-limited and empty-page policies, parses, and upserts. A null
//!   parse is a soft failure requeued on Q1. The worker exits after
//!   seeing exactly N stop tokens.
//!
//! Bounded queue capacity (4 × workers) provides backpressure: the fetch
//! pool stalls naturally when the store writer falls behind. Requeues
//! from a drain site never block on a full queue (that would close the
//! Q1 -> Q2 -> Q1 cycle into a deadlock); they fall back to a detached
//! send instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument, warn};

use super::signals::{CancelToken, Progress};
use super::tasks::{CidTask, FetchMsg, HtmlTask, ParseMsg};
use crate::fsutil::sanitize_filename;
use crate::limiter::{LimiterError, TokenBucket};
use crate::models::ChapterRecord;
use crate::request::BookRequest;
use crate::session::FetchError;
use crate::site::{
    Fetcher, FetcherInit, LoginCredentials, Parser, RegistryError, SiteClient, SiteRegistry,
};
use crate::store::{ChapterStore, StoreError, write_book_info};

/// Minimum fetch worker count.
const MIN_WORKERS: usize = 1;

/// Maximum fetch worker count.
const MAX_WORKERS: usize = 16;

/// Queue capacity per fetch worker.
const QUEUE_CAPACITY_FACTOR: usize = 4;

/// Errors that abort a downloader run.
///
/// Per-chapter failures never appear here: they are retried, stored as
/// placeholders, or dropped with a log line, and the run completes with
/// a partial result.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The site is not fully registered or its fetcher failed to build.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Token-bucket parameters are unusable.
    #[error(transparent)]
    Limiter(#[from] LimiterError),

    /// Catalog resolution failed at the transport level.
    #[error("failed to fetch book info: {0}")]
    BookInfo(#[from] FetchError),

    /// The info pages did not parse as a book.
    #[error("site {site:?} returned pages that do not parse as book {book_id:?}")]
    BookInfoParse {
        /// Site key.
        site: String,
        /// Requested book id.
        book_id: String,
    },

    /// Chapter store or sidecar failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Requested worker count is outside the supported range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },

    /// A pipeline worker panicked; the run's state is indeterminate.
    #[error("{role} worker panicked")]
    WorkerPanic {
        /// Which worker died.
        role: &'static str,
    },
}

/// Final accounting for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Chapters listed in the catalog.
    pub catalog_chapters: usize,
    /// Catalog chapters already complete in the store before the run.
    pub already_complete: usize,
    /// Chapters stored this run with `need_refetch = false`.
    pub completed: usize,
    /// Chapters stored this run with `need_refetch = true`.
    pub needs_refetch: usize,
    /// Chapters dropped after exhausting retries (no store write).
    pub dropped: usize,
    /// Whether the run was cancelled before finishing.
    pub cancelled: bool,
}

impl DownloadSummary {
    /// Chapters that reached a terminal outcome this run.
    #[must_use]
    pub fn done(&self) -> usize {
        self.completed + self.needs_refetch + self.dropped
    }
}

/// Terminal-outcome counters shared across workers.
#[derive(Debug, Default)]
struct RunStats {
    completed: AtomicUsize,
    needs_refetch: AtomicUsize,
    dropped: AtomicUsize,
}

impl RunStats {
    fn add_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn add_needs_refetch(&self) {
        self.needs_refetch.fetch_add(1, Ordering::SeqCst);
    }
    fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a pipeline worker needs, shared behind one `Arc`.
struct WorkerContext {
    site: String,
    book_id: String,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    client: Arc<dyn SiteClient>,
    limiter: Arc<TokenBucket>,
    store: ChapterStore,
    progress: Arc<Progress>,
    stats: Arc<RunStats>,
    cancel: CancelToken,
    max_retries: u32,
}

/// Orchestrator for one book.
pub struct BookDownloader {
    request: BookRequest,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    client: Arc<dyn SiteClient>,
    limiter: Arc<TokenBucket>,
    store: ChapterStore,
    book_dir: PathBuf,
    workers: usize,
    cancel: CancelToken,
}

impl std::fmt::Debug for BookDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookDownloader")
            .field("request", &self.request)
            .field("book_dir", &self.book_dir)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl BookDownloader {
    /// Resolves the site triad and opens the per-book store.
    ///
    /// The book directory is `root_dir/<site>/<book_id>/` with both
    /// components sanitized for the filesystem.
    ///
    /// # Errors
    ///
    /// Returns configuration errors only: unknown site, unusable
    /// token-bucket or worker settings, or a store that cannot be opened.
    #[instrument(skip(request, registry, root_dir), fields(site = %request.site, book_id = %request.book_id))]
    pub async fn new(
        request: BookRequest,
        registry: &SiteRegistry,
        root_dir: &Path,
    ) -> Result<Self, EngineError> {
        if let Some(value) = request.workers {
            if !(MIN_WORKERS..=MAX_WORKERS).contains(&value) {
                return Err(EngineError::InvalidWorkers { value });
            }
        }

        let limiter = Arc::new(TokenBucket::new(request.rate, request.burst, request.jitter)?);
        let init = FetcherInit {
            config: request.session_config(),
            limiter: Arc::clone(&limiter),
        };
        let triad = registry.resolve(&request.site, &init)?;

        let workers = request
            .workers
            .unwrap_or_else(|| triad.client.workers())
            .clamp(MIN_WORKERS, MAX_WORKERS);

        let book_dir = root_dir
            .join(sanitize_filename(&request.site))
            .join(sanitize_filename(&request.book_id));
        let store = ChapterStore::open(&book_dir).await?;

        debug!(workers, dir = %book_dir.display(), "downloader ready");

        Ok(Self {
            request,
            fetcher: triad.fetcher,
            parser: triad.parser,
            client: triad.client,
            limiter,
            store,
            book_dir,
            workers,
            cancel: CancelToken::new(),
        })
    }

    /// The cancellation token for this run. Cancelling is cooperative:
    /// workers drain the item in hand, then exit.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Directory holding the chapter database and sidecars.
    #[must_use]
    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    /// The per-book chapter store (shared handle).
    #[must_use]
    pub fn store(&self) -> &ChapterStore {
        &self.store
    }

    /// Effective fetch worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs the pipeline to completion (or cancellation).
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] for catalog resolution failures, store
    /// faults, or a panicked worker. Per-chapter failures are absorbed
    /// into the returned [`DownloadSummary`].
    #[instrument(skip(self), fields(site = %self.request.site, book_id = %self.request.book_id))]
    pub async fn run(&self) -> Result<DownloadSummary, EngineError> {
        if let Some(cookies) = &self.request.cookies {
            let credentials = LoginCredentials {
                cookies: crate::cookies::normalize_cookies(cookies),
                ..LoginCredentials::default()
            };
            match self.fetcher.login(&credentials).await {
                Ok(true) => debug!(verified = self.fetcher.verifies_auth(), "cookies injected"),
                Ok(false) => warn!("site rejected the provided cookies"),
                Err(error) => warn!(error = %error, "cookie login failed, continuing anonymously"),
            }
        }

        // Resolve and persist the catalog.
        self.limiter.wait().await;
        let info_pages = self.fetcher.get_book_info(&self.request.book_id).await?;
        let book_info =
            self.parser
                .parse_book_info(&info_pages)
                .ok_or_else(|| EngineError::BookInfoParse {
                    site: self.request.site.clone(),
                    book_id: self.request.book_id.clone(),
                })?;
        write_book_info(&self.book_dir, &book_info).await?;

        // Working set: catalog order, minus chapters already complete.
        let mut pending: Vec<String> = Vec::new();
        for chapter in book_info.chapters() {
            if !self.store.exists_complete(&chapter.chapter_id).await? {
                pending.push(chapter.chapter_id.clone());
            }
        }
        let catalog_chapters = book_info.chapter_count();
        let already_complete = catalog_chapters - pending.len();

        info!(
            book = %book_info.book_name,
            catalog_chapters,
            pending = pending.len(),
            workers = self.workers,
            "starting chapter pipeline"
        );

        let progress = Arc::new(Progress::new(
            pending.len(),
            self.request.progress_hook.clone(),
        ));
        let stats = Arc::new(RunStats::default());

        if pending.is_empty() {
            self.fetcher.close();
            progress.report_final().await;
            return Ok(DownloadSummary {
                catalog_chapters,
                already_complete,
                completed: 0,
                needs_refetch: 0,
                dropped: 0,
                cancelled: self.cancel.is_cancelled(),
            });
        }

        let capacity = QUEUE_CAPACITY_FACTOR * self.workers;
        let (q1_tx, q1_rx) = mpsc::channel::<FetchMsg>(capacity);
        let (q2_tx, q2_rx) = mpsc::channel::<ParseMsg>(capacity);
        let q1_rx = Arc::new(Mutex::new(q1_rx));

        let ctx = Arc::new(WorkerContext {
            site: self.request.site.clone(),
            book_id: self.request.book_id.clone(),
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
            client: Arc::clone(&self.client),
            limiter: Arc::clone(&self.limiter),
            store: self.store.clone(),
            progress: Arc::clone(&progress),
            stats: Arc::clone(&stats),
            cancel: self.cancel.clone(),
            max_retries: self.request.max_retries,
        });

        let mut fetch_handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            fetch_handles.push(tokio::spawn(fetch_worker(
                Arc::clone(&ctx),
                worker_id,
                Arc::clone(&q1_rx),
                q1_tx.clone(),
                q2_tx.clone(),
            )));
        }
        let parse_handle = tokio::spawn(parse_store_worker(
            Arc::clone(&ctx),
            q2_rx,
            q1_tx.clone(),
            self.workers,
        ));
        let producer_handle =
            tokio::spawn(producer(Arc::clone(&ctx), pending, q1_tx, self.workers));

        // Only the workers hold queue endpoints from here on, so channel
        // closure tracks worker lifetime.
        drop(q2_tx);
        drop(q1_rx);

        if producer_handle.await.is_err() {
            warn!("producer panicked");
        }
        // Fetch pool first, then the parse worker: the parse worker only
        // terminates once every fetch worker has forwarded its stop token.
        for handle in fetch_handles {
            if handle.await.is_err() {
                warn!("fetch worker panicked");
            }
        }
        let parse_result = parse_handle
            .await
            .map_err(|_| EngineError::WorkerPanic { role: "parse" })?;

        self.fetcher.close();
        if !progress.is_complete() {
            progress.report_final().await;
        }
        parse_result?;

        let summary = DownloadSummary {
            catalog_chapters,
            already_complete,
            completed: stats.completed.load(Ordering::SeqCst),
            needs_refetch: stats.needs_refetch.load(Ordering::SeqCst),
            dropped: stats.dropped.load(Ordering::SeqCst),
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            completed = summary.completed,
            needs_refetch = summary.needs_refetch,
            dropped = summary.dropped,
            cancelled = summary.cancelled,
            "chapter pipeline finished"
        );
        Ok(summary)
    }
}

/// Enqueues every pending chapter once, waits until all work is terminal,
/// then emits one stop token per fetch worker.
async fn producer(
    ctx: Arc<WorkerContext>,
    pending: Vec<String>,
    q1_tx: mpsc::Sender<FetchMsg>,
    workers: usize,
) {
    for cid in pending {
        let task = FetchMsg::Task(CidTask::new(cid));
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                debug!("producer cancelled during enqueue");
                return;
            }
            sent = q1_tx.send(task) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    // Requeues (from either side) keep chapters non-terminal, so waiting
    // for the progress counter guarantees no task can trail the stops.
    let mut done_rx = ctx.progress.subscribe();
    loop {
        let done = *done_rx.borrow();
        if done >= ctx.progress.total() {
            break;
        }
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return,
            () = q1_tx.closed() => return,
            changed = done_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }

    debug!(workers, "all chapters terminal, emitting stop tokens");
    for _ in 0..workers {
        if q1_tx.send(FetchMsg::Stop).await.is_err() {
            return;
        }
    }
}

/// Fetch worker: Q1 → rate limit → fetch → Q2, with bounded requeue.
async fn fetch_worker(
    ctx: Arc<WorkerContext>,
    worker_id: usize,
    q1_rx: Arc<Mutex<mpsc::Receiver<FetchMsg>>>,
    q1_tx: mpsc::Sender<FetchMsg>,
    q2_tx: mpsc::Sender<ParseMsg>,
) {
    loop {
        let msg = {
            let mut rx = q1_rx.lock().await;
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => None,
                msg = rx.recv() => msg,
            }
        };
        let task = match msg {
            // Cancelled or every sender gone.
            None => break,
            Some(FetchMsg::Stop) => break,
            Some(FetchMsg::Task(task)) => task,
        };

        ctx.limiter.wait().await;
        let fetched = ctx.fetcher.get_book_chapter(&ctx.book_id, &task.cid).await;
        match fetched {
            Ok(pages) if !pages.is_empty() => {
                let html_task = HtmlTask {
                    cid: task.cid,
                    html_pages: pages,
                    retry: task.retry,
                };
                if q2_tx.send(ParseMsg::Task(html_task)).await.is_err() {
                    break;
                }
            }
            _ if ctx.cancel.is_cancelled() => {
                // Don't requeue into a run that is shutting down.
                break;
            }
            failed => {
                let error_text = match failed {
                    Err(error) => error.to_string(),
                    Ok(_) => "fetcher returned no pages".to_string(),
                };
                if task.retry < ctx.max_retries {
                    debug!(
                        worker_id,
                        cid = %task.cid,
                        retry = task.retry + 1,
                        max_retries = ctx.max_retries,
                        error = %error_text,
                        "transport failure, requeueing chapter"
                    );
                    requeue(&q1_tx, task.next_attempt());
                } else {
                    warn!(
                        site = %ctx.site,
                        cid = %task.cid,
                        attempts = task.retry + 1,
                        error = %error_text,
                        "chapter dropped after transport failures"
                    );
                    ctx.stats.add_dropped();
                    ctx.progress.bump().await;
                }
            }
        }
    }

    // Exactly one stop token per worker, on every exit path, so the parse
    // worker's count always reaches N.
    let _ = q2_tx.send(ParseMsg::Stop).await;
    debug!(worker_id, "fetch worker exited");
}

/// The single parse/store worker: Q2 → policies → parse → upsert.
async fn parse_store_worker(
    ctx: Arc<WorkerContext>,
    mut q2_rx: mpsc::Receiver<ParseMsg>,
    q1_tx: mpsc::Sender<FetchMsg>,
    workers: usize,
) -> Result<(), EngineError> {
    let mut stops_seen = 0usize;
    while stops_seen < workers {
        let Some(msg) = q2_rx.recv().await else {
            break;
        };
        let task = match msg {
            ParseMsg::Stop => {
                stops_seen += 1;
                continue;
            }
            ParseMsg::Task(task) => task,
        };

        if ctx.client.is_access_limited(&task.html_pages) {
            debug!(cid = %task.cid, "access-limited content, storing placeholder");
            ctx.store
                .upsert(&ChapterRecord::placeholder(task.cid.as_str(), true))
                .await?;
            ctx.stats.add_needs_refetch();
            ctx.progress.bump().await;
            continue;
        }

        if ctx.client.skip_empty_chapter(&task.html_pages) {
            debug!(cid = %task.cid, "intentionally empty chapter");
            ctx.store
                .upsert(&ChapterRecord::placeholder(task.cid.as_str(), false))
                .await?;
            ctx.stats.add_completed();
            ctx.progress.bump().await;
            continue;
        }

        match ctx.parser.parse_chapter(&task.html_pages, &task.cid) {
            None => {
                if task.retry < ctx.max_retries && !ctx.cancel.is_cancelled() {
                    debug!(
                        cid = %task.cid,
                        retry = task.retry + 1,
                        "page did not parse as a chapter, requeueing"
                    );
                    requeue(
                        &q1_tx,
                        CidTask {
                            cid: task.cid,
                            retry: task.retry + 1,
                        },
                    );
                } else {
                    warn!(
                        site = %ctx.site,
                        cid = %task.cid,
                        attempts = task.retry + 1,
                        "chapter dropped after parse failures"
                    );
                    ctx.stats.add_dropped();
                    ctx.progress.bump().await;
                }
            }
            Some(mut record) => {
                record.need_refetch = ctx.client.check_refetch(&record);
                if record.need_refetch {
                    ctx.stats.add_needs_refetch();
                } else {
                    ctx.stats.add_completed();
                }
                ctx.store.upsert(&record).await?;
                ctx.progress.bump().await;
            }
        }
    }
    debug!(stops_seen, "parse worker exited");
    Ok(())
}

/// Requeues a task on Q1 without ever blocking the caller.
///
/// Blocking a drain-side worker on a full Q1 would close the
/// Q1 → Q2 → Q1 cycle into a deadlock; a full queue falls back to a
/// detached send that completes as capacity frees up.
fn requeue(q1_tx: &mpsc::Sender<FetchMsg>, task: CidTask) {
    match q1_tx.try_send(FetchMsg::Task(task)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(msg)) => {
            let q1_tx = q1_tx.clone();
            tokio::spawn(async move {
                let _ = q1_tx.send(msg).await;
            });
        }
        // Run is over; the chapter stays unresolved, which only happens
        // on cancellation.
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
