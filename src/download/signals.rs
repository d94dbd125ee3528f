//! Progress reporting and cooperative cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, watch};
use tracing::debug;

/// Future returned by a progress hook invocation.
pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// User-supplied async callback invoked as `(done, total)` once per
/// terminal chapter outcome.
pub type ProgressHook = Arc<dyn Fn(usize, usize) -> HookFuture + Send + Sync>;

/// Lightweight progress reporter.
///
/// `bump` is called exactly once per catalog chapter on a terminal
/// outcome. Invocations of the hook are serialized, so hooks observe a
/// strictly increasing `done`.
pub struct Progress {
    total: usize,
    done: AtomicUsize,
    hook: Option<ProgressHook>,
    hook_guard: Mutex<()>,
    watch_tx: watch::Sender<usize>,
}

impl Progress {
    /// Creates a reporter for `total` chapters.
    #[must_use]
    pub fn new(total: usize, hook: Option<ProgressHook>) -> Self {
        let (watch_tx, _) = watch::channel(0);
        Self {
            total,
            done: AtomicUsize::new(0),
            hook,
            hook_guard: Mutex::new(()),
            watch_tx,
        }
    }

    /// Total number of chapters being worked.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Chapters with a terminal outcome so far.
    #[must_use]
    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    /// Whether every chapter has reached a terminal outcome.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done() >= self.total
    }

    /// Subscribes to `done` updates (used to gate stop-token emission).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.watch_tx.subscribe()
    }

    /// Records one terminal outcome and invokes the hook.
    pub async fn bump(&self) {
        let _serialized = self.hook_guard.lock().await;
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.watch_tx.send(done);
        if let Some(hook) = &self.hook {
            hook(done, self.total).await;
        }
    }

    /// Reports the current state through the hook without recording an
    /// outcome. Used for the final report on cancelled or empty runs,
    /// where no bump delivers the closing state.
    pub async fn report_final(&self) {
        let _serialized = self.hook_guard.lock().await;
        let done = self.done.load(Ordering::SeqCst);
        debug!(done, total = self.total, "final progress state");
        if let Some(hook) = &self.hook {
            hook(done, self.total).await;
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("done", &self.done())
            .field("total", &self.total)
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

/// Cooperative cancellation token.
///
/// Cancellation is observed at suspension points; workers drain the item
/// in hand, forward their stop tokens, and exit. `cancel` is idempotent.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            inner: Arc::new(CancelInner { tx, rx }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.inner.tx.send(true);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives inside `inner`, so this cannot happen while
            // any token clone is alive; park forever rather than report a
            // phantom cancellation.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
