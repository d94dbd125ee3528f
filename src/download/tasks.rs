//! In-flight task types and typed queue messages.
//!
//! End-of-stream is a dedicated enum variant, never a payload value: type
//! narrowing at the dequeue site is a plain `match`, and a page that
//! happens to be empty can never be mistaken for a stop signal.
//!
//! The retry counter travels with the task, not the worker, so retries
//! stay correct across requeues from either side of the pipeline.

/// A chapter waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidTask {
    /// Chapter id.
    pub cid: String,
    /// Attempts already consumed by requeues.
    pub retry: u32,
}

impl CidTask {
    /// Creates a first-attempt task.
    #[must_use]
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            retry: 0,
        }
    }

    /// The task to enqueue when this attempt failed.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            cid: self.cid.clone(),
            retry: self.retry + 1,
        }
    }
}

/// A completed raw fetch ready for parsing.
///
/// `html_pages` is ordered and non-empty; single-page sites wrap their
/// page in a one-element list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTask {
    /// Chapter id.
    pub cid: String,
    /// Raw pages in reading order.
    pub html_pages: Vec<String>,
    /// Retry count inherited from the fetch task.
    pub retry: u32,
}

/// Message on the fetch queue (Q1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMsg {
    /// A chapter to fetch.
    Task(CidTask),
    /// Typed end-of-stream sentinel.
    Stop,
}

/// Message on the parse queue (Q2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMsg {
    /// A fetched chapter to parse and store.
    Task(HtmlTask),
    /// Typed end-of-stream sentinel, one per fetch worker.
    Stop,
}
