//! Token-bucket rate limiter shared by one book's fetch workers.
//!
//! One bucket per book/session: every chapter request (including each page
//! of a paginated chapter) consumes a token, so the aggregate request rate
//! across all fetch workers converges to the configured tokens-per-second
//! regardless of worker count. Jitter spreads wakeups so workers do not
//! fire in lockstep.
//!
//! The internal mutex is held only for O(1) refill arithmetic, never across
//! the sleep.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Errors from token bucket construction.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// Refill rate must be a positive, finite number of tokens per second.
    #[error("invalid rate {rate}: must be positive and finite")]
    InvalidRate {
        /// The rejected rate value.
        rate: f64,
    },

    /// Bucket capacity must allow at least one token.
    #[error("invalid burst {burst}: must be at least 1")]
    InvalidBurst {
        /// The rejected burst value.
        burst: u32,
    },
}

/// Mutable bucket state, guarded by the limiter's mutex.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// An async token bucket.
///
/// `rate` tokens are added per second up to a capacity of `burst`. The
/// only operation is [`wait`](TokenBucket::wait), which blocks the caller
/// until one token has been consumed.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    jitter: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a bucket with `rate` tokens/s, capacity `burst`, and a
    /// uniform sleep jitter of `±jitter` seconds.
    ///
    /// The bucket starts full, so the first `burst` waits return
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidRate`] for a non-positive or
    /// non-finite rate and [`LimiterError::InvalidBurst`] for a zero burst.
    #[instrument]
    pub fn new(rate: f64, burst: u32, jitter: f64) -> Result<Self, LimiterError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(LimiterError::InvalidRate { rate });
        }
        if burst == 0 {
            return Err(LimiterError::InvalidBurst { burst });
        }

        debug!(rate, burst, jitter, "creating token bucket");
        Ok(Self {
            rate,
            capacity: f64::from(burst),
            jitter: jitter.max(0.0),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        })
    }

    /// Returns the configured refill rate in tokens per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Blocks until one token has been consumed.
    ///
    /// Fast path: refill from elapsed time and take a token. Slow path:
    /// compute the shortfall, release the lock, sleep the jittered wait,
    /// then re-acquire and consume.
    pub async fn wait(&self) {
        let sleep_for = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();

            state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let wait_time = (1.0 - state.tokens) / self.rate;
            let jitter = if self.jitter > 0.0 {
                rand::thread_rng().gen_range(-self.jitter..=self.jitter)
            } else {
                0.0
            };
            (wait_time + jitter).max(0.0)
        };

        tokio::time::sleep(Duration::from_secs_f64(sleep_for)).await;

        let mut state = self.state.lock().await;
        state.last_refill = Instant::now();
        state.tokens = (state.tokens - 1.0).max(0.0);
    }

    #[cfg(test)]
    async fn tokens(&self) -> f64 {
        self.state.lock().await.tokens
    }
}
