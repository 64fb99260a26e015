//! Retry with exponential backoff for Gmail API calls
//!
//! Every remote call the engine makes goes through [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{ErrorClass, RemoteError, SyncError};

/// Something that can wait; swapped out in tests to record delays
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Default classification of a failed call
///
/// 429 is rate limiting; 500/502/503/504 and dropped connections are
/// transient. Everything else is fatal.
pub fn classify(err: &RemoteError) -> ErrorClass {
    match err {
        RemoteError::Status { code: 429 } => ErrorClass::RateLimited,
        RemoteError::Status {
            code: 500 | 502 | 503 | 504,
        } => ErrorClass::TransientServer,
        RemoteError::Transport(_) => ErrorClass::TransientServer,
        _ => ErrorClass::Fatal,
    }
}

/// Classification for the history endpoint, where 404 means the start
/// history ID is too old to replay from
pub fn classify_history(err: &RemoteError) -> ErrorClass {
    match err.status() {
        Some(404) => ErrorClass::CursorExpired,
        _ => classify(err),
    }
}

/// Capped exponential backoff
///
/// A call is attempted at most `max_retries` times. Every retryable
/// failure, the last one included, is followed by a wait of
/// `base_delay * 2^n` (n counted from 0), so a caller giving up has
/// always backed off before it does.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES, Self::DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 5;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait after the `attempt`-th failure (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` with the default classifier
    pub fn call<T, F>(&self, operation: &str, op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Result<T, RemoteError>,
    {
        self.call_with(operation, classify, op)
    }

    /// Run `op`, retrying failures that `classify` marks retryable
    pub fn call_with<T, F, C>(
        &self,
        operation: &str,
        classify: C,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Result<T, RemoteError>,
        C: Fn(&RemoteError) -> ErrorClass,
    {
        let mut attempt = 0;
        loop {
            let err = match op() {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let class = classify(&err);
            if !class.is_retryable() {
                return Err(match class {
                    ErrorClass::CursorExpired => SyncError::CursorExpired,
                    _ => SyncError::Remote(err),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                "{} failed ({}), backing off {:?} (attempt {}/{})",
                operation,
                err,
                delay,
                attempt + 1,
                self.max_retries
            );
            self.sleeper.sleep(delay);
            attempt += 1;

            if attempt >= self.max_retries {
                return Err(SyncError::RetryExhausted {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}
