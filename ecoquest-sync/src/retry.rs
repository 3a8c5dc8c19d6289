//! Retry policy for query fetches
//!
//! A failed fetch is retried with exponential backoff until the policy says
//! stop. Errors that are deterministic (decode failures, cancellation) never
//! retry, and callers can pin individual HTTP statuses as terminal, e.g. a
//! `409` that means "nothing here" rather than "try again".

use crate::error::{QueryError, Result};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type RetryPredicate = Arc<dyn Fn(&QueryError, u32) -> bool + Send + Sync>;

/// How a failed fetch is retried
#[derive(Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Cap for the backoff delay
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub factor: f64,

    /// Random variation applied to each delay (0.0 - 1.0)
    pub jitter: f64,

    /// Statuses that settle the fetch immediately
    pub never_retry_statuses: Vec<u16>,

    predicate: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.0,
            never_retry_statuses: Vec::new(),
            predicate: None,
        }
    }

    /// Fail on the first error
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Treat `status` as terminal
    pub fn never_retry_status(mut self, status: u16) -> Self {
        if !self.never_retry_statuses.contains(&status) {
            self.never_retry_statuses.push(status);
        }
        self
    }

    /// Additional predicate consulted after the built-in rules.
    /// Receives the error and the zero-based attempt that failed.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&QueryError, u32) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether another attempt should follow the failed `attempt`
    pub fn should_retry(&self, error: &QueryError, attempt: u32) -> bool {
        if attempt >= self.max_retries || !error.is_retryable() {
            return false;
        }
        if let Some(status) = error.status() {
            if self.never_retry_statuses.contains(&status) {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(error, attempt),
            None => true,
        }
    }

    /// Backoff before retry number `attempt + 1`, without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.min(32) as i32);
        let millis = self.base_delay.as_millis() as f64 * exp;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let millis = (delay.as_millis() as f64 * (1.0 + spread)).max(0.0);
        Duration::from_millis(millis as u64)
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// Returns the final result together with the number of retries made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let error = match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(error) => error,
            };

            if !self.should_retry(&error, attempt) {
                return (Err(error), attempt);
            }

            let delay = self.jittered(self.delay_for(attempt));
            attempt += 1;
            warn!(
                "Fetch {} failed (attempt {}/{}), retrying after {:?}: {}",
                label,
                attempt,
                self.max_retries + 1,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("factor", &self.factor)
            .field("jitter", &self.jitter)
            .field("never_retry_statuses", &self.never_retry_statuses)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
