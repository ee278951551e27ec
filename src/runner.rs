//! Bounded-parallel execution of per-page work with retry.
//!
//! Both the client-side extraction step and the server-side document uploads funnel through
//! [`BoundedRunner`]. Results are labeled with the page number they belong to and returned in
//! ascending page order, never by completion order.

use futures_util::{StreamExt, future::join_all, stream};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Items processed by the runner expose the page they belong to.
pub trait PageLabel {
    /// 1-based page number used to label results and failures.
    fn page_number(&self) -> u32;
}

impl PageLabel for crate::pdf::SinglePage {
    fn page_number(&self) -> u32 {
        self.page_number
    }
}

/// How work is admitted into the concurrency window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheduling {
    /// Run `K` items, wait for all of them to settle, then start the next `K`.
    #[default]
    Windowed,
    /// Keep `K` items in flight, refilling a slot as soon as one finishes.
    Pooled,
}

impl std::str::FromStr for Scheduling {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "windowed" => Ok(Self::Windowed),
            "pooled" => Ok(Self::Pooled),
            other => Err(format!("unknown scheduling mode `{other}`")),
        }
    }
}

/// Per-item retry ceiling with linear backoff (`base_delay * attempt`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first.
    pub max_attempts: u32,
    /// Delay unit multiplied by the number of the attempt that just failed.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// A single item exhausted its attempts; the whole run fails with it.
#[derive(Debug, Error)]
#[error("page {page_number} failed after {attempts} attempts: {last_error}")]
pub struct ItemFailed<E> {
    /// Page whose work could not be completed.
    pub page_number: u32,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error returned by the final attempt.
    pub last_error: E,
}

/// Result of one item, carried with its page label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labeled<T> {
    /// Page the value belongs to.
    pub page_number: u32,
    /// Output of the item's operation.
    pub value: T,
}

/// Runs async operations over labeled items with a fixed concurrency limit and retry.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRunner {
    concurrency: usize,
    retry: RetryPolicy,
    scheduling: Scheduling,
}

impl BoundedRunner {
    /// Build a runner; a zero concurrency or attempt ceiling is raised to one.
    pub fn new(concurrency: usize, retry: RetryPolicy, scheduling: Scheduling) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
            scheduling,
        }
    }

    /// Concurrency window size.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `op` over every item. See [`Self::run_with_progress`].
    pub async fn run<I, T, E, F, Fut>(
        &self,
        items: &[I],
        op: F,
    ) -> Result<Vec<Labeled<T>>, ItemFailed<E>>
    where
        I: PageLabel,
        E: std::fmt::Display,
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_progress(items, op, |_, _| {}).await
    }

    /// Run `op` over every item, calling `progress(done, total)` as work advances.
    ///
    /// `op` is invoked once per attempt, so anything it builds (request bodies, byte buffers)
    /// is fresh for every retry. In windowed mode `progress` fires before each window with the
    /// number of items already settled, so it advances in steps of the window size. In pooled
    /// mode it fires after every completed item.
    pub async fn run_with_progress<I, T, E, F, Fut, P>(
        &self,
        items: &[I],
        op: F,
        mut progress: P,
    ) -> Result<Vec<Labeled<T>>, ItemFailed<E>>
    where
        I: PageLabel,
        E: std::fmt::Display,
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(usize, usize),
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);

        match self.scheduling {
            Scheduling::Windowed => {
                for window in items.chunks(self.concurrency) {
                    progress(results.len(), total);
                    let mut attempts = Vec::with_capacity(window.len());
                    for item in window {
                        attempts.push(self.attempt(item, &op));
                    }
                    let settled = join_all(attempts).await;
                    let mut first_failure: Option<ItemFailed<E>> = None;
                    for outcome in settled {
                        match outcome {
                            Ok(labeled) => results.push(labeled),
                            Err(failure) => {
                                let replace = first_failure
                                    .as_ref()
                                    .is_none_or(|prior| failure.page_number < prior.page_number);
                                if replace {
                                    first_failure = Some(failure);
                                }
                            }
                        }
                    }
                    if let Some(failure) = first_failure {
                        return Err(failure);
                    }
                }
            }
            Scheduling::Pooled => {
                let mut attempts = Vec::with_capacity(total);
                for item in items {
                    attempts.push(self.attempt(item, &op));
                }
                let mut in_flight = stream::iter(attempts).buffer_unordered(self.concurrency);
                while let Some(outcome) = in_flight.next().await {
                    results.push(outcome?);
                    progress(results.len(), total);
                }
            }
        }

        results.sort_by_key(|labeled| labeled.page_number);
        Ok(results)
    }

    async fn attempt<I, T, E, F, Fut>(&self, item: &I, op: &F) -> Result<Labeled<T>, ItemFailed<E>>
    where
        I: PageLabel,
        E: std::fmt::Display,
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let page_number = item.page_number();
        let mut attempt = 1;
        loop {
            match op(item).await {
                Ok(value) => return Ok(Labeled { page_number, value }),
                Err(error) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        page = page_number,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Page operation failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        page = page_number,
                        attempts = attempt,
                        error = %error,
                        "Page operation exhausted retries"
                    );
                    return Err(ItemFailed {
                        page_number,
                        attempts: attempt,
                        last_error: error,
                    });
                }
            }
        }
    }
}
