//! Rate-limited retry executor for remote calls
//!
//! Every call to the folder store goes through [`Executor::execute`]:
//! - Throttle: consecutive calls are spaced by a minimum delay plus random
//!   jitter, so several workers started together drift apart
//! - Classification: only rate-limit responses (and transport failures)
//!   are retried, see [`RemoteError::is_retryable`]
//! - Backoff: exponential from 1s, capped per policy, plus jitter
//! - Ceiling: the last error is returned wrapped in
//!   [`RemoteError::Exhausted`] with the operation name and its input.
//!   Transport failures get at most [`TRANSPORT_MAX_ATTEMPTS`] attempts
//! - Shutdown: once the shutdown flag is set, throttle and backoff sleeps
//!   end early and the call returns [`RemoteError::Cancelled`]

use crate::error::{RemoteError, RemoteResult};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Attempt ceiling for transport failures (timeouts, resets)
pub const TRANSPORT_MAX_ATTEMPTS: u32 = 2;

/// Granularity at which sleeps notice the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Retry behaviour for one class of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,

    /// Cap on the exponential part of the delay
    pub max_delay: Duration,

    /// Whether each attempt waits for the shared throttle
    pub throttled: bool,
}

impl RetryPolicy {
    /// Folder searches and listings
    pub const fn search() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            throttled: true,
        }
    }

    /// Permission creation and other mutations
    pub const fn mutation() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            throttled: true,
        }
    }

    /// Sheet reads and cell writes (separate quota, not throttled)
    pub const fn sheet_write() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            throttled: false,
        }
    }

    /// Backoff before attempt `failed_attempt + 1`, without jitter
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Upper bound on the total time spent sleeping in backoff
    pub fn max_total_backoff(&self, jitter: Duration) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff_delay(attempt) + jitter)
            .sum()
    }
}

/// Random duration in `[0, max]`
fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Sleep for `duration`, ending early once `shutdown` is set
async fn pause(duration: Duration, shutdown: Option<&AtomicBool>) -> RemoteResult<()> {
    let Some(flag) = shutdown else {
        sleep(duration).await;
        return Ok(());
    };

    let deadline = Instant::now() + duration;
    loop {
        if flag.load(Ordering::SeqCst) {
            return Err(RemoteError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        sleep(remaining.min(SHUTDOWN_POLL)).await;
    }
}

/// Minimum spacing between consecutive remote calls
pub struct Throttle {
    min_delay: Duration,
    max_jitter: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Create a throttle
    pub fn new(min_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            min_delay,
            max_jitter,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the next call is allowed, then claim the slot
    pub async fn wait(&self, shutdown: Option<&AtomicBool>) -> RemoteResult<()> {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let target = self.min_delay + random_jitter(self.max_jitter);
            let elapsed = prev.elapsed();
            if elapsed < target {
                pause(target - elapsed, shutdown).await?;
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// Executes remote operations with throttling and retries
pub struct Executor {
    throttle: Throttle,
    backoff_jitter: Duration,
    shutdown: Option<Arc<AtomicBool>>,
    attempts: AtomicU64,
    retries: AtomicU64,
}

impl Executor {
    /// Create an executor
    pub fn new(throttle: Duration, throttle_jitter: Duration, backoff_jitter: Duration) -> Self {
        Self {
            throttle: Throttle::new(throttle, throttle_jitter),
            backoff_jitter,
            shutdown: None,
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Executor with no throttle and no jitter
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Stop waiting and fail with [`RemoteError::Cancelled`] once `flag` is set
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    fn shutdown(&self) -> Option<&AtomicBool> {
        self.shutdown.as_deref()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown().is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Total attempts made through this executor
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Total retries (attempts after a retryable failure)
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Run `op` under `policy`
    ///
    /// `operation` and `context` only label logs and the exhausted error.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        context: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.is_shutdown() {
                debug!(operation, context, "Shutdown requested, not attempting");
                return Err(RemoteError::Cancelled);
            }
            if policy.throttled {
                self.throttle.wait(self.shutdown()).await?;
            }
            self.attempts.fetch_add(1, Ordering::Relaxed);

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(operation, context, error = %err, "Non-retryable error");
                return Err(err);
            }

            let ceiling = match err {
                RemoteError::Transport(_) => policy.max_attempts.min(TRANSPORT_MAX_ATTEMPTS),
                _ => policy.max_attempts,
            };
            if attempt >= ceiling {
                warn!(operation, context, attempts = attempt, error = %err, "Retries exhausted");
                return Err(RemoteError::Exhausted {
                    operation: operation.to_string(),
                    context: context.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = policy.backoff_delay(attempt) + random_jitter(self.backoff_jitter);
            warn!(
                operation,
                context,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Rate limited, backing off"
            );
            self.retries.fetch_add(1, Ordering::Relaxed);
            pause(delay, self.shutdown()).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_backoff_schedule() {
        let search = RetryPolicy::search();
        assert_eq!(search.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(search.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(search.backoff_delay(5), Duration::from_secs(16));
        assert_eq!(search.backoff_delay(6), Duration::from_secs(30));
        assert_eq!(search.backoff_delay(40), Duration::from_secs(30));

        let mutation = RetryPolicy::mutation();
        assert_eq!(mutation.backoff_delay(7), Duration::from_secs(60));
        assert_eq!(mutation.max_total_backoff(Duration::ZERO), Duration::from_secs(1 + 2 + 4 + 8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_reached_then_propagates() {
        let executor = Executor::unthrottled();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::search();
        let start = Instant::now();

        let result: RemoteResult<()> = executor
            .execute("files.list", "name=Alice", &policy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::http(429, None, "Too Many Requests"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() <= policy.max_total_backoff(Duration::ZERO));
        match result {
            Err(RemoteError::Exhausted { operation, context, attempts, source }) => {
                assert_eq!(operation, "files.list");
                assert_eq!(context, "name=Alice");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, RemoteError::Http { status: 429, .. }));
            }
            other => panic!("expected exhausted error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_ceiling_with_jitter_bound() {
        let jitter = Duration::from_millis(500);
        let executor = Executor::new(Duration::ZERO, Duration::ZERO, jitter);
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::mutation();
        let start = Instant::now();

        let result: RemoteResult<()> = executor
            .execute("permissions.create", "folder=f1", &policy, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::http(403, Some("userRateLimitExceeded"), "quota"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() <= policy.max_total_backoff(jitter));
        assert_eq!(executor.retries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let executor = Executor::unthrottled();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let start = Instant::now();

        let result: RemoteResult<()> = executor
            .execute("permissions.create", "folder=f1", &RetryPolicy::mutation(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::http(403, Some("insufficientFilePermissions"), "denied"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(result, Err(RemoteError::Http { status: 403, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let executor = Executor::unthrottled();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = executor
            .execute("files.list", "q", &RetryPolicy::search(), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RemoteError::http(429, None, "slow down"))
                } else {
                    Ok("folder-id")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "folder-id");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_use_lower_ceiling() {
        let executor = Executor::unthrottled();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: RemoteResult<()> = executor
            .execute("permissions.create", "folder=f1", &RetryPolicy::mutation(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Transport("operation timed out".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), TRANSPORT_MAX_ATTEMPTS);
        assert!(matches!(
            result,
            Err(RemoteError::Exhausted { attempts: TRANSPORT_MAX_ATTEMPTS, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let flag = Arc::new(AtomicBool::new(false));
        let executor = Executor::unthrottled().with_shutdown(flag.clone());
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let start = Instant::now();

        let policy = RetryPolicy::mutation();
        let call = executor.execute("permissions.create", "folder=f1", &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RemoteError::http(429, None, "slow down"))
        });
        let interrupt = async {
            sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        };
        let (result, ()) = tokio::join!(call, interrupt);

        assert!(matches!(result, Err(RemoteError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_throttle() {
        let flag = Arc::new(AtomicBool::new(false));
        let executor = Executor::new(Duration::from_secs(10), Duration::ZERO, Duration::ZERO)
            .with_shutdown(flag.clone());
        let _: RemoteResult<()> = executor
            .execute("files.list", "", &RetryPolicy::search(), || async { Ok(()) })
            .await;

        let start = Instant::now();
        let policy = RetryPolicy::search();
        let call = executor.execute("files.list", "", &policy, || async {
            Ok::<(), RemoteError>(())
        });
        let interrupt = async {
            sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        };
        let (result, ()) = tokio::join!(call, interrupt);

        assert!(matches!(result, Err(RemoteError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(executor.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spacing() {
        let executor = Executor::new(Duration::from_millis(2500), Duration::ZERO, Duration::ZERO);
        let start = Instant::now();

        for _ in 0..3 {
            let _: RemoteResult<()> = executor
                .execute("noop", "", &RetryPolicy::search(), || async { Ok(()) })
                .await;
        }

        // First call is free, then two full spacings
        assert!(start.elapsed() >= Duration::from_millis(5000));

        // Unthrottled policies do not wait
        let before = Instant::now();
        let _: RemoteResult<()> = executor
            .execute("values.update", "", &RetryPolicy::sheet_write(), || async { Ok(()) })
            .await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
