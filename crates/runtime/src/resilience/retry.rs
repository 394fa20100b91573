//! Generic retry engine with bounded attempts and configurable backoff.
//!
//! One core algorithm drives two thin adapters: [`RetryExecutor::execute`]
//! suspends the calling task between attempts (tokio sleep), while
//! [`RetryExecutor::execute_blocking`] blocks the calling thread. Both share
//! the attempt loop, failure classification and backoff math.
//!
//! Failure taxonomy:
//! - a failure whose [`FailureClass`](crate::error::FailureClass) is outside
//!   the configured set propagates after exactly one attempt as
//!   [`RetryError::NonRetryable`] — retries must never mask permanent
//!   failures;
//! - a retryable failure triggers backoff and re-attempt, up to
//!   `max_attempts` invocations in total;
//! - once attempts are exhausted, [`RetryError::Exhausted`] chains the last
//!   underlying error and is always fatal to the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{Classify, FailureClass};

/// Errors surfaced by the retry engine.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All permitted attempts failed; chains the last underlying error.
    #[error("operation failed after {attempts} attempts")]
    Exhausted {
        /// Number of invocations performed (equals the configured maximum).
        attempts: u32,
        /// The error raised by the final attempt.
        #[source]
        source: E,
    },

    /// The first failure was not retryable and propagated immediately.
    #[error("operation failed with a non-retryable error")]
    NonRetryable {
        /// The original error, unchanged.
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Recovers the underlying operation error.
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => source,
        }
    }

    /// Returns `true` when all attempts were consumed.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Result type for retried operations.
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Invalid retry configuration rejected at build time.
#[derive(Debug, Error)]
#[error("invalid retry configuration: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Delay strategy applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base_delay × 2^(attempt−1)`: delays are non-decreasing across
    /// attempts.
    Exponential,
    /// `base_delay + uniform(0, 0.1 × base_delay)`, recomputed fresh for
    /// every attempt. The jitter avoids synchronized retry storms across
    /// independent callers.
    FixedJitter,
}

/// Condition deciding whether a failure is retryable.
pub enum RetryCondition {
    /// Retry failures whose class appears in the set.
    Classes(Vec<FailureClass>),
    /// Retry failures accepted by a custom predicate.
    Custom(Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>),
}

impl Clone for RetryCondition {
    fn clone(&self) -> Self {
        match self {
            Self::Classes(classes) => Self::Classes(classes.clone()),
            Self::Custom(pred) => Self::Custom(Arc::clone(pred)),
        }
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classes(classes) => f.debug_tuple("Classes").field(classes).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<predicate>").finish(),
        }
    }
}

/// Callback invoked before each backoff delay with `(attempt, error)`.
///
/// A callback failure is logged and never propagated to the caller.
pub type OnRetry = Arc<
    dyn Fn(u32, &(dyn std::error::Error + 'static)) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
>;

/// Immutable retry configuration, shared across all calls.
#[derive(Clone)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
    retry_on: RetryCondition,
    on_retry: Option<OnRetry>,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff", &self.backoff)
            .field("retry_on", &self.retry_on)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RetryConfig {
    /// Starts building a configuration.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Constructs a preset: exponential backoff over a fixed class set.
    ///
    /// Presets use compile-time constants, so no validation is needed.
    pub(crate) fn preset(
        max_attempts: u32,
        base_delay: Duration,
        classes: &[FailureClass],
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential,
            retry_on: RetryCondition::Classes(classes.to_vec()),
            on_retry: None,
        }
    }

    /// Maximum number of operation invocations.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// The configured backoff mode.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Computes the delay charged after the given failed attempt (1-based).
    ///
    /// The exponent is clamped so pathological attempt counts saturate
    /// instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << exponent)
            }
            Backoff::FixedJitter => {
                let jitter = rand::thread_rng().gen_range(0.0..0.1);
                self.base_delay + self.base_delay.mul_f64(jitter)
            }
        }
    }

    fn is_retryable<E: Classify + 'static>(&self, error: &E) -> bool {
        match &self.retry_on {
            RetryCondition::Classes(classes) => classes.contains(&error.class()),
            RetryCondition::Custom(pred) => pred(error),
        }
    }

    /// Classifies a failed attempt and, when it will be retried, fires the
    /// `on_retry` callback and computes the backoff delay.
    fn handle_failure<E: Classify + 'static>(&self, attempt: u32, error: &E) -> NextStep {
        if !self.is_retryable(error) {
            debug!(error = %error, "failure is not retryable, propagating");
            return NextStep::Fatal;
        }

        if attempt >= self.max_attempts {
            error!(
                attempts = attempt,
                error = %error,
                "all retry attempts exhausted"
            );
            return NextStep::Exhausted;
        }

        let delay = self.delay_for(attempt);
        warn!(
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "operation failed, retrying"
        );

        if let Some(callback) = &self.on_retry {
            if let Err(callback_error) = callback(attempt, error) {
                error!(attempt, error = %callback_error, "retry callback failed");
            }
        }

        NextStep::RetryAfter(delay)
    }
}

/// Decision produced for one failed attempt.
enum NextStep {
    Fatal,
    Exhausted,
    RetryAfter(Duration),
}

/// Builder with validation for [`RetryConfig`].
pub struct RetryConfigBuilder {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
    retry_on: Option<RetryCondition>,
    on_retry: Option<OnRetry>,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    /// Creates a builder with 3 attempts, a 1s base delay and exponential
    /// backoff. The retry condition has no default: callers must name the
    /// failure classes they consider transient.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
            retry_on: None,
            on_retry: None,
        }
    }

    /// Sets the maximum number of invocations (must be ≥ 1).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay before the first retry (must be non-zero).
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Selects exponential backoff.
    pub fn exponential_backoff(mut self) -> Self {
        self.backoff = Backoff::Exponential;
        self
    }

    /// Selects fixed-delay-with-jitter backoff.
    pub fn fixed_jitter_backoff(mut self) -> Self {
        self.backoff = Backoff::FixedJitter;
        self
    }

    /// Names the failure classes to retry.
    pub fn retry_on(mut self, classes: impl IntoIterator<Item = FailureClass>) -> Self {
        self.retry_on = Some(RetryCondition::Classes(classes.into_iter().collect()));
        self
    }

    /// Installs a custom retryability predicate.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(RetryCondition::Custom(Arc::new(predicate)));
        self
    }

    /// Installs a callback invoked with `(attempt, error)` before each delay.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &(dyn std::error::Error + 'static)) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts must be at least 1"));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::new("base_delay must be positive"));
        }
        let retry_on = match self.retry_on {
            Some(RetryCondition::Classes(classes)) if classes.is_empty() => {
                return Err(ConfigError::new("retry_on must name at least one failure class"));
            }
            Some(condition) => condition,
            None => {
                return Err(ConfigError::new(
                    "a retry condition is required: use retry_on() or retry_when()",
                ));
            }
        };

        Ok(RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            backoff: self.backoff,
            retry_on,
            on_retry: self.on_retry,
        })
    }
}

/// Stateless wrapper executing operations under a [`RetryConfig`].
///
/// Construct once at startup and share; the executor holds no per-call
/// state, so no locking is involved.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Wraps the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The configuration driving this executor.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes a suspension-based operation with retries.
    ///
    /// The inter-attempt delay suspends only the calling task; the runtime
    /// stays free to run other ready tasks. Retries of a single call are
    /// strictly sequential.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> RetryResult<T, E>
    where
        E: Classify + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(failure) => match self.config.handle_failure(attempt, &failure) {
                    NextStep::Fatal => return Err(RetryError::NonRetryable { source: failure }),
                    NextStep::Exhausted => {
                        return Err(RetryError::Exhausted { attempts: attempt, source: failure });
                    }
                    NextStep::RetryAfter(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                },
            }
        }
    }

    /// Executes a blocking operation with retries.
    ///
    /// The inter-attempt delay blocks the calling thread for its full
    /// duration. Do not call from an async context.
    pub fn execute_blocking<T, E, F>(&self, mut operation: F) -> RetryResult<T, E>
    where
        E: Classify + 'static,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1u32;
        loop {
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(failure) => match self.config.handle_failure(attempt, &failure) {
                    NextStep::Fatal => return Err(RetryError::NonRetryable { source: failure }),
                    NextStep::Exhausted => {
                        return Err(RetryError::Exhausted { attempts: attempt, source: failure });
                    }
                    NextStep::RetryAfter(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                },
            }
        }
    }
}

/// Convenience: execute an async operation under the given configuration.
pub async fn retry<T, E, F, Fut>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    E: Classify + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryExecutor::new(config).execute(operation).await
}

/// Convenience: execute a blocking operation under the given configuration.
pub fn retry_blocking<T, E, F>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    E: Classify + 'static,
    F: FnMut() -> Result<T, E>,
{
    RetryExecutor::new(config).execute_blocking(operation)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn transient() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "timed out")
    }

    fn config_ms(max_attempts: u32, base_ms: u64) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(base_ms))
            .retry_on([FailureClass::Timeout])
            .build()
            .expect("valid config")
    }

    #[test]
    fn exponential_schedule_doubles_per_attempt() {
        let config = config_ms(5, 100);

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_schedule_saturates_instead_of_overflowing() {
        let config = config_ms(5, 100);

        let huge = config.delay_for(u32::MAX);
        assert!(huge >= config.delay_for(31));
    }

    #[test]
    fn fixed_jitter_stays_within_ten_percent_of_base() {
        let config = RetryConfig::builder()
            .base_delay(Duration::from_millis(1000))
            .fixed_jitter_backoff()
            .retry_on([FailureClass::Timeout])
            .build()
            .expect("valid config");

        // Recomputed fresh per attempt: the bound holds for every attempt
        // number, it never compounds.
        for attempt in 1..50 {
            let delay = config.delay_for(attempt);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let result = RetryConfig::builder()
            .max_attempts(0)
            .retry_on([FailureClass::Io])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_zero_base_delay() {
        let result = RetryConfig::builder()
            .base_delay(Duration::ZERO)
            .retry_on([FailureClass::Io])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_requires_a_retry_condition() {
        assert!(RetryConfig::builder().build().is_err());
        assert!(RetryConfig::builder().retry_on([]).build().is_err());
    }

    #[test]
    fn blocking_success_needs_no_retry() {
        let config = config_ms(3, 1);
        let calls = AtomicU32::new(0);

        let result: RetryResult<u32, io::Error> = retry_blocking(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });

        assert_eq!(result.expect("should succeed"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocking_recovers_after_transient_failures() {
        let config = config_ms(3, 1);
        let calls = AtomicU32::new(0);

        let result: RetryResult<u32, io::Error> = retry_blocking(config, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.expect("should recover"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn blocking_exhausts_after_max_attempts() {
        let config = config_ms(3, 1);
        let calls = AtomicU32::new(0);

        let result: RetryResult<u32, io::Error> = retry_blocking(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        });

        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn non_retryable_failure_propagates_after_one_attempt() {
        let config = config_ms(3, 1);
        let calls = AtomicU32::new(0);

        let result: RetryResult<u32, io::Error> = retry_blocking(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        });

        match result {
            Err(err @ RetryError::NonRetryable { .. }) => {
                assert!(!err.is_exhausted());
                assert_eq!(err.into_source().kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("expected NonRetryable, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_predicate_controls_retryability() {
        let config = RetryConfig::builder()
            .max_attempts(4)
            .base_delay(Duration::from_millis(1))
            .retry_when(|error| error.to_string().contains("transient"))
            .build()
            .expect("valid config");

        let calls = AtomicU32::new(0);
        let result: RetryResult<(), io::Error> = retry_blocking(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("transient glitch"))
        });

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn on_retry_runs_once_per_delay_and_its_errors_are_swallowed() {
        let callback_calls = Arc::new(AtomicU32::new(0));
        let callback_calls_clone = Arc::clone(&callback_calls);

        let config = RetryConfig::builder()
            .max_attempts(3)
            .base_delay(Duration::from_millis(1))
            .retry_on([FailureClass::Timeout])
            .on_retry(move |_attempt, _error| {
                callback_calls_clone.fetch_add(1, Ordering::SeqCst);
                Err("callback exploded".into())
            })
            .build()
            .expect("valid config");

        let result: RetryResult<(), io::Error> = retry_blocking(config, || Err(transient()));

        // The callback failed every time, but exhaustion is still reported
        // normally and the callback ran once per backoff delay (N-1 times).
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(callback_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_recovers_after_transient_failures() {
        let config = config_ms(3, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let executor = RetryExecutor::new(config);
        let result: RetryResult<u32, io::Error> = executor
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("should recover"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn async_non_retryable_is_not_retried() {
        let config = config_ms(3, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: RetryResult<(), io::Error> = retry(config, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
