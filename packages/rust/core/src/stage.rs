//! Retrying executor for a single pipeline stage.
//!
//! A stage is a `prepare → execute → finalize` triple. `prepare` validates the
//! stage's own inputs and is never retried. `execute` performs the I/O and is
//! retried with exponential backoff while it keeps failing transiently.
//! `finalize` turns the raw output into the stage's typed result; its failures
//! are permanent.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use kwresearch_shared::{ErrorKind, ProviderError, RetryConfig, Stage, StageError};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Backoff parameters for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total `execute` attempts, the first one included. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_wait: Duration,
    pub backoff_multiplier: f64,
    /// Cap applied before jitter.
    pub max_wait: Duration,
    /// Each wait is spread by up to `± jitter_ratio` of itself.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_wait: Duration::from_millis(config.initial_wait_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_wait: Duration::from_millis(config.max_wait_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately, used where timing does not matter.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_wait: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_wait: Duration::ZERO,
            jitter_ratio: 0.0,
        }
    }

    /// Un-jittered wait after failed attempt `attempt` (1-based):
    /// `initial_wait * backoff_multiplier^(attempt - 1)`, capped at `max_wait`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_wait.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_wait.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Wait after failed attempt `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter_ratio.is_finite() || self.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let ratio = self.jitter_ratio.min(1.0);
        let factor = 1.0 + rand::rng().random_range(-ratio..=ratio);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// ---------------------------------------------------------------------------
// StageTask
// ---------------------------------------------------------------------------

/// One stage of the keyword pipeline.
///
/// Implementations own everything they operate on; the executor only calls
/// the three hooks.
#[async_trait]
pub trait StageTask: Send + Sync {
    /// Raw output of [`execute`](Self::execute).
    type Raw: Send;
    /// Typed result handed to the next stage.
    type Output: Send;

    fn stage(&self) -> Stage;

    /// Validate stage-local inputs.
    fn prepare(&self) -> Result<(), StageError> {
        Ok(())
    }

    /// Perform the (usually I/O-bound) operation.
    async fn execute(&self) -> Result<Self::Raw, ProviderError>;

    /// Post-process the raw output.
    fn finalize(&self, raw: Self::Raw) -> Result<Self::Output, StageError>;
}

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

/// Runs [`StageTask`]s under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct StageExecutor {
    policy: RetryPolicy,
}

impl StageExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `task` to completion.
    ///
    /// On retry exhaustion the error carries the kind of the last failure and
    /// `attempts == max_attempts`.
    pub async fn run<T: StageTask>(&self, task: &T) -> Result<T::Output, StageError> {
        let stage = task.stage();

        if let Err(err) = task.prepare() {
            debug!(%stage, error = %err.message, "stage input rejected");
            return Err(StageError {
                kind: ErrorKind::InvalidInput,
                attempts: 0,
                ..err
            });
        }

        let max_attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            match task.execute().await {
                Ok(raw) => {
                    if attempt > 1 {
                        debug!(%stage, attempt, "stage succeeded after retry");
                    }
                    return task.finalize(raw).map_err(|err| StageError {
                        kind: ErrorKind::Permanent,
                        attempts: attempt,
                        ..err
                    });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = self.policy.delay_for(attempt);
                    warn!(
                        %stage,
                        attempt,
                        max = max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(StageError::from_provider(stage, err, attempt)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Scripted stage: pops one result per `execute` call.
    struct Scripted {
        results: Mutex<Vec<Result<u32, ProviderError>>>,
        calls: AtomicU32,
        valid: bool,
        finalize_ok: bool,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<u32, ProviderError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: AtomicU32::new(0),
                valid: true,
                finalize_ok: true,
            }
        }
    }

    #[async_trait]
    impl StageTask for Scripted {
        type Raw = u32;
        type Output = String;

        fn stage(&self) -> Stage {
            Stage::Fetch
        }

        fn prepare(&self) -> Result<(), StageError> {
            if self.valid {
                Ok(())
            } else {
                Err(StageError::invalid_input(Stage::Fetch, "empty url"))
            }
        }

        async fn execute(&self) -> Result<u32, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::permanent("script exhausted")))
        }

        fn finalize(&self, raw: u32) -> Result<String, StageError> {
            if self.finalize_ok {
                Ok(format!("value-{raw}"))
            } else {
                Err(StageError::new(Stage::Fetch, ErrorKind::Transient, "bad shape"))
            }
        }
    }

    fn fast_executor(max_attempts: u32) -> StageExecutor {
        StageExecutor::new(RetryPolicy {
            max_attempts,
            initial_wait: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_wait: Duration::from_millis(5),
            jitter_ratio: 0.1,
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let task = Scripted::new(vec![
            Err(ProviderError::transient("timeout")),
            Err(ProviderError::transient("HTTP 503")),
            Ok(7),
        ]);
        let out = fast_executor(3).run(&task).await.expect("third attempt succeeds");
        assert_eq!(out, "value-7");
        assert_eq!(task.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_max_attempts() {
        let task = Scripted::new(vec![
            Err(ProviderError::transient("a")),
            Err(ProviderError::transient("b")),
            Err(ProviderError::transient("c")),
            Ok(1),
        ]);
        let err = fast_executor(3).run(&task).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.message, "c");
        assert_eq!(task.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let task = Scripted::new(vec![Err(ProviderError::permanent("HTTP 404")), Ok(1)]);
        let err = fast_executor(5).run(&task).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert_eq!(err.attempts, 1);
        assert_eq!(task.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_input_skips_execute() {
        let mut task = Scripted::new(vec![Ok(1)]);
        task.valid = false;
        let err = fast_executor(3).run(&task).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.attempts, 0);
        assert_eq!(task.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn finalize_failure_is_permanent() {
        let mut task = Scripted::new(vec![Ok(1)]);
        task.finalize_ok = false;
        let err = fast_executor(3).run(&task).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert_eq!(err.attempts, 1);
        assert_eq!(task.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_wait: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_wait: Duration::from_millis(350),
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(4), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_wait: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_wait: Duration::from_secs(10),
            jitter_ratio: 0.2,
        };
        for _ in 0..50 {
            let wait = policy.delay_for(1);
            assert!(wait >= Duration::from_millis(800), "{wait:?}");
            assert!(wait <= Duration::from_millis(1200), "{wait:?}");
        }
    }

    #[test]
    fn degenerate_policies_do_not_panic() {
        let nan_jitter = RetryPolicy {
            max_attempts: 3,
            initial_wait: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_wait: Duration::from_secs(1),
            jitter_ratio: f64::NAN,
        };
        assert_eq!(nan_jitter.delay_for(1), Duration::from_millis(100));

        let huge = RetryPolicy {
            max_attempts: 3,
            initial_wait: Duration::from_millis(u64::MAX),
            backoff_multiplier: f64::MAX,
            max_wait: Duration::from_millis(u64::MAX),
            jitter_ratio: 1.0,
        };
        let _ = huge.delay_for(40);

        let nan_multiplier = RetryPolicy {
            backoff_multiplier: f64::NAN,
            ..nan_jitter
        };
        let _ = nan_multiplier.delay_for(2);
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_wait, Duration::from_millis(500));
        assert_eq!(policy.max_wait, Duration::from_secs(10));
    }
}
