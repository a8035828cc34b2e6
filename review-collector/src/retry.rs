//! Bounded retry around single upstream calls.
//!
//! Every upstream request (probe or page) passes through
//! [`RetryController::call`], which applies the backoff policy, the shared
//! rate gate, and the per-attempt timeout.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use review_common::{BackoffKind, CollectorConfig};

use crate::clock::SharedClock;
use crate::rate_limiter::SharedRateGate;
use crate::source::SourceError;

// ============================================================================
// Backoff Policy
// ============================================================================

/// Delay applied before a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Exponential { base, max } => {
                let shift = retry.saturating_sub(1).min(31);
                base.checked_mul(1u32 << shift).unwrap_or(max).min(max)
            }
        }
    }
}

/// Retry policy for one upstream call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound on a single attempt
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CollectorConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed(config.backoff_delay()),
            BackoffKind::Exponential => Backoff::Exponential {
                base: config.backoff_delay(),
                max: config.max_backoff_delay(),
            },
        };

        Self {
            max_attempts: config.max_retries.max(1),
            backoff,
            call_timeout: config.call_timeout(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CollectorConfig::default())
    }
}

// ============================================================================
// Call Statistics
// ============================================================================

/// Counters for upstream traffic.
#[derive(Debug, Default)]
pub struct CallStats {
    attempts: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`CallStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStatsSnapshot {
    pub attempts: u64,
    pub failures: u64,
    pub retries: u64,
    pub abandoned: u64,
}

impl CallStats {
    pub fn snapshot(&self) -> CallStatsSnapshot {
        CallStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Abandonment
// ============================================================================

/// A call that did not succeed within its attempt budget.
#[derive(Debug, Clone, PartialEq)]
pub struct CallAbandoned {
    /// Human-readable call label, e.g. "page cbe/newest"
    pub label: String,
    /// Attempts actually made
    pub attempts: u32,
    pub last_error: SourceError,
}

impl std::fmt::Display for CallAbandoned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} abandoned after {} attempt(s): {}",
            self.label, self.attempts, self.last_error
        )
    }
}

impl std::error::Error for CallAbandoned {}

// ============================================================================
// Retry Controller
// ============================================================================

/// Wraps upstream calls with bounded retries, backoff, pacing and timeouts.
///
/// Cheap to clone; clones share the gate, clock and statistics.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    gate: SharedRateGate,
    clock: SharedClock,
    stats: Arc<CallStats>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, gate: SharedRateGate, clock: SharedClock) -> Self {
        Self {
            policy,
            gate,
            clock,
            stats: Arc::new(CallStats::default()),
        }
    }

    pub fn stats(&self) -> CallStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `op` until it succeeds, fails non-recoverably, or the attempt
    /// budget is spent.
    ///
    /// Each attempt waits for the rate gate first. Retries are preceded by
    /// the policy's backoff, stretched to any retry-after hint.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CallAbandoned>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.gate.acquire().await;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = match tokio::time::timeout(self.policy.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout),
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            self.stats.failures.fetch_add(1, Ordering::Relaxed);

            if !error.is_recoverable() || attempt >= max_attempts {
                self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    call = label,
                    attempts = attempt,
                    recoverable = error.is_recoverable(),
                    error = %error,
                    "Upstream call abandoned"
                );
                return Err(CallAbandoned {
                    label: label.to_string(),
                    attempts: attempt,
                    last_error: error,
                });
            }

            let mut delay = self.policy.backoff.delay(attempt);
            if let Some(hint) = error.retry_after() {
                delay = delay.max(hint);
            }

            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            info!(
                call = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Upstream call failed, retrying"
            );

            self.clock.sleep(delay).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::rate_limiter::shared_gate;
    use std::sync::atomic::AtomicU32;

    fn controller(max_attempts: u32, backoff: Backoff, clock: &ManualClock) -> RetryController {
        let shared: SharedClock = Arc::new(clock.clone());
        let gate = shared_gate("test", Duration::ZERO, Arc::clone(&shared));
        RetryController::new(
            RetryPolicy {
                max_attempts,
                backoff,
                call_timeout: Duration::from_secs(30),
            },
            gate,
            shared,
        )
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(200), Duration::from_secs(10));
    }

    #[test]
    fn test_policy_from_config() {
        let config = CollectorConfig {
            max_retries: 4,
            backoff: BackoffKind::Exponential,
            backoff_secs: 2.0,
            max_backoff_secs: 30.0,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                base: Duration::from_secs(2),
                max: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test]
    async fn test_never_exceeds_max_attempts() {
        let clock = ManualClock::new();
        let retry = controller(3, Backoff::Fixed(Duration::from_secs(5)), &clock);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry
            .call("page cbe/newest", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Network("connection reset".into())) }
            })
            .await;

        let abandoned = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(abandoned.attempts, 3);
        assert_eq!(abandoned.last_error, SourceError::Network("connection reset".into()));
        // Two backoffs between three attempts.
        assert_eq!(clock.now(), Duration::from_secs(10));

        let stats = retry.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.abandoned, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let clock = ManualClock::new();
        let retry = controller(3, Backoff::Fixed(Duration::from_secs(1)), &clock);
        let calls = AtomicU32::new(0);

        let result = retry
            .call("probe", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SourceError::Unavailable("HTTP 503".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(retry.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_non_recoverable_abandons_immediately() {
        let clock = ManualClock::new();
        let retry = controller(5, Backoff::Fixed(Duration::from_secs(1)), &clock);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry
            .call("probe com.cbe.mobilebanking", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::NotFound("com.cbe.mobilebanking".into())) }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_after_stretches_backoff() {
        let clock = ManualClock::new();
        let retry = controller(2, Backoff::Fixed(Duration::from_secs(1)), &clock);

        let _: Result<(), _> = retry
            .call("page", || async {
                Err(SourceError::RateLimited {
                    retry_after_secs: Some(7),
                })
            })
            .await;

        assert_eq!(clock.now(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let retry = RetryController::new(
            RetryPolicy {
                max_attempts: 1,
                backoff: Backoff::Fixed(Duration::ZERO),
                call_timeout: Duration::from_millis(10),
            },
            shared_gate("test", Duration::ZERO, Arc::clone(&shared)),
            shared,
        );

        let result: Result<(), _> = retry
            .call("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().last_error, SourceError::Timeout);
    }
}
