//! Injectable time source.
//!
//! Everything that waits (rate gate, retry backoff) goes through a `Clock`
//! so tests can drive time deterministically with [`ManualClock`].

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monotonic time source with async sleeping.
///
/// `now()` is the elapsed time since the clock's own epoch.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current offset from the clock's epoch.
    fn now(&self) -> Duration;

    /// Suspend until `now() >= deadline`.
    async fn sleep_until(&self, deadline: Duration);

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

// ============================================================================
// Tokio Clock
// ============================================================================

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    epoch: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn sleep_until(&self, deadline: Duration) {
        tokio::time::sleep_until(self.epoch + deadline).await;
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

/// Virtual clock for tests.
///
/// Sleeping advances the clock to the deadline instantly, so waits are
/// observable through `now()` without real delay. Never moves backwards.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.lock();
        *offset += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Duration> {
        // A poisoned lock still holds a valid offset.
        self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.lock()
    }

    async fn sleep_until(&self, deadline: Duration) {
        {
            let mut offset = self.lock();
            if deadline > *offset {
                *offset = deadline;
            }
        }
        tokio::task::yield_now().await;
    }
}
