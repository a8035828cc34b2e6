//! Minimum-interval rate gate for upstream politeness.
//!
//! A single gate is shared by every entity worker talking to the same host,
//! so the spacing floor holds across the whole run rather than per entity.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::SharedClock;

/// Enforces a floor on elapsed time between consecutive upstream calls.
///
/// `acquire()` holds the gate's lock across the wait, so concurrent callers
/// are released one at a time, each at least `min_interval` after the
/// previous one.
pub struct RateGate {
    /// Minimum spacing between releases
    min_interval: Duration,
    /// Clock offset of the previous release
    last_release: Mutex<Option<Duration>>,
    clock: SharedClock,
    /// Name for logging
    name: String,
}

impl RateGate {
    /// Create a new gate.
    ///
    /// # Arguments
    /// * `name` - Name for logging purposes
    /// * `min_interval` - Minimum spacing between calls
    /// * `clock` - Time source used for measuring and waiting
    pub fn new(name: impl Into<String>, min_interval: Duration, clock: SharedClock) -> Self {
        Self {
            min_interval,
            last_release: Mutex::new(None),
            clock,
            name: name.into(),
        }
    }

    /// Wait until the next call may start.
    ///
    /// Returns the clock offset at which the caller was released.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_release.lock().await;

        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            let now = self.clock.now();
            if now < ready_at {
                debug!(
                    gate = %self.name,
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "Rate gate closed, waiting"
                );
                self.clock.sleep_until(ready_at).await;
            }
        }

        let released = self.clock.now();
        *last = Some(released);
        released
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("name", &self.name)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

/// Shared rate gate that can be cloned.
pub type SharedRateGate = Arc<RateGate>;

/// Create a shared rate gate.
pub fn shared_gate(
    name: impl Into<String>,
    min_interval: Duration,
    clock: SharedClock,
) -> SharedRateGate {
    Arc::new(RateGate::new(name, min_interval, clock))
}

// ============================================================================
// Tests
// ============================================================================
