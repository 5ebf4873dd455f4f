//! # Failure Governor
//!
//! A per-session circuit breaker for the push path.
//!
//! ## Behaviour
//!
//! - **Cumulative accounting**: every failed push increments an `AtomicU32`.
//!   The counter never resets for the life of the session. The sender task
//!   writes it and the watchdog task reads it, so it is atomic rather than
//!   locked.
//!
//! - **Cooldown**: after each failure the send path sleeps for a fixed
//!   cooldown before it handles the next trigger. Only this session stalls.
//!   The sleep ends early if the session is cancelled.
//!
//! - **Ceiling**: once the count is strictly greater than `max_failed` the
//!   governor reports itself exceeded. The [`watchdog`] notices on its next
//!   poll and the session is torn down; the sender refuses to push in the
//!   meantime.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default ceiling on failed pushes.
pub const DEFAULT_MAX_FAILED: u32 = 10;
/// Default pause after a failed push.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
/// Default watchdog polling interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct FailureGovernor {
    max_failed: u32,
    cooldown: Duration,
    failed: AtomicU32,
}

impl FailureGovernor {
    pub fn new(max_failed: u32, cooldown: Duration) -> Self {
        Self {
            max_failed,
            cooldown,
            failed: AtomicU32::new(0),
        }
    }

    /// Counts one failure and returns the new total.
    pub fn record_failure(&self) -> u32 {
        // `fetch_add` returns the previous value.
        self.failed.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    /// Sleeps for the cooldown, or until `cancel` fires.
    pub async fn cool_down(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.cooldown) => {}
        }
    }

    /// Records a failure and then blocks the caller for the cooldown.
    pub async fn on_failure(&self, cancel: &CancellationToken) -> u32 {
        let count = self.record_failure();
        log::warn!(
            "push failed ({} of max {}), cooling down for {:?}",
            count,
            self.max_failed,
            self.cooldown
        );
        self.cool_down(cancel).await;
        count
    }

    pub fn failed_count(&self) -> u32 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn max_failed(&self) -> u32 {
        self.max_failed
    }

    /// True once more than `max_failed` pushes have failed.
    pub fn exceeded(&self) -> bool {
        self.failed_count() > self.max_failed
    }
}

impl Default for FailureGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILED, DEFAULT_COOLDOWN)
    }
}

/// Polls `governor` every `every` until it is exceeded or `cancel` fires.
///
/// Returns `true` when the ceiling was breached, `false` when cancelled.
pub async fn watchdog(governor: &FailureGovernor, every: Duration, cancel: &CancellationToken) -> bool {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {
                if governor.exceeded() {
                    log::error!(
                        "events failed too frequently ({} > {}), aborting session",
                        governor.failed_count(),
                        governor.max_failed()
                    );
                    return true;
                }
            }
        }
    }
}
