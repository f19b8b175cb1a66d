//! Retransmission, delayed-ack and idle timers.
//!
//! Timers here are plain deadlines: nothing fires on its own. The owner of a
//! connection asks for the earliest deadline, sleeps until then, and calls
//! back into the connection, which checks each timer with
//! [`Timer::expired`]. Stopping a timer is just clearing its deadline, so a
//! wake-up that arrives after a stop finds nothing to do.
//!
//! - **T1** guards unacknowledged frames and outstanding connect/disconnect
//!   requests. Its period grows with the retry count (see [`t1_period`]).
//! - **T2** delays stand-alone acknowledgments so they can be piggybacked.
//! - **Idle** triggers a keepalive enquiry on a silent link.

use std::time::Duration;

use tokio::time::Instant;

/// Upper bound on the T1 backoff multiplier.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 8;

/// One restartable deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// Arm (or re-arm) the timer to expire `period` after `now`.
    pub fn start(&mut self, now: Instant, period: Duration) {
        self.deadline = Some(now + period);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` exactly once when the deadline has passed; the timer is
    /// stopped as a side effect.
    pub fn expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// T1 period after `retries` consecutive expirations.
///
/// With backoff the period is `base * 2^retries`, the multiplier capped at
/// [`MAX_BACKOFF_MULTIPLIER`]; without it the period stays at `base`.
pub fn t1_period(base: Duration, retries: u32, backoff: bool) -> Duration {
    if !backoff {
        return base;
    }
    let multiplier = 1u32
        .checked_shl(retries)
        .unwrap_or(MAX_BACKOFF_MULTIPLIER)
        .min(MAX_BACKOFF_MULTIPLIER);
    base * multiplier
}

/// Earliest of a set of optional deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}
