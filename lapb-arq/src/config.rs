//! Per-connection configuration.
//!
//! All protocol knobs live in one [`LinkConfig`] value handed to a connection
//! when it is created. Nothing is read from global state afterwards.

use std::time::Duration;

use crate::seq::Modulus;

/// What a T1 expiry does with the frames still awaiting acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetransmitPolicy {
    /// Move every unacknowledged frame back onto the unsent queue, reset
    /// V(S) to V(A) and let the window manager send them again (NET/ROM and
    /// ROSE behaviour).
    #[default]
    GoBack,
    /// Send copies of the unacknowledged frames straight from the sent queue
    /// without touching V(S) (LAPB behaviour).
    Resend,
}

/// Tunable parameters of one connection.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Sequence numbering scheme requested when establishing.
    pub modulus: Modulus,
    /// Maximum number of unacknowledged data frames (k). Also bounds how far
    /// ahead of V(R) an out-of-order frame may be and still be held. On a
    /// medium that reorders frames keep it within
    /// [`Modulus::reorder_safe_window`], otherwise an overtaken
    /// acknowledgment can pass for a current one.
    pub window: u8,
    /// Base retransmission timeout.
    pub t1: Duration,
    /// Double T1 on every consecutive expiry (multiplier capped at 8).
    pub t1_backoff: bool,
    /// Number of consecutive T1 expirations without progress after which the
    /// link is declared failed.
    pub n2: u32,
    /// Delayed acknowledgment period. Zero acknowledges every in-sequence
    /// frame immediately.
    pub t2: Duration,
    /// Keepalive enquiry period while connected and otherwise silent.
    pub idle: Option<Duration>,
    /// Largest payload carried by one data frame; longer messages are
    /// fragmented.
    pub max_payload: usize,
    /// Frames allowed to wait in the unsent queue before `send` reports busy.
    pub send_queue_limit: usize,
    pub retransmit: RetransmitPolicy,
    /// Answer the first out-of-order frame after a gap with a reject.
    pub reject_on_gap: bool,
    /// Capacity of the notification channel towards the owner. When it runs
    /// low the connection enters the local busy condition.
    pub event_queue_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            modulus: Modulus::Normal,
            window: 3,
            t1: Duration::from_secs(3),
            t1_backoff: true,
            n2: 10,
            t2: Duration::from_secs(1),
            idle: Some(Duration::from_secs(30)),
            max_payload: 256,
            send_queue_limit: 64,
            retransmit: RetransmitPolicy::GoBack,
            reject_on_gap: true,
            event_queue_depth: 64,
        }
    }
}

impl LinkConfig {
    /// Default configuration with the given window and modulus.
    pub fn with_window(window: u8, modulus: Modulus) -> Self {
        Self {
            window,
            modulus,
            ..Default::default()
        }
    }

    /// Check every field against the constraints the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 || self.window > self.modulus.max_window() {
            return Err(ConfigError::Window {
                window: self.window,
                modulus: self.modulus.value(),
            });
        }
        if self.t1.is_zero() {
            return Err(ConfigError::ZeroT1);
        }
        if self.t2 >= self.t1 {
            return Err(ConfigError::T2NotBelowT1);
        }
        if self.n2 == 0 {
            return Err(ConfigError::ZeroN2);
        }
        if matches!(self.idle, Some(d) if d.is_zero()) {
            return Err(ConfigError::ZeroIdle);
        }
        if self.max_payload == 0 {
            return Err(ConfigError::ZeroPayload);
        }
        if self.send_queue_limit == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        if self.event_queue_depth <= usize::from(self.window) {
            return Err(ConfigError::EventQueueTooShallow);
        }
        Ok(())
    }

    /// Copy of this configuration adopted for a peer-chosen modulus. The
    /// window is clamped so it stays valid.
    pub fn for_modulus(&self, modulus: Modulus) -> Self {
        Self {
            modulus,
            window: self.window.min(modulus.max_window()),
            ..self.clone()
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("window {window} out of range for modulus {modulus}")]
    Window { window: u8, modulus: u8 },
    #[error("t1 must be non-zero")]
    ZeroT1,
    #[error("t2 must be shorter than t1")]
    T2NotBelowT1,
    #[error("n2 must be at least 1")]
    ZeroN2,
    #[error("idle period must be non-zero when enabled")]
    ZeroIdle,
    #[error("max_payload must be non-zero")]
    ZeroPayload,
    #[error("send_queue_limit must be non-zero")]
    ZeroQueue,
    #[error("event_queue_depth must exceed the window")]
    EventQueueTooShallow,
}
