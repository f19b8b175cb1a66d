//! Send-side window manager.
//!
//! [`SendWindow`] owns both outbound queues of a connection:
//!
//! - `unsent`: user segments in submission order, not yet numbered.
//! - `sent`: numbered frames on the wire awaiting acknowledgment, ordered by
//!   N(S) from V(A) up to (but excluding) V(S).
//!
//! Segments only ever travel `unsent → sent → discarded` (or back to the
//! front of `unsent` on a reject or go-back retransmission), so the order
//! user data was submitted in is the order it is numbered in.
//!
//! # Sequence-number layout
//!
//! ```text
//!     V(A)                V(S)           V(A)+k
//!      │                   │               │
//!  ────┼───────────────────┼───────────────┼──────▶ seq space (mod N)
//!      │ <── sent queue ──▶│ <── sendable ▶│
//! ```
//!
//! This module only manages state; putting frames on the wire is the
//! caller's responsibility.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::frame::{Frame, Segment};
use crate::seq::{self, Modulus};

/// A frame that has been transmitted and is awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub ns: u8,
    pub segment: Segment,
}

/// An N(R) that acknowledges frames never sent, or ones already retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("N(R)={nr} outside [V(A)={va}, V(S)={vs}]")]
pub struct AckOutOfRange {
    pub nr: u8,
    pub va: u8,
    pub vs: u8,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct SendWindow {
    modulus: Modulus,
    /// Maximum number of frames in the sent queue (k).
    window: u8,
    /// Next sequence number to assign.
    vs: u8,
    /// Oldest unacknowledged sequence number.
    va: u8,
    unsent: VecDeque<Segment>,
    sent: VecDeque<SentFrame>,
}

impl SendWindow {
    /// Create an empty window with V(S) = V(A) = 0.
    pub fn new(modulus: Modulus, window: u8) -> Self {
        debug_assert!(window >= 1 && window <= modulus.max_window());
        Self {
            modulus,
            window,
            vs: 0,
            va: 0,
            unsent: VecDeque::new(),
            sent: VecDeque::with_capacity(usize::from(window)),
        }
    }

    pub fn vs(&self) -> u8 {
        self.vs
    }

    pub fn va(&self) -> u8 {
        self.va
    }

    pub fn modulus(&self) -> Modulus {
        self.modulus
    }

    pub fn window(&self) -> u8 {
        self.window
    }

    /// Number of frames sent but not acknowledged, `distance(V(A), V(S))`.
    pub fn outstanding(&self) -> u8 {
        seq::distance(self.va, self.vs, self.modulus)
    }

    /// `true` when another frame may be numbered and sent right now.
    pub fn can_send(&self) -> bool {
        self.outstanding() < self.window && !self.unsent.is_empty()
    }

    pub fn has_unacked(&self) -> bool {
        !self.sent.is_empty()
    }

    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    /// Segments waiting to be sent, in transmission order.
    pub fn unsent(&self) -> impl Iterator<Item = &Segment> {
        self.unsent.iter()
    }

    /// Frames awaiting acknowledgment, oldest first.
    pub fn sent(&self) -> impl Iterator<Item = &SentFrame> {
        self.sent.iter()
    }

    /// Number of segments `payload` occupies once split at `max_payload`.
    pub fn fragments_needed(payload_len: usize, max_payload: usize) -> usize {
        payload_len.div_ceil(max_payload).max(1)
    }

    /// Append one user message, split into fragments of at most
    /// `max_payload` bytes. Every fragment but the last is flagged `more`.
    pub fn enqueue(&mut self, payload: Bytes, max_payload: usize) -> usize {
        let count = Self::fragments_needed(payload.len(), max_payload);
        for i in 0..count {
            let start = i * max_payload;
            let end = (start + max_payload).min(payload.len());
            self.unsent
                .push_back(Segment::new(payload.slice(start..end), i + 1 < count));
        }
        count
    }

    /// Number the head of the unsent queue, move it to the sent queue and
    /// return the data frame to put on the wire.
    ///
    /// The returned frame is a copy; the original stays queued for possible
    /// retransmission. Returns `None` when the window is closed or nothing
    /// is waiting.
    pub fn next_frame(&mut self, nr: u8) -> Option<Frame> {
        if !self.can_send() {
            return None;
        }
        let segment = self.unsent.pop_front()?;
        let ns = self.vs;
        let frame = Frame::Data {
            ns,
            nr,
            poll: false,
            more: segment.more,
            payload: segment.payload.clone(),
        };
        self.sent.push_back(SentFrame { ns, segment });
        self.vs = seq::next(self.vs, self.modulus);
        Some(frame)
    }

    /// Retire every frame before `nr` and advance V(A) to it.
    ///
    /// Returns the number of frames newly acknowledged, which is `0` for a
    /// repeated acknowledgment. An `nr` outside `[V(A), V(S)]` is a protocol
    /// error and leaves the window untouched.
    pub fn on_ack(&mut self, nr: u8) -> Result<usize, AckOutOfRange> {
        if !seq::in_window(nr, self.va, self.outstanding() + 1, self.modulus) {
            return Err(AckOutOfRange {
                nr,
                va: self.va,
                vs: self.vs,
            });
        }
        let acked = seq::distance(self.va, nr, self.modulus);
        for _ in 0..acked {
            self.sent.pop_front();
        }
        self.va = nr;
        Ok(usize::from(acked))
    }

    /// `true` if `nr` trails V(A) by at most one window: an old
    /// acknowledgment that was overtaken on the medium.
    ///
    /// Only meaningful for an `nr` that [`SendWindow::on_ack`] rejected.
    /// The two ranges are disjoint while `window <= (modulus - 1) / 2`.
    pub fn is_stale(&self, nr: u8) -> bool {
        let oldest = seq::add(self.va, self.modulus.value() - self.window, self.modulus);
        seq::in_window(nr, oldest, self.window, self.modulus)
    }

    /// Move every unacknowledged frame back onto the front of the unsent
    /// queue, in original order, and rewind V(S) to V(A).
    ///
    /// Returns how many frames were moved.
    pub fn requeue(&mut self) -> usize {
        let count = self.sent.len();
        while let Some(entry) = self.sent.pop_back() {
            self.unsent.push_front(entry.segment);
        }
        self.vs = self.va;
        count
    }

    /// Fresh copies of every unacknowledged frame, stamped with the current
    /// `nr`, for retransmission in place. V(S) does not move.
    pub fn retransmit(&self, nr: u8) -> Vec<Frame> {
        self.sent
            .iter()
            .map(|entry| Frame::Data {
                ns: entry.ns,
                nr,
                poll: false,
                more: entry.segment.more,
                payload: entry.segment.payload.clone(),
            })
            .collect()
    }

    /// Drop both queues. Returns the number of segments discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.unsent.len() + self.sent.len();
        self.unsent.clear();
        self.sent.clear();
        self.vs = self.va;
        discarded
    }

    /// Start numbering afresh at zero, possibly under a new modulus and
    /// window. Unsent segments survive; unacknowledged ones are discarded
    /// and counted.
    pub fn restart(&mut self, modulus: Modulus, window: u8) -> usize {
        let discarded = self.sent.len();
        self.sent.clear();
        self.modulus = modulus;
        self.window = window;
        self.vs = 0;
        self.va = 0;
        discarded
    }

    /// Describe the first violated queue invariant, if any.
    pub fn check(&self) -> Result<(), String> {
        let outstanding = self.outstanding();
        if outstanding > self.window {
            return Err(format!(
                "outstanding {outstanding} exceeds window {}",
                self.window
            ));
        }
        if self.sent.len() != usize::from(outstanding) {
            return Err(format!(
                "sent queue holds {} frames, distance(va, vs) is {outstanding}",
                self.sent.len()
            ));
        }
        let mut expect = self.va;
        for entry in &self.sent {
            if entry.ns != expect {
                return Err(format!("sent queue has ns={} where {expect} belongs", entry.ns));
            }
            expect = seq::next(expect, self.modulus);
        }
        Ok(())
    }
}
