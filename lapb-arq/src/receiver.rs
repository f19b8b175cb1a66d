//! Receive-side sequencer.
//!
//! [`Receiver`] accepts inbound data frames and turns them back into the
//! sender's message stream:
//!
//! - A frame with N(S) == V(R) is accepted; V(R) advances, then any frames
//!   already held for the following numbers are drained in order.
//! - A frame a little ahead of V(R) is held in the reorder queue until the
//!   gap before it closes.
//! - Anything else is a duplicate of a frame already accepted, or too far
//!   ahead to hold, and is discarded.
//!
//! Accepted fragments are concatenated until one without the `more` flag
//! completes the message.
//!
//! # Hold range
//!
//! A peer retransmitting after a lost acknowledgment can repeat any of the
//! `window` numbers just below V(R). Frames are only held when their number
//! cannot be mistaken for such a repeat, so the hold range is
//! `min(window, modulus - window)`. With `window` at most half the modulus
//! every in-window frame can be held.
//!
//! This module only manages state; sending acknowledgments is the caller's
//! responsibility.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::frame::Segment;
use crate::seq::{self, Modulus};

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// N(S) was already accepted (or is already held).
    Duplicate,
    /// N(S) is ahead of V(R) beyond the hold range.
    OutOfWindow,
}

/// Outcome of [`Receiver::on_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// V(R) moved forward by `advanced`; `messages` holds every user message
    /// completed as a result, in order.
    InSequence { advanced: u8, messages: Vec<Bytes> },
    /// Stored in the reorder queue.
    Held,
    Discarded(Discard),
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    modulus: Modulus,
    window: u8,
    /// Next sequence number expected from the peer.
    vr: u8,
    /// V(R) as last signalled to the peer.
    vl: u8,
    /// Frames ahead of V(R), keyed by N(S).
    reorder: BTreeMap<u8, Segment>,
    /// Fragments of the message currently being reassembled.
    partial: Vec<Bytes>,
    /// A reject has been sent for the current gap.
    reject_sent: bool,
}

impl Receiver {
    /// Create a receiver expecting N(S) = 0.
    pub fn new(modulus: Modulus, window: u8) -> Self {
        Self {
            modulus,
            window,
            vr: 0,
            vl: 0,
            reorder: BTreeMap::new(),
            partial: Vec::new(),
            reject_sent: false,
        }
    }

    pub fn vr(&self) -> u8 {
        self.vr
    }

    pub fn vl(&self) -> u8 {
        self.vl
    }

    /// An acknowledgment is owed: V(R) has moved since it was last sent.
    pub fn ack_pending(&self) -> bool {
        self.vr != self.vl
    }

    pub fn reorder_len(&self) -> usize {
        self.reorder.len()
    }

    pub fn reject_sent(&self) -> bool {
        self.reject_sent
    }

    pub fn set_reject_sent(&mut self) {
        self.reject_sent = true;
    }

    /// How far ahead of V(R) a frame may be and still be held.
    pub fn hold_range(&self) -> u8 {
        self.window.min(self.modulus.value() - self.window)
    }

    /// Record that `nr` has been transmitted to the peer.
    pub fn mark_sent(&mut self, nr: u8) {
        self.vl = nr;
    }

    /// Process the payload of an inbound data frame numbered `ns`.
    pub fn on_data(&mut self, ns: u8, segment: Segment) -> Accepted {
        if ns == self.vr {
            let mut messages = Vec::new();
            let mut advanced = 0u8;
            let mut next = Some(segment);
            while let Some(segment) = next {
                self.vr = seq::next(self.vr, self.modulus);
                advanced += 1;
                if let Some(message) = self.reassemble(segment) {
                    messages.push(message);
                }
                next = self.reorder.remove(&self.vr);
            }
            self.reject_sent = false;
            return Accepted::InSequence { advanced, messages };
        }

        if seq::in_window(ns, self.vr, self.hold_range(), self.modulus) {
            if self.reorder.contains_key(&ns) {
                return Accepted::Discarded(Discard::Duplicate);
            }
            self.reorder.insert(ns, segment);
            return Accepted::Held;
        }

        let oldest = seq::add(self.vr, self.modulus.value() - self.window, self.modulus);
        if seq::in_window(ns, oldest, self.window, self.modulus) {
            Accepted::Discarded(Discard::Duplicate)
        } else {
            Accepted::Discarded(Discard::OutOfWindow)
        }
    }

    fn reassemble(&mut self, segment: Segment) -> Option<Bytes> {
        if self.partial.is_empty() && !segment.more {
            return Some(segment.payload);
        }
        self.partial.push(segment.payload);
        if segment.more {
            return None;
        }
        let total = self.partial.iter().map(Bytes::len).sum();
        let mut message = BytesMut::with_capacity(total);
        for piece in self.partial.drain(..) {
            message.extend_from_slice(&piece);
        }
        Some(message.freeze())
    }

    /// Forget all receive state and expect N(S) = 0 again. Returns the number
    /// of held frames dropped.
    pub fn restart(&mut self, modulus: Modulus, window: u8) -> usize {
        let dropped = self.reorder.len();
        *self = Self::new(modulus, window);
        dropped
    }
}
