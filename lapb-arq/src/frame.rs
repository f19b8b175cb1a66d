//! Wire-independent frame model.
//!
//! A [`Frame`] is decoded once at the wire boundary (see [`crate::packet`]) and
//! from then on the engine only ever matches on its variants. Each variant
//! carries exactly the fields that kind of frame has on the wire:
//!
//! | Frame              | LAPB name | N(S) | N(R) | P/F | payload |
//! |--------------------|-----------|------|------|-----|---------|
//! | `Data`             | I         | yes  | yes  | P   | yes     |
//! | `ReceiveReady`     | RR        |      | yes  | P/F |         |
//! | `ReceiveNotReady`  | RNR       |      | yes  | P/F |         |
//! | `Reject`           | REJ       |      | yes  | P/F |         |
//! | `Connect`          | SABM(E)   |      |      | P   |         |
//! | `ConnectAck`       | UA        |      |      | F   |         |
//! | `Disconnect`       | DISC      |      |      | P   |         |
//! | `DisconnectAck`    | DM        |      |      | F   |         |

use std::str::FromStr;

use bytes::Bytes;

/// Width of an endpoint identifier on the wire.
pub const ADDR_LEN: usize = 7;

/// Opaque fixed-size endpoint identifier.
///
/// Textual addresses (e.g. `"N0CALL-1"` truncated to seven bytes) are
/// space-padded on the right, mirroring how amateur callsigns travel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDR_LEN]);

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = String::from_utf8_lossy(&self.0);
        write!(f, "{}", text.trim_end())
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Errors from parsing a textual [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address longer than {ADDR_LEN} bytes")]
    TooLong,
    #[error("address must be printable ASCII")]
    NotAscii,
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        if s.len() > ADDR_LEN {
            return Err(AddressError::TooLong);
        }
        if !s.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(AddressError::NotAscii);
        }
        let mut bytes = [b' '; ADDR_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Information frame; `nr` piggybacks the sender's V(R).
    Data {
        ns: u8,
        nr: u8,
        poll: bool,
        /// More fragments of the same user message follow.
        more: bool,
        payload: Bytes,
    },
    ReceiveReady { nr: u8, pf: bool },
    /// Choke: the sender of this frame cannot accept more data frames.
    ReceiveNotReady { nr: u8, pf: bool },
    /// Retransmit everything from `nr` onwards.
    Reject { nr: u8, pf: bool },
    /// Connection request; doubles as a link reset on an established link.
    Connect { extended: bool, poll: bool },
    ConnectAck { fin: bool },
    Disconnect { poll: bool },
    /// Disconnect confirmation, or "not connected" when unsolicited.
    DisconnectAck { fin: bool },
}

impl Frame {
    /// The receive sequence number carried by data and supervisory frames.
    pub fn nr(&self) -> Option<u8> {
        match *self {
            Frame::Data { nr, .. }
            | Frame::ReceiveReady { nr, .. }
            | Frame::ReceiveNotReady { nr, .. }
            | Frame::Reject { nr, .. } => Some(nr),
            _ => None,
        }
    }

    /// The Poll/Final bit, whichever this frame carries.
    pub fn poll_final(&self) -> bool {
        match *self {
            Frame::Data { poll, .. }
            | Frame::Connect { poll, .. }
            | Frame::Disconnect { poll } => poll,
            Frame::ReceiveReady { pf, .. }
            | Frame::ReceiveNotReady { pf, .. }
            | Frame::Reject { pf, .. } => pf,
            Frame::ConnectAck { fin } | Frame::DisconnectAck { fin } => fin,
        }
    }

    /// Short LAPB-style mnemonic, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "I",
            Frame::ReceiveReady { .. } => "RR",
            Frame::ReceiveNotReady { .. } => "RNR",
            Frame::Reject { .. } => "REJ",
            Frame::Connect { extended: false, .. } => "SABM",
            Frame::Connect { extended: true, .. } => "SABME",
            Frame::ConnectAck { .. } => "UA",
            Frame::Disconnect { .. } => "DISC",
            Frame::DisconnectAck { .. } => "DM",
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Data {
                ns,
                nr,
                poll,
                more,
                payload,
            } => write!(
                f,
                "I ns={ns} nr={nr}{}{} len={}",
                if *poll { " P" } else { "" },
                if *more { " M" } else { "" },
                payload.len()
            ),
            Frame::ReceiveReady { nr, pf }
            | Frame::ReceiveNotReady { nr, pf }
            | Frame::Reject { nr, pf } => {
                write!(f, "{} nr={nr}{}", self.name(), if *pf { " P/F" } else { "" })
            }
            other => write!(
                f,
                "{}{}",
                other.name(),
                if other.poll_final() { " P/F" } else { "" }
            ),
        }
    }
}

/// One unit of user data as queued for transmission: a whole message or one
/// fragment of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub more: bool,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(payload: Bytes, more: bool) -> Self {
        Self { more, payload }
    }
}
