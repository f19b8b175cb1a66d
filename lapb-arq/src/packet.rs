//! Wire-format definitions for link frames.
//!
//! Every frame exchanged between peers travels as a [`Packet`]: an address
//! header followed by a LAPB-style control field and, for data frames, the
//! payload. This module is responsible for:
//! - Defining the on-wire binary layout.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//!  0            7 8           14  15      16       17
//! +--------------+--------------+-------+--------+--------+-----------
//! | destination  |    source    | flags | ctrl 0 | ctrl 1 | payload ...
//! +--------------+--------------+-------+--------+--------+-----------
//!                                          ctrl 1 only for extended I/S frames
//! ```
//!
//! `flags`: bit 0 command (1) / response (0), bit 1 extended (modulo 128),
//! bit 2 more fragments follow.
//!
//! Control field, modulo 8 (bit 0 is the least significant):
//!
//! ```text
//!  I   | N(R) 7-5 | P 4 | N(S) 3-1 | 0 |
//!  S   | N(R) 7-5 | P/F 4 | S S 3-2 | 0 1 |     RR=00 RNR=01 REJ=10
//!  U   | M M M 7-5 | P/F 4 | M M 3-2 | 1 1 |
//! ```
//!
//! Modulo 128 I and S frames spread over two bytes: `N(S) << 1` (or the S
//! opcode) followed by `N(R) << 1 | P/F`. U frames are always one byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{Address, Frame, ADDR_LEN};
use crate::seq::Modulus;

/// Bit-flag constants for the `flags` header byte.
pub mod flags {
    /// Frame is a command (as opposed to a response).
    pub const COMMAND: u8 = 0b0000_0001;
    /// I and S frames use the two-byte, modulo 128 control field.
    pub const EXTENDED: u8 = 0b0000_0010;
    /// Data frame is a fragment and more fragments follow.
    pub const MORE: u8 = 0b0000_0100;
}

/// Byte length of the address header (both addresses plus flags).
pub const HEADER_LEN: usize = 2 * ADDR_LEN + 1;

const OFF_DST: usize = 0;
const OFF_SRC: usize = ADDR_LEN;
const OFF_FLAGS: usize = 2 * ADDR_LEN;
const OFF_CONTROL: usize = HEADER_LEN;

const PF: u8 = 0x10;

const S_RR: u8 = 0x01;
const S_RNR: u8 = 0x05;
const S_REJ: u8 = 0x09;

const U_SABM: u8 = 0x2f;
const U_SABME: u8 = 0x6f;
const U_DISC: u8 = 0x43;
const U_UA: u8 = 0x63;
const U_DM: u8 = 0x0f;

/// A complete frame as it travels between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dst: Address,
    pub src: Address,
    /// Command (`true`) or response (`false`); decides whether P/F is a poll
    /// or a final.
    pub command: bool,
    /// Numbering scheme the control field is encoded in.
    pub modulus: Modulus,
    pub frame: Frame,
}

impl Packet {
    /// Serialise this packet into a newly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let payload_len = match &self.frame {
            Frame::Data { payload, .. } => payload.len(),
            _ => 0,
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 2 + payload_len);

        buf.put_slice(self.dst.as_bytes());
        buf.put_slice(self.src.as_bytes());

        let ext = self.modulus.is_extended();
        let mut fl = 0u8;
        if self.command {
            fl |= flags::COMMAND;
        }
        if ext {
            fl |= flags::EXTENDED;
        }
        if let Frame::Data { more: true, .. } = self.frame {
            fl |= flags::MORE;
        }
        buf.put_u8(fl);

        match &self.frame {
            Frame::Data {
                ns,
                nr,
                poll,
                payload,
                ..
            } => {
                debug_assert!(*ns < self.modulus.value() && *nr < self.modulus.value());
                if ext {
                    buf.put_u8(ns << 1);
                    buf.put_u8((nr << 1) | u8::from(*poll));
                } else {
                    buf.put_u8((nr << 5) | if *poll { PF } else { 0 } | (ns << 1));
                }
                buf.put_slice(payload);
            }
            Frame::ReceiveReady { nr, pf } => put_supervisory(&mut buf, S_RR, *nr, *pf, ext),
            Frame::ReceiveNotReady { nr, pf } => put_supervisory(&mut buf, S_RNR, *nr, *pf, ext),
            Frame::Reject { nr, pf } => put_supervisory(&mut buf, S_REJ, *nr, *pf, ext),
            Frame::Connect { extended, poll } => {
                let code = if *extended { U_SABME } else { U_SABM };
                buf.put_u8(code | if *poll { PF } else { 0 });
            }
            Frame::ConnectAck { fin } => buf.put_u8(U_UA | if *fin { PF } else { 0 }),
            Frame::Disconnect { poll } => buf.put_u8(U_DISC | if *poll { PF } else { 0 }),
            Frame::DisconnectAck { fin } => buf.put_u8(U_DM | if *fin { PF } else { 0 }),
        }

        buf.freeze()
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is too short for the header and control field,
    /// - the control field encodes no known frame, or
    /// - a non-data frame carries payload bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN + 1 {
            return Err(PacketError::BufferTooShort);
        }

        let (dst, src) = peek_addresses(buf).ok_or(PacketError::BufferTooShort)?;
        let fl = buf[OFF_FLAGS];
        let command = fl & flags::COMMAND != 0;
        let ext = fl & flags::EXTENDED != 0;
        let modulus = if ext {
            Modulus::Extended
        } else {
            Modulus::Normal
        };

        let c0 = buf[OFF_CONTROL];
        let (frame, used) = if c0 & 0x01 == 0 {
            // Information frame.
            let (ns, nr, poll, used) = if ext {
                let c1 = *buf.get(OFF_CONTROL + 1).ok_or(PacketError::BufferTooShort)?;
                (c0 >> 1, c1 >> 1, c1 & 0x01 != 0, 2)
            } else {
                ((c0 >> 1) & 0x07, c0 >> 5, c0 & PF != 0, 1)
            };
            let payload = Bytes::copy_from_slice(&buf[OFF_CONTROL + used..]);
            let frame = Frame::Data {
                ns,
                nr,
                poll,
                more: fl & flags::MORE != 0,
                payload,
            };
            return Ok(Packet {
                dst,
                src,
                command,
                modulus,
                frame,
            });
        } else if c0 & 0x03 == 0x01 {
            // Supervisory frame.
            let (kind, nr, pf, used) = if ext {
                let c1 = *buf.get(OFF_CONTROL + 1).ok_or(PacketError::BufferTooShort)?;
                (c0, c1 >> 1, c1 & 0x01 != 0, 2)
            } else {
                (c0 & 0x0f, c0 >> 5, c0 & PF != 0, 1)
            };
            let frame = match kind {
                S_RR => Frame::ReceiveReady { nr, pf },
                S_RNR => Frame::ReceiveNotReady { nr, pf },
                S_REJ => Frame::Reject { nr, pf },
                _ => return Err(PacketError::UnknownControl(c0)),
            };
            (frame, used)
        } else {
            // Unnumbered frame.
            let pf = c0 & PF != 0;
            let frame = match c0 & !PF {
                U_SABM => Frame::Connect {
                    extended: false,
                    poll: pf,
                },
                U_SABME => Frame::Connect {
                    extended: true,
                    poll: pf,
                },
                U_DISC => Frame::Disconnect { poll: pf },
                U_UA => Frame::ConnectAck { fin: pf },
                U_DM => Frame::DisconnectAck { fin: pf },
                _ => return Err(PacketError::UnknownControl(c0)),
            };
            (frame, 1)
        };

        if buf.len() != OFF_CONTROL + used {
            return Err(PacketError::UnexpectedPayload);
        }

        Ok(Packet {
            dst,
            src,
            command,
            modulus,
            frame,
        })
    }
}

fn put_supervisory(buf: &mut BytesMut, kind: u8, nr: u8, pf: bool, ext: bool) {
    if ext {
        buf.put_u8(kind);
        buf.put_u8((nr << 1) | u8::from(pf));
    } else {
        buf.put_u8((nr << 5) | if pf { PF } else { 0 } | kind);
    }
}

/// Read the `(destination, source)` addresses without decoding the rest.
pub fn peek_addresses(buf: &[u8]) -> Option<(Address, Address)> {
    let dst: [u8; ADDR_LEN] = buf.get(OFF_DST..OFF_DST + ADDR_LEN)?.try_into().ok()?;
    let src: [u8; ADDR_LEN] = buf.get(OFF_SRC..OFF_SRC + ADDR_LEN)?.try_into().ok()?;
    Some((Address::from_bytes(dst), Address::from_bytes(src)))
}

/// Errors that can arise when parsing a raw frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Buffer shorter than the header plus control field.
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// Control byte does not encode a known frame.
    #[error("unknown control byte {0:#04x}")]
    UnknownControl(u8),
    /// A supervisory or unnumbered frame carried an information field.
    #[error("payload present on a non-data frame")]
    UnexpectedPayload,
}
