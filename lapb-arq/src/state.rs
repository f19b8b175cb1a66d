//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::link::Link`] can occupy and the
//! reason codes it reports when it returns to [`LinkState::Adm`]. Transitions
//! themselves live in [`crate::link`], which is the only writer of the state.
//!
//! ```text
//!           establish()                 CONNECT-ACK
//!   ADM ───────────────▶ SETUP ─────────────────────▶ CONNECTED
//!    ▲  ◀── T1 × N2 / DM ──┘                            │   │  ▲
//!    │                                   N(R) violation │   │  │ CONNECT-ACK
//!    │                                                  ▼   │  │
//!    │◀──────────── T1 × N2 ─────────────────────────  RESET ─┘
//!    │                                                      │
//!    │                         disconnect() / peer DISC     │
//!    │◀── DM / T1 × N2 ── DISCONNECT_PENDING ◀──────────────┘
//! ```
//!
//! Any state moves straight to ADM on abort or link-down.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Disconnected; initial and terminal state.
    #[default]
    Adm,
    /// CONNECT sent; waiting for CONNECT-ACK.
    Setup,
    /// Data transfer.
    Connected,
    /// DISCONNECT sent; waiting for DISCONNECT-ACK.
    DisconnectPending,
    /// Resynchronising after a protocol violation: CONNECT sent, both queues
    /// already discarded.
    Reset,
}

impl LinkState {
    /// States in which `send()` may queue user data.
    pub fn accepts_data(self) -> bool {
        matches!(self, Self::Setup | Self::Connected | Self::Reset)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Adm => "ADM",
            Self::Setup => "SETUP",
            Self::Connected => "CONNECTED",
            Self::DisconnectPending => "DISCONNECT_PENDING",
            Self::Reset => "RESET",
        };
        f.write_str(name)
    }
}

/// Why a connection returned to [`LinkState::Adm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local owner asked for it and the teardown completed (or timed out).
    Requested,
    /// The peer disconnected.
    Peer,
    /// The peer answered our connection request with DISCONNECT-ACK.
    Refused,
    /// N2 consecutive T1 expirations without progress.
    LinkFailure,
    /// The medium reported the remote unreachable.
    LinkDown,
    /// Fatal local reset (abort).
    LocalReset,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Requested => "requested",
            Self::Peer => "peer disconnected",
            Self::Refused => "refused",
            Self::LinkFailure => "link failure",
            Self::LinkDown => "link down",
            Self::LocalReset => "local reset",
        };
        f.write_str(text)
    }
}

/// Which end of a connection is flow-controlled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusySide {
    /// The peer sent receiver-not-ready.
    Peer,
    /// The local owner is not draining notifications.
    Local,
}
