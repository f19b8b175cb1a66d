//! `lapb-arq`: a windowed, timer-driven ARQ data-link engine in the style of
//! X.25 LAPB, NET/ROM and ROSE.
//!
//! The engine turns an unreliable, reordering, duplicating frame medium into
//! ordered, flow-controlled, acknowledged message delivery between two
//! addresses, using modulo-8 or modulo-128 sequence numbers, a sliding send
//! window, piggybacked acknowledgments and retransmission timers.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   data frames   ┌────────────┐
//!  │ SendWindow │────────────────▶│  Receiver  │   (peer side)
//!  └─────┬──────┘                 └─────┬──────┘
//!        │        RR / RNR / REJ        │
//!        │◀─────────────────────────────┘
//!        │
//!  ┌─────▼───────────────────────────────┐
//!  │                Link                 │  sans-IO state machine + timers
//!  └─────┬───────────────────────────────┘
//!        │ Action::{Transmit, Notify}
//!  ┌─────▼──────┐  commands / events  ┌────────────┐
//!  │  session   │◀───────────────────▶│ LinkHandle │
//!  └─────┬──────┘                     └────────────┘
//!        │ encoded frames
//!  ┌─────▼──────┐  deliver(frame)  ┌──────────────────────┐
//!  │ Dispatcher │◀─────────────────│ Simulator / UdpMedium │
//!  └────────────┘─────transmit────▶└──────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`seq`]: modular sequence arithmetic
//! - [`frame`]: frame kinds and endpoint addresses
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`sender`]: send window: unsent and sent queues, acks, go-back
//! - [`receiver`]: in-order delivery, reorder queue, reassembly
//! - [`timer`]: T1 / T2 / idle deadlines and T1 backoff
//! - [`state`]: finite-state-machine types and disconnect reasons
//! - [`config`]: per-connection parameters
//! - [`link`]: connection control block and state machine
//! - [`session`]: one tokio task per connection
//! - [`dispatcher`]: routes inbound frames, passive open, link-down
//! - [`simulator`]: lossy/reordering in-process medium for testing
//! - [`socket`]: UDP medium

pub mod config;
pub mod dispatcher;
pub mod frame;
pub mod link;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{LinkConfig, RetransmitPolicy};
pub use dispatcher::{Dispatcher, Listener, Transmit};
pub use frame::{Address, Frame};
pub use link::{Link, LinkError, LinkEvent, LinkStats};
pub use seq::Modulus;
pub use session::{LinkHandle, LinkSender};
pub use state::{BusySide, DisconnectReason, LinkState};
