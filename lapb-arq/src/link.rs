//! Connection control block and state machine.
//!
//! A [`Link`] is one end of one connection. It owns every piece of
//! per-connection state: the FSM state, both queues (through
//! [`SendWindow`] and [`Receiver`]), the three timers and the retry
//! counter. It performs no I/O. Callers feed it inbound packets, user
//! requests and the current time, then drain the resulting [`Action`]s:
//! packets to put on the wire and events for the owner.
//!
//! ```text
//!   send / disconnect / abort ──┐
//!   handle_packet(pkt, now) ────┼──▶ Link ──poll_action()──▶ Transmit(Packet)
//!   handle_timers(now) ─────────┘                          ▶ Notify(LinkEvent)
//! ```
//!
//! Every method takes `&mut self`, so acknowledgment processing, timer
//! handling and new transmissions are serialised by construction. The async
//! wrapper in [`crate::session`] owns a `Link` exclusively.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::time::Instant;

use crate::config::{ConfigError, LinkConfig, RetransmitPolicy};
use crate::frame::{Address, Frame, Segment};
use crate::packet::Packet;
use crate::receiver::{Accepted, Discard, Receiver};
use crate::sender::SendWindow;
use crate::seq::Modulus;
use crate::state::{BusySide, DisconnectReason, LinkState};
use crate::timer::{self, Timer};

/// Notification for the owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Establishment completed (actively or passively).
    Connected,
    /// One complete user message, in send order.
    Data(Bytes),
    Congested(BusySide),
    Uncongested(BusySide),
    /// The link was reset and renumbered; `discarded` queued segments were
    /// lost.
    Reset { discarded: usize },
    /// Terminal notification. Emitted exactly once per connection.
    Disconnected {
        reason: DisconnectReason,
        discarded: usize,
    },
}

/// Output of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Transmit(Packet),
    Notify(LinkEvent),
}

/// Errors returned across the connection boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The unsent queue is full.
    #[error("send queue full")]
    Busy,
    #[error("link is not connected")]
    NotConnected,
    /// A connection for the same address pair is already running.
    #[error("link already active")]
    AlreadyActive,
    /// The connection has terminated.
    #[error("link closed")]
    Closed,
    /// The link went down while the caller was waiting on it.
    #[error("link disconnected: {0}")]
    Disconnected(DisconnectReason),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// How an inbound N(R) was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Applied,
    /// Older than V(A); the rest of a data frame is still processed.
    Stale,
    Invalid,
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Data frames put on the wire, retransmissions included.
    pub data_sent: u64,
    pub data_received: u64,
    /// Data frames sent again after a T1 expiry or a reject.
    pub retransmissions: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub out_of_window: u64,
    pub rejects_sent: u64,
    pub rejects_received: u64,
    /// Data frames dropped because the local owner was busy.
    pub busy_discards: u64,
    pub resets: u64,
    pub t1_expiries: u64,
    /// Acknowledgments older than V(A), ignored.
    pub stale_acks: u64,
}

/// One end of a connection.
#[derive(Debug)]
pub struct Link {
    local: Address,
    remote: Address,
    /// Log prefix, `local>remote`.
    tag: String,
    config: LinkConfig,
    state: LinkState,
    sender: SendWindow,
    receiver: Receiver,
    t1: Timer,
    t2: Timer,
    idle: Timer,
    retries: u32,
    peer_busy: bool,
    own_busy: bool,
    /// Segments dropped by `disconnect()`, reported in the terminal event.
    discarded: usize,
    /// The terminal event has been emitted.
    closed: bool,
    actions: VecDeque<Action>,
    stats: LinkStats,
}

impl Link {
    /// Create a connection in ADM. Fails if `config` does not validate.
    pub fn new(local: Address, remote: Address, config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;
        Ok(Self {
            local,
            remote,
            tag: format!("{local}>{remote}"),
            sender: SendWindow::new(config.modulus, config.window),
            receiver: Receiver::new(config.modulus, config.window),
            config,
            state: LinkState::Adm,
            t1: Timer::default(),
            t2: Timer::default(),
            idle: Timer::default(),
            retries: 0,
            peer_busy: false,
            own_busy: false,
            discarded: 0,
            closed: false,
            actions: VecDeque::new(),
            stats: LinkStats::default(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn local(&self) -> Address {
        self.local
    }

    pub fn remote(&self) -> Address {
        self.remote
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Effective configuration; modulus and window may differ from the one
    /// passed to [`Link::new`] after a passive open.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn modulus(&self) -> Modulus {
        self.sender.modulus()
    }

    pub fn vs(&self) -> u8 {
        self.sender.vs()
    }

    pub fn va(&self) -> u8 {
        self.sender.va()
    }

    pub fn vr(&self) -> u8 {
        self.receiver.vr()
    }

    pub fn vl(&self) -> u8 {
        self.receiver.vl()
    }

    pub fn ack_pending(&self) -> bool {
        self.receiver.ack_pending()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn peer_busy(&self) -> bool {
        self.peer_busy
    }

    pub fn own_busy(&self) -> bool {
        self.own_busy
    }

    pub fn unsent_len(&self) -> usize {
        self.sender.unsent_len()
    }

    pub fn sent_len(&self) -> usize {
        self.sender.sent_len()
    }

    pub fn t1_running(&self) -> bool {
        self.t1.is_running()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        timer::earliest([self.t1.deadline(), self.t2.deadline(), self.idle.deadline()])
    }

    /// Next output of the state machine, oldest first.
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Describe the first violated window invariant, if any.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.sender.check()?;
        if self.sender.has_unacked() && !self.t1.is_running() && !self.closed {
            return Err("unacknowledged frames without T1 running".into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Owner requests
    // -----------------------------------------------------------------------

    /// Active open: send CONNECT and wait in SETUP.
    pub fn establish(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        if self.state != LinkState::Adm {
            return Err(LinkError::AlreadyActive);
        }
        log::info!(
            "[{}] establishing ({}, window {})",
            self.tag,
            self.modulus(),
            self.config.window
        );
        self.state = LinkState::Setup;
        self.retries = 0;
        self.send_connect(now);
        self.t1.start(now, self.t1_period());
        Ok(())
    }

    /// Queue one user message. Messages longer than `max_payload` are
    /// fragmented.
    pub fn send(&mut self, payload: Bytes, now: Instant) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        if !self.state.accepts_data() {
            return Err(LinkError::NotConnected);
        }
        let needed = SendWindow::fragments_needed(payload.len(), self.config.max_payload);
        if self.sender.unsent_len() + needed > self.config.send_queue_limit {
            return Err(LinkError::Busy);
        }
        self.sender.enqueue(payload, self.config.max_payload);
        self.kick(now);
        Ok(())
    }

    /// Orderly release. Queued data is discarded and reported with the
    /// terminal event.
    pub fn disconnect(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        match self.state {
            LinkState::Adm => Err(LinkError::NotConnected),
            LinkState::DisconnectPending => Ok(()),
            LinkState::Setup | LinkState::Connected | LinkState::Reset => {
                log::info!("[{}] disconnecting from {}", self.tag, self.state);
                self.discarded += self.sender.clear();
                self.receiver.restart(self.modulus(), self.config.window);
                self.state = LinkState::DisconnectPending;
                self.retries = 0;
                self.t2.stop();
                self.idle.stop();
                self.transmit(now, true, Frame::Disconnect { poll: true });
                self.t1.start(now, self.t1_period());
                Ok(())
            }
        }
    }

    /// Fatal local reset: straight to ADM, telling the peer once.
    pub fn abort(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        if self.state != LinkState::Adm {
            self.transmit(now, true, Frame::Disconnect { poll: false });
        }
        self.enter_adm(DisconnectReason::LocalReset);
    }

    /// The medium reported the remote unreachable.
    pub fn link_down(&mut self) {
        self.enter_adm(DisconnectReason::LinkDown);
    }

    /// Enter or leave the local busy condition. The peer is told with an
    /// RNR or RR response.
    pub fn set_own_busy(&mut self, busy: bool, now: Instant) {
        if self.own_busy == busy {
            return;
        }
        self.own_busy = busy;
        if self.state != LinkState::Connected {
            return;
        }
        let event = if busy {
            LinkEvent::Congested(BusySide::Local)
        } else {
            LinkEvent::Uncongested(BusySide::Local)
        };
        self.notify(event);
        let status = self.status_frame(false);
        self.transmit(now, false, status);
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    /// Process one decoded packet addressed to this connection.
    pub fn handle_packet(&mut self, packet: Packet, now: Instant) {
        if self.closed {
            return;
        }
        if packet.src != self.remote || packet.dst != self.local {
            log::debug!("[{}] dropping misrouted {}", self.tag, packet.frame);
            return;
        }
        self.stats.frames_received += 1;
        log::debug!("[{}] ← {}", self.tag, packet.frame);

        match self.state {
            LinkState::Adm => self.on_frame_adm(packet, now),
            LinkState::Setup => self.on_frame_setup(packet, now),
            LinkState::Connected => self.on_frame_connected(packet, now),
            LinkState::DisconnectPending => self.on_frame_disconnecting(packet, now),
            LinkState::Reset => self.on_frame_reset(packet, now),
        }
    }

    fn on_frame_adm(&mut self, packet: Packet, now: Instant) {
        match packet.frame {
            Frame::Connect { extended, poll } => {
                self.adopt_modulus(extended);
                log::info!("[{}] accepting connection ({})", self.tag, self.modulus());
                self.transmit(now, false, Frame::ConnectAck { fin: poll });
                self.enter_connected(now, true);
            }
            Frame::Disconnect { poll } => {
                self.transmit(now, false, Frame::DisconnectAck { fin: poll });
            }
            _ => {}
        }
    }

    fn on_frame_setup(&mut self, packet: Packet, now: Instant) {
        match packet.frame {
            Frame::ConnectAck { .. } => {
                self.renumber();
                self.enter_connected(now, true);
            }
            Frame::DisconnectAck { .. } => {
                log::info!("[{}] connection refused", self.tag);
                self.enter_adm(DisconnectReason::Refused);
            }
            Frame::Connect { extended, poll } => {
                // Simultaneous open.
                self.adopt_modulus(extended);
                self.transmit(now, false, Frame::ConnectAck { fin: poll });
                self.enter_connected(now, true);
            }
            Frame::Disconnect { poll } => {
                self.transmit(now, false, Frame::DisconnectAck { fin: poll });
            }
            _ => {}
        }
    }

    fn on_frame_reset(&mut self, packet: Packet, now: Instant) {
        match packet.frame {
            Frame::ConnectAck { .. } => {
                self.renumber();
                self.enter_connected(now, false);
            }
            Frame::Connect { extended, poll } => {
                self.adopt_modulus(extended);
                self.transmit(now, false, Frame::ConnectAck { fin: poll });
                self.enter_connected(now, false);
            }
            Frame::Disconnect { poll } => {
                self.transmit(now, false, Frame::DisconnectAck { fin: poll });
                self.enter_adm(DisconnectReason::Peer);
            }
            Frame::DisconnectAck { .. } => self.enter_adm(DisconnectReason::Peer),
            _ => {}
        }
    }

    fn on_frame_disconnecting(&mut self, packet: Packet, now: Instant) {
        match packet.frame {
            Frame::DisconnectAck { .. } | Frame::ConnectAck { .. } => {
                self.enter_adm(DisconnectReason::Requested);
            }
            Frame::Disconnect { poll } => {
                self.transmit(now, false, Frame::DisconnectAck { fin: poll });
                self.enter_adm(DisconnectReason::Requested);
            }
            Frame::Connect { poll, .. } => {
                self.transmit(now, false, Frame::DisconnectAck { fin: poll });
            }
            _ => {}
        }
    }

    fn on_frame_connected(&mut self, packet: Packet, now: Instant) {
        if packet.frame.nr().is_some() && packet.modulus != self.modulus() {
            log::debug!("[{}] dropping {} numbered {}", self.tag, packet.frame, packet.modulus);
            return;
        }
        let enquiry = packet.command && packet.frame.poll_final();
        let final_response = !packet.command && packet.frame.poll_final();

        match packet.frame {
            Frame::Data {
                ns,
                nr,
                more,
                payload,
                ..
            } => {
                if self.process_ack(nr, now) == AckOutcome::Invalid {
                    return;
                }
                self.on_data(ns, Segment::new(payload, more), now);
            }
            Frame::ReceiveReady { nr, .. } => {
                if self.process_ack(nr, now) != AckOutcome::Applied {
                    return;
                }
                if self.peer_busy {
                    self.peer_busy = false;
                    self.notify(LinkEvent::Uncongested(BusySide::Peer));
                    self.sender.requeue();
                }
            }
            Frame::ReceiveNotReady { nr, .. } => {
                if self.process_ack(nr, now) != AckOutcome::Applied {
                    return;
                }
                if final_response {
                    self.retries = 0;
                }
                if !self.peer_busy {
                    self.peer_busy = true;
                    self.notify(LinkEvent::Congested(BusySide::Peer));
                }
                if !self.t1.is_running() {
                    self.t1.start(now, self.t1_period());
                }
            }
            Frame::Reject { nr, .. } => {
                self.stats.rejects_received += 1;
                if self.process_ack(nr, now) != AckOutcome::Applied {
                    return;
                }
                if self.peer_busy {
                    self.peer_busy = false;
                    self.notify(LinkEvent::Uncongested(BusySide::Peer));
                }
                let requeued = self.sender.requeue();
                self.stats.retransmissions += requeued as u64;
                log::debug!("[{}] reject: resending {requeued} from {nr}", self.tag);
            }
            Frame::Connect { extended, poll } => {
                self.peer_reset(extended, poll, now);
                return;
            }
            Frame::Disconnect { poll } => {
                log::info!("[{}] peer disconnected", self.tag);
                self.transmit(now, false, Frame::DisconnectAck { fin: poll });
                self.state = LinkState::DisconnectPending;
                self.enter_adm(DisconnectReason::Peer);
                return;
            }
            Frame::DisconnectAck { .. } => {
                self.enter_adm(DisconnectReason::Peer);
                return;
            }
            Frame::ConnectAck { .. } => return,
        }

        if enquiry {
            let status = self.status_frame(true);
            self.transmit(now, false, status);
        }
        self.kick(now);
    }

    /// Apply an acknowledgment. An invalid `nr` sends the link into
    /// resynchronisation.
    fn process_ack(&mut self, nr: u8, now: Instant) -> AckOutcome {
        match self.sender.on_ack(nr) {
            Ok(0) => AckOutcome::Applied,
            Ok(_) => {
                self.retries = 0;
                if self.sender.has_unacked() {
                    self.t1.start(now, self.t1_period());
                } else {
                    self.t1.stop();
                }
                AckOutcome::Applied
            }
            Err(_) if self.sender.is_stale(nr) => {
                log::debug!("[{}] stale N(R)={nr}, V(A)={}", self.tag, self.sender.va());
                self.stats.stale_acks += 1;
                AckOutcome::Stale
            }
            Err(err) => {
                log::warn!("[{}] protocol violation: {err}", self.tag);
                self.resync(now);
                AckOutcome::Invalid
            }
        }
    }

    fn on_data(&mut self, ns: u8, segment: Segment, now: Instant) {
        self.stats.data_received += 1;
        if self.own_busy {
            self.stats.busy_discards += 1;
            return;
        }
        match self.receiver.on_data(ns, segment) {
            Accepted::InSequence { messages, .. } => {
                for message in messages {
                    self.notify(LinkEvent::Data(message));
                }
                if self.config.t2.is_zero() {
                    let status = self.status_frame(false);
                    self.transmit(now, false, status);
                } else if !self.t2.is_running() {
                    self.t2.start(now, self.config.t2);
                }
            }
            Accepted::Held => {
                self.stats.out_of_order += 1;
                if self.config.reject_on_gap && !self.receiver.reject_sent() {
                    self.receiver.set_reject_sent();
                    self.stats.rejects_sent += 1;
                    let nr = self.receiver.vr();
                    self.transmit(now, false, Frame::Reject { nr, pf: false });
                }
            }
            Accepted::Discarded(discard) => {
                match discard {
                    Discard::Duplicate => self.stats.duplicates += 1,
                    Discard::OutOfWindow => self.stats.out_of_window += 1,
                }
                let status = self.status_frame(false);
                self.transmit(now, false, status);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Run every timer whose deadline has passed.
    pub fn handle_timers(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        if self.t1.expired(now) {
            self.on_t1_expiry(now);
        }
        if self.closed {
            return;
        }
        if self.t2.expired(now)
            && self.state == LinkState::Connected
            && self.receiver.ack_pending()
        {
            let status = self.status_frame(false);
            self.transmit(now, false, status);
        }
        if self.idle.expired(now) && self.state == LinkState::Connected {
            log::debug!("[{}] idle, polling peer", self.tag);
            let status = self.status_frame(true);
            self.transmit(now, true, status);
        }
    }

    fn on_t1_expiry(&mut self, now: Instant) {
        if self.state == LinkState::Connected && !self.sender.has_unacked() && !self.peer_busy {
            return;
        }
        self.retries += 1;
        self.stats.t1_expiries += 1;
        if self.retries >= self.config.n2 {
            return self.on_retries_exhausted();
        }

        match self.state {
            LinkState::Setup | LinkState::Reset => self.send_connect(now),
            LinkState::DisconnectPending => {
                self.transmit(now, true, Frame::Disconnect { poll: true });
            }
            LinkState::Connected if self.peer_busy => {
                let status = self.status_frame(true);
                self.transmit(now, true, status);
            }
            LinkState::Connected => match self.config.retransmit {
                RetransmitPolicy::GoBack => {
                    let requeued = self.sender.requeue();
                    self.stats.retransmissions += requeued as u64;
                    log::debug!(
                        "[{}] T1 expired ({}), going back {requeued}",
                        self.tag,
                        self.retries
                    );
                    self.kick(now);
                }
                RetransmitPolicy::Resend => {
                    let frames = self.sender.retransmit(self.receiver.vr());
                    log::debug!(
                        "[{}] T1 expired ({}), resending {}",
                        self.tag,
                        self.retries,
                        frames.len()
                    );
                    for frame in frames {
                        self.stats.retransmissions += 1;
                        self.stats.data_sent += 1;
                        self.transmit(now, true, frame);
                    }
                }
            },
            LinkState::Adm => return,
        }
        self.t1.start(now, self.t1_period());
    }

    fn on_retries_exhausted(&mut self) {
        match self.state {
            LinkState::DisconnectPending => {
                log::warn!("[{}] no answer to DISC after {} tries", self.tag, self.retries);
                self.enter_adm(DisconnectReason::Requested);
            }
            _ => {
                log::warn!("[{}] N2 exhausted in {}", self.tag, self.state);
                self.enter_adm(DisconnectReason::LinkFailure);
            }
        }
    }

    fn t1_period(&self) -> std::time::Duration {
        timer::t1_period(self.config.t1, self.retries, self.config.t1_backoff)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Send as many queued segments as the window allows.
    fn kick(&mut self, now: Instant) {
        if self.state != LinkState::Connected || self.peer_busy {
            return;
        }
        let mut sent_any = false;
        while let Some(frame) = self.sender.next_frame(self.receiver.vr()) {
            self.stats.data_sent += 1;
            self.transmit(now, true, frame);
            sent_any = true;
        }
        if sent_any && !self.t1.is_running() {
            self.t1.start(now, self.t1_period());
        }
    }

    fn enter_connected(&mut self, now: Instant, announce: bool) {
        self.state = LinkState::Connected;
        self.retries = 0;
        self.peer_busy = false;
        self.t1.stop();
        self.t2.stop();
        self.restart_idle(now);
        log::info!("[{}] connected ({}, window {})", self.tag, self.modulus(), self.config.window);
        if announce {
            self.notify(LinkEvent::Connected);
        }
        self.kick(now);
    }

    /// Numbering starts at zero on every (re)connection. Unsent data
    /// survives.
    fn renumber(&mut self) {
        let (modulus, window) = (self.config.modulus, self.config.window);
        self.discarded += self.sender.restart(modulus, window);
        self.receiver.restart(modulus, window);
    }

    /// Switch to the modulus the peer asked for and renumber.
    fn adopt_modulus(&mut self, extended: bool) {
        let modulus = if extended {
            Modulus::Extended
        } else {
            Modulus::Normal
        };
        if modulus != self.config.modulus {
            self.config = self.config.for_modulus(modulus);
        }
        self.renumber();
    }

    /// CONNECT received on an established link.
    fn peer_reset(&mut self, extended: bool, poll: bool, now: Instant) {
        let discarded = self.sender.clear();
        self.adopt_modulus(extended);
        self.stats.resets += 1;
        log::warn!("[{}] link reset by peer, {discarded} segment(s) lost", self.tag);
        self.transmit(now, false, Frame::ConnectAck { fin: poll });
        self.notify(LinkEvent::Reset { discarded });
        self.enter_connected(now, false);
    }

    /// Local protocol violation: discard everything and request a fresh
    /// start.
    fn resync(&mut self, now: Instant) {
        let discarded = self.sender.clear();
        self.renumber();
        self.stats.resets += 1;
        self.state = LinkState::Reset;
        self.retries = 0;
        self.peer_busy = false;
        self.t2.stop();
        self.idle.stop();
        self.notify(LinkEvent::Reset { discarded });
        self.send_connect(now);
        self.t1.start(now, self.t1_period());
    }

    /// Terminal transition. Cancels timers, discards both queues and emits
    /// the single `Disconnected` event.
    fn enter_adm(&mut self, reason: DisconnectReason) {
        if self.closed {
            return;
        }
        let discarded = self.discarded + self.sender.clear();
        self.receiver.restart(self.modulus(), self.config.window);
        self.t1.stop();
        self.t2.stop();
        self.idle.stop();
        self.state = LinkState::Adm;
        self.closed = true;
        log::info!("[{}] disconnected: {reason}", self.tag);
        self.notify(LinkEvent::Disconnected { reason, discarded });
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    fn send_connect(&mut self, now: Instant) {
        let extended = self.modulus().is_extended();
        self.transmit(now, true, Frame::Connect { extended, poll: true });
    }

    /// RR, or RNR while locally busy, carrying V(R).
    fn status_frame(&self, pf: bool) -> Frame {
        let nr = self.receiver.vr();
        if self.own_busy {
            Frame::ReceiveNotReady { nr, pf }
        } else {
            Frame::ReceiveReady { nr, pf }
        }
    }

    fn restart_idle(&mut self, now: Instant) {
        if let Some(period) = self.config.idle {
            self.idle.start(now, period);
        }
    }

    fn transmit(&mut self, now: Instant, command: bool, frame: Frame) {
        if let Some(nr) = frame.nr() {
            self.receiver.mark_sent(nr);
            if !self.receiver.ack_pending() {
                self.t2.stop();
            }
        }
        if self.state == LinkState::Connected {
            self.restart_idle(now);
        }
        log::debug!("[{}] → {}", self.tag, frame);
        self.stats.frames_sent += 1;
        self.actions.push_back(Action::Transmit(Packet {
            dst: self.remote,
            src: self.local,
            command,
            modulus: self.modulus(),
            frame,
        }));
    }

    fn notify(&mut self, event: LinkEvent) {
        self.actions.push_back(Action::Notify(event));
    }
}
