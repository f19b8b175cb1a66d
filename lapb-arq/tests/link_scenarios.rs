//! End-to-end scenarios for the connection state machine.
//!
//! Two [`Link`]s are wired back to back through an in-memory queue of
//! encoded frames. Nothing sleeps: the harness owns the clock and jumps it
//! straight to the next timer deadline whenever the wire falls silent, so
//! every scenario is deterministic and runs in microseconds.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use lapb_arq::link::Action;
use lapb_arq::packet::Packet;
use lapb_arq::seq::distance;
use lapb_arq::{
    Address, BusySide, DisconnectReason, Frame, Link, LinkConfig, LinkError, LinkEvent, LinkState,
    Modulus, RetransmitPolicy,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

struct Pair {
    a: Link,
    b: Link,
    now: Instant,
    /// Encoded frames in flight, tagged with the side they are addressed to.
    wire: VecDeque<(Side, Bytes)>,
    events_a: Vec<LinkEvent>,
    events_b: Vec<LinkEvent>,
    /// Every frame each side put on the wire, in order.
    sent_a: Vec<Frame>,
    sent_b: Vec<Frame>,
}

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

fn config() -> LinkConfig {
    LinkConfig {
        t1: Duration::from_secs(1),
        t2: Duration::ZERO,
        idle: None,
        ..Default::default()
    }
}

impl Pair {
    fn new(config_a: LinkConfig, config_b: LinkConfig) -> Self {
        Self {
            a: Link::new(addr("ALPHA"), addr("BRAVO"), config_a).unwrap(),
            b: Link::new(addr("BRAVO"), addr("ALPHA"), config_b).unwrap(),
            now: Instant::now(),
            wire: VecDeque::new(),
            events_a: Vec::new(),
            events_b: Vec::new(),
            sent_a: Vec::new(),
            sent_b: Vec::new(),
        }
    }

    /// Establish from A over a clean wire.
    fn connected(config_a: LinkConfig, config_b: LinkConfig) -> Self {
        let mut pair = Self::new(config_a, config_b);
        pair.a.establish(pair.now).unwrap();
        pair.pump();
        pair.run();
        assert_eq!(pair.a.state(), LinkState::Connected);
        assert_eq!(pair.b.state(), LinkState::Connected);
        pair.events_a.clear();
        pair.events_b.clear();
        pair.sent_a.clear();
        pair.sent_b.clear();
        pair
    }

    fn link(&mut self, side: Side) -> &mut Link {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    /// Move every pending action of both links onto the wire or into the
    /// event logs.
    fn pump(&mut self) {
        while let Some(action) = self.a.poll_action() {
            match action {
                Action::Transmit(packet) => {
                    self.sent_a.push(packet.frame.clone());
                    self.wire.push_back((Side::B, packet.encode()));
                }
                Action::Notify(event) => self.events_a.push(event),
            }
        }
        while let Some(action) = self.b.poll_action() {
            match action {
                Action::Transmit(packet) => {
                    self.sent_b.push(packet.frame.clone());
                    self.wire.push_back((Side::A, packet.encode()));
                }
                Action::Notify(event) => self.events_b.push(event),
            }
        }
    }

    fn deliver(&mut self, to: Side, bytes: &[u8]) {
        let packet = Packet::decode(bytes).unwrap();
        let now = self.now;
        self.link(to).handle_packet(packet, now);
        self.pump();
    }

    /// Deliver frames until the wire is empty.
    fn run(&mut self) {
        while let Some((to, bytes)) = self.wire.pop_front() {
            self.deliver(to, &bytes);
        }
    }

    /// Throw away everything in flight.
    fn drop_wire(&mut self) {
        self.pump();
        self.wire.clear();
    }

    /// Deliver the head of the wire and lose whatever it provokes.
    fn deliver_one_then_drop(&mut self) {
        let (to, bytes) = self.wire.pop_front().unwrap();
        self.deliver(to, &bytes);
        self.drop_wire();
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.a.next_deadline(), self.b.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Jump to the earliest timer deadline and fire it. Returns `false` if
    /// no timer is running.
    fn advance(&mut self) -> bool {
        let Some(deadline) = self.next_deadline() else {
            return false;
        };
        self.now = self.now.max(deadline);
        let now = self.now;
        self.a.handle_timers(now);
        self.b.handle_timers(now);
        self.pump();
        true
    }

    /// Alternate delivery and timers until both sides are quiet.
    fn settle(&mut self) {
        for _ in 0..1_000 {
            self.run();
            if !self.advance() {
                return;
            }
        }
        panic!("links never settled");
    }

    fn send(&mut self, side: Side, payload: &'static [u8]) {
        let now = self.now;
        self.link(side).send(Bytes::from_static(payload), now).unwrap();
        self.pump();
    }

    fn data_at(&self, side: Side) -> Vec<Bytes> {
        let events = match side {
            Side::A => &self.events_a,
            Side::B => &self.events_b,
        };
        events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::Data(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    fn check(&self) {
        self.a.check_invariants().unwrap();
        self.b.check_invariants().unwrap();
    }
}

fn data_ns(frames: &[Frame]) -> Vec<u8> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Data { ns, .. } => Some(*ns),
            _ => None,
        })
        .collect()
}

fn terminal_events(events: &[LinkEvent]) -> Vec<&LinkEvent> {
    events
        .iter()
        .filter(|e| matches!(e, LinkEvent::Disconnected { .. }))
        .collect()
}

// ---------------------------------------------------------------------------
// Establishment and plain exchange
// ---------------------------------------------------------------------------

#[test]
fn establishment_announces_both_sides() {
    let mut pair = Pair::new(config(), config());
    pair.a.establish(pair.now).unwrap();
    pair.pump();
    pair.run();

    assert_eq!(pair.events_a, vec![LinkEvent::Connected]);
    assert_eq!(pair.events_b, vec![LinkEvent::Connected]);
    assert!(!pair.a.t1_running());
    assert_eq!(
        pair.sent_a,
        vec![Frame::Connect {
            extended: false,
            poll: true
        }]
    );
    assert_eq!(pair.sent_b, vec![Frame::ConnectAck { fin: true }]);
}

#[test]
fn messages_flow_both_ways_with_delayed_acks() {
    let cfg = LinkConfig {
        t2: Duration::from_millis(100),
        ..config()
    };
    let mut pair = Pair::connected(cfg.clone(), cfg);

    pair.send(Side::A, b"hello");
    pair.send(Side::A, b"world");
    pair.run();
    assert_eq!(pair.data_at(Side::B), vec!["hello", "world"]);
    assert!(pair.b.ack_pending());

    // B answers before T2 runs out; the reply carries the acknowledgment.
    pair.send(Side::B, b"hi");
    pair.run();
    assert_eq!(pair.a.va(), 2);
    assert!(!pair.a.t1_running());
    assert_eq!(pair.data_at(Side::A), vec!["hi"]);

    pair.settle();
    assert_eq!(pair.b.va(), 1);
    assert_eq!(pair.a.stats().retransmissions, 0);
    assert_eq!(pair.b.stats().retransmissions, 0);
    // Only the T2 acknowledgment of "hi" was sent stand-alone.
    assert_eq!(
        pair.sent_a.last(),
        Some(&Frame::ReceiveReady { nr: 1, pf: false })
    );
    pair.check();
}

#[test]
fn long_message_is_reassembled() {
    let cfg = LinkConfig {
        max_payload: 4,
        ..config()
    };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    pair.send(Side::A, b"fragmented message");
    pair.settle();

    assert_eq!(pair.data_at(Side::B), vec!["fragmented message"]);
    assert_eq!(data_ns(&pair.sent_a), vec![0, 1, 2, 3, 4]);
}

#[test]
fn extended_numbering_is_adopted_by_the_acceptor() {
    let cfg_a = LinkConfig {
        modulus: Modulus::Extended,
        window: 20,
        ..config()
    };
    let mut pair = Pair::connected(cfg_a, config());
    assert_eq!(pair.b.modulus(), Modulus::Extended);

    for _ in 0..12 {
        pair.send(Side::A, b"x");
    }
    pair.settle();
    assert_eq!(pair.data_at(Side::B).len(), 12);
    assert_eq!(pair.a.va(), 12);
    assert_eq!(pair.b.vr(), 12);
}

// ---------------------------------------------------------------------------
// Loss and recovery
// ---------------------------------------------------------------------------

fn lose_second_frame(retransmit: RetransmitPolicy) {
    let cfg = LinkConfig {
        reject_on_gap: false,
        retransmit,
        ..config()
    };
    let mut pair = Pair::connected(cfg.clone(), cfg);

    pair.send(Side::A, b"m0");
    pair.run();
    pair.send(Side::A, b"m1");
    pair.send(Side::A, b"m2");
    // ns=1 vanishes on the medium.
    pair.wire.pop_front();
    pair.run();
    assert_eq!(pair.b.stats().out_of_order, 1);
    assert_eq!(pair.data_at(Side::B), vec!["m0"]);

    pair.settle();
    assert_eq!(pair.data_at(Side::B), vec!["m0", "m1", "m2"]);
    assert_eq!(data_ns(&pair.sent_a), vec![0, 1, 2, 1, 2]);
    let stats = pair.a.stats();
    assert_eq!(stats.t1_expiries, 1);
    assert_eq!(stats.retransmissions, 2);
    assert_eq!(pair.b.stats().duplicates, 1);
    assert_eq!(pair.a.va(), 3);
    assert_eq!(pair.a.retries(), 0);
    pair.check();
}

#[test]
fn lost_frame_is_recovered_by_going_back() {
    lose_second_frame(RetransmitPolicy::GoBack);
}

#[test]
fn lost_frame_is_recovered_by_resending_in_place() {
    lose_second_frame(RetransmitPolicy::Resend);
}

#[test]
fn gap_is_answered_with_a_single_reject() {
    let mut pair = Pair::connected(config(), config());

    pair.send(Side::A, b"m0");
    pair.send(Side::A, b"m1");
    pair.send(Side::A, b"m2");
    pair.wire.pop_front();
    pair.run();

    assert_eq!(pair.data_at(Side::B), vec!["m0", "m1", "m2"]);
    assert_eq!(
        pair.sent_b
            .iter()
            .filter(|f| matches!(f, Frame::Reject { .. }))
            .count(),
        1
    );
    assert_eq!(pair.a.stats().rejects_received, 1);
    // The reject did the work; T1 never ran out.
    assert_eq!(pair.a.stats().t1_expiries, 0);
    assert!(!pair.a.t1_running());
    pair.check();
}

#[test]
fn lost_acknowledgment_is_recovered() {
    let mut pair = Pair::connected(config(), config());
    pair.send(Side::A, b"only");
    pair.deliver_one_then_drop();

    assert_eq!(pair.data_at(Side::B), vec!["only"]);
    assert_eq!(pair.a.va(), 0);
    pair.settle();
    assert_eq!(pair.a.va(), 1);
    assert_eq!(pair.data_at(Side::B), vec!["only"]);
    assert_eq!(pair.b.stats().duplicates, 1);
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

#[test]
fn busy_receiver_holds_the_sender_back() {
    let mut pair = Pair::connected(config(), config());

    let now = pair.now;
    pair.b.set_own_busy(true, now);
    pair.pump();
    pair.run();
    assert_eq!(pair.events_b, vec![LinkEvent::Congested(BusySide::Local)]);
    assert_eq!(pair.events_a, vec![LinkEvent::Congested(BusySide::Peer)]);
    assert!(pair.a.peer_busy());

    pair.send(Side::A, b"waiting");
    assert!(pair.wire.is_empty());
    assert_eq!(pair.a.unsent_len(), 1);

    // T1 polls the busy peer, which answers RNR with the final bit.
    assert!(pair.advance());
    assert_eq!(
        pair.sent_a.last(),
        Some(&Frame::ReceiveReady { nr: 0, pf: true })
    );
    pair.run();
    assert_eq!(
        pair.sent_b.last(),
        Some(&Frame::ReceiveNotReady { nr: 0, pf: true })
    );
    assert_eq!(pair.a.retries(), 0);
    assert_eq!(pair.a.state(), LinkState::Connected);

    let now = pair.now;
    pair.b.set_own_busy(false, now);
    pair.pump();
    pair.settle();
    assert!(pair.events_a.contains(&LinkEvent::Uncongested(BusySide::Peer)));
    assert_eq!(pair.data_at(Side::B), vec!["waiting"]);
    assert_eq!(pair.a.va(), 1);
    pair.check();
}

#[test]
fn frames_in_flight_when_peer_turns_busy_are_sent_again() {
    let mut pair = Pair::connected(config(), config());

    pair.send(Side::A, b"one");
    pair.send(Side::A, b"two");
    let now = pair.now;
    pair.b.set_own_busy(true, now);
    pair.pump();
    pair.run();
    assert!(pair.data_at(Side::B).is_empty());
    assert_eq!(pair.b.stats().busy_discards, 2);

    let now = pair.now;
    pair.b.set_own_busy(false, now);
    pair.pump();
    pair.settle();
    assert_eq!(pair.data_at(Side::B), vec!["one", "two"]);
    assert_eq!(data_ns(&pair.sent_a), vec![0, 1, 0, 1]);
}

#[test]
fn send_queue_limit_reports_busy() {
    let cfg = LinkConfig {
        send_queue_limit: 2,
        window: 1,
        ..config()
    };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    let now = pair.now;
    // The first message goes straight into the window.
    pair.a.send(Bytes::from_static(b"0"), now).unwrap();
    pair.a.send(Bytes::from_static(b"1"), now).unwrap();
    pair.a.send(Bytes::from_static(b"2"), now).unwrap();
    assert_eq!(
        pair.a.send(Bytes::from_static(b"3"), now),
        Err(LinkError::Busy)
    );
    pair.pump();
    pair.settle();
    assert_eq!(pair.data_at(Side::B), vec!["0", "1", "2"]);
}

// ---------------------------------------------------------------------------
// Failure and release
// ---------------------------------------------------------------------------

#[test]
fn unanswered_connect_fails_after_n2_expiries() {
    let cfg = LinkConfig { n2: 3, ..config() };
    let mut pair = Pair::new(cfg.clone(), cfg);
    pair.a.establish(pair.now).unwrap();
    pair.pump();

    while !pair.a.is_closed() {
        pair.drop_wire();
        assert!(pair.advance());
    }

    let connects = pair
        .sent_a
        .iter()
        .filter(|f| matches!(f, Frame::Connect { .. }))
        .count();
    assert_eq!(connects, 3);
    assert_eq!(pair.a.stats().t1_expiries, 3);
    assert_eq!(
        pair.events_a,
        vec![LinkEvent::Disconnected {
            reason: DisconnectReason::LinkFailure,
            discarded: 0
        }]
    );
    assert_eq!(pair.a.next_deadline(), None);
}

#[test]
fn silent_peer_fails_an_established_link() {
    let cfg = LinkConfig { n2: 4, ..config() };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    pair.send(Side::A, b"lost");
    pair.send(Side::A, b"also lost");

    while !pair.a.is_closed() {
        pair.drop_wire();
        assert!(pair.advance());
    }

    assert_eq!(pair.a.stats().t1_expiries, 4);
    assert_eq!(
        pair.events_a,
        vec![LinkEvent::Disconnected {
            reason: DisconnectReason::LinkFailure,
            discarded: 2
        }]
    );
    assert_eq!(pair.a.state(), LinkState::Adm);
}

#[test]
fn closed_link_stays_silent() {
    let cfg = LinkConfig { n2: 1, ..config() };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    pair.send(Side::A, b"x");
    pair.drop_wire();
    assert!(pair.advance());
    assert!(pair.a.is_closed());
    let sent = pair.sent_a.len();

    let now = pair.now;
    assert_eq!(pair.a.send(Bytes::from_static(b"y"), now), Err(LinkError::Closed));
    assert_eq!(pair.a.disconnect(now), Err(LinkError::Closed));
    pair.a.abort(now);
    pair.a.link_down();
    pair.a.handle_timers(now + Duration::from_secs(60));
    pair.pump();
    // B still believes the link is up and keeps talking to a closed end.
    pair.send(Side::B, b"anyone?");
    pair.run();

    assert_eq!(pair.sent_a.len(), sent);
    assert_eq!(terminal_events(&pair.events_a).len(), 1);
}

#[test]
fn orderly_release_notifies_both_sides_once() {
    let mut pair = Pair::connected(config(), config());
    let now = pair.now;
    pair.a.disconnect(now).unwrap();
    // A second request while pending is a no-op.
    pair.a.disconnect(now).unwrap();
    pair.pump();
    assert_eq!(pair.a.state(), LinkState::DisconnectPending);
    pair.settle();

    assert_eq!(
        terminal_events(&pair.events_a),
        vec![&LinkEvent::Disconnected {
            reason: DisconnectReason::Requested,
            discarded: 0
        }]
    );
    assert_eq!(
        terminal_events(&pair.events_b),
        vec![&LinkEvent::Disconnected {
            reason: DisconnectReason::Peer,
            discarded: 0
        }]
    );
    assert!(pair.a.is_closed() && pair.b.is_closed());
}

#[test]
fn disconnect_reports_discarded_queue() {
    let cfg = LinkConfig { window: 1, ..config() };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    let now = pair.now;
    for _ in 0..3 {
        pair.a.send(Bytes::from_static(b"q"), now).unwrap();
    }
    pair.drop_wire();
    pair.a.disconnect(now).unwrap();
    pair.pump();
    pair.settle();

    assert_eq!(
        terminal_events(&pair.events_a),
        vec![&LinkEvent::Disconnected {
            reason: DisconnectReason::Requested,
            discarded: 3
        }]
    );
}

#[test]
fn unanswered_disconnect_still_completes() {
    let cfg = LinkConfig { n2: 2, ..config() };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    let now = pair.now;
    pair.a.disconnect(now).unwrap();
    pair.pump();

    while !pair.a.is_closed() {
        pair.drop_wire();
        assert!(pair.advance());
    }
    assert_eq!(
        pair.events_a,
        vec![LinkEvent::Disconnected {
            reason: DisconnectReason::Requested,
            discarded: 0
        }]
    );
}

#[test]
fn abort_tells_the_peer() {
    let mut pair = Pair::connected(config(), config());
    let now = pair.now;
    pair.a.abort(now);
    pair.pump();
    pair.run();

    assert_eq!(
        pair.events_a,
        vec![LinkEvent::Disconnected {
            reason: DisconnectReason::LocalReset,
            discarded: 0
        }]
    );
    assert_eq!(
        pair.events_b,
        vec![LinkEvent::Disconnected {
            reason: DisconnectReason::Peer,
            discarded: 0
        }]
    );
}

// ---------------------------------------------------------------------------
// Resets
// ---------------------------------------------------------------------------

#[test]
fn impossible_acknowledgment_resets_both_ends() {
    let mut pair = Pair::connected(config(), config());
    pair.send(Side::A, b"doomed");
    pair.drop_wire();

    // Acknowledges a frame A never sent.
    let forged = Packet {
        dst: addr("ALPHA"),
        src: addr("BRAVO"),
        command: false,
        modulus: Modulus::Normal,
        frame: Frame::ReceiveReady { nr: 3, pf: false },
    };
    pair.deliver(Side::A, &forged.encode());
    assert_eq!(pair.a.state(), LinkState::Reset);
    assert_eq!(pair.events_a, vec![LinkEvent::Reset { discarded: 1 }]);

    pair.run();
    assert_eq!(pair.a.state(), LinkState::Connected);
    assert_eq!(pair.b.state(), LinkState::Connected);
    assert_eq!(pair.events_b, vec![LinkEvent::Reset { discarded: 0 }]);
    // No second Connected after a reset.
    assert_eq!(pair.events_a, vec![LinkEvent::Reset { discarded: 1 }]);

    pair.send(Side::A, b"fresh");
    pair.settle();
    assert_eq!(pair.data_at(Side::B), vec!["fresh"]);
    assert_eq!(pair.a.stats().resets, 1);
    assert_eq!(pair.b.stats().resets, 1);
}

#[test]
fn reordered_acknowledgments_are_harmless() {
    let cfg = LinkConfig {
        window: 3,
        ..config()
    };
    let mut pair = Pair::connected(cfg.clone(), cfg);
    pair.send(Side::A, b"a");
    pair.send(Side::A, b"b");
    pair.send(Side::A, b"c");
    // Deliver all three, collecting B's acknowledgments.
    for _ in 0..3 {
        let (to, bytes) = pair.wire.pop_front().unwrap();
        pair.deliver(to, &bytes);
    }
    // RR 1, RR 2, RR 3 are queued; deliver them newest first.
    let acks: Vec<_> = pair.wire.drain(..).collect();
    for (to, bytes) in acks.into_iter().rev() {
        pair.deliver(to, &bytes);
    }

    assert_eq!(pair.a.state(), LinkState::Connected);
    assert_eq!(pair.a.va(), 3);
    assert_eq!(pair.a.stats().stale_acks, 2);
    assert!(pair.events_a.is_empty());
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

#[test]
fn idle_link_is_polled() {
    let cfg = LinkConfig {
        idle: Some(Duration::from_secs(5)),
        ..config()
    };
    let mut pair = Pair::connected(cfg.clone(), LinkConfig { idle: None, ..cfg });
    let start = pair.now;

    assert!(pair.advance());
    assert_eq!(pair.now - start, Duration::from_secs(5));
    assert_eq!(pair.sent_a, vec![Frame::ReceiveReady { nr: 0, pf: true }]);
    pair.run();
    assert_eq!(pair.sent_b, vec![Frame::ReceiveReady { nr: 0, pf: true }]);
    assert_eq!(pair.a.state(), LinkState::Connected);
    // The poll re-armed the idle timer.
    assert_eq!(pair.a.next_deadline(), Some(pair.now + Duration::from_secs(5)));
}

// ---------------------------------------------------------------------------
// Delivery over a hostile medium
// ---------------------------------------------------------------------------

/// Lossy, duplicating, locally reordering medium. Faults start only once
/// the link is up.
struct Hostile {
    rng: StdRng,
    loss: f64,
    duplicate: f64,
    swap: f64,
}

impl Hostile {
    /// Next frame to deliver, or `None` if it was lost.
    fn take(&mut self, wire: &mut VecDeque<(Side, Bytes)>) -> Option<(Side, Bytes)> {
        if wire.len() > 1 && self.rng.random_bool(self.swap) {
            wire.swap(0, 1);
        }
        let item = wire.pop_front()?;
        if self.rng.random_bool(self.loss) {
            return None;
        }
        if self.rng.random_bool(self.duplicate) {
            wire.push_back(item.clone());
        }
        Some(item)
    }
}

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 1..24)
}

fn link_config() -> impl Strategy<Value = LinkConfig> {
    (
        prop_oneof![
            (Just(Modulus::Normal), 1u8..=Modulus::Normal.reorder_safe_window()),
            (Just(Modulus::Extended), 1u8..=20),
            Just((LinkConfig::default().modulus, LinkConfig::default().window)),
        ],
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|((modulus, window), resend, reject_on_gap, delayed_ack)| LinkConfig {
            modulus,
            window,
            t1: Duration::from_secs(1),
            t1_backoff: false,
            n2: 50,
            t2: if delayed_ack {
                Duration::from_millis(100)
            } else {
                Duration::ZERO
            },
            idle: None,
            max_payload: 16,
            retransmit: if resend {
                RetransmitPolicy::Resend
            } else {
                RetransmitPolicy::GoBack
            },
            reject_on_gap,
            ..LinkConfig::default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every message arrives exactly once and in order, whatever the medium
    /// does, and the window invariants hold after every step.
    #[test]
    fn delivery_is_exactly_once_and_in_order(
        cfg in link_config(),
        to_b in payloads(),
        to_a in payloads(),
        seed in any::<u64>(),
        loss in 0.0f64..0.3,
        duplicate in 0.0f64..0.2,
        swap in 0.0f64..0.3,
    ) {
        let mut pair = Pair::connected(cfg.clone(), cfg);
        let mut medium = Hostile { rng: StdRng::seed_from_u64(seed), loss, duplicate, swap };
        let mut pending_b: VecDeque<Bytes> = to_b.iter().cloned().map(Bytes::from).collect();
        let mut pending_a: VecDeque<Bytes> = to_a.iter().cloned().map(Bytes::from).collect();

        for _ in 0..200_000 {
            let before = [
                (pair.a.va(), pair.a.stats().resets),
                (pair.b.va(), pair.b.stats().resets),
            ];
            let now = pair.now;
            while let Some(msg) = pending_b.front() {
                match pair.a.send(msg.clone(), now) {
                    Ok(()) => { pending_b.pop_front(); }
                    Err(LinkError::Busy) => break,
                    Err(err) => panic!("send failed: {err}"),
                }
            }
            while let Some(msg) = pending_a.front() {
                match pair.b.send(msg.clone(), now) {
                    Ok(()) => { pending_a.pop_front(); }
                    Err(LinkError::Busy) => break,
                    Err(err) => panic!("send failed: {err}"),
                }
            }
            pair.pump();

            if pair.wire.is_empty() {
                let done = pending_a.is_empty()
                    && pending_b.is_empty()
                    && pair.data_at(Side::B).len() == to_b.len()
                    && pair.data_at(Side::A).len() == to_a.len()
                    && pair.a.sent_len() + pair.a.unsent_len() == 0
                    && pair.b.sent_len() + pair.b.unsent_len() == 0;
                if done {
                    break;
                }
                prop_assert!(pair.advance(), "stalled with nothing scheduled");
            } else if let Some((to, bytes)) = medium.take(&mut pair.wire) {
                pair.deliver(to, &bytes);
            }

            prop_assert!(!pair.a.is_closed() && !pair.b.is_closed());
            prop_assert_eq!(pair.a.state(), LinkState::Connected);
            prop_assert_eq!(pair.b.state(), LinkState::Connected);
            pair.a.check_invariants().map_err(TestCaseError::fail)?;
            pair.b.check_invariants().map_err(TestCaseError::fail)?;
            for (link, (va, resets)) in [&pair.a, &pair.b].into_iter().zip(before) {
                if link.stats().resets == resets {
                    let moved = distance(va, link.va(), link.modulus());
                    prop_assert!(
                        moved <= link.config().window,
                        "V(A) moved from {} to {}",
                        va,
                        link.va()
                    );
                }
            }
        }

        let expected_b: Vec<Bytes> = to_b.into_iter().map(Bytes::from).collect();
        let expected_a: Vec<Bytes> = to_a.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(pair.data_at(Side::B), expected_b);
        prop_assert_eq!(pair.data_at(Side::A), expected_a);
        prop_assert_eq!(pair.a.stats().resets + pair.b.stats().resets, 0);
    }
}
