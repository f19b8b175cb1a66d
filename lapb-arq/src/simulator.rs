//! In-process network simulator for deterministic testing.
//!
//! Real media drop, reorder and duplicate frames. To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] implements [`Transmit`] by handing frames straight to the
//! [`Dispatcher`] attached at the destination address, after applying a
//! configurable fault model:
//!
//! | Fault       | Description                                              |
//! |-------------|----------------------------------------------------------|
//! | Loss        | Drop a frame with probability `loss_rate`.               |
//! | Reordering  | Hold a frame back an extra `reorder_delay` with          |
//! |             | probability `reorder_rate`, letting later frames pass.   |
//! | Duplication | Deliver a frame twice with probability `duplicate_rate`. |
//! | Latency     | Delay every frame by `delay`.                            |
//!
//! All randomness comes from one [`StdRng`] seeded from the configuration,
//! so a failing run can be replayed exactly. With no delay configured,
//! frames are delivered synchronously inside `transmit`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dispatcher::{Dispatcher, Transmit};
use crate::frame::Address;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that a frame is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a frame is held back by `reorder_delay`.
    pub reorder_rate: f64,
    pub reorder_delay: Duration,
    /// One-way latency applied to every frame.
    pub delay: Duration,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            delay: Duration::ZERO,
            seed: 0,
        }
    }
}

/// Counters of what the fault model did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub transmitted: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    /// Frames for an address nobody attached.
    pub unroutable: u64,
}

struct State {
    rng: StdRng,
    stats: SimulatorStats,
    /// When set, every frame is dropped.
    partitioned: bool,
}

/// A fault-injecting medium connecting any number of dispatchers.
pub struct Simulator {
    config: SimulatorConfig,
    state: Mutex<State>,
    nodes: Mutex<HashMap<Address, Dispatcher>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            state: Mutex::new(State {
                rng,
                stats: SimulatorStats::default(),
                partitioned: false,
            }),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Route frames for `address` to `dispatcher`.
    pub fn attach(&self, address: Address, dispatcher: Dispatcher) {
        lock(&self.nodes).insert(address, dispatcher);
    }

    /// Drop every frame until called again with `false`.
    pub fn set_partitioned(&self, partitioned: bool) {
        lock(&self.state).partitioned = partitioned;
    }

    pub fn stats(&self) -> SimulatorStats {
        lock(&self.state).stats
    }

    /// Roll the dice for one frame: the delays at which its copies arrive.
    fn schedule(&self) -> Vec<Duration> {
        let mut state = lock(&self.state);
        state.stats.transmitted += 1;
        if state.partitioned || state.rng.random_bool(self.config.loss_rate) {
            state.stats.dropped += 1;
            return Vec::new();
        }
        let mut delay = self.config.delay;
        if state.rng.random_bool(self.config.reorder_rate) {
            state.stats.reordered += 1;
            delay += self.config.reorder_delay;
        }
        if state.rng.random_bool(self.config.duplicate_rate) {
            state.stats.duplicated += 1;
            return vec![delay, delay];
        }
        vec![delay]
    }
}

impl Transmit for Simulator {
    fn transmit(&self, remote: &Address, frame: Bytes) {
        let Some(dispatcher) = lock(&self.nodes).get(remote).cloned() else {
            lock(&self.state).stats.unroutable += 1;
            log::debug!("[sim] no node at {remote}");
            return;
        };
        for delay in self.schedule() {
            if delay.is_zero() {
                dispatcher.deliver(remote, &frame);
            } else {
                let dispatcher = dispatcher.clone();
                let remote = *remote;
                let frame = frame.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    dispatcher.deliver(&remote, &frame);
                });
            }
        }
    }
}
