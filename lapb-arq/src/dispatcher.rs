//! Frame routing between the medium and per-connection tasks.
//!
//! The [`Dispatcher`] is the boundary with whatever actually moves bytes:
//!
//! - Downward, every connection hands encoded frames to one shared
//!   [`Transmit`] implementation, fire-and-forget.
//! - Upward, the medium calls [`Dispatcher::deliver`] with each raw frame it
//!   receives. The frame is decoded once and forwarded to the task owning
//!   the `(local, remote)` pair.
//!
//! Frames for a pair with no connection are answered the way a LAPB station
//! in ADM answers them: CONNECT is accepted if someone is listening on the
//! local address and refused with DISCONNECT-ACK otherwise, DISCONNECT is
//! confirmed with DISCONNECT-ACK, anything else is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::config::LinkConfig;
use crate::frame::{Address, Frame};
use crate::link::{Link, LinkError};
use crate::packet::Packet;
use crate::seq::Modulus;
use crate::session::{self, Command, LinkHandle};

/// Connections waiting to be accepted on one listening address.
const ACCEPT_BACKLOG: usize = 16;

/// The downward collaborator: puts one encoded frame on the medium.
///
/// Delivery is not guaranteed and failures are not reported here; a medium
/// that learns a remote is unreachable calls [`Dispatcher::link_down`].
pub trait Transmit: Send + Sync {
    fn transmit(&self, remote: &Address, frame: Bytes);
}

type LinkKey = (Address, Address);

struct Inner {
    medium: Arc<dyn Transmit>,
    config: LinkConfig,
    links: Mutex<HashMap<LinkKey, mpsc::Sender<Command>>>,
    listeners: Mutex<HashMap<Address, mpsc::Sender<LinkHandle>>>,
}

/// Connection registry for one station. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("links", &self.active_links())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    /// `config` is the default for every connection this dispatcher
    /// creates, including passively opened ones.
    pub fn new(medium: Arc<dyn Transmit>, config: LinkConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                medium,
                config,
                links: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Open a connection from `local` to `remote` with the default
    /// configuration, overriding window and modulus.
    ///
    /// Must be called from within a tokio runtime.
    pub fn establish(
        &self,
        local: Address,
        remote: Address,
        window: u8,
        modulus: Modulus,
    ) -> Result<LinkHandle, LinkError> {
        let config = LinkConfig {
            window,
            modulus,
            ..self.inner.config.clone()
        };
        self.establish_with(local, remote, config)
    }

    /// Open a connection with an explicit configuration.
    pub fn establish_with(
        &self,
        local: Address,
        remote: Address,
        config: LinkConfig,
    ) -> Result<LinkHandle, LinkError> {
        let key = (local, remote);
        let mut links = lock(&self.inner.links);
        if links.get(&key).is_some_and(|tx| !tx.is_closed()) {
            return Err(LinkError::AlreadyActive);
        }
        let mut link = Link::new(local, remote, config)?;
        link.establish(Instant::now())?;
        let (commands, handle) = self.spawn(link);
        links.insert(key, commands);
        Ok(handle)
    }

    /// Accept incoming connections addressed to `local`.
    pub fn listen(&self, local: Address) -> Result<Listener, LinkError> {
        let mut listeners = lock(&self.inner.listeners);
        if listeners.get(&local).is_some_and(|tx| !tx.is_closed()) {
            return Err(LinkError::AlreadyActive);
        }
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        listeners.insert(local, tx);
        log::info!("[dispatch] listening on {local}");
        Ok(Listener {
            local,
            incoming,
            dispatcher: Arc::downgrade(&self.inner),
        })
    }

    /// Hand one raw frame received for `local` to its connection.
    pub fn deliver(&self, local: &Address, frame: &[u8]) {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("[dispatch] dropping undecodable frame: {err}");
                return;
            }
        };
        if packet.dst != *local {
            log::debug!("[dispatch] frame for {} delivered to {local}", packet.dst);
            return;
        }

        let key = (packet.dst, packet.src);
        let reply = {
            let mut links = lock(&self.inner.links);
            let packet = match links.get(&key) {
                Some(tx) => match tx.try_send(Command::Inbound(packet)) {
                    Ok(()) => return,
                    Err(TrySendError::Full(_)) => {
                        log::warn!("[dispatch] {}>{} backlogged, dropping frame", key.0, key.1);
                        return;
                    }
                    // Task finished; the pair is free again.
                    Err(TrySendError::Closed(Command::Inbound(packet))) => {
                        links.remove(&key);
                        packet
                    }
                    Err(TrySendError::Closed(_)) => return,
                },
                None => packet,
            };
            self.unknown_pair(&mut links, packet)
        };
        if let Some(reply) = reply {
            log::debug!("[dispatch] {}>{} → {}", reply.src, reply.dst, reply.frame);
            self.inner.medium.transmit(&reply.dst, reply.encode());
        }
    }

    /// Move every connection to `remote` to ADM with reason `LinkDown`.
    pub fn link_down(&self, remote: &Address) {
        let links = lock(&self.inner.links);
        for ((local, peer), tx) in links.iter() {
            if peer == remote && tx.try_send(Command::LinkDown).is_err() {
                log::warn!("[dispatch] could not signal link down to {local}>{peer}");
            }
        }
    }

    /// Number of connections whose task is still running.
    pub fn active_links(&self) -> usize {
        lock(&self.inner.links)
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Frame for a pair with no connection. Returns the reply to send, if
    /// any, so it goes out after the registry lock is released.
    fn unknown_pair(
        &self,
        links: &mut HashMap<LinkKey, mpsc::Sender<Command>>,
        packet: Packet,
    ) -> Option<Packet> {
        let (src, dst, modulus) = (packet.src, packet.dst, packet.modulus);
        let refuse = move |poll: bool| Packet {
            dst: src,
            src: dst,
            command: false,
            modulus,
            frame: Frame::DisconnectAck { fin: poll },
        };

        match packet.frame {
            Frame::Connect { poll, .. } => {
                let listeners = lock(&self.inner.listeners);
                let Some(permit) = listeners.get(&packet.dst).and_then(|tx| tx.try_reserve().ok())
                else {
                    log::info!("[dispatch] refusing {} → {}", packet.src, packet.dst);
                    return Some(refuse(poll));
                };
                let key = (packet.dst, packet.src);
                let mut link = match Link::new(key.0, key.1, self.inner.config.clone()) {
                    Ok(link) => link,
                    Err(err) => {
                        log::warn!("[dispatch] cannot accept {}: {err}", packet.src);
                        return Some(refuse(poll));
                    }
                };
                link.handle_packet(packet, Instant::now());
                let (commands, handle) = self.spawn(link);
                links.insert(key, commands);
                permit.send(handle);
                None
            }
            Frame::Disconnect { poll } => Some(refuse(poll)),
            _ => {
                log::debug!("[dispatch] ignoring {} from unknown {}", packet.frame, packet.src);
                None
            }
        }
    }

    fn spawn(&self, link: Link) -> (mpsc::Sender<Command>, LinkHandle) {
        let key = (link.local(), link.remote());
        let registry = Arc::downgrade(&self.inner);
        session::spawn(link, Arc::clone(&self.inner.medium), move || {
            if let Some(inner) = registry.upgrade() {
                let mut links = lock(&inner.links);
                if links.get(&key).is_some_and(|tx| tx.is_closed()) {
                    links.remove(&key);
                }
            }
        })
    }
}

/// Incoming connections for one local address.
#[derive(Debug)]
pub struct Listener {
    local: Address,
    incoming: mpsc::Receiver<LinkHandle>,
    dispatcher: Weak<Inner>,
}

impl Listener {
    pub fn local(&self) -> Address {
        self.local
    }

    /// Wait for the next connection. The handle's first event is
    /// [`crate::link::LinkEvent::Connected`].
    pub async fn accept(&mut self) -> Option<LinkHandle> {
        self.incoming.recv().await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            lock(&inner.listeners).remove(&self.local);
        }
    }
}
