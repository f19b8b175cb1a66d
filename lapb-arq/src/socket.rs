//! UDP medium.
//!
//! [`UdpMedium`] carries encoded frames as UDP datagrams, one frame per
//! datagram. It owns only byte I/O and a routing table from link addresses
//! to socket addresses; all protocol logic lives behind the [`Dispatcher`].
//!
//! Routes are added explicitly with [`UdpMedium::add_route`] or learned from
//! the source address of inbound frames. A frame for an address with no
//! route, or one the OS refuses to send, is reported to the dispatcher as a
//! link-down for that address.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::dispatcher::{Dispatcher, Transmit};
use crate::frame::Address;
use crate::packet::peek_addresses;

/// Maximum UDP payload size (theoretical limit; frames are much smaller).
const MAX_DATAGRAM: usize = 65_535;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A frame medium over one UDP socket.
#[derive(Debug)]
pub struct UdpMedium {
    socket: UdpSocket,
    routes: Mutex<HashMap<Address, SocketAddr>>,
    failures_tx: mpsc::UnboundedSender<Address>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<Address>>>,
}

impl UdpMedium {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        socket.writable().await?;
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Ok(Self {
            socket,
            routes: Mutex::new(HashMap::new()),
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send frames for `remote` to `peer`.
    pub fn add_route(&self, remote: Address, peer: SocketAddr) {
        lock(&self.routes).insert(remote, peer);
    }

    pub fn route(&self, remote: &Address) -> Option<SocketAddr> {
        lock(&self.routes).get(remote).copied()
    }

    /// Receive datagrams and hand them to `dispatcher` until the socket
    /// fails. Send failures are turned into link-down events here.
    ///
    /// Only one `run` may be active per medium.
    pub async fn run(&self, dispatcher: Dispatcher) -> io::Result<()> {
        let Some(mut failures) = lock(&self.failures_rx).take() else {
            return Err(io::Error::other("medium is already running"));
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    let datagram = &buf[..n];
                    let Some((dst, src)) = peek_addresses(datagram) else {
                        log::debug!("[udp] runt datagram from {from}");
                        continue;
                    };
                    if self.route(&src) != Some(from) {
                        log::debug!("[udp] learned {src} at {from}");
                        self.add_route(src, from);
                    }
                    dispatcher.deliver(&dst, datagram);
                }
                Some(remote) = failures.recv() => {
                    dispatcher.link_down(&remote);
                }
            }
        }
    }
}

impl Transmit for UdpMedium {
    fn transmit(&self, remote: &Address, frame: Bytes) {
        let Some(peer) = self.route(remote) else {
            log::warn!("[udp] no route to {remote}");
            let _ = self.failures_tx.send(*remote);
            return;
        };
        match self.socket.try_send_to(&frame, peer) {
            Ok(_) => {}
            // Socket buffer full: same as a frame lost on the medium.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                log::warn!("[udp] send to {remote} at {peer} failed: {err}");
                let _ = self.failures_tx.send(*remote);
            }
        }
    }
}
