//! One task per connection.
//!
//! # Architecture
//!
//! ```text
//!  Application                              session task
//!      │  send / disconnect / abort      ┌──────────────────────────┐
//!      │ ──────── commands (mpsc) ─────▶ │  event_loop              │
//!  Dispatcher ── Inbound(packet) ──────▶ │    owns Link             │──▶ Transmit
//!      │                                 │    select! over:         │
//!      │ ◀─────── events (mpsc) ──────── │    commands, timer,      │
//!  LinkHandle                            │    owner gone, busy poll │
//!                                        └──────────────────────────┘
//! ```
//!
//! The task is the only owner of its [`Link`], so user requests, inbound
//! frames and timer expirations are handled strictly one after another.
//!
//! # Backpressure
//!
//! Events go to the owner over a bounded channel. When its free capacity
//! drops to the window size the link enters the local busy condition and
//! tells the peer to stop (RNR); it leaves it again once the owner has
//! drained enough events.
//!
//! The task never waits on the owner. Events that do not fit in the channel
//! wait in a local backlog that is drained as capacity frees up, while
//! commands, inbound frames and timers keep being serviced. Data stops
//! arriving once the link is busy, and a congestion notice followed by its
//! opposite cancels out in the backlog, so the backlog stays short.
//!
//! # Shutdown
//!
//! The task exits once the link has emitted its terminal event. Dropping the
//! [`LinkHandle`] starts an orderly disconnect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::dispatcher::Transmit;
use crate::frame::Address;
use crate::link::{Action, Link, LinkError, LinkEvent};
use crate::packet::Packet;

/// Depth of the per-connection command queue.
pub(crate) const COMMAND_QUEUE_DEPTH: usize = 64;

/// How often the local busy condition is re-evaluated while it holds.
const BUSY_RECHECK: Duration = Duration::from_millis(100);

/// Requests handled by the session task.
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        payload: Bytes,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Abort,
    Inbound(Packet),
    LinkDown,
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cloneable request side of a [`LinkHandle`].
#[derive(Debug, Clone)]
pub struct LinkSender {
    commands: mpsc::Sender<Command>,
}

impl LinkSender {
    /// Queue one message. Fails with [`LinkError::Busy`] when the unsent
    /// queue is full.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            payload: payload.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    /// Start an orderly release. Completion is reported as
    /// [`LinkEvent::Disconnected`].
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Disconnect { reply }).await?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    /// Tear the link down immediately.
    pub async fn abort(&self) {
        let _ = self.request(Command::Abort).await;
    }

    async fn request(&self, command: Command) -> Result<(), LinkError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LinkError::Closed) // task gone means the link is closed
    }
}

/// Owner's end of one connection.
#[derive(Debug)]
pub struct LinkHandle {
    local: Address,
    remote: Address,
    sender: LinkSender,
    events: mpsc::Receiver<LinkEvent>,
}

impl LinkHandle {
    pub fn local(&self) -> Address {
        self.local
    }

    pub fn remote(&self) -> Address {
        self.remote
    }

    /// A request handle usable from another task.
    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), LinkError> {
        self.sender.send(payload).await
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.sender.disconnect().await
    }

    pub async fn abort(&self) {
        self.sender.abort().await
    }

    /// Next notification, or `None` once the terminal event has been
    /// consumed and the task has exited.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Wait for establishment to complete.
    pub async fn wait_connected(&mut self) -> Result<(), LinkError> {
        loop {
            match self.next_event().await {
                Some(LinkEvent::Connected) => return Ok(()),
                Some(LinkEvent::Disconnected { reason, .. }) => {
                    return Err(LinkError::Disconnected(reason))
                }
                Some(_) => {}
                None => return Err(LinkError::Closed),
            }
        }
    }

    /// Next complete message from the peer. Other events are skipped.
    pub async fn recv(&mut self) -> Result<Bytes, LinkError> {
        loop {
            match self.next_event().await {
                Some(LinkEvent::Data(data)) => return Ok(data),
                Some(LinkEvent::Disconnected { reason, .. }) => {
                    return Err(LinkError::Disconnected(reason))
                }
                Some(_) => {}
                None => return Err(LinkError::Closed),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Spawn the task driving `link`. `on_exit` runs after the task has released
/// its command queue.
pub(crate) fn spawn<F>(
    link: Link,
    medium: Arc<dyn Transmit>,
    on_exit: F,
) -> (mpsc::Sender<Command>, LinkHandle)
where
    F: FnOnce() + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel(link.config().event_queue_depth);
    let handle = LinkHandle {
        local: link.local(),
        remote: link.remote(),
        sender: LinkSender {
            commands: command_tx.clone(),
        },
        events: event_rx,
    };
    tokio::spawn(async move {
        event_loop(link, medium, command_rx, event_tx).await;
        on_exit();
    });
    (command_tx, handle)
}

async fn event_loop(
    mut link: Link,
    medium: Arc<dyn Transmit>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<LinkEvent>,
) {
    let tag = format!("{}>{}", link.local(), link.remote());
    let mut owner_gone = false;
    let mut backlog = VecDeque::new();

    let timer = tokio::time::sleep_until(Instant::now());
    tokio::pin!(timer);

    loop {
        flush(&mut link, medium.as_ref(), &events, &mut backlog);
        if owner_gone {
            backlog.clear();
        }
        if link.is_closed() && backlog.is_empty() {
            break;
        }

        let deadline = link.next_deadline();
        if let Some(at) = deadline {
            timer.as_mut().reset(at);
        }

        tokio::select! {
            // ── Branch 1: owner request or inbound frame ─────────────────
            command = commands.recv() => {
                let now = Instant::now();
                match command {
                    Some(Command::Inbound(packet)) => {
                        if !owner_gone {
                            update_busy(&mut link, &events, &backlog, now);
                        }
                        link.handle_packet(packet, now);
                    }
                    Some(Command::Send { payload, reply }) => {
                        let _ = reply.send(link.send(payload, now));
                    }
                    Some(Command::Disconnect { reply }) => {
                        let _ = reply.send(link.disconnect(now));
                    }
                    Some(Command::Abort) => link.abort(now),
                    Some(Command::LinkDown) => link.link_down(),
                    None => link.abort(now),
                }
            }

            // ── Branch 2: earliest timer deadline ────────────────────────
            _ = &mut timer, if deadline.is_some() => {
                link.handle_timers(Instant::now());
            }

            // ── Branch 3: owner dropped its handle ───────────────────────
            _ = events.closed(), if !owner_gone => {
                owner_gone = true;
                log::debug!("[{tag}] handle dropped, releasing link");
                let now = Instant::now();
                if link.disconnect(now).is_err() {
                    link.abort(now);
                }
            }

            // ── Branch 4: owner may have caught up ───────────────────────
            _ = tokio::time::sleep(BUSY_RECHECK), if link.own_busy() && !owner_gone => {
                update_busy(&mut link, &events, &backlog, Instant::now());
            }

            // ── Branch 5: room for the oldest backlogged event ───────────
            permit = events.reserve(), if !backlog.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(event) = backlog.pop_front() {
                        permit.send(event);
                    }
                }
                Err(_) => backlog.clear(),
            },
        }
    }

    log::debug!("[{tag}] session finished");
}

/// Carry out every pending action of `link`. Events the channel cannot take
/// right now are appended to `backlog`.
fn flush(
    link: &mut Link,
    medium: &dyn Transmit,
    events: &mpsc::Sender<LinkEvent>,
    backlog: &mut VecDeque<LinkEvent>,
) {
    while let Some(action) = link.poll_action() {
        match action {
            Action::Transmit(packet) => medium.transmit(&packet.dst, packet.encode()),
            Action::Notify(event) if !backlog.is_empty() => push_backlog(backlog, event),
            Action::Notify(event) => match events.try_send(event) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(event)) => push_backlog(backlog, event),
            },
        }
    }
}

/// Queue `event` behind the others, dropping it together with the newest
/// backlogged event when the two are opposite congestion notices.
fn push_backlog(backlog: &mut VecDeque<LinkEvent>, event: LinkEvent) {
    let cancels = matches!(
        (backlog.back(), &event),
        (Some(LinkEvent::Congested(a)), LinkEvent::Uncongested(b))
            | (Some(LinkEvent::Uncongested(a)), LinkEvent::Congested(b)) if a == b
    );
    if cancels {
        backlog.pop_back();
    } else {
        backlog.push_back(event);
    }
}

fn update_busy(
    link: &mut Link,
    events: &mpsc::Sender<LinkEvent>,
    backlog: &VecDeque<LinkEvent>,
    now: Instant,
) {
    let busy = !backlog.is_empty() || events.capacity() <= usize::from(link.config().window);
    link.set_own_busy(busy, now);
}
