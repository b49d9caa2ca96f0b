// Copyright 2024-2026 The wirenet developers
// This file is part of the wirenet library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{
    handlers::PacketSink,
    helpers::{registry::Registry, wait_opt},
    Conn, Connection, Packet, RecvStatus, SendStatus, MAX_DATAGRAM_SIZE,
};

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};

/// How long a disconnect waits for an in-flight delivery to finish.
const QUIESCE_WAIT: Duration = Duration::from_millis(500);

/// A virtual session for one UDP peer.
///
/// A session is pure bookkeeping: it owns no socket handle — sends go out
/// through the server's shared socket, serialized by the server's send lock
/// — just a packet FIFO the server's demultiplexer fills. In asynchronous
/// mode a worker drains the FIFO into the handler, and a dequeue that sits
/// empty past the idle timeout evicts the session; in synchronous mode the
/// caller drains it with [`recv`](Self::recv).
#[derive(Clone)]
pub struct UdpSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    peer_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    send_lock: Arc<Mutex<()>>,
    sink: Arc<dyn PacketSink>,
    alive: AtomicBool,
    disconnected: AtomicBool,
    started: AtomicBool,
    asynchronous: bool,
    idle_timeout: Option<Duration>,
    queue_tx: mpsc::UnboundedSender<Packet>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
    owner: Weak<Registry<UdpSession>>,
    shutdown: watch::Sender<bool>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl UdpSession {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        socket: Arc<UdpSocket>,
        send_lock: Arc<Mutex<()>>,
        sink: Arc<dyn PacketSink>,
        idle_timeout: Option<Duration>,
        asynchronous: bool,
        owner: Weak<Registry<UdpSession>>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                peer_addr,
                socket,
                send_lock,
                sink,
                alive: AtomicBool::new(true),
                disconnected: AtomicBool::new(false),
                started: AtomicBool::new(false),
                asynchronous,
                idle_timeout,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                owner,
                shutdown,
                worker: Default::default(),
            }),
        }
    }

    /// The address of the peer this session stands for.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Returns `true` until the session has begun tearing down.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(SeqCst) && !self.inner.disconnected.load(SeqCst)
    }

    /// The largest payload a single datagram can carry.
    pub fn max_packet_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }

    /// Queues a datagram for this session. Zero-length datagrams are queued
    /// too: they surface as empty packets and reset the idle clock.
    pub(crate) fn enqueue(&self, packet: Packet) {
        let _ = self.inner.queue_tx.send(packet);
    }

    /// Spawns the draining worker. Each session runs it at most once, and
    /// only in asynchronous mode.
    pub(crate) fn start(&self) {
        if !self.inner.asynchronous || self.inner.started.swap(true, SeqCst) {
            return;
        }
        let session = self.clone();
        let handle = tokio::spawn(async move { session.run_worker().await });
        *self.inner.worker.lock() = Some(handle);
    }

    async fn run_worker(self) {
        let peer_addr = self.inner.peer_addr;
        let mut shutdown = self.inner.shutdown.subscribe();

        enum Step {
            Closed,
            Idle,
            Drained,
            Packet(Packet),
        }

        while self.inner.alive.load(SeqCst) {
            // The guard is held across delivery, so a disconnect can wait
            // for an in-flight callback to finish.
            let mut queue = self.inner.queue_rx.lock().await;
            let step = tokio::select! {
                _ = shutdown.changed() => Step::Closed,
                next = wait_opt(self.inner.idle_timeout, queue.recv()) => match next {
                    None => Step::Idle,
                    Some(None) => Step::Drained,
                    Some(Some(packet)) => Step::Packet(packet),
                },
            };
            match step {
                Step::Packet(packet) => {
                    if !self.is_alive() {
                        break;
                    }
                    let conn = Arc::new(self.clone()) as Conn;
                    self.inner.sink.deliver(conn, packet, RecvStatus::Success).await;
                }
                Step::Idle => {
                    debug!("Evicting the idle session for {peer_addr}");
                    break;
                }
                Step::Closed | Step::Drained => break,
            }
        }

        self.terminate().await;
    }

    /// Pulls one datagram off the session's queue, waiting at most `wait`.
    /// Only supported in synchronous mode.
    pub async fn recv(&self, wait: Option<Duration>) -> (Option<Packet>, RecvStatus) {
        if self.inner.asynchronous {
            return (None, RecvStatus::NotSupported);
        }
        let mut shutdown = self.inner.shutdown.subscribe();
        if !self.is_alive() {
            return (None, RecvStatus::NotConnected);
        }

        enum Step {
            Closed,
            Next(Option<Packet>),
        }

        let step = wait_opt(wait, async {
            let mut queue = self.inner.queue_rx.lock().await;
            tokio::select! {
                _ = shutdown.changed() => Step::Closed,
                next = queue.recv() => Step::Next(next),
            }
        })
        .await;

        match step {
            None => (None, RecvStatus::TimedOut),
            Some(Step::Closed) | Some(Step::Next(None)) => (None, RecvStatus::NotConnected),
            Some(Step::Next(Some(packet))) => (Some(packet), RecvStatus::Success),
        }
    }

    /// Sends one datagram to the peer through the server's shared socket.
    pub async fn send_timeout(&self, packet: Packet, wait: Option<Duration>) -> (usize, SendStatus) {
        if !self.is_alive() {
            return (0, SendStatus::NotConnected);
        }
        if packet.len() > MAX_DATAGRAM_SIZE {
            warn!("Refusing a {}-byte packet to {}: too large for a datagram", packet.len(), self.inner.peer_addr);
            return (0, SendStatus::SendFailed);
        }

        let ready = wait_opt(wait, async {
            let guard = self.inner.send_lock.lock().await;
            let ready = self.inner.socket.writable().await;
            (guard, ready)
        })
        .await;
        let Some((_guard, ready)) = ready else {
            return (0, SendStatus::TimedOut);
        };
        if let Err(error) = ready {
            warn!("Writability check failed for {}: {error}", self.inner.peer_addr);
            return (0, SendStatus::SocketError);
        }

        match self.inner.socket.send_to(packet.as_bytes(), self.inner.peer_addr).await {
            Ok(sent) if sent == packet.len() => {
                trace!("Sent a {sent}-byte datagram to {}", self.inner.peer_addr);
                (sent, SendStatus::Success)
            }
            Ok(sent) => {
                warn!("Sent a truncated datagram to {}", self.inner.peer_addr);
                (sent, SendStatus::SendFailed)
            }
            Err(error) => {
                warn!("Failed to send a datagram to {}: {error}", self.inner.peer_addr);
                (0, SendStatus::SendFailed)
            }
        }
    }

    /// Hands the worker's handle to the caller for a bounded join.
    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.inner.worker.lock().take()
    }

    /// Reports a framework-driven send to the handler.
    pub(crate) async fn notify_sent(&self, status: SendStatus) {
        self.inner.sink.sent(Arc::new(self.clone()) as Conn, status).await;
    }

    /// Tears the session down exactly once: fires `on_disconnect` and
    /// removes the session from the server's registry. Later calls are
    /// no-ops.
    pub(crate) async fn terminate(&self) {
        self.inner.alive.store(false, SeqCst);
        self.inner.shutdown.send_replace(true);
        if self.inner.disconnected.swap(true, SeqCst) {
            return;
        }

        // Wait briefly for an in-flight delivery so `on_received` does not
        // trail `on_disconnect`; bounded, so a disconnect issued from inside
        // a callback cannot deadlock.
        let _ = tokio::time::timeout(QUIESCE_WAIT, self.inner.queue_rx.lock()).await;

        self.inner.sink.closed(Arc::new(self.clone()) as Conn).await;

        if let Some(owner) = self.inner.owner.upgrade() {
            owner.remove(self.inner.peer_addr);
        }
        debug!("Closed the session for {}", self.inner.peer_addr);
    }
}

#[async_trait]
impl Connection for UdpSession {
    fn remote_addr(&self) -> SocketAddr {
        self.peer_addr()
    }

    fn is_alive(&self) -> bool {
        UdpSession::is_alive(self)
    }

    async fn send_timeout(&self, packet: Packet, timeout: Option<Duration>) -> (usize, SendStatus) {
        UdpSession::send_timeout(self, packet, timeout).await
    }

    async fn disconnect(&self) {
        self.terminate().await;
    }
}
