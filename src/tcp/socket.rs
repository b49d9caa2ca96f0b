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
    helpers::{dispatch::ProcessorPool, registry::Registry, wait_opt},
    Conn, Connection, FrameCodec, Packet, RecvStatus, SendStatus,
};

use futures_util::StreamExt;
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::codec::FramedRead;

/// How long a disconnect waits for an in-flight delivery to finish, so
/// `on_received` does not trail `on_disconnect`. Bounded, not indefinite: a
/// disconnect issued from inside a callback must not deadlock on its own
/// dispatch lock.
const DISPATCH_QUIESCE_WAIT: Duration = Duration::from_millis(500);

/// One TCP connection, shared-owned by the server's registry, its own
/// receive task, and any callback that retained the handle.
///
/// In asynchronous mode a dedicated receive task decodes frames and feeds
/// the processor pool; in synchronous mode the caller pulls frames with
/// [`recv`](Self::recv). Sends are serialized by the connection's send lock.
#[derive(Clone)]
pub struct TcpSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    alive: AtomicBool,
    disconnected: AtomicBool,
    started: AtomicBool,
    reader: Mutex<FramedRead<OwnedReadHalf, FrameCodec>>,
    writer: Mutex<OwnedWriteHalf>,
    sink: Arc<dyn PacketSink>,
    pool: Option<ProcessorPool>,
    owner: Weak<Registry<TcpSocket>>,
    shutdown: watch::Sender<bool>,
    recv_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpSocket {
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        sink: Arc<dyn PacketSink>,
        max_frame_size: usize,
        max_processors: usize,
        drain_wait: Duration,
        asynchronous: bool,
        owner: Weak<Registry<TcpSocket>>,
    ) -> Self {
        let local_addr = stream.local_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|weak: &Weak<SocketInner>| {
            let pool = asynchronous.then(|| {
                let weak = weak.clone();
                ProcessorPool::new(
                    max_processors,
                    drain_wait,
                    Arc::new(move |packet| {
                        let weak = weak.clone();
                        Box::pin(async move {
                            let Some(inner) = weak.upgrade() else { return };
                            let socket = TcpSocket { inner };
                            if !socket.is_alive() {
                                return;
                            }
                            let sink = socket.inner.sink.clone();
                            sink.deliver(Arc::new(socket), packet, RecvStatus::Success).await;
                        })
                    }),
                )
            });

            SocketInner {
                peer_addr,
                local_addr,
                alive: AtomicBool::new(true),
                disconnected: AtomicBool::new(false),
                started: AtomicBool::new(false),
                reader: Mutex::new(FramedRead::new(read_half, FrameCodec::new(max_frame_size))),
                writer: Mutex::new(write_half),
                sink,
                pool,
                owner,
                shutdown,
                recv_task: Default::default(),
            }
        });

        Self { inner }
    }

    /// The address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// The local address of the connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Returns `true` until the connection has begun tearing down.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(SeqCst) && !self.inner.disconnected.load(SeqCst)
    }

    /// Spawns the framed receive task. Each socket runs it at most once, and
    /// only in asynchronous mode.
    pub(crate) fn start(&self) {
        if self.inner.pool.is_none() || self.inner.started.swap(true, SeqCst) {
            return;
        }
        let socket = self.clone();
        let handle = tokio::spawn(async move { socket.run_receive_loop().await });
        *self.inner.recv_task.lock() = Some(handle);
    }

    async fn run_receive_loop(self) {
        let peer_addr = self.inner.peer_addr;
        let mut shutdown = self.inner.shutdown.subscribe();
        let Some(pool) = self.inner.pool.clone() else { return };

        // The reader is held for the task's whole lifetime.
        let mut reader = self.inner.reader.lock().await;
        while self.inner.alive.load(SeqCst) {
            tokio::select! {
                _ = shutdown.changed() => {
                    trace!("Stopping the receive task for {peer_addr}");
                    break;
                }
                frame = reader.next() => match frame {
                    Some(Ok(packet)) => {
                        trace!("Received a {}-byte packet from {peer_addr}", packet.len());
                        pool.enqueue(packet);
                    }
                    Some(Err(error)) => {
                        warn!("Failed to read a frame from {peer_addr}: {error}");
                        break;
                    }
                    None => {
                        debug!("{peer_addr} closed the connection");
                        break;
                    }
                },
            }
        }
        drop(reader);

        self.terminate().await;
    }

    /// Pulls one packet off the connection, waiting at most `wait` (`None`
    /// waits indefinitely). Only supported in synchronous mode; sockets with
    /// framework-driven receive return [`RecvStatus::NotSupported`].
    pub async fn recv(&self, wait: Option<Duration>) -> (Option<Packet>, RecvStatus) {
        if self.inner.pool.is_some() {
            return (None, RecvStatus::NotSupported);
        }
        let mut shutdown = self.inner.shutdown.subscribe();
        if !self.is_alive() {
            return (None, RecvStatus::NotConnected);
        }

        enum Step {
            Closed,
            Frame(Option<io::Result<Packet>>),
        }

        let step = wait_opt(wait, async {
            let mut reader = self.inner.reader.lock().await;
            tokio::select! {
                _ = shutdown.changed() => Step::Closed,
                frame = reader.next() => Step::Frame(frame),
            }
        })
        .await;

        match step {
            None => (None, RecvStatus::TimedOut),
            Some(Step::Closed) => (None, RecvStatus::NotConnected),
            Some(Step::Frame(Some(Ok(packet)))) => (Some(packet), RecvStatus::Success),
            Some(Step::Frame(Some(Err(error)))) => {
                warn!("Failed to read a frame from {}: {error}", self.inner.peer_addr);
                let status = recv_error_status(&error);
                self.terminate().await;
                (None, status)
            }
            Some(Step::Frame(None)) => {
                debug!("{} closed the connection", self.inner.peer_addr);
                self.terminate().await;
                (None, RecvStatus::ConnectionClosing)
            }
        }
    }

    /// Sends one packet as a length-prefixed frame. The wait bounds the send
    /// lock acquisition and the write-readiness wait; once any byte is on
    /// the wire the frame is completed or the connection is failed, so a
    /// timeout can never leave a torn frame behind.
    pub async fn send_timeout(&self, packet: Packet, wait: Option<Duration>) -> (usize, SendStatus) {
        if !self.is_alive() {
            return (0, SendStatus::NotConnected);
        }

        let ready = wait_opt(wait, async {
            let writer = self.inner.writer.lock().await;
            let ready = writer.writable().await;
            (writer, ready)
        })
        .await;
        let Some((mut writer, ready)) = ready else {
            return (0, SendStatus::TimedOut);
        };
        if let Err(error) = ready {
            warn!("Writability check failed for {}: {error}", self.inner.peer_addr);
            return (0, SendStatus::SocketError);
        }

        // The length prefix is a distinct send; on failure the body is not
        // attempted and the connection is failed.
        let prefix = (packet.len() as u32).to_le_bytes();
        if let Err(error) = writer.write_all(&prefix).await {
            warn!("Failed to write a frame prefix to {}: {error}", self.inner.peer_addr);
            drop(writer);
            self.terminate().await;
            return (0, SendStatus::SendFailed);
        }

        let body = packet.as_bytes();
        let mut written = 0;
        while written < body.len() {
            match writer.write(&body[written..]).await {
                Ok(0) | Err(_) => {
                    warn!("Failed to write a frame body to {}", self.inner.peer_addr);
                    drop(writer);
                    self.terminate().await;
                    return (written, SendStatus::SendFailed);
                }
                Ok(n) => written += n,
            }
        }

        trace!("Sent a {written}-byte packet to {}", self.inner.peer_addr);
        (written, SendStatus::Success)
    }

    /// Sends one packet with an indefinite writability wait.
    pub async fn send(&self, packet: Packet) -> (usize, SendStatus) {
        self.send_timeout(packet, None).await
    }

    /// Tears the connection down exactly once: stops delivery, fires
    /// `on_disconnect`, removes the socket from its owner's registry, and
    /// shuts the handle down. Later calls are no-ops.
    pub(crate) async fn terminate(&self) {
        self.inner.alive.store(false, SeqCst);
        self.inner.shutdown.send_replace(true);
        if self.inner.disconnected.swap(true, SeqCst) {
            return;
        }

        if let Some(pool) = &self.inner.pool {
            pool.close();
            pool.quiesce(DISPATCH_QUIESCE_WAIT).await;
        }

        self.inner.sink.closed(Arc::new(self.clone()) as Conn).await;

        if let Some(owner) = self.inner.owner.upgrade() {
            owner.remove(self.inner.peer_addr);
        }

        // Bounded: a send stalled mid-write must not pin the teardown.
        if let Ok(mut writer) =
            tokio::time::timeout(DISPATCH_QUIESCE_WAIT, self.inner.writer.lock()).await
        {
            let _ = writer.shutdown().await;
        }
        debug!("Disconnected from {}", self.inner.peer_addr);
    }

    /// Marks the socket as closing and wakes every blocked read, without yet
    /// firing the disconnect callback.
    pub(crate) fn request_close(&self) {
        self.inner.alive.store(false, SeqCst);
        self.inner.shutdown.send_replace(true);
    }

    /// Reports a framework-driven send to the handler.
    pub(crate) async fn notify_sent(&self, status: SendStatus) {
        self.inner.sink.sent(Arc::new(self.clone()) as Conn, status).await;
    }

    /// Hands the receive task's handle to the caller for a bounded join.
    pub(crate) fn take_recv_task(&self) -> Option<JoinHandle<()>> {
        self.inner.recv_task.lock().take()
    }
}

#[async_trait]
impl Connection for TcpSocket {
    fn remote_addr(&self) -> SocketAddr {
        self.peer_addr()
    }

    fn is_alive(&self) -> bool {
        TcpSocket::is_alive(self)
    }

    async fn send_timeout(&self, packet: Packet, timeout: Option<Duration>) -> (usize, SendStatus) {
        TcpSocket::send_timeout(self, packet, timeout).await
    }

    async fn disconnect(&self) {
        self.terminate().await;
    }
}

/// A frame that violates the configured maximum is a framing-layer failure;
/// anything else failed mid-read.
fn recv_error_status(error: &io::Error) -> RecvStatus {
    if error.kind() == io::ErrorKind::InvalidData {
        RecvStatus::SocketError
    } else {
        RecvStatus::RecvFailed
    }
}
