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
    handlers::{ClientSink, PacketSink},
    helpers::{dispatch::{ProcessorPool, PROCESSOR_DRAIN_WAIT}, parse_port, wait_opt, ClientState},
    ClientConfig, ClientHandler, Conn, Connection, Packet, RecvStatus, SendStatus,
    MAX_DATAGRAM_SIZE,
};

use parking_lot::{Mutex, RwLock};
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
    time::Duration,
};
use tokio::{net::UdpSocket, sync::watch, task::JoinHandle};

/// How long a disconnect waits for an in-flight delivery to finish.
const QUIESCE_WAIT: Duration = Duration::from_millis(500);

/// A UDP client over a connected socket: one packet per datagram, no
/// framing.
///
/// `connect` resolves the configured hostname and connects the socket to
/// that peer; in asynchronous mode a receive loop feeds the processor pool,
/// in synchronous mode the caller pulls datagrams with
/// [`recv`](Self::recv). Cloning the client clones a handle to the same
/// instance.
#[derive(Clone)]
pub struct UdpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: RwLock<ClientConfig>,
    handler: RwLock<Arc<dyn ClientHandler>>,
    state: Mutex<ClientState>,
    /// Serializes connect/disconnect; never held across a callback.
    op_lock: tokio::sync::Mutex<()>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    peer_addr: RwLock<Option<SocketAddr>>,
    sink: RwLock<Option<Arc<dyn PacketSink>>>,
    alive: AtomicBool,
    disconnected: AtomicBool,
    send_lock: tokio::sync::Mutex<()>,
    pool: RwLock<Option<ProcessorPool>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl UdpClient {
    /// Creates a disconnected client.
    pub fn new(handler: Arc<dyn ClientHandler>, config: ClientConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                handler: RwLock::new(handler),
                state: Mutex::new(ClientState::Disconnected),
                op_lock: Default::default(),
                socket: Default::default(),
                peer_addr: Default::default(),
                sink: Default::default(),
                alive: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
                send_lock: Default::default(),
                pool: Default::default(),
                recv_task: Default::default(),
                shutdown,
            }),
        }
    }

    /// Connects the socket to the configured server. Connecting while
    /// connected is a no-op; on failure every acquired resource is released.
    pub async fn connect(&self) -> io::Result<()> {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() == ClientState::Connected {
            return Ok(());
        }
        *self.inner.state.lock() = ClientState::Connecting;

        match self.establish().await {
            Ok(peer_addr) => {
                *self.inner.state.lock() = ClientState::Connected;
                info!("Connected to {peer_addr} (UDP)");
                Ok(())
            }
            Err(error) => {
                *self.inner.socket.write() = None;
                *self.inner.peer_addr.write() = None;
                *self.inner.state.lock() = ClientState::Disconnected;
                Err(error)
            }
        }
    }

    async fn establish(&self) -> io::Result<SocketAddr> {
        let config = self.inner.config.read().clone();
        let port = parse_port(&config.port)?;

        let mut addrs = tokio::net::lookup_host((config.host.as_str(), port)).await?;
        let peer_addr = addrs.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("failed to resolve '{}'", config.host))
        })?;

        let bind_addr: SocketAddr = if peer_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            "[::]:0".parse().map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        socket.connect(peer_addr).await?;

        let sink: Arc<dyn PacketSink> = Arc::new(ClientSink(self.inner.handler.read().clone()));
        *self.inner.socket.write() = Some(socket.clone());
        *self.inner.peer_addr.write() = Some(peer_addr);
        *self.inner.sink.write() = Some(sink.clone());
        self.inner.disconnected.store(false, SeqCst);
        self.inner.alive.store(true, SeqCst);
        self.inner.shutdown.send_replace(false);

        if config.asynchronous_receive {
            let pool = {
                let weak = Arc::downgrade(&self.inner);
                ProcessorPool::new(
                    config.max_processors,
                    PROCESSOR_DRAIN_WAIT,
                    Arc::new(move |packet| {
                        let weak = weak.clone();
                        Box::pin(async move {
                            let Some(inner) = weak.upgrade() else { return };
                            let client = UdpClient { inner };
                            if !client.is_connection_alive() {
                                return;
                            }
                            let sink = client.inner.sink.read().clone();
                            if let Some(sink) = sink {
                                sink.deliver(Arc::new(client) as Conn, packet, RecvStatus::Success)
                                    .await;
                            }
                        })
                    }),
                )
            };
            *self.inner.pool.write() = Some(pool.clone());

            let client = self.clone();
            let handle = tokio::spawn(async move { client.run_receive_loop(socket, pool).await });
            *self.inner.recv_task.lock() = Some(handle);
        }

        Ok(peer_addr)
    }

    async fn run_receive_loop(self, socket: Arc<UdpSocket>, pool: ProcessorPool) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut buf = vec![0u8; 1 << 16];
        while self.inner.alive.load(SeqCst) {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv(&mut buf) => match received {
                    Ok(len) => {
                        trace!("Received a {len}-byte datagram");
                        pool.enqueue(Packet::copy_from_slice(&buf[..len]));
                    }
                    Err(error) => {
                        warn!("Failed to receive a datagram: {error}");
                        break;
                    }
                },
            }
        }
        self.teardown().await;
    }

    /// Disconnects from the server: stops the receive loop (bounded by the
    /// configured wait time), fires `on_disconnect` exactly once, and closes
    /// the socket. Disconnecting while disconnected is a no-op.
    pub async fn disconnect(&self) {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() != ClientState::Connected {
            return;
        }
        *self.inner.state.lock() = ClientState::Disconnecting;

        self.inner.alive.store(false, SeqCst);
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.recv_task.lock().take();
        if let Some(handle) = handle {
            let wait = self.inner.config.read().wait_time;
            let _ = wait_opt(wait, handle).await;
        }
        self.teardown().await;

        *self.inner.socket.write() = None;
        *self.inner.peer_addr.write() = None;
        *self.inner.pool.write() = None;
        *self.inner.state.lock() = ClientState::Disconnected;
    }

    async fn teardown(&self) {
        self.inner.alive.store(false, SeqCst);
        self.inner.shutdown.send_replace(true);
        if self.inner.disconnected.swap(true, SeqCst) {
            return;
        }

        let pool = self.inner.pool.read().clone();
        if let Some(pool) = pool {
            pool.close();
            pool.quiesce(QUIESCE_WAIT).await;
        }

        let sink = self.inner.sink.read().clone();
        if let Some(sink) = sink {
            sink.closed(Arc::new(self.clone()) as Conn).await;
        }
        *self.inner.state.lock() = ClientState::Disconnected;
        debug!("Disconnected (UDP)");
    }

    /// Pulls one datagram off the socket (synchronous mode only).
    pub async fn recv(&self, wait: Option<Duration>) -> (Option<Packet>, RecvStatus) {
        // The live connection's mode, not the (mutable) configured flag.
        if self.inner.pool.read().is_some() {
            return (None, RecvStatus::NotSupported);
        }
        let mut shutdown = self.inner.shutdown.subscribe();
        let Some(socket) = self.socket() else {
            return (None, RecvStatus::NotConnected);
        };
        if !self.is_connection_alive() {
            return (None, RecvStatus::NotConnected);
        }

        enum Step {
            Closed,
            Received(io::Result<usize>),
        }

        let mut buf = vec![0u8; 1 << 16];
        let step = wait_opt(wait, async {
            tokio::select! {
                _ = shutdown.changed() => Step::Closed,
                received = socket.recv(&mut buf) => Step::Received(received),
            }
        })
        .await;

        match step {
            None => (None, RecvStatus::TimedOut),
            Some(Step::Closed) => (None, RecvStatus::NotConnected),
            Some(Step::Received(Ok(len))) => {
                (Some(Packet::copy_from_slice(&buf[..len])), RecvStatus::Success)
            }
            Some(Step::Received(Err(error))) => {
                warn!("Failed to receive a datagram: {error}");
                (None, RecvStatus::RecvFailed)
            }
        }
    }

    /// Sends one datagram, waiting at most `timeout` for writability.
    pub async fn send_timeout(&self, packet: Packet, wait: Option<Duration>) -> (usize, SendStatus) {
        if !self.is_connection_alive() {
            return (0, SendStatus::NotConnected);
        }
        if packet.len() > MAX_DATAGRAM_SIZE {
            warn!("Refusing a {}-byte packet: too large for a datagram", packet.len());
            return (0, SendStatus::SendFailed);
        }
        let Some(socket) = self.socket() else {
            return (0, SendStatus::NotConnected);
        };

        let ready = wait_opt(wait, async {
            let guard = self.inner.send_lock.lock().await;
            let ready = socket.writable().await;
            (guard, ready)
        })
        .await;
        let Some((_guard, ready)) = ready else {
            return (0, SendStatus::TimedOut);
        };
        if let Err(error) = ready {
            warn!("Writability check failed: {error}");
            return (0, SendStatus::SocketError);
        }

        match socket.send(packet.as_bytes()).await {
            Ok(sent) if sent == packet.len() => (sent, SendStatus::Success),
            Ok(sent) => {
                warn!("Sent a truncated datagram");
                (sent, SendStatus::SendFailed)
            }
            Err(error) => {
                warn!("Failed to send a datagram: {error}");
                (0, SendStatus::SendFailed)
            }
        }
    }

    /// Sends one datagram with an indefinite writability wait.
    pub async fn send(&self, packet: Packet) -> (usize, SendStatus) {
        self.send_timeout(packet, None).await
    }

    /// Returns `true` while the connection is up. Safe to call concurrently
    /// with `disconnect`.
    pub fn is_connection_alive(&self) -> bool {
        self.inner.alive.load(SeqCst) && !self.inner.disconnected.load(SeqCst)
    }

    /// The address of the connected server, while connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer_addr.read()
    }

    /// The largest payload a single datagram can carry.
    pub fn max_packet_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }

    /// The configured hostname.
    pub fn host(&self) -> String {
        self.inner.config.read().host.clone()
    }

    /// Reconfigures the hostname; ignored while connected.
    pub fn set_host(&self, host: impl Into<String>) {
        if *self.inner.state.lock() != ClientState::Disconnected {
            warn!("The hostname cannot change while connected");
            return;
        }
        self.inner.config.write().host = host.into();
    }

    /// The configured port.
    pub fn port(&self) -> String {
        self.inner.config.read().port.clone()
    }

    /// Reconfigures the port; ignored while connected.
    pub fn set_port(&self, port: impl Into<String>) {
        if *self.inner.state.lock() != ClientState::Disconnected {
            warn!("The port cannot change while connected");
            return;
        }
        self.inner.config.write().port = port.into();
    }

    /// The configured wind-down wait time.
    pub fn wait_time(&self) -> Option<Duration> {
        self.inner.config.read().wait_time
    }

    /// Reconfigures the wind-down wait time.
    pub fn set_wait_time(&self, wait_time: Option<Duration>) {
        self.inner.config.write().wait_time = wait_time;
    }

    /// The processor cap for framework-driven delivery; 0 means unbounded.
    pub fn max_processors(&self) -> usize {
        self.inner.config.read().max_processors
    }

    /// Reconfigures the processor cap; it applies from the next `connect`.
    pub fn set_max_processors(&self, max_processors: usize) {
        self.inner.config.write().max_processors = max_processors;
    }

    /// Whether received datagrams are delivered through the handler.
    pub fn is_asynchronous(&self) -> bool {
        self.inner.config.read().asynchronous_receive
    }

    /// Flips the receive mode; it applies from the next `connect`.
    pub fn set_asynchronous(&self, asynchronous: bool) {
        self.inner.config.write().asynchronous_receive = asynchronous;
    }

    /// Swaps the handler; it applies from the next `connect`.
    pub fn set_handler(&self, handler: Arc<dyn ClientHandler>) {
        *self.inner.handler.write() = handler;
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.inner.socket.read().clone()
    }
}

#[async_trait]
impl Connection for UdpClient {
    fn remote_addr(&self) -> SocketAddr {
        self.peer_addr().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    fn is_alive(&self) -> bool {
        self.is_connection_alive()
    }

    async fn send_timeout(&self, packet: Packet, timeout: Option<Duration>) -> (usize, SendStatus) {
        UdpClient::send_timeout(self, packet, timeout).await
    }

    async fn disconnect(&self) {
        UdpClient::disconnect(self).await;
    }
}
