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
    handlers::ServerSink,
    helpers::{parse_port, registry::Registry, wait_opt, ServerState, BROADCAST_SEND_WAIT},
    udp::UdpSession,
    Packet, ServerConfig, ServerHandler, MAX_DATAGRAM_SIZE,
};

use parking_lot::{Mutex, RwLock};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, task::JoinHandle};

/// A UDP server: one receive loop demultiplexing datagrams into per-peer
/// virtual sessions.
///
/// A datagram from a known peer is queued on that peer's session — a
/// zero-length one included, which keeps the session alive and surfaces as
/// an empty packet. A datagram from an unknown peer passes admission (the
/// connection cap, then `on_accept`) before a session is created for it;
/// rejections are silent, as UDP has no rejection channel. All sends go out
/// through the single listening socket, serialized by the server's send
/// lock.
#[derive(Clone)]
pub struct UdpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: RwLock<ServerConfig>,
    handler: RwLock<Arc<dyn ServerHandler>>,
    state: Mutex<ServerState>,
    /// Serializes start/stop; never held across a callback.
    op_lock: tokio::sync::Mutex<()>,
    local_addr: RwLock<Option<SocketAddr>>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    send_lock: Arc<tokio::sync::Mutex<()>>,
    sessions: Arc<Registry<UdpSession>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpServer {
    /// Creates a stopped server.
    pub fn new(handler: Arc<dyn ServerHandler>, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config: RwLock::new(config),
                handler: RwLock::new(handler),
                state: Mutex::new(ServerState::Stopped),
                op_lock: Default::default(),
                local_addr: Default::default(),
                socket: Default::default(),
                send_lock: Default::default(),
                sessions: Arc::new(Registry::new()),
                recv_task: Default::default(),
            }),
        }
    }

    /// Binds the socket and spawns the receive loop. Starting a started
    /// server is a no-op that returns the current listening address.
    pub async fn start(&self) -> io::Result<SocketAddr> {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() == ServerState::Started {
            return self
                .local_addr()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "the listening address is unset"));
        }

        let port = parse_port(&self.inner.config.read().port)?;
        let socket = Arc::new(UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?);
        let local_addr = socket.local_addr()?;

        let server = self.clone();
        let loop_socket = socket.clone();
        let handle = tokio::spawn(async move { server.run_receive_loop(loop_socket).await });
        *self.inner.recv_task.lock() = Some(handle);
        *self.inner.socket.write() = Some(socket);
        *self.inner.local_addr.write() = Some(local_addr);
        *self.inner.state.lock() = ServerState::Started;

        info!("Listening at {local_addr} (UDP)");
        Ok(local_addr)
    }

    async fn run_receive_loop(self, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; 1 << 16];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer_addr)) => self.process_datagram(&socket, &buf[..len], peer_addr).await,
                Err(error) => {
                    error!("Failed to receive a datagram: {error}");
                    break;
                }
            }
        }
    }

    async fn process_datagram(&self, socket: &Arc<UdpSocket>, data: &[u8], peer_addr: SocketAddr) {
        // Known peers are matched on the full address, family included.
        if let Some(session) = self.inner.sessions.get(peer_addr) {
            trace!("Received a {}-byte datagram from {peer_addr}", data.len());
            session.enqueue(Packet::copy_from_slice(data));
            return;
        }

        // An empty datagram from an unknown peer carries nothing to admit.
        if data.is_empty() {
            return;
        }

        let (max_connections, asynchronous, idle_timeout) = {
            let config = self.inner.config.read();
            (
                config.max_connections,
                config.asynchronous_receive,
                config.idle_timeout.or(config.wait_time),
            )
        };
        if max_connections != 0 && self.inner.sessions.len() >= max_connections {
            trace!("Dropped a datagram from {peer_addr}: the connection limit is reached");
            return;
        }

        let handler = self.inner.handler.read().clone();
        if !handler.on_accept(peer_addr).await {
            debug!("The handler refused a session for {peer_addr}");
            return;
        }

        let session = UdpSession::new(
            peer_addr,
            socket.clone(),
            self.inner.send_lock.clone(),
            Arc::new(ServerSink(handler)),
            idle_timeout,
            asynchronous,
            Arc::downgrade(&self.inner.sessions),
        );
        self.inner.sessions.insert(peer_addr, session.clone());
        session.start();
        session.enqueue(Packet::copy_from_slice(data));
        debug!("Accepted a new virtual session for {peer_addr}");
    }

    /// Stops the server: closes the socket (unblocking the receive loop),
    /// waits up to the configured wait time for it to wind down, then tears
    /// every session down. Stopping a stopped server is a no-op.
    pub async fn stop(&self) {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() != ServerState::Started {
            return;
        }
        *self.inner.state.lock() = ServerState::Stopping;

        let handle = self.inner.recv_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let wait = self.inner.config.read().wait_time;
            let _ = wait_opt(wait, handle).await;
        }

        self.shutdown_all().await;

        *self.inner.socket.write() = None;
        *self.inner.local_addr.write() = None;
        *self.inner.state.lock() = ServerState::Stopped;
        info!("The server has stopped");
    }

    /// Tears every session down, firing each session's `on_disconnect`
    /// exactly once and waiting (bounded by the configured wait time) for
    /// its worker to exit. The socket keeps receiving.
    pub async fn shutdown_all(&self) {
        let wait = self.inner.config.read().wait_time;
        for session in self.inner.sessions.drain() {
            let worker = session.take_worker();
            session.terminate().await;
            if let Some(handle) = worker {
                let _ = wait_opt(wait, handle).await;
            }
        }
    }

    /// Sends one packet to every live session, reporting each outcome
    /// through `on_sent`. Every send is bounded, so one stalled peer cannot
    /// hang delivery to the rest of the sweep.
    pub async fn broadcast(&self, packet: Packet) {
        let wait = Some(self.inner.config.read().wait_time.unwrap_or(BROADCAST_SEND_WAIT));
        for session in self.inner.sessions.snapshot() {
            let (_, status) = session.send_timeout(packet.clone(), wait).await;
            session.notify_sent(status).await;
        }
    }

    /// Returns `true` while the server is receiving datagrams.
    pub fn is_started(&self) -> bool {
        *self.inner.state.lock() == ServerState::Started
    }

    /// The address the server is listening at, while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read()
    }

    /// The number of live sessions.
    pub fn num_connected(&self) -> usize {
        self.inner.sessions.len()
    }

    /// A snapshot of the live sessions, in creation order.
    pub fn sessions(&self) -> Vec<UdpSession> {
        self.inner.sessions.snapshot()
    }

    /// Looks a session up by its peer address.
    pub fn find_session(&self, peer_addr: SocketAddr) -> Option<UdpSession> {
        self.inner.sessions.get(peer_addr)
    }

    /// The largest payload a single datagram can carry.
    pub fn max_packet_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }

    /// The maximum number of concurrent sessions; 0 means unbounded.
    pub fn max_connections(&self) -> usize {
        self.inner.config.read().max_connections
    }

    /// The configured wind-down wait time.
    pub fn wait_time(&self) -> Option<std::time::Duration> {
        self.inner.config.read().wait_time
    }

    /// Reconfigures the wind-down wait time.
    pub fn set_wait_time(&self, wait_time: Option<std::time::Duration>) {
        self.inner.config.write().wait_time = wait_time;
    }

    /// The configured idle timeout for virtual sessions.
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        self.inner.config.read().idle_timeout
    }

    /// Reconfigures the idle timeout; sessions created from here on use it.
    pub fn set_idle_timeout(&self, idle_timeout: Option<std::time::Duration>) {
        self.inner.config.write().idle_timeout = idle_timeout;
    }

    /// Whether sessions deliver packets through the handler.
    pub fn is_asynchronous(&self) -> bool {
        self.inner.config.read().asynchronous_receive
    }

    /// Flips the receive mode; sessions created from here on use it.
    pub fn set_asynchronous(&self, asynchronous: bool) {
        self.inner.config.write().asynchronous_receive = asynchronous;
    }

    /// Swaps the handler; sessions created from here on use the new one.
    pub fn set_handler(&self, handler: Arc<dyn ServerHandler>) {
        *self.inner.handler.write() = handler;
    }
}
