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
    helpers::{
        dispatch::PROCESSOR_DRAIN_WAIT, parse_port, registry::Registry, wait_opt, ServerState,
        BROADCAST_SEND_WAIT,
    },
    tcp::TcpSocket,
    Packet, ServerConfig, ServerHandler,
};

use parking_lot::{Mutex, RwLock};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// A TCP server: a listener, an accept loop, and the set of sockets it has
/// accepted.
///
/// In asynchronous mode every accepted socket runs a framed receive task and
/// delivers packets through the handler; in synchronous mode the caller
/// looks sockets up (e.g. via [`find_socket`](Self::find_socket)) and pulls
/// packets with [`TcpSocket::recv`]. Cloning the server clones a handle to
/// the same instance; a started server cannot be duplicated.
#[derive(Clone)]
pub struct TcpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: RwLock<ServerConfig>,
    handler: RwLock<Arc<dyn ServerHandler>>,
    state: Mutex<ServerState>,
    /// Serializes start/stop; never held across a callback.
    op_lock: tokio::sync::Mutex<()>,
    local_addr: RwLock<Option<SocketAddr>>,
    sockets: Arc<Registry<TcpSocket>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    /// Creates a stopped server.
    pub fn new(handler: Arc<dyn ServerHandler>, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config: RwLock::new(config),
                handler: RwLock::new(handler),
                state: Mutex::new(ServerState::Stopped),
                op_lock: Default::default(),
                local_addr: Default::default(),
                sockets: Arc::new(Registry::new()),
                accept_task: Default::default(),
            }),
        }
    }

    /// Binds the listener and spawns the accept loop. Starting a started
    /// server is a no-op that returns the current listening address; any
    /// failure unwinds whatever was acquired and leaves the server stopped.
    pub async fn start(&self) -> io::Result<SocketAddr> {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() == ServerState::Started {
            return self
                .local_addr()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "the listening address is unset"));
        }

        let port = parse_port(&self.inner.config.read().port)?;
        let listener = {
            let socket = tokio::net::TcpSocket::new_v4()?;
            socket.set_reuseaddr(true)?;
            socket.bind(SocketAddr::from(([0, 0, 0, 0], port)))?;
            socket.listen(1024)?
        };
        let local_addr = listener.local_addr()?;

        let server = self.clone();
        let handle = tokio::spawn(async move { server.run_accept_loop(listener).await });
        *self.inner.accept_task.lock() = Some(handle);
        *self.inner.local_addr.write() = Some(local_addr);
        *self.inner.state.lock() = ServerState::Started;

        info!("Listening at {local_addr}");
        Ok(local_addr)
    }

    async fn run_accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    trace!("Received a connection request from {peer_addr}");
                    self.process_connection(stream, peer_addr).await;
                }
                Err(error) => {
                    error!("Failed to accept a connection: {error}");
                    break;
                }
            }
        }
    }

    async fn process_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let (max_connections, max_processors, max_frame_size, asynchronous) = {
            let config = self.inner.config.read();
            (
                config.max_connections,
                config.max_processors,
                config.max_frame_size,
                config.asynchronous_receive,
            )
        };

        // The connection limit gates admission before the handler does;
        // dropping the stream closes it on the peer.
        if max_connections != 0 && self.inner.sockets.len() >= max_connections {
            warn!("Rejected a connection request from {peer_addr}: the connection limit is reached");
            return;
        }

        let handler = self.inner.handler.read().clone();
        if !handler.on_accept(peer_addr).await {
            debug!("The handler refused a connection request from {peer_addr}");
            return;
        }

        let socket = TcpSocket::new(
            stream,
            peer_addr,
            Arc::new(ServerSink(handler)),
            max_frame_size,
            max_processors,
            PROCESSOR_DRAIN_WAIT,
            asynchronous,
            Arc::downgrade(&self.inner.sockets),
        );
        self.inner.sockets.insert(peer_addr, socket.clone());
        socket.start();
        debug!("Accepted a connection from {peer_addr}");
    }

    /// Stops the server: closes the listener (unblocking the accept loop),
    /// waits up to the configured wait time for it to wind down, then
    /// disconnects every socket. Stopping a stopped server is a no-op; after
    /// `stop` returns, no further callbacks fire.
    pub async fn stop(&self) {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() != ServerState::Started {
            return;
        }
        *self.inner.state.lock() = ServerState::Stopping;

        let handle = self.inner.accept_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let wait = self.inner.config.read().wait_time;
            let _ = wait_opt(wait, handle).await;
        }

        self.shutdown_all().await;

        *self.inner.local_addr.write() = None;
        *self.inner.state.lock() = ServerState::Stopped;
        info!("The server has stopped");
    }

    /// Disconnects every connected socket, firing each socket's
    /// `on_disconnect` exactly once and waiting (bounded by the configured
    /// wait time) for its receive task to exit. The listener keeps
    /// accepting.
    pub async fn shutdown_all(&self) {
        let wait = self.inner.config.read().wait_time;
        // Drain under the lock, then tear down outside it: no user code
        // runs while the registry is locked.
        for socket in self.inner.sockets.drain() {
            let recv_task = socket.take_recv_task();
            socket.terminate().await;
            if let Some(handle) = recv_task {
                let _ = wait_opt(wait, handle).await;
            }
        }
    }

    /// Sends one packet to every connected socket, reporting each outcome
    /// through `on_sent`. Every send is bounded, so one stalled peer cannot
    /// hang delivery to the rest of the sweep.
    pub async fn broadcast(&self, packet: Packet) {
        let wait = Some(self.inner.config.read().wait_time.unwrap_or(BROADCAST_SEND_WAIT));
        for socket in self.inner.sockets.snapshot() {
            let (_, status) = socket.send_timeout(packet.clone(), wait).await;
            socket.notify_sent(status).await;
        }
    }

    /// Returns `true` while the server is accepting connections.
    pub fn is_started(&self) -> bool {
        *self.inner.state.lock() == ServerState::Started
    }

    /// The address the server is listening at, while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read()
    }

    /// The number of connected sockets.
    pub fn num_connected(&self) -> usize {
        self.inner.sockets.len()
    }

    /// A snapshot of the connected sockets, in accept order.
    pub fn sockets(&self) -> Vec<TcpSocket> {
        self.inner.sockets.snapshot()
    }

    /// Looks a socket up by its peer address.
    pub fn find_socket(&self, peer_addr: SocketAddr) -> Option<TcpSocket> {
        self.inner.sockets.get(peer_addr)
    }

    /// The maximum number of concurrent connections; 0 means unbounded.
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

    /// The per-socket processor cap; 0 means unbounded.
    pub fn max_processors(&self) -> usize {
        self.inner.config.read().max_processors
    }

    /// Reconfigures the processor cap; sockets accepted from here on use it.
    pub fn set_max_processors(&self, max_processors: usize) {
        self.inner.config.write().max_processors = max_processors;
    }

    /// Whether accepted sockets deliver packets through the handler.
    pub fn is_asynchronous(&self) -> bool {
        self.inner.config.read().asynchronous_receive
    }

    /// Flips the receive mode; sockets accepted from here on use it.
    pub fn set_asynchronous(&self, asynchronous: bool) {
        self.inner.config.write().asynchronous_receive = asynchronous;
    }

    /// Swaps the handler; sockets accepted from here on use the new one.
    pub fn set_handler(&self, handler: Arc<dyn ServerHandler>) {
        *self.inner.handler.write() = handler;
    }
}
