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
    handlers::ClientSink,
    helpers::{dispatch::PROCESSOR_DRAIN_WAIT, parse_port, wait_opt, ClientState},
    tcp::TcpSocket,
    ClientConfig, ClientHandler, Packet, RecvStatus, SendStatus,
};

use parking_lot::{Mutex, RwLock};
use std::{io, net::SocketAddr, sync::{Arc, Weak}, time::Duration};
use tokio::net::TcpStream;

/// A TCP client for one connection to a server.
///
/// `connect` resolves the configured hostname, establishes the connection
/// and, in asynchronous mode, starts the framed receive loop; `disconnect`
/// shuts the socket down for sending, waits (boundedly) for the receive loop
/// to exit, and fires `on_disconnect` exactly once. Cloning the client
/// clones a handle to the same instance.
#[derive(Clone)]
pub struct TcpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: RwLock<ClientConfig>,
    handler: RwLock<Arc<dyn ClientHandler>>,
    state: Mutex<ClientState>,
    /// Serializes connect/disconnect; never held across a callback.
    op_lock: tokio::sync::Mutex<()>,
    socket: RwLock<Option<TcpSocket>>,
}

impl TcpClient {
    /// Creates a disconnected client.
    pub fn new(handler: Arc<dyn ClientHandler>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                handler: RwLock::new(handler),
                state: Mutex::new(ClientState::Disconnected),
                op_lock: Default::default(),
                socket: Default::default(),
            }),
        }
    }

    /// Connects to the configured server. Connecting while connected is a
    /// no-op; on failure every acquired resource is released and the client
    /// is left disconnected.
    pub async fn connect(&self) -> io::Result<()> {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() == ClientState::Connected {
            return Ok(());
        }
        *self.inner.state.lock() = ClientState::Connecting;

        match self.establish().await {
            Ok(socket) => {
                *self.inner.socket.write() = Some(socket.clone());
                *self.inner.state.lock() = ClientState::Connected;
                socket.start();
                info!("Connected to {}", socket.peer_addr());
                Ok(())
            }
            Err(error) => {
                *self.inner.state.lock() = ClientState::Disconnected;
                Err(error)
            }
        }
    }

    async fn establish(&self) -> io::Result<TcpSocket> {
        let config = self.inner.config.read().clone();
        let port = parse_port(&config.port)?;

        // A single hostname/port lookup; the first resolved address wins.
        let mut addrs = tokio::net::lookup_host((config.host.as_str(), port)).await?;
        let addr = addrs.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("failed to resolve '{}'", config.host))
        })?;

        let stream = wait_opt(config.wait_time, TcpStream::connect(addr))
            .await
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::TimedOut, format!("connecting to {addr} timed out"))
            })??;
        stream.set_nodelay(true)?;

        let handler = self.inner.handler.read().clone();
        Ok(TcpSocket::new(
            stream,
            addr,
            Arc::new(ClientSink(handler)),
            config.max_frame_size,
            config.max_processors,
            PROCESSOR_DRAIN_WAIT,
            config.asynchronous_receive,
            Weak::new(),
        ))
    }

    /// Disconnects from the server: stops the receive loop (bounded by the
    /// configured wait time), fires `on_disconnect` exactly once, and closes
    /// the handle. Disconnecting while disconnected is a no-op.
    pub async fn disconnect(&self) {
        let _op = self.inner.op_lock.lock().await;
        if *self.inner.state.lock() != ClientState::Connected {
            return;
        }
        *self.inner.state.lock() = ClientState::Disconnecting;

        let socket = self.inner.socket.write().take();
        if let Some(socket) = socket {
            socket.request_close();
            if let Some(handle) = socket.take_recv_task() {
                let wait = self.inner.config.read().wait_time;
                // A join past the wait time leaves the task detached; the
                // handle is already shut down.
                let _ = wait_opt(wait, handle).await;
            }
            socket.terminate().await;
        }

        *self.inner.state.lock() = ClientState::Disconnected;
    }

    /// Sends one packet, waiting at most `timeout` for writability.
    pub async fn send_timeout(&self, packet: Packet, timeout: Option<Duration>) -> (usize, SendStatus) {
        match self.socket() {
            Some(socket) => socket.send_timeout(packet, timeout).await,
            None => (0, SendStatus::NotConnected),
        }
    }

    /// Sends one packet with an indefinite writability wait.
    pub async fn send(&self, packet: Packet) -> (usize, SendStatus) {
        self.send_timeout(packet, None).await
    }

    /// Pulls one packet off the connection (synchronous mode only).
    pub async fn recv(&self, wait: Option<Duration>) -> (Option<Packet>, RecvStatus) {
        match self.socket() {
            Some(socket) => socket.recv(wait).await,
            None => (None, RecvStatus::NotConnected),
        }
    }

    /// Returns `true` while the connection is up. Safe to call concurrently
    /// with `disconnect`.
    pub fn is_connection_alive(&self) -> bool {
        self.socket().map_or(false, |socket| socket.is_alive())
    }

    /// The address of the connected server, while connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket().map(|socket| socket.peer_addr())
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

    /// Whether received packets are delivered through the handler.
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

    fn socket(&self) -> Option<TcpSocket> {
        self.inner.socket.read().clone()
    }
}
