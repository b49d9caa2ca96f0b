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

#![allow(dead_code)]

use wirenet::{
    ClientConfig, ClientHandler, Conn, Packet, RecvStatus, SendStatus, ServerConfig, ServerHandler,
};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    },
};

static TRACING: OnceCell<()> = OnceCell::new();

/// Enables log output for a test run when `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A handler that counts every callback and records received packets.
/// Optionally echoes each packet back, or refuses admission.
pub struct TestHandler {
    accepted: AtomicUsize,
    disconnected: AtomicUsize,
    sent: AtomicUsize,
    received: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    echo: bool,
    admit: bool,
}

impl TestHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::unwrapped())
    }

    pub fn echoing() -> Arc<Self> {
        Arc::new(Self { echo: true, ..Self::unwrapped() })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self { admit: false, ..Self::unwrapped() })
    }

    fn unwrapped() -> Self {
        Self {
            accepted: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            echo: false,
            admit: true,
        }
    }

    pub fn num_accepted(&self) -> usize {
        self.accepted.load(SeqCst)
    }

    pub fn num_disconnected(&self) -> usize {
        self.disconnected.load(SeqCst)
    }

    pub fn num_sent(&self) -> usize {
        self.sent.load(SeqCst)
    }

    pub fn num_received(&self) -> usize {
        self.received.lock().len()
    }

    /// The recorded packet bodies, in delivery order.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.received.lock().iter().map(|(_, body)| body.clone()).collect()
    }

    /// The peer addresses packets were delivered for, in delivery order.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.received.lock().iter().map(|(peer, _)| *peer).collect()
    }
}

#[async_trait]
impl ServerHandler for TestHandler {
    async fn on_accept(&self, _peer_addr: SocketAddr) -> bool {
        self.accepted.fetch_add(1, SeqCst);
        self.admit
    }

    async fn on_received(&self, conn: Conn, packet: Packet, _status: RecvStatus) {
        self.received.lock().push((conn.remote_addr(), packet.as_bytes().to_vec()));
        if self.echo {
            conn.send(packet).await;
        }
    }

    async fn on_sent(&self, _conn: Conn, _status: SendStatus) {
        self.sent.fetch_add(1, SeqCst);
    }

    async fn on_disconnect(&self, _conn: Conn) {
        self.disconnected.fetch_add(1, SeqCst);
    }
}

#[async_trait]
impl ClientHandler for TestHandler {
    async fn on_received(&self, client: Conn, packet: Packet, _status: RecvStatus) {
        self.received.lock().push((client.remote_addr(), packet.as_bytes().to_vec()));
    }

    async fn on_sent(&self, _client: Conn, _status: SendStatus) {
        self.sent.fetch_add(1, SeqCst);
    }

    async fn on_disconnect(&self, _client: Conn) {
        self.disconnected.fetch_add(1, SeqCst);
    }
}

/// A server configuration bound to an ephemeral port.
pub fn test_server_config() -> ServerConfig {
    ServerConfig { port: "0".into(), ..Default::default() }
}

/// The loopback view of a wildcard-bound listening address.
pub fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

/// A client configuration pointed at a local server port.
pub fn test_client_config(port: u16) -> ClientConfig {
    ClientConfig { host: "127.0.0.1".into(), port: port.to_string(), ..Default::default() }
}
