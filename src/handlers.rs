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

use crate::{Packet, RecvStatus, SendStatus};

use std::{net::SocketAddr, sync::Arc, time::Duration};

/// A handle to one live connection: a TCP socket or a UDP virtual session.
///
/// Handles are shared-owned; a handler may clone the [`Conn`] it is given and
/// keep it past the callback's return, and the connection object stays valid
/// even after the server that accepted it has stopped. Sends on one
/// connection are serialized by its send lock.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The address of the remote peer.
    fn remote_addr(&self) -> SocketAddr;

    /// Returns `true` until the connection has begun tearing down.
    fn is_alive(&self) -> bool;

    /// Sends one packet, waiting at most `timeout` for the socket to become
    /// writable (`None` waits indefinitely). Returns the number of body
    /// bytes written and the send status; the length prefix is not counted.
    async fn send_timeout(&self, packet: Packet, timeout: Option<Duration>) -> (usize, SendStatus);

    /// Sends one packet with an indefinite writability wait.
    async fn send(&self, packet: Packet) -> (usize, SendStatus) {
        self.send_timeout(packet, None).await
    }

    /// Tears the connection down: fires `on_disconnect` exactly once, closes
    /// the handle, and removes the connection from its owner's registry.
    async fn disconnect(&self);
}

/// A shared connection handle, as delivered to callbacks.
pub type Conn = Arc<dyn Connection>;

/// The callback surface of a server.
///
/// `on_accept` is invoked synchronously on the accept loop, so a slow
/// implementation delays further accepts. For every accepted connection,
/// `on_disconnect` fires exactly once; `on_received` is never invoked after
/// it.
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Gates admission of a new peer. Returning `false` drops the
    /// connection (TCP) or the datagram (UDP) without further callbacks.
    async fn on_accept(&self, peer_addr: SocketAddr) -> bool {
        let _ = peer_addr;
        true
    }

    /// Delivers one received packet. Packets from a single connection are
    /// delivered in receive order.
    async fn on_received(&self, conn: Conn, packet: Packet, status: RecvStatus);

    /// Reports the outcome of a framework-driven send (e.g. a broadcast).
    async fn on_sent(&self, conn: Conn, status: SendStatus) {
        let _ = (conn, status);
    }

    /// The connection has been torn down.
    async fn on_disconnect(&self, conn: Conn) {
        let _ = conn;
    }
}

/// The callback surface of a client.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// Delivers one received packet.
    async fn on_received(&self, client: Conn, packet: Packet, status: RecvStatus);

    /// Reports the outcome of a framework-driven send.
    async fn on_sent(&self, client: Conn, status: SendStatus) {
        let _ = (client, status);
    }

    /// The connection to the server is gone.
    async fn on_disconnect(&self, client: Conn) {
        let _ = client;
    }
}

/// The internal delivery seam shared by server sockets and clients, so one
/// socket implementation can report to either handler type.
#[async_trait]
pub(crate) trait PacketSink: Send + Sync + 'static {
    async fn deliver(&self, conn: Conn, packet: Packet, status: RecvStatus);

    async fn sent(&self, conn: Conn, status: SendStatus);

    async fn closed(&self, conn: Conn);
}

pub(crate) struct ServerSink(pub Arc<dyn ServerHandler>);

#[async_trait]
impl PacketSink for ServerSink {
    async fn deliver(&self, conn: Conn, packet: Packet, status: RecvStatus) {
        self.0.on_received(conn, packet, status).await;
    }

    async fn sent(&self, conn: Conn, status: SendStatus) {
        self.0.on_sent(conn, status).await;
    }

    async fn closed(&self, conn: Conn) {
        self.0.on_disconnect(conn).await;
    }
}

pub(crate) struct ClientSink(pub Arc<dyn ClientHandler>);

#[async_trait]
impl PacketSink for ClientSink {
    async fn deliver(&self, conn: Conn, packet: Packet, status: RecvStatus) {
        self.0.on_received(conn, packet, status).await;
    }

    async fn sent(&self, conn: Conn, status: SendStatus) {
        self.0.on_sent(conn, status).await;
    }

    async fn closed(&self, conn: Conn) {
        self.0.on_disconnect(conn).await;
    }
}
