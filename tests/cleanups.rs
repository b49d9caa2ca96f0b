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

mod common;
use common::*;

use wirenet::{
    tcp::{TcpClient, TcpServer},
    udp::UdpServer,
    Packet, SendStatus, ServerConfig,
};

use deadline::deadline;
use std::time::Duration;
use tokio::net::UdpSocket;

// This value doesn't need to be large, but repeated cycles are the point:
// every connection must leave the server's bookkeeping empty behind it.
const NUM_CONNS: usize = 20;

#[tokio::test(flavor = "multi_thread")]
async fn repeated_tcp_connections_leave_no_residue() {
    init_tracing();
    let handler = TestHandler::echoing();
    let server = TcpServer::new(handler.clone(), test_server_config());
    let addr = server.start().await.unwrap();

    for i in 0..NUM_CONNS {
        let client_handler = TestHandler::new();
        let client = TcpClient::new(client_handler.clone(), test_client_config(addr.port()));
        client.connect().await.unwrap();

        let (_, status) = client.send(Packet::copy_from_slice(b"cycle")).await;
        assert_eq!(status, SendStatus::Success);
        let client_handler_ = client_handler.clone();
        deadline!(Duration::from_secs(3), move || client_handler_.num_received() == 1);

        client.disconnect().await;
        assert_eq!(client_handler.num_disconnected(), 1);

        // The registry empties between cycles.
        let server_ = server.clone();
        deadline!(Duration::from_secs(3), move || server_.num_connected() == 0);
        assert_eq!(handler.num_accepted(), i + 1);
    }

    // One disconnect per accept, across every cycle.
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_disconnected() == NUM_CONNS);
    assert_eq!(handler.num_accepted(), NUM_CONNS);
    assert_eq!(handler.num_received(), NUM_CONNS);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn evicted_udp_sessions_leave_no_residue() {
    init_tracing();
    let handler = TestHandler::new();
    let config = ServerConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        ..test_server_config()
    };
    let server = UdpServer::new(handler.clone(), config);
    let addr = server.start().await.unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for i in 0..NUM_CONNS {
        peer.send_to(b"knock", loopback(addr)).await.unwrap();
        let handler_ = handler.clone();
        deadline!(Duration::from_secs(3), move || handler_.num_received() == i + 1);

        // Each eviction removes the session, so the same peer is re-admitted
        // on its next datagram.
        let handler_ = handler.clone();
        deadline!(Duration::from_secs(3), move || handler_.num_disconnected() == i + 1);
        let server_ = server.clone();
        deadline!(Duration::from_secs(3), move || server_.num_connected() == 0);
    }

    assert_eq!(handler.num_accepted(), NUM_CONNS);
    assert_eq!(handler.num_disconnected(), NUM_CONNS);

    server.stop().await;
}
