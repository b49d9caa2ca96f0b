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
    udp::{UdpClient, UdpServer},
    Packet, RecvStatus, SendStatus, ServerConfig, MAX_DATAGRAM_SIZE,
};

use deadline::deadline;
use std::time::Duration;
use tokio::net::UdpSocket;

#[tokio::test(flavor = "multi_thread")]
async fn datagrams_are_demultiplexed_per_peer() {
    init_tracing();
    let handler = TestHandler::new();
    let server = UdpServer::new(handler.clone(), test_server_config());
    let addr = server.start().await.unwrap();

    let peer_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer_a.send_to(b"from-a", loopback(addr)).await.unwrap();
    peer_b.send_to(b"from-b", loopback(addr)).await.unwrap();

    // One admission and one delivery per peer, each on its own session.
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_received() == 2);
    assert_eq!(handler.num_accepted(), 2);
    assert_eq!(server.num_connected(), 2);

    let mut expected = vec![
        (peer_a.local_addr().unwrap(), b"from-a".to_vec()),
        (peer_b.local_addr().unwrap(), b"from-b".to_vec()),
    ];
    let mut delivered: Vec<_> =
        handler.peers().into_iter().zip(handler.packets()).collect();
    delivered.sort();
    expected.sort();
    assert_eq!(delivered, expected);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_zero_length_datagram_pings_a_live_session_only() {
    let handler = TestHandler::new();
    let server = UdpServer::new(handler.clone(), test_server_config());
    let addr = server.start().await.unwrap();

    let known = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    known.send_to(b"hi", loopback(addr)).await.unwrap();
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_received() == 1);

    // To a live session an empty datagram is delivered as an empty packet.
    known.send_to(&[], loopback(addr)).await.unwrap();
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_received() == 2);
    assert_eq!(handler.packets()[1], Vec::<u8>::new());
    assert_eq!(handler.num_accepted(), 1);

    // From an unknown peer it is dropped before admission.
    let unknown = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    unknown.send_to(&[], loopback(addr)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.num_accepted(), 1);
    assert_eq!(server.num_connected(), 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn the_session_cap_drops_unknown_peers_silently() {
    let handler = TestHandler::new();
    let config = ServerConfig { max_connections: 1, ..test_server_config() };
    let server = UdpServer::new(handler.clone(), config);
    let addr = server.start().await.unwrap();

    let peer_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer_a.send_to(b"first", loopback(addr)).await.unwrap();
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_received() == 1);

    // No admission and no delivery for the peer over the cap.
    let peer_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer_b.send_to(b"second", loopback(addr)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.num_accepted(), 1);
    assert_eq!(handler.num_received(), 1);
    assert_eq!(server.num_connected(), 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn an_idle_session_is_evicted_after_the_timeout() {
    let handler = TestHandler::new();
    let config = ServerConfig {
        idle_timeout: Some(Duration::from_millis(100)),
        ..test_server_config()
    };
    let server = UdpServer::new(handler.clone(), config);
    let addr = server.start().await.unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"hello", loopback(addr)).await.unwrap();
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_received() == 1);

    // The worker's dequeue expires and the session removes itself.
    let handler_ = handler.clone();
    deadline!(Duration::from_secs(3), move || handler_.num_disconnected() == 1);
    let server_ = server.clone();
    deadline!(Duration::from_secs(3), move || server_.num_connected() == 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_client_round_trips_through_an_echoing_session() {
    init_tracing();
    let server_handler = TestHandler::echoing();
    let server = UdpServer::new(server_handler.clone(), test_server_config());
    let addr = server.start().await.unwrap();

    let client_handler = TestHandler::new();
    let client = UdpClient::new(client_handler.clone(), test_client_config(addr.port()));
    client.connect().await.unwrap();
    assert!(client.is_connection_alive());
    assert_eq!(client.max_packet_size(), MAX_DATAGRAM_SIZE);

    let (written, status) = client.send(Packet::copy_from_slice(b"marco")).await;
    assert_eq!(status, SendStatus::Success);
    assert_eq!(written, 5);

    let client_handler_ = client_handler.clone();
    deadline!(Duration::from_secs(3), move || client_handler_.num_received() == 1);
    assert_eq!(client_handler.packets(), vec![b"marco".to_vec()]);

    client.disconnect().await;
    assert_eq!(client_handler.num_disconnected(), 1);
    assert!(!client.is_connection_alive());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_synchronous_server_lets_the_caller_pull_datagrams() {
    let handler = TestHandler::new();
    let config = ServerConfig { asynchronous_receive: false, ..test_server_config() };
    let server = UdpServer::new(handler.clone(), config);
    let addr = server.start().await.unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"syn", loopback(addr)).await.unwrap();

    let server_ = server.clone();
    deadline!(Duration::from_secs(3), move || server_.num_connected() == 1);
    let session = server.find_session(peer.local_addr().unwrap()).unwrap();

    let (packet, status) = session.recv(Some(Duration::from_secs(1))).await;
    assert_eq!(status, RecvStatus::Success);
    assert_eq!(packet.unwrap().as_bytes(), b"syn");

    let (packet, status) = session.recv(Some(Duration::from_millis(50))).await;
    assert_eq!(status, RecvStatus::TimedOut);
    assert!(packet.is_none());

    // Without a worker there is no idle eviction; the session lives until
    // the server stops it.
    assert!(session.is_alive());
    server.stop().await;
    assert_eq!(handler.num_disconnected(), 1);
    assert!(!session.is_alive());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_synchronous_client_pulls_the_echo_itself() {
    let server = UdpServer::new(TestHandler::echoing(), test_server_config());
    let addr = server.start().await.unwrap();

    let mut config = test_client_config(addr.port());
    config.asynchronous_receive = false;
    let client = UdpClient::new(TestHandler::new(), config);
    client.connect().await.unwrap();

    let (_, status) = client.send(Packet::copy_from_slice(b"polo")).await;
    assert_eq!(status, SendStatus::Success);

    let (packet, status) = client.recv(Some(Duration::from_secs(3))).await;
    assert_eq!(status, RecvStatus::Success);
    assert_eq!(packet.unwrap().as_bytes(), b"polo");

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_datagrams_are_refused_locally() {
    let server = UdpServer::new(TestHandler::new(), test_server_config());
    let addr = server.start().await.unwrap();

    let client = UdpClient::new(TestHandler::new(), test_client_config(addr.port()));
    client.connect().await.unwrap();

    let oversized = Packet::from(vec![0u8; MAX_DATAGRAM_SIZE + 1]);
    let (written, status) = client.send(oversized).await;
    assert_eq!(status, SendStatus::SendFailed);
    assert_eq!(written, 0);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn caller_driven_receive_is_refused_in_asynchronous_mode() {
    let server = UdpServer::new(TestHandler::new(), test_server_config());
    let addr = server.start().await.unwrap();

    let client = UdpClient::new(TestHandler::new(), test_client_config(addr.port()));
    client.connect().await.unwrap();

    let (_, status) = client.recv(Some(Duration::from_millis(10))).await;
    assert_eq!(status, RecvStatus::NotSupported);

    client.disconnect().await;
    server.stop().await;
}
