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

//! A TCP/UDP server and client stack.
//!
//! TCP traffic is framed as a 4-byte little-endian length prefix followed by
//! that many body bytes. UDP traffic is one packet per datagram, with the
//! server demultiplexing datagrams into per-peer virtual sessions. Both
//! transports come in a caller-driven ("synchronous") flavor, where the user
//! pulls packets with [`recv`](tcp::TcpSocket::recv), and a framework-driven
//! ("asynchronous") flavor, where packets are delivered to a
//! [`ServerHandler`]/[`ClientHandler`] by a bounded per-socket processor
//! pool.

#![forbid(unsafe_code)]
#![allow(clippy::type_complexity)]

#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate tracing;

pub mod helpers;
pub use helpers::{ClientConfig, FrameCodec, ServerConfig};

mod handlers;
pub use handlers::{ClientHandler, Conn, Connection, ServerHandler};

mod packet;
pub use packet::Packet;

mod status;
pub use status::{RecvStatus, SendStatus};

pub mod tcp;
pub mod udp;

/// The default port servers listen on and clients connect to.
pub const DEFAULT_PORT: &str = "8080";
/// The default hostname clients connect to.
pub const DEFAULT_HOSTNAME: &str = "localhost";
/// The largest frame body accepted off the wire unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = (1 << 31) - 1; // bytes
/// The largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507; // bytes
