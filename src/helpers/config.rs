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

use crate::{DEFAULT_HOSTNAME, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

use std::{io, time::Duration};

/// The default per-socket processor cap. One processor preserves strict
/// per-socket delivery order.
pub const DEFAULT_MAX_PROCESSORS: usize = 1; // processors

/// The options a server is started with.
///
/// `wait_time` of `None` waits indefinitely; a count of `0` means unbounded
/// wherever a maximum is configured.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// The port to listen on, validated against the 16-bit range at start.
    pub port: String,
    /// The maximum interval to wait for background tasks to wind down.
    pub wait_time: Option<Duration>,
    /// Whether received packets are delivered via `on_received` (`true`) or
    /// pulled by the caller via `recv` (`false`).
    pub asynchronous_receive: bool,
    /// The maximum number of concurrent connections; 0 means unbounded.
    pub max_connections: usize,
    /// The per-socket processor cap; 0 means unbounded.
    pub max_processors: usize,
    /// The largest TCP frame body accepted off the wire.
    pub max_frame_size: usize,
    /// How long a UDP virtual session may sit idle before it is evicted.
    /// `None` falls back to `wait_time`.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.into(),
            wait_time: None,
            asynchronous_receive: true,
            max_connections: 0,
            max_processors: DEFAULT_MAX_PROCESSORS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            idle_timeout: None,
        }
    }
}

/// The options a client connects with.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The hostname of the server.
    pub host: String,
    /// The port of the server, validated against the 16-bit range.
    pub port: String,
    /// The maximum interval to wait when connecting and winding down.
    pub wait_time: Option<Duration>,
    /// Whether received packets are delivered via `on_received` (`true`) or
    /// pulled by the caller via `recv` (`false`).
    pub asynchronous_receive: bool,
    /// The processor cap for framework-driven delivery; 0 means unbounded.
    pub max_processors: usize,
    /// The largest TCP frame body accepted off the wire.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOSTNAME.into(),
            port: DEFAULT_PORT.into(),
            wait_time: None,
            asynchronous_receive: true,
            max_processors: DEFAULT_MAX_PROCESSORS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Validates a configured port string; anything outside the 16-bit range is
/// rejected here rather than passed through to the resolver.
pub(crate) fn parse_port(port: &str) -> io::Result<u16> {
    port.parse::<u16>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port '{port}'")))
}
