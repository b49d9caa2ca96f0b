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

mod codec;
pub use codec::FrameCodec;

mod config;
pub use config::{ClientConfig, ServerConfig, DEFAULT_MAX_PROCESSORS};
pub(crate) use config::parse_port;

pub(crate) mod dispatch;
pub(crate) mod registry;

use std::{future::Future, time::Duration};

/// The lifecycle of a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ServerState {
    Stopped,
    Started,
    Stopping,
}

/// The lifecycle of a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// The writability bound applied to each send of a broadcast sweep when no
/// wait time is configured, so one stalled peer cannot hang delivery to the
/// rest.
pub(crate) const BROADCAST_SEND_WAIT: Duration = Duration::from_secs(5);

/// Runs a future under an optional deadline; `None` waits indefinitely and
/// a `None` result means the wait elapsed.
pub(crate) async fn wait_opt<F: Future>(wait: Option<Duration>, future: F) -> Option<F::Output> {
    match wait {
        Some(duration) => tokio::time::timeout(duration, future).await.ok(),
        None => Some(future.await),
    }
}
