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

use std::fmt;

/// The outcome of a receive operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvStatus {
    /// A packet was received.
    Success,
    /// The wait time elapsed before a packet arrived.
    TimedOut,
    /// The socket is no longer alive.
    NotConnected,
    /// The peer closed the connection cleanly (between frames).
    ConnectionClosing,
    /// The socket failed at the readiness or framing layer.
    SocketError,
    /// A read failed mid-frame.
    RecvFailed,
    /// The socket does not support caller-driven receive.
    NotSupported,
}

impl RecvStatus {
    /// Returns `true` if the receive succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RecvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::TimedOut => write!(f, "timed out"),
            Self::NotConnected => write!(f, "not connected"),
            Self::ConnectionClosing => write!(f, "connection closing"),
            Self::SocketError => write!(f, "socket error"),
            Self::RecvFailed => write!(f, "receive failed"),
            Self::NotSupported => write!(f, "not supported"),
        }
    }
}

/// The outcome of a send operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// The whole packet was written.
    Success,
    /// The wait time elapsed before the socket became writable.
    TimedOut,
    /// The socket failed at the readiness layer.
    SocketError,
    /// A write failed before the whole packet was on the wire.
    SendFailed,
    /// The socket is no longer alive.
    NotConnected,
}

impl SendStatus {
    /// Returns `true` if the send succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::TimedOut => write!(f, "timed out"),
            Self::SocketError => write!(f, "socket error"),
            Self::SendFailed => write!(f, "send failed"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}
