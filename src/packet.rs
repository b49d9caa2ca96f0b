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

use bytes::Bytes;

/// An owned, immutable packet body.
///
/// Cloning a `Packet` bumps a reference count rather than copying the bytes,
/// so one packet may be shared between the delivery pipeline and any handler
/// that decides to retain it. A zero-length packet is legal: over TCP it is
/// the `00 00 00 00` frame, over UDP an empty datagram.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet(Bytes);

impl Packet {
    /// Creates a packet by copying the given bytes.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    /// Creates an empty packet.
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    /// The packet body length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the packet body is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The packet body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the packet, returning the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Packet {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Packet {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Packet {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from_slice(bytes)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
