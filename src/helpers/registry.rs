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

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::net::SocketAddr;

/// The set of live connections a server owns, keyed by the full peer
/// address (family included, so UDP demultiplexing is IPv6-correct).
///
/// The lock is only ever held for the map operation itself; callers that
/// need to run user code against the members (shutdown-all, broadcast) take
/// a [`snapshot`](Self::snapshot) first.
pub(crate) struct Registry<T> {
    entries: RwLock<IndexMap<SocketAddr, T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(IndexMap::new()) }
    }

    /// Registers a connection, returning any previous entry for the peer.
    pub fn insert(&self, addr: SocketAddr, conn: T) -> Option<T> {
        self.entries.write().insert(addr, conn)
    }

    /// Removes a connection; a no-op if the peer already self-removed.
    pub fn remove(&self, addr: SocketAddr) -> Option<T> {
        self.entries.write().shift_remove(&addr)
    }

    pub fn get(&self, addr: SocketAddr) -> Option<T> {
        self.entries.read().get(&addr).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// The current members, in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.read().values().cloned().collect()
    }

    /// Empties the registry, handing the members back to the caller.
    pub fn drain(&self) -> Vec<T> {
        self.entries.write().drain(..).map(|(_, conn)| conn).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn members_are_keyed_by_peer_address() {
        let registry = Registry::new();
        assert!(registry.insert(addr(1000), "a").is_none());
        assert!(registry.insert(addr(2000), "b").is_none());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(addr(1000)), Some("a"));
        assert_eq!(registry.remove(addr(1000)), Some("a"));
        assert_eq!(registry.remove(addr(1000)), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let registry = Registry::new();
        for port in [3000, 1000, 2000] {
            registry.insert(addr(port), port);
        }
        assert_eq!(registry.snapshot(), vec![3000, 1000, 2000]);
        assert_eq!(registry.drain().len(), 3);
        assert_eq!(registry.len(), 0);
    }
}
