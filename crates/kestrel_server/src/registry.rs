//! Connection and channel bookkeeping.
//!
//! The per-connection [`ChannelTable`] tracks which channel ids are
//! occupied; the server-wide [`ConnectionRegistry`] bounds concurrent
//! connections and records peer addresses for diagnostics.

use std::collections::HashSet;
use std::net::SocketAddr;

use kestrel_common::types::ConnId;
use kestrel_proto::ProtocolError;

/// Per-connection channel occupancy, bounded by `max_channels`.
pub struct ChannelTable {
    occupied: HashSet<u32>,
    max_channels: u32,
}

impl ChannelTable {
    pub fn new(max_channels: u32) -> Self {
        Self {
            occupied: HashSet::new(),
            max_channels,
        }
    }

    /// Resolve a channel id, occupying the slot on first sight. Returns
    /// `true` when this is the first frame seen on the channel. An
    /// out-of-range id is a fatal protocol violation.
    pub fn admit(&mut self, chan: u32) -> Result<bool, ProtocolError> {
        if chan >= self.max_channels {
            return Err(ProtocolError::ChannelOutOfRange {
                chan,
                max: self.max_channels,
            });
        }
        Ok(self.occupied.insert(chan))
    }

    /// Clear a slot after a channel-level disconnect.
    pub fn release(&mut self, chan: u32) {
        self.occupied.remove(&chan);
    }

    /// Take every occupied slot, for connection teardown.
    pub fn drain(&mut self) -> Vec<u32> {
        self.occupied.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.is_empty()
    }
}

/// Thread-safe registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    conns: dashmap::DashMap<ConnId, SocketAddr>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            conns: dashmap::DashMap::new(),
            max_connections,
        }
    }

    /// Register a new connection. Returns false when at capacity.
    pub fn register(&self, id: ConnId, peer: SocketAddr) -> bool {
        if self.conns.len() >= self.max_connections {
            return false;
        }
        self.conns.insert(id, peer);
        true
    }

    pub fn remove(&self, id: ConnId) {
        self.conns.remove(&id);
    }

    pub fn count(&self) -> usize {
        self.conns.len()
    }

    pub fn peer(&self, id: ConnId) -> Option<SocketAddr> {
        self.conns.get(&id).map(|e| *e.value())
    }
}
