//! crates/daemon/src/connection_pool.rs
//!
//! Live connection table shared by a listener and its handler tasks.
//!
//! Each listener owns one pool. Entries are added when a connection is
//! accepted and removed when its handler task ends, whether it finished
//! normally, failed, or panicked.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

/// Which protocol a connection speaks.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConnectionKind {
    /// Resumable upload port.
    Transfer,
    /// Ping/pong liveness port.
    Heartbeat,
}

impl ConnectionKind {
    /// Lower-case name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a connection within one pool.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata about an active connection.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Remote peer address.
    pub peer_addr: SocketAddr,
    /// Protocol spoken on the connection.
    pub kind: ConnectionKind,
    /// Time when the connection was accepted.
    pub connected_at: Instant,
}

/// Thread-safe table of live connections.
#[derive(Debug)]
pub struct ConnectionPool {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    next_id: AtomicU64,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection and returns its unique identifier.
    pub fn register(&self, peer_addr: SocketAddr, kind: ConnectionKind) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = ConnectionInfo {
            id,
            peer_addr: normalize_peer_address(peer_addr),
            kind,
            connected_at: Instant::now(),
        };
        self.connections.insert(id, info);
        id
    }

    /// Registers a connection and returns a guard that unregisters it on drop.
    pub fn track(self: &Arc<Self>, peer_addr: SocketAddr, kind: ConnectionKind) -> ConnectionGuard {
        let id = self.register(peer_addr, kind);
        ConnectionGuard {
            pool: Arc::clone(self),
            id,
        }
    }

    /// Unregisters a connection from the pool.
    ///
    /// Returns the connection info if it existed.
    pub fn unregister(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.remove(id).map(|(_, info)| info)
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns a snapshot of all live connections ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        connections.sort_by_key(|info| info.id);
        connections
    }
}

/// Keeps one connection registered for as long as it is alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    pool: Arc<ConnectionPool>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.pool.unregister(&self.id);
    }
}

/// Maps IPv4-mapped IPv6 peers back to plain IPv4.
pub(crate) fn normalize_peer_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                SocketAddr::new(IpAddr::V4(v4), addr.port())
            } else {
                addr
            }
        }
        IpAddr::V4(_) => addr,
    }
}
