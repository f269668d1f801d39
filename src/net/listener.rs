//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the backend's resolved address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Enforce an optional per-peer connection cap

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::AddressSpec;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),
    /// The connection limiter was closed.
    #[error("Connection limiter closed")]
    Closed,
}

impl From<ListenerError> for io::Error {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::Bind(e) | ListenerError::Accept(e) => e,
            ListenerError::Closed => io::Error::other("connection limiter closed"),
        }
    }
}

/// Connection limits applied by a `Listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_per_peer: Option<usize>,
}

impl ConnectionLimits {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            max_per_peer: None,
        }
    }

    pub fn with_max_per_peer(mut self, max: usize) -> Self {
        self.max_per_peer = Some(max);
        self
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Open connections per peer IP.
    per_peer: Arc<DashMap<IpAddr, usize>>,
    limits: ConnectionLimits,
}

/// Outcome of one `Listener::accept`.
#[derive(Debug)]
pub enum Admission {
    /// Connection admitted; the permit must be held for its lifetime.
    Admitted(Accepted),
    /// Peer is over its connection cap.
    Refused { stream: TcpStream, peer: SocketAddr },
}

/// An admitted connection.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: ConnectionPermit,
}

impl Listener {
    /// Bind to the given address with connection limits.
    pub async fn bind(address: &AddressSpec, limits: ConnectionLimits) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind((address.host.as_str(), address.port))
            .await
            .map_err(ListenerError::Bind)?;

        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::debug!(
            address = %local_addr,
            max_connections = limits.max_connections,
            max_per_peer = ?limits.max_per_peer,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(limits.max_connections)),
            per_peer: Arc::new(DashMap::new()),
            limits,
        })
    }

    /// Accept a new connection, respecting the connection limits.
    ///
    /// This will wait if the global limit has been reached. Cancel-safe.
    pub async fn accept(&self) -> Result<Admission, ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        let peer_slot = match self.limits.max_per_peer {
            Some(max) => match PeerSlot::try_acquire(&self.per_peer, peer.ip(), max) {
                Some(slot) => Some(slot),
                None => {
                    tracing::debug!(peer_addr = %peer, max_per_peer = max, "Connection refused");
                    return Ok(Admission::Refused { stream, peer });
                }
            },
            None => None,
        };

        tracing::debug!(
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(Admission::Admitted(Accepted {
            stream,
            peer,
            permit: ConnectionPermit {
                _permit: permit,
                _peer: peer_slot,
            },
        }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
    _peer: Option<PeerSlot>,
}

/// One counted connection for a peer IP.
#[derive(Debug)]
struct PeerSlot {
    counts: Arc<DashMap<IpAddr, usize>>,
    ip: IpAddr,
}

impl PeerSlot {
    fn try_acquire(counts: &Arc<DashMap<IpAddr, usize>>, ip: IpAddr, max: usize) -> Option<Self> {
        let mut count = counts.entry(ip).or_insert(0);
        if *count >= max {
            return None;
        }
        *count += 1;
        Some(Self {
            counts: Arc::clone(counts),
            ip,
        })
    }
}

impl Drop for PeerSlot {
    fn drop(&mut self) {
        if let Entry::Occupied(mut occupied) = self.counts.entry(self.ip) {
            let count = occupied.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                occupied.remove();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn per_peer_cap_refuses_excess() {
        let limits = ConnectionLimits::new(8).with_max_per_peer(1);
        let listener = Listener::bind(&AddressSpec::new("127.0.0.1", 0), limits)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let first = listener.accept().await.unwrap();
        assert!(matches!(first, Admission::Admitted(_)));

        let _c2 = TcpStream::connect(addr).await.unwrap();
        let second = listener.accept().await.unwrap();
        assert!(matches!(second, Admission::Refused { .. }));

        drop(first);
        let _c3 = TcpStream::connect(addr).await.unwrap();
        let third = listener.accept().await.unwrap();
        assert!(matches!(third, Admission::Admitted(_)));
    }

    #[tokio::test]
    async fn permits_track_open_connections() {
        let listener = Listener::bind(&AddressSpec::new("127.0.0.1", 0), ConnectionLimits::new(2))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(listener.available_permits(), 2);

        let _client = TcpStream::connect(addr).await.unwrap();
        let accepted = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(accepted);
        assert_eq!(listener.available_permits(), 2);
    }

    #[tokio::test]
    async fn bind_conflict_is_bind_error() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        let result = Listener::bind(&AddressSpec::new("127.0.0.1", port), ConnectionLimits::new(1)).await;
        assert!(matches!(result, Err(ListenerError::Bind(_))));
    }
}
