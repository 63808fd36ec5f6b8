use std::time::{Duration, Instant};

use crate::net::protocol::PeerId;
use crate::net::transport::{ConnectMetadata, ConnectionHandle};

/// Data channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Requested, channel not ready yet
    Connecting,
    /// Channel ready for sends
    Open,
    /// Closed locally or by the remote side
    Closed,
}

/// One data connection to a remote peer
#[derive(Debug, Clone)]
pub struct PeerConnection {
    pub peer_id: PeerId,
    pub handle: ConnectionHandle,
    pub state: ConnectionState,
    pub metadata: ConnectMetadata,
    pub created_at: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

impl PeerConnection {
    pub fn new(peer_id: PeerId, handle: ConnectionHandle, metadata: ConnectMetadata) -> Self {
        Self {
            peer_id,
            handle,
            state: ConnectionState::Connecting,
            metadata,
            created_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
        }
    }

    /// Mark the channel as ready
    pub fn open(&mut self) {
        self.state = ConnectionState::Open;
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Record bytes sent
    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    /// Record bytes received
    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
    }

    /// Time since the connection was requested
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Display name the remote side announced, if any
    pub fn username(&self) -> Option<&str> {
        self.metadata.username.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection() -> PeerConnection {
        PeerConnection::new(
            PeerId::from("P1"),
            ConnectionHandle(1),
            ConnectMetadata::with_username("Alice"),
        )
    }

    #[test]
    fn test_connection_new() {
        let conn = test_connection();
        assert_eq!(conn.state, ConnectionState::Connecting);
        assert!(conn.age() < Duration::from_secs(5));
        assert!(!conn.is_open());
        assert_eq!(conn.username(), Some("Alice"));
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut conn = test_connection();

        conn.open();
        assert!(conn.is_open());

        conn.close();
        assert_eq!(conn.state, ConnectionState::Closed);
        assert!(!conn.is_open());
    }

    #[test]
    fn test_connection_stats() {
        let mut conn = test_connection();

        conn.record_sent(100);
        conn.record_sent(200);
        conn.record_received(50);

        assert_eq!(conn.bytes_sent, 300);
        assert_eq!(conn.bytes_received, 50);
        assert_eq!(conn.packets_sent, 2);
        assert_eq!(conn.packets_received, 1);
    }
}
