//! Connection transport contract
//!
//! The session never blocks on the transport: every request returns
//! immediately and its outcome shows up later as a [`TransportEvent`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::net::protocol::PeerId;

/// Local handle of a data connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

/// Local handle of a voice call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Metadata attached to an outgoing data connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectMetadata {
    pub username: Option<String>,
}

impl ConnectMetadata {
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
        }
    }
}

/// Handle to an audio media stream (local capture or a remote peer's voice)
///
/// Clones share the same enable flag, so muting through any clone mutes the
/// stream everywhere it is attached.
#[derive(Debug, Clone)]
pub struct AudioStream {
    id: u64,
    enabled: Arc<AtomicBool>,
}

impl AudioStream {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl PartialEq for AudioStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AudioStream {}

/// Events delivered by the transport, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Identity is registered and usable
    Open { local_id: PeerId },
    /// Identity request failed (e.g. id already taken)
    IdentityRejected { reason: String },
    /// Lost the signaling layer; the identity is no longer usable
    Disconnected,
    /// A remote peer opened a data connection to us
    IncomingConnection {
        conn: ConnectionHandle,
        peer_id: PeerId,
        metadata: ConnectMetadata,
    },
    /// Data channel is ready for sending
    ConnectionOpen { conn: ConnectionHandle },
    /// Message received on a data channel
    Data {
        conn: ConnectionHandle,
        payload: Vec<u8>,
    },
    /// Data channel closed by the remote side or the network
    ConnectionClosed { conn: ConnectionHandle },
    /// A remote peer is calling us
    IncomingCall { call: CallHandle, peer_id: PeerId },
    /// The remote media stream of a call became available
    CallStream { call: CallHandle, stream: AudioStream },
    /// Call ended by the remote side
    CallClosed { call: CallHandle },
}

/// Transport failures reported synchronously
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("No transport identity")]
    NoIdentity,
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionHandle),
    #[error("Unknown call {0}")]
    UnknownCall(CallHandle),
}

/// Bidirectional peer messaging plus voice calls
pub trait Transport {
    /// Request an identity; `None` asks the transport to assign one.
    /// Completes with [`TransportEvent::Open`] or [`TransportEvent::IdentityRejected`].
    fn create_identity(&mut self, desired_id: Option<&PeerId>);

    /// Drop the identity and every connection and call it owns
    fn destroy_identity(&mut self);

    /// Open a data connection; completes with [`TransportEvent::ConnectionOpen`]
    fn connect(
        &mut self,
        remote_id: &PeerId,
        metadata: ConnectMetadata,
    ) -> Result<ConnectionHandle, TransportError>;

    /// Best-effort send of one encoded package
    fn send(&mut self, conn: ConnectionHandle, payload: Vec<u8>) -> Result<(), TransportError>;

    fn close(&mut self, conn: ConnectionHandle);

    /// Place a voice call carrying `stream`
    fn call(&mut self, remote_id: &PeerId, stream: &AudioStream) -> Result<CallHandle, TransportError>;

    /// Accept an incoming call, replying with `stream`
    fn answer(&mut self, call: CallHandle, stream: &AudioStream) -> Result<(), TransportError>;

    fn close_call(&mut self, call: CallHandle);

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
