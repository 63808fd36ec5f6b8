//! Peer session manager
//!
//! Owns the role state, the data connections, the outbound package and the
//! peer to avatar mapping. Everything runs on the caller's thread: transport
//! outcomes are fed in through [`Session::handle_event`] (or drained with
//! [`Session::poll_transport`]) and the flush runs from [`Session::update`].

pub mod broadcast;
pub mod callbacks;
mod client;
mod host;
pub mod voice;


use hashbrown::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::avatar::roster::ActivePlayers;
use crate::avatar::{Avatar, AvatarAllocator};
use crate::config::SessionConfig;
use crate::metrics::SessionMetrics;
use crate::net::connection::PeerConnection;
use crate::net::protocol::{keys, CodecError, DataPackage, PeerId, PlayerTransforms};
use crate::net::transport::{AudioStream, CallHandle, Transport, TransportError, TransportEvent};

pub use broadcast::{BodyPart, PoseSource};
pub use callbacks::{CallbackId, CallbackRegistry};
pub use voice::ScheduledCalls;

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No avatar available for peer {0}")]
    AvatarUnavailable(PeerId),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// What the session currently is, with the connections that role owns
#[derive(Debug)]
pub enum Role {
    Idle,
    Hosting {
        connections: Vec<PeerConnection>,
    },
    Joining {
        server_id: PeerId,
        /// Set once the transport identity is open and the connect went out
        connection: Option<PeerConnection>,
    },
    Connected {
        connection: PeerConnection,
    },
}

/// Role without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Unassigned,
    Hosting,
    Joining,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Host,
    Join,
}

/// Transport identity requested by this session
#[derive(Debug, Clone)]
struct Identity {
    intent: Intent,
    /// Filled in when the transport reports the identity open
    local_id: Option<PeerId>,
}

pub struct Session<T: Transport, A: AvatarAllocator> {
    config: SessionConfig,
    transport: T,
    allocator: A,
    role: Role,
    identity: Option<Identity>,
    server_id: PeerId,
    active_players: ActivePlayers<A::Avatar>,
    package: DataPackage,
    elapsed: f32,
    local_pose: PlayerTransforms,
    local_stream: Option<AudioStream>,
    calls: HashMap<PeerId, CallHandle>,
    remote_streams: HashMap<PeerId, AudioStream>,
    scheduled_calls: ScheduledCalls,
    callbacks: CallbackRegistry<A::Avatar>,
    metrics: Arc<SessionMetrics>,
}

impl<T: Transport, A: AvatarAllocator> Session<T, A> {
    pub fn new(config: SessionConfig, transport: T, allocator: A) -> Self {
        Self::new_with_metrics(config, transport, allocator, Arc::new(SessionMetrics::new()))
    }

    pub fn new_with_metrics(
        config: SessionConfig,
        transport: T,
        allocator: A,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let server_id = config.server_id.clone();
        Self {
            config,
            transport,
            allocator,
            role: Role::Idle,
            identity: None,
            server_id,
            active_players: ActivePlayers::new(),
            package: DataPackage::new(),
            elapsed: 0.0,
            local_pose: PlayerTransforms::default(),
            local_stream: None,
            calls: HashMap::new(),
            remote_streams: HashMap::new(),
            scheduled_calls: ScheduledCalls::new(),
            callbacks: CallbackRegistry::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn role_kind(&self) -> RoleKind {
        match self.role {
            Role::Idle => RoleKind::Unassigned,
            Role::Hosting { .. } => RoleKind::Hosting,
            Role::Joining { .. } => RoleKind::Joining,
            Role::Connected { .. } => RoleKind::Connected,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.role, Role::Hosting { .. })
    }

    /// Id assigned by the transport, once the identity is open
    pub fn local_id(&self) -> Option<&PeerId> {
        self.identity.as_ref().and_then(|identity| identity.local_id.as_ref())
    }

    /// True while a transport identity is requested or open
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn server_id(&self) -> &PeerId {
        &self.server_id
    }

    pub fn active_players(&self) -> &ActivePlayers<A::Avatar> {
        &self.active_players
    }

    pub fn avatar(&self, peer_id: &str) -> Option<&A::Avatar> {
        self.active_players.get(peer_id)
    }

    /// Host: every data connection. Client: the one to the host, if any.
    pub fn connections(&self) -> &[PeerConnection] {
        match &self.role {
            Role::Hosting { connections } => connections,
            Role::Joining {
                connection: Some(connection),
                ..
            }
            | Role::Connected { connection } => std::slice::from_ref(connection),
            _ => &[],
        }
    }

    /// Outbound package queued for the next flush
    pub fn pending_package(&self) -> &DataPackage {
        &self.package
    }

    /// Pose sampled on the last flush
    pub fn local_pose(&self) -> &PlayerTransforms {
        &self.local_pose
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry<A::Avatar> {
        &mut self.callbacks
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    /// Ids of everyone in the session as this side knows it: self first,
    /// then remote peers in join order
    pub fn roster(&self) -> Vec<PeerId> {
        let mut ids = Vec::with_capacity(self.active_players.len() + 1);
        if let Some(local_id) = self.local_id() {
            ids.push(local_id.clone());
        }
        ids.extend(self.active_players.ids().iter().cloned());
        ids
    }

    /// Drop the transport identity and everything that hangs off it.
    /// Returns false if there was nothing to tear down.
    pub fn disconnect(&mut self) -> bool {
        if self.identity.is_none() {
            return false;
        }

        info!("Disconnecting session {}", self.server_id);
        self.remove_all_players();

        self.scheduled_calls.clear();
        for (_, call) in self.calls.drain() {
            self.transport.close_call(call);
        }
        self.remote_streams.clear();

        self.transport.destroy_identity();
        self.identity = None;
        self.role = Role::Idle;
        self.package.clear();
        self.elapsed = 0.0;
        self.refresh_gauges();
        true
    }

    /// Host-initiated removal; survivors learn about it on the next flush
    pub fn kick(&mut self, peer_id: &str) -> bool {
        if !self.is_host() {
            warn!("Only the host can kick peers (tried {})", peer_id);
            return false;
        }

        info!("Kicking peer {}", peer_id);
        self.package.push_id(keys::DISCONNECT, &PeerId::from(peer_id));
        self.remove_player(peer_id)
    }

    /// Forget a peer: its call, its data connection and its avatar.
    /// Unknown ids are ignored.
    pub fn remove_player(&mut self, peer_id: &str) -> bool {
        let Some(mut avatar) = self.active_players.remove(peer_id) else {
            return false;
        };

        self.scheduled_calls.cancel(peer_id);
        if let Some(call) = self.calls.remove(peer_id) {
            self.transport.close_call(call);
        }
        self.remote_streams.remove(peer_id);

        if let Role::Hosting { connections } = &mut self.role {
            if let Some(index) = connections.iter().position(|c| c.peer_id.as_str() == peer_id) {
                let mut connection = connections.remove(index);
                connection.close();
                self.transport.close(connection.handle);
            }
        }

        avatar.reset_pose();
        self.allocator.return_entity(avatar);

        self.metrics.peers_left.fetch_add(1, Ordering::Relaxed);
        self.refresh_gauges();
        info!("Removed peer {}", peer_id);
        true
    }

    pub fn remove_all_players(&mut self) {
        let ids: Vec<PeerId> = self.active_players.ids().to_vec();
        for peer_id in ids {
            self.remove_player(peer_id.as_str());
        }
    }

    /// Drain and handle every pending transport event.
    /// Stops at the first event that fails and returns its error.
    pub fn poll_transport(&mut self) -> Result<usize, SessionError> {
        let mut handled = 0;
        while let Some(event) = self.transport.poll_event() {
            handled += 1;
            self.handle_event(event)?;
        }
        Ok(handled)
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::Open { local_id } => self.on_open(local_id),
            TransportEvent::IdentityRejected { reason } => {
                error!("Transport identity rejected: {}", reason);
                self.identity = None;
                self.role = Role::Idle;
                Ok(())
            }
            TransportEvent::Disconnected => {
                if self.identity.is_some() {
                    warn!("Lost connection to the signaling layer");
                    self.end_session();
                }
                Ok(())
            }
            TransportEvent::IncomingConnection {
                conn,
                peer_id,
                metadata,
            } => self.on_incoming_connection(conn, peer_id, metadata),
            TransportEvent::ConnectionOpen { conn } => match self.role {
                Role::Hosting { .. } => self.on_host_connection_open(conn),
                Role::Joining { .. } => {
                    self.on_client_connection_open(conn);
                    Ok(())
                }
                _ => {
                    debug!("Ignoring open of {} in role {:?}", conn, self.role_kind());
                    Ok(())
                }
            },
            TransportEvent::Data { conn, payload } => match self.role {
                Role::Hosting { .. } => self.on_host_data(conn, payload),
                Role::Connected { .. } => self.on_client_data(conn, payload),
                _ => {
                    debug!("Dropping {} bytes on {} before the session is up", payload.len(), conn);
                    Ok(())
                }
            },
            TransportEvent::ConnectionClosed { conn } => {
                match self.role {
                    Role::Hosting { .. } => self.on_host_connection_closed(conn),
                    Role::Joining { .. } | Role::Connected { .. } => {
                        self.on_client_connection_closed(conn)
                    }
                    Role::Idle => {}
                }
                Ok(())
            }
            TransportEvent::IncomingCall { call, peer_id } => {
                self.on_incoming_call(call, peer_id);
                Ok(())
            }
            TransportEvent::CallStream { call, stream } => {
                self.on_call_stream(call, stream);
                Ok(())
            }
            TransportEvent::CallClosed { call } => {
                self.on_call_closed(call);
                Ok(())
            }
        }
    }

    fn on_open(&mut self, local_id: PeerId) -> Result<(), SessionError> {
        let Some(identity) = self.identity.as_mut() else {
            debug!("Ignoring open for stale identity {}", local_id);
            return Ok(());
        };
        identity.local_id = Some(local_id.clone());
        let intent = identity.intent;

        match intent {
            Intent::Host => {
                self.on_host_open(local_id);
                Ok(())
            }
            Intent::Join => self.on_client_open(local_id),
        }
    }

    /// Allocate and record an avatar for a newly observed peer
    fn adopt_peer(&mut self, peer_id: &PeerId, username: Option<&str>) -> Result<(), SessionError> {
        let Some(avatar) = self.allocator.get_entity(username) else {
            error!("No avatar available for peer {}", peer_id);
            return Err(SessionError::AvatarUnavailable(peer_id.clone()));
        };

        if let Some(mut previous) = self.active_players.insert(peer_id.clone(), avatar) {
            previous.reset_pose();
            self.allocator.return_entity(previous);
        }

        self.metrics.peers_joined.fetch_add(1, Ordering::Relaxed);
        self.refresh_gauges();
        info!("Peer {} joined", peer_id);

        if let Some(avatar) = self.active_players.get(peer_id.as_str()) {
            self.callbacks.fire_client_joined(peer_id, avatar);
        }
        Ok(())
    }

    /// Session over from the transport's side: tear down and tell observers
    fn end_session(&mut self) {
        self.remove_all_players();
        self.disconnect();
        self.callbacks.fire_disconnect();
    }

    fn refresh_gauges(&self) {
        self.metrics
            .active_peers
            .store(self.active_players.len() as u64, Ordering::Relaxed);
        let open = self.connections().iter().filter(|c| c.is_open()).count();
        self.metrics
            .connections_active
            .store(open as u64, Ordering::Relaxed);
    }
}

/// Send one encoded package, updating connection and session counters
fn deliver<T: Transport>(
    transport: &mut T,
    metrics: &SessionMetrics,
    connection: &mut PeerConnection,
    bytes: Vec<u8>,
) -> bool {
    let len = bytes.len();
    match transport.send(connection.handle, bytes) {
        Ok(()) => {
            connection.record_sent(len);
            metrics.record_sent(len);
            true
        }
        Err(e) => {
            warn!("Send to {} failed: {}", connection.peer_id, e);
            false
        }
    }
}
