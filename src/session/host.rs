use tracing::{debug, info, warn};

use super::{deliver, Identity, Intent, Role, Session, SessionError};
use crate::avatar::{Avatar, AvatarAllocator};
use crate::net::connection::PeerConnection;
use crate::net::protocol::{is_reserved, keys, DataPackage, PeerId};
use crate::net::transport::{ConnectMetadata, ConnectionHandle, Transport};

impl<T: Transport, A: AvatarAllocator> Session<T, A> {
    /// Register as the relay under the configured server id.
    /// No-op while another identity is active.
    pub fn host(&mut self) -> bool {
        if self.identity.is_some() {
            warn!("Session already active, ignoring host()");
            return false;
        }

        info!("Hosting session {}", self.server_id);
        self.identity = Some(Identity {
            intent: Intent::Host,
            local_id: None,
        });
        self.transport.create_identity(Some(&self.server_id));
        true
    }

    pub(super) fn on_host_open(&mut self, local_id: PeerId) {
        info!("Host identity {} open", local_id);
        self.server_id = local_id;
        self.role = Role::Hosting {
            connections: Vec::new(),
        };
        self.callbacks.fire_connection_established();
    }

    pub(super) fn on_incoming_connection(
        &mut self,
        conn: ConnectionHandle,
        peer_id: PeerId,
        metadata: ConnectMetadata,
    ) -> Result<(), SessionError> {
        if !self.is_host() {
            warn!("Refusing connection {} from {}: not hosting", conn, peer_id);
            self.transport.close(conn);
            return Ok(());
        }

        if self.active_players.contains(peer_id.as_str()) {
            warn!("Peer {} reconnected, dropping its previous connection", peer_id);
            self.remove_player(peer_id.as_str());
        }

        if let Err(e) = self.peer_joined(&peer_id, metadata.username.as_deref()) {
            self.transport.close(conn);
            return Err(e);
        }

        debug!("Accepted {} from {}", conn, peer_id);
        if let Role::Hosting { connections } = &mut self.role {
            connections.push(PeerConnection::new(peer_id, conn, metadata));
        }
        Ok(())
    }

    /// Give a new peer an avatar and announce it on the next flush.
    /// Fails when the allocator has nothing left.
    pub fn peer_joined(&mut self, peer_id: &PeerId, username: Option<&str>) -> Result<(), SessionError> {
        self.adopt_peer(peer_id, username)?;
        // Back before its departure went out: survivors still know it
        self.package.remove_id(keys::DISCONNECT, peer_id.as_str());
        self.package.push_id(keys::JOINED_PLAYERS, peer_id);
        Ok(())
    }

    /// Channel ready: send that peer the full roster
    pub(super) fn on_host_connection_open(&mut self, conn: ConnectionHandle) -> Result<(), SessionError> {
        let roster = DataPackage::roster_message(&self.roster(), true);
        let bytes = roster.encode()?;

        if let Role::Hosting { connections } = &mut self.role {
            let Some(connection) = connections.iter_mut().find(|c| c.handle == conn) else {
                debug!("Open for unknown connection {}", conn);
                return Ok(());
            };
            connection.open();
            debug!("Sending roster to {}", connection.peer_id);
            deliver(&mut self.transport, &self.metrics, connection, bytes);
        }
        self.refresh_gauges();
        Ok(())
    }

    /// Apply the sender's pose, dispatch its events and keep its package
    /// for relay to everyone else
    pub(super) fn on_host_data(&mut self, conn: ConnectionHandle, payload: Vec<u8>) -> Result<(), SessionError> {
        let peer_id = match &mut self.role {
            Role::Hosting { connections } => {
                match connections.iter_mut().find(|c| c.handle == conn) {
                    Some(connection) => {
                        connection.record_received(payload.len());
                        connection.peer_id.clone()
                    }
                    None => {
                        debug!("Data on unknown connection {}", conn);
                        return Ok(());
                    }
                }
            }
            _ => return Ok(()),
        };
        self.metrics.record_received(payload.len());

        let package = match DataPackage::decode(&payload) {
            Ok(package) => package,
            Err(e) => {
                warn!("Undecodable package from {}: {}", peer_id, e);
                self.metrics
                    .decode_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(());
            }
        };

        match package.transforms() {
            Ok(Some(transforms)) => {
                if let Some(avatar) = self.active_players.get_mut(peer_id.as_str()) {
                    avatar.apply_transforms(&transforms);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Bad transforms from {}: {}", peer_id, e),
        }

        for (key, value) in package.iter() {
            if is_reserved(key) {
                continue;
            }
            if !self.callbacks.dispatch(key, value) {
                debug!("No callback for key {} from {}", key, peer_id);
            }
        }

        self.package.insert_value(peer_id.to_string(), package.into_value());
        Ok(())
    }

    pub(super) fn on_host_connection_closed(&mut self, conn: ConnectionHandle) {
        let peer_id = match &mut self.role {
            Role::Hosting { connections } => {
                let Some(index) = connections.iter().position(|c| c.handle == conn) else {
                    return;
                };
                let connection = connections.remove(index);
                info!(
                    "Connection to {} closed after {:.1}s ({} packets in, {} out)",
                    connection.peer_id,
                    connection.age().as_secs_f32(),
                    connection.packets_received,
                    connection.packets_sent
                );
                connection.peer_id
            }
            _ => return,
        };

        if self.remove_player(peer_id.as_str()) {
            self.package.push_id(keys::DISCONNECT, &peer_id);
        }
        self.refresh_gauges();
    }
}
