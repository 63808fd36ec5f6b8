use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{Identity, Intent, Role, Session, SessionError};
use crate::avatar::{Avatar, AvatarAllocator};
use crate::net::connection::PeerConnection;
use crate::net::protocol::{is_reserved, keys, DataPackage, PeerId, PlayerTransforms, RosterUpdate};
use crate::net::transport::{ConnectMetadata, ConnectionHandle, Transport};

impl<T: Transport, A: AvatarAllocator> Session<T, A> {
    /// Join the configured server id
    pub fn join(&mut self) -> bool {
        let server_id = self.config.server_id.clone();
        self.connect(&server_id)
    }

    /// Join the host registered as `id`.
    /// Logs and does nothing if `id` is empty or an identity is already active.
    pub fn connect(&mut self, id: &PeerId) -> bool {
        if id.is_empty() {
            error!("Connection id parameter missing");
            return false;
        }
        if self.identity.is_some() {
            debug!("Session already active, ignoring connect({})", id);
            return false;
        }

        info!("Joining session {}", id);
        self.identity = Some(Identity {
            intent: Intent::Join,
            local_id: None,
        });
        self.server_id = id.clone();
        self.role = Role::Joining {
            server_id: id.clone(),
            connection: None,
        };
        self.transport.create_identity(None);
        true
    }

    pub(super) fn on_client_open(&mut self, local_id: PeerId) -> Result<(), SessionError> {
        let server_id = match &self.role {
            Role::Joining { server_id, .. } => server_id.clone(),
            _ => return Ok(()),
        };

        info!("Client identity {} open, connecting to {}", local_id, server_id);
        let metadata = ConnectMetadata::with_username(self.config.display_name.clone());
        let handle = match self.transport.connect(&server_id, metadata.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not connect to {}: {}", server_id, e);
                self.transport.destroy_identity();
                self.identity = None;
                self.role = Role::Idle;
                return Err(e.into());
            }
        };

        if let Role::Joining { connection, .. } = &mut self.role {
            *connection = Some(PeerConnection::new(server_id, handle, metadata));
        }
        Ok(())
    }

    pub(super) fn on_client_connection_open(&mut self, conn: ConnectionHandle) {
        let role = std::mem::replace(&mut self.role, Role::Idle);
        let mut connection = match role {
            Role::Joining {
                connection: Some(connection),
                ..
            } if connection.handle == conn => connection,
            other => {
                self.role = other;
                debug!("Ignoring open of {}", conn);
                return;
            }
        };

        connection.open();
        let host_id = connection.peer_id.clone();
        self.role = Role::Connected { connection };
        self.refresh_gauges();
        info!("Connected to host {}", host_id);

        self.call(&host_id);
        self.callbacks.fire_connection_established();
    }

    /// Departures first so their avatars are free for the roster, then the
    /// roster, then everything else. A roster id that gets no avatar does
    /// not stop the rest of the package; the first such failure is returned
    /// once the package is fully applied.
    pub(super) fn on_client_data(&mut self, conn: ConnectionHandle, payload: Vec<u8>) -> Result<(), SessionError> {
        match &mut self.role {
            Role::Connected { connection } if connection.handle == conn => {
                connection.record_received(payload.len());
            }
            _ => {
                debug!("Data on unknown connection {}", conn);
                return Ok(());
            }
        }
        self.metrics.record_received(payload.len());

        let package = match DataPackage::decode(&payload) {
            Ok(package) => package,
            Err(e) => {
                warn!("Undecodable package from host: {}", e);
                self.metrics
                    .decode_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(());
            }
        };

        let departed = package.disconnected().unwrap_or_else(|e| {
            warn!("Bad disconnect list from host: {}", e);
            Vec::new()
        });
        for peer_id in &departed {
            self.remove_player(peer_id.as_str());
        }

        let outcome = match package.roster() {
            Ok(Some(roster)) => self.apply_roster(roster, &departed),
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Bad roster from host: {}", e);
                Ok(())
            }
        };

        for (key, value) in package.iter() {
            if is_reserved(key) {
                continue;
            }

            if let Some(avatar) = self.active_players.get_mut(key.as_str()) {
                let Value::Object(entries) = value else {
                    debug!("Non-object entry for peer {}", key);
                    continue;
                };
                for (sub_key, sub_value) in entries {
                    if sub_key == keys::TRANSFORMS {
                        match PlayerTransforms::deserialize(sub_value) {
                            Ok(transforms) => avatar.apply_transforms(&transforms),
                            Err(e) => warn!("Bad transforms for {}: {}", key, e),
                        }
                    } else if !is_reserved(sub_key) {
                        self.callbacks.dispatch(sub_key, sub_value);
                    }
                }
                continue;
            }

            if !self.callbacks.dispatch(key, value) {
                debug!("No callback for key {}", key);
            }
        }
        outcome
    }

    /// Adopt every unknown peer in the roster. A live update (not our own
    /// initial roster) also schedules a staggered call to each newcomer.
    /// Ids that also left within the same package are skipped. Keeps going
    /// past ids that get no avatar and reports the first one.
    fn apply_roster(&mut self, roster: RosterUpdate, departed: &[PeerId]) -> Result<(), SessionError> {
        let local_id = self.local_id().cloned();
        let mut outcome = Ok(());

        for (index, peer_id) in roster.joined_players.iter().enumerate() {
            if local_id.as_ref() == Some(peer_id)
                || self.active_players.contains(peer_id.as_str())
                || departed.contains(peer_id)
            {
                continue;
            }

            if let Err(e) = self.adopt_peer(peer_id, None) {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
                continue;
            }

            if !roster.joined && *peer_id != self.server_id {
                let delay = self.config.call_stagger * index as u32;
                debug!("Calling {} in {:?}", peer_id, delay);
                self.scheduled_calls.schedule(peer_id.clone(), delay);
            }
        }
        outcome
    }

    pub(super) fn on_client_connection_closed(&mut self, conn: ConnectionHandle) {
        let ours = match &self.role {
            Role::Joining {
                connection: Some(connection),
                ..
            }
            | Role::Connected { connection } => connection.handle == conn,
            _ => false,
        };
        if !ours {
            return;
        }

        info!("Connection to host {} closed", self.server_id);
        self.end_session();
    }
}
