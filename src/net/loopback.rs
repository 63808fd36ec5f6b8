//! In-process transport
//!
//! Every [`LoopbackTransport`] created from the same [`LoopbackNetwork`]
//! shares one hub. Requests are resolved immediately inside the hub and their
//! outcomes are queued as events on the endpoints' lock-free channels, so a
//! session only observes them on its next poll.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::net::protocol::PeerId;
use crate::net::transport::{
    AudioStream, CallHandle, ConnectMetadata, ConnectionHandle, Transport, TransportError,
    TransportEvent,
};

/// Loopback behaviour knobs
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Fraction of data messages silently dropped (0.0 - 1.0)
    pub packet_loss: f32,
}

/// One side of a data connection
#[derive(Debug)]
struct Link {
    owner: PeerId,
    remote: ConnectionHandle,
}

/// One side of a call
#[derive(Debug)]
struct CallLink {
    owner: PeerId,
    remote: CallHandle,
    /// Stream this side offered (caller on dial, callee on answer)
    offered: Option<AudioStream>,
}

#[derive(Debug, Default)]
struct Hub {
    endpoints: HashMap<PeerId, Sender<TransportEvent>>,
    links: HashMap<ConnectionHandle, Link>,
    calls: HashMap<CallHandle, CallLink>,
    next_handle: u64,
    config: LoopbackConfig,
}

impl Hub {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn notify(&self, peer_id: &PeerId, event: TransportEvent) {
        if let Some(sender) = self.endpoints.get(peer_id) {
            // Receiver gone means the transport was dropped
            let _ = sender.send(event);
        }
    }

    fn close_link(&mut self, conn: ConnectionHandle) {
        if let Some(link) = self.links.remove(&conn) {
            if let Some(remote) = self.links.remove(&link.remote) {
                self.notify(&remote.owner, TransportEvent::ConnectionClosed { conn: link.remote });
            }
        }
    }

    fn close_call(&mut self, call: CallHandle) {
        if let Some(link) = self.calls.remove(&call) {
            if let Some(remote) = self.calls.remove(&link.remote) {
                self.notify(&remote.owner, TransportEvent::CallClosed { call: link.remote });
            }
        }
    }
}

/// Shared in-memory network
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LoopbackConfig) -> Self {
        let network = Self::default();
        network.hub.lock().config = config;
        network
    }

    /// Create a transport attached to this network
    pub fn transport(&self) -> LoopbackTransport {
        let (sender, receiver) = unbounded();
        LoopbackTransport {
            hub: self.hub.clone(),
            local_id: None,
            sender,
            receiver,
        }
    }

    /// Simulate loss of the signaling server for one endpoint
    pub fn drop_signaling(&self, peer_id: &PeerId) {
        self.hub.lock().notify(peer_id, TransportEvent::Disconnected);
    }

    pub fn is_registered(&self, peer_id: &PeerId) -> bool {
        self.hub.lock().endpoints.contains_key(peer_id)
    }

    /// Number of live connection ends
    pub fn link_count(&self) -> usize {
        self.hub.lock().links.len()
    }

    /// Number of live call ends
    pub fn call_count(&self) -> usize {
        self.hub.lock().calls.len()
    }
}

/// Transport endpoint backed by a [`LoopbackNetwork`]
#[derive(Debug)]
pub struct LoopbackTransport {
    hub: Arc<Mutex<Hub>>,
    local_id: Option<PeerId>,
    sender: Sender<TransportEvent>,
    receiver: Receiver<TransportEvent>,
}

impl LoopbackTransport {
    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    fn require_identity(&self) -> Result<PeerId, TransportError> {
        self.local_id.clone().ok_or(TransportError::NoIdentity)
    }

    fn push(&self, event: TransportEvent) {
        let _ = self.sender.send(event);
    }
}

impl Transport for LoopbackTransport {
    fn create_identity(&mut self, desired_id: Option<&PeerId>) {
        if self.local_id.is_some() {
            self.push(TransportEvent::IdentityRejected {
                reason: "identity already registered".to_string(),
            });
            return;
        }

        let id = desired_id
            .cloned()
            .unwrap_or_else(|| PeerId::new(Uuid::new_v4().to_string()));

        let mut hub = self.hub.lock();
        if hub.endpoints.contains_key(&id) {
            drop(hub);
            self.push(TransportEvent::IdentityRejected {
                reason: format!("id {} is taken", id),
            });
            return;
        }

        hub.endpoints.insert(id.clone(), self.sender.clone());
        drop(hub);

        debug!("Loopback identity {} registered", id);
        self.local_id = Some(id.clone());
        self.push(TransportEvent::Open { local_id: id });
    }

    fn destroy_identity(&mut self) {
        let Some(id) = self.local_id.take() else {
            return;
        };

        let mut hub = self.hub.lock();
        let owned_links: Vec<ConnectionHandle> = hub
            .links
            .iter()
            .filter(|(_, link)| link.owner == id)
            .map(|(handle, _)| *handle)
            .collect();
        for conn in owned_links {
            hub.close_link(conn);
        }

        let owned_calls: Vec<CallHandle> = hub
            .calls
            .iter()
            .filter(|(_, link)| link.owner == id)
            .map(|(handle, _)| *handle)
            .collect();
        for call in owned_calls {
            hub.close_call(call);
        }

        hub.endpoints.remove(&id);
        debug!("Loopback identity {} destroyed", id);
    }

    fn connect(
        &mut self,
        remote_id: &PeerId,
        metadata: ConnectMetadata,
    ) -> Result<ConnectionHandle, TransportError> {
        let local_id = self.require_identity()?;
        let mut hub = self.hub.lock();
        let local = ConnectionHandle(hub.next_handle());

        if !hub.endpoints.contains_key(remote_id) {
            // Unknown peer: the channel never opens
            drop(hub);
            self.push(TransportEvent::ConnectionClosed { conn: local });
            return Ok(local);
        }

        let remote = ConnectionHandle(hub.next_handle());
        hub.links.insert(
            local,
            Link {
                owner: local_id.clone(),
                remote,
            },
        );
        hub.links.insert(
            remote,
            Link {
                owner: remote_id.clone(),
                remote: local,
            },
        );

        hub.notify(
            remote_id,
            TransportEvent::IncomingConnection {
                conn: remote,
                peer_id: local_id,
                metadata,
            },
        );
        hub.notify(remote_id, TransportEvent::ConnectionOpen { conn: remote });
        drop(hub);

        self.push(TransportEvent::ConnectionOpen { conn: local });
        Ok(local)
    }

    fn send(&mut self, conn: ConnectionHandle, payload: Vec<u8>) -> Result<(), TransportError> {
        let hub = self.hub.lock();
        let link = hub
            .links
            .get(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;

        if hub.config.packet_loss > 0.0 && rand::thread_rng().gen::<f32>() < hub.config.packet_loss {
            debug!("Loopback dropped {} bytes on {}", payload.len(), conn);
            return Ok(());
        }

        let remote = link.remote;
        if let Some(remote_link) = hub.links.get(&remote) {
            hub.notify(
                &remote_link.owner,
                TransportEvent::Data {
                    conn: remote,
                    payload,
                },
            );
        }
        Ok(())
    }

    fn close(&mut self, conn: ConnectionHandle) {
        self.hub.lock().close_link(conn);
    }

    fn call(&mut self, remote_id: &PeerId, stream: &AudioStream) -> Result<CallHandle, TransportError> {
        let local_id = self.require_identity()?;
        let mut hub = self.hub.lock();
        let local = CallHandle(hub.next_handle());

        if !hub.endpoints.contains_key(remote_id) {
            drop(hub);
            self.push(TransportEvent::CallClosed { call: local });
            return Ok(local);
        }

        let remote = CallHandle(hub.next_handle());
        hub.calls.insert(
            local,
            CallLink {
                owner: local_id.clone(),
                remote,
                offered: Some(stream.clone()),
            },
        );
        hub.calls.insert(
            remote,
            CallLink {
                owner: remote_id.clone(),
                remote: local,
                offered: None,
            },
        );

        hub.notify(
            remote_id,
            TransportEvent::IncomingCall {
                call: remote,
                peer_id: local_id,
            },
        );
        Ok(local)
    }

    fn answer(&mut self, call: CallHandle, stream: &AudioStream) -> Result<(), TransportError> {
        let mut hub = self.hub.lock();
        let link = hub
            .calls
            .get_mut(&call)
            .ok_or(TransportError::UnknownCall(call))?;
        link.offered = Some(stream.clone());
        let caller = link.remote;

        let Some(caller_link) = hub.calls.get(&caller) else {
            return Err(TransportError::UnknownCall(caller));
        };
        let caller_owner = caller_link.owner.clone();
        let caller_stream = caller_link.offered.clone();

        hub.notify(
            &caller_owner,
            TransportEvent::CallStream {
                call: caller,
                stream: stream.clone(),
            },
        );
        drop(hub);

        if let Some(caller_stream) = caller_stream {
            self.push(TransportEvent::CallStream {
                call,
                stream: caller_stream,
            });
        }
        Ok(())
    }

    fn close_call(&mut self, call: CallHandle) {
        self.hub.lock().close_call(call);
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(transport: &mut LoopbackTransport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| transport.poll_event()).collect()
    }

    fn open(network: &LoopbackNetwork, id: Option<&str>) -> (LoopbackTransport, PeerId) {
        let mut transport = network.transport();
        transport.create_identity(id.map(PeerId::from).as_ref());
        let events = drain(&mut transport);
        match events.as_slice() {
            [TransportEvent::Open { local_id }] => {
                let local_id = local_id.clone();
                (transport, local_id)
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_identity_assigned_when_not_requested() {
        let network = LoopbackNetwork::new();
        let (transport, id) = open(&network, None);

        assert!(!id.is_empty());
        assert_eq!(transport.local_id(), Some(&id));
        assert!(network.is_registered(&id));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let network = LoopbackNetwork::new();
        let (_host, _) = open(&network, Some("ABC"));

        let mut other = network.transport();
        other.create_identity(Some(&PeerId::from("ABC")));
        let events = drain(&mut other);
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::IdentityRejected { .. }]
        ));
        assert!(other.local_id().is_none());
    }

    #[test]
    fn test_connect_and_exchange_data() {
        let network = LoopbackNetwork::new();
        let (mut host, host_id) = open(&network, Some("ABC"));
        let (mut client, client_id) = open(&network, None);

        let conn = client
            .connect(&host_id, ConnectMetadata::with_username("Bob"))
            .unwrap();
        assert_eq!(drain(&mut client), vec![TransportEvent::ConnectionOpen { conn }]);

        let host_events = drain(&mut host);
        let host_conn = match &host_events[..] {
            [TransportEvent::IncomingConnection {
                conn,
                peer_id,
                metadata,
            }, TransportEvent::ConnectionOpen { .. }] => {
                assert_eq!(peer_id, &client_id);
                assert_eq!(metadata.username.as_deref(), Some("Bob"));
                *conn
            }
            other => panic!("unexpected events {:?}", other),
        };

        client.send(conn, b"hello".to_vec()).unwrap();
        assert_eq!(
            drain(&mut host),
            vec![TransportEvent::Data {
                conn: host_conn,
                payload: b"hello".to_vec()
            }]
        );

        host.send(host_conn, b"hi".to_vec()).unwrap();
        assert_eq!(
            drain(&mut client),
            vec![TransportEvent::Data {
                conn,
                payload: b"hi".to_vec()
            }]
        );
    }

    #[test]
    fn test_connect_to_unknown_peer_closes() {
        let network = LoopbackNetwork::new();
        let (mut client, _) = open(&network, None);

        let conn = client
            .connect(&PeerId::from("nobody"), ConnectMetadata::default())
            .unwrap();
        assert_eq!(drain(&mut client), vec![TransportEvent::ConnectionClosed { conn }]);
        assert!(client.send(conn, vec![1]).is_err());
    }

    #[test]
    fn test_connect_requires_identity() {
        let network = LoopbackNetwork::new();
        let mut transport = network.transport();
        assert!(matches!(
            transport.connect(&PeerId::from("ABC"), ConnectMetadata::default()),
            Err(TransportError::NoIdentity)
        ));
    }

    #[test]
    fn test_close_notifies_remote_only() {
        let network = LoopbackNetwork::new();
        let (mut host, host_id) = open(&network, Some("ABC"));
        let (mut client, _) = open(&network, None);

        let conn = client.connect(&host_id, ConnectMetadata::default()).unwrap();
        drain(&mut client);
        let host_conn = match drain(&mut host).first() {
            Some(TransportEvent::IncomingConnection { conn, .. }) => *conn,
            other => panic!("unexpected event {:?}", other),
        };

        client.close(conn);
        assert!(drain(&mut client).is_empty());
        assert_eq!(
            drain(&mut host),
            vec![TransportEvent::ConnectionClosed { conn: host_conn }]
        );
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_destroy_identity_closes_links() {
        let network = LoopbackNetwork::new();
        let (mut host, host_id) = open(&network, Some("ABC"));
        let (mut client, _) = open(&network, None);

        let conn = client.connect(&host_id, ConnectMetadata::default()).unwrap();
        drain(&mut client);
        drain(&mut host);

        host.destroy_identity();
        assert!(!network.is_registered(&host_id));
        assert_eq!(drain(&mut client), vec![TransportEvent::ConnectionClosed { conn }]);
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_call_answer_exchanges_streams() {
        let network = LoopbackNetwork::new();
        let (mut host, host_id) = open(&network, Some("ABC"));
        let (mut client, client_id) = open(&network, None);

        let client_stream = AudioStream::new(1);
        let host_stream = AudioStream::new(2);

        let call = client.call(&host_id, &client_stream).unwrap();
        let incoming = match drain(&mut host).as_slice() {
            [TransportEvent::IncomingCall { call, peer_id }] => {
                assert_eq!(peer_id, &client_id);
                *call
            }
            other => panic!("unexpected events {:?}", other),
        };

        host.answer(incoming, &host_stream).unwrap();
        assert_eq!(
            drain(&mut host),
            vec![TransportEvent::CallStream {
                call: incoming,
                stream: client_stream
            }]
        );
        assert_eq!(
            drain(&mut client),
            vec![TransportEvent::CallStream {
                call,
                stream: host_stream
            }]
        );

        client.close_call(call);
        assert_eq!(
            drain(&mut host),
            vec![TransportEvent::CallClosed { call: incoming }]
        );
        assert_eq!(network.call_count(), 0);
    }

    #[test]
    fn test_full_packet_loss_drops_data() {
        let network = LoopbackNetwork::with_config(LoopbackConfig { packet_loss: 1.0 });
        let (mut host, host_id) = open(&network, Some("ABC"));
        let (mut client, _) = open(&network, None);

        let conn = client.connect(&host_id, ConnectMetadata::default()).unwrap();
        drain(&mut client);
        drain(&mut host);

        client.send(conn, b"lost".to_vec()).unwrap();
        assert!(drain(&mut host).is_empty());
    }

    #[test]
    fn test_drop_signaling() {
        let network = LoopbackNetwork::new();
        let (mut host, host_id) = open(&network, Some("ABC"));

        network.drop_signaling(&host_id);
        assert_eq!(drain(&mut host), vec![TransportEvent::Disconnected]);
    }
}
