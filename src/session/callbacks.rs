//! Callback registry
//!
//! Lifecycle observers are kept in registration order and removed by the id
//! handed out when they were added. Network callbacks are keyed by message
//! key, one handler per key.

use hashbrown::HashMap;
use serde_json::Value;

use crate::net::protocol::PeerId;

/// Handle returned when registering a lifecycle callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Observers<F: ?Sized> {
    entries: Vec<(CallbackId, Box<F>)>,
}

impl<F: ?Sized> Observers<F> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn add(&mut self, id: CallbackId, callback: Box<F>) {
        self.entries.push((id, callback));
    }

    fn remove(&mut self, id: CallbackId) -> bool {
        match self.entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<F>> {
        self.entries.iter_mut().map(|(_, callback)| callback)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Lifecycle observers plus keyed network handlers
pub struct CallbackRegistry<V> {
    next_id: u64,
    connection_established: Observers<dyn FnMut()>,
    client_joined: Observers<dyn FnMut(&PeerId, &V)>,
    disconnect: Observers<dyn FnMut()>,
    network: HashMap<String, Box<dyn FnMut(&Value)>>,
}

impl<V> CallbackRegistry<V> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            connection_established: Observers::new(),
            client_joined: Observers::new(),
            disconnect: Observers::new(),
            network: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> CallbackId {
        self.next_id += 1;
        CallbackId(self.next_id)
    }

    /// Called when hosting starts or the connection to the host opens
    pub fn add_connection_established_callback(&mut self, callback: impl FnMut() + 'static) -> CallbackId {
        let id = self.next_id();
        self.connection_established.add(id, Box::new(callback));
        id
    }

    pub fn remove_connection_established_callback(&mut self, id: CallbackId) -> bool {
        self.connection_established.remove(id)
    }

    /// Called with the peer id and its freshly allocated avatar
    pub fn add_client_joined_callback(
        &mut self,
        callback: impl FnMut(&PeerId, &V) + 'static,
    ) -> CallbackId {
        let id = self.next_id();
        self.client_joined.add(id, Box::new(callback));
        id
    }

    pub fn remove_client_joined_callback(&mut self, id: CallbackId) -> bool {
        self.client_joined.remove(id)
    }

    /// Called when the session ends because the transport went away
    pub fn add_disconnect_callback(&mut self, callback: impl FnMut() + 'static) -> CallbackId {
        let id = self.next_id();
        self.disconnect.add(id, Box::new(callback));
        id
    }

    pub fn remove_disconnect_callback(&mut self, id: CallbackId) -> bool {
        self.disconnect.remove(id)
    }

    /// Register the handler for `key`; returns true if one was replaced
    pub fn add_network_callback(
        &mut self,
        key: impl Into<String>,
        callback: impl FnMut(&Value) + 'static,
    ) -> bool {
        self.network.insert(key.into(), Box::new(callback)).is_some()
    }

    pub fn remove_network_callback(&mut self, key: &str) -> bool {
        self.network.remove(key).is_some()
    }

    pub fn has_network_callback(&self, key: &str) -> bool {
        self.network.contains_key(key)
    }

    pub fn lifecycle_callback_count(&self) -> usize {
        self.connection_established.len() + self.client_joined.len() + self.disconnect.len()
    }

    pub(crate) fn fire_connection_established(&mut self) {
        for callback in self.connection_established.iter_mut() {
            callback();
        }
    }

    pub(crate) fn fire_client_joined(&mut self, peer_id: &PeerId, avatar: &V) {
        for callback in self.client_joined.iter_mut() {
            callback(peer_id, avatar);
        }
    }

    pub(crate) fn fire_disconnect(&mut self) {
        for callback in self.disconnect.iter_mut() {
            callback();
        }
    }

    /// Run the handler registered for `key`; false when there is none
    pub(crate) fn dispatch(&mut self, key: &str, data: &Value) -> bool {
        match self.network.get_mut(key) {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }
}

impl<V> Default for CallbackRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_lifecycle_callbacks_fire_in_order() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = log.clone();
        registry.add_connection_established_callback(move || first.borrow_mut().push("first"));
        let second = log.clone();
        registry.add_connection_established_callback(move || second.borrow_mut().push("second"));

        registry.fire_connection_established();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_remove_lifecycle_callback() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let count = Rc::new(RefCell::new(0));

        let counter = count.clone();
        let id = registry.add_disconnect_callback(move || *counter.borrow_mut() += 1);

        assert!(registry.remove_disconnect_callback(id));
        assert!(!registry.remove_disconnect_callback(id));
        // Ids are not shared between lists
        assert!(!registry.remove_connection_established_callback(id));

        registry.fire_disconnect();
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_client_joined_receives_avatar() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let seen = Rc::new(RefCell::new(None));

        let sink = seen.clone();
        registry.add_client_joined_callback(move |peer_id, avatar| {
            *sink.borrow_mut() = Some((peer_id.clone(), *avatar));
        });

        registry.fire_client_joined(&PeerId::from("P1"), &7);
        assert_eq!(*seen.borrow(), Some((PeerId::from("P1"), 7)));
    }

    #[test]
    fn test_network_callback_dispatch() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let received = Rc::new(RefCell::new(Vec::new()));

        let sink = received.clone();
        assert!(!registry.add_network_callback("chat", move |data| {
            sink.borrow_mut().push(data.clone());
        }));

        assert!(registry.dispatch("chat", &json!("hello")));
        assert!(!registry.dispatch("score", &json!(3)));
        assert_eq!(*received.borrow(), vec![json!("hello")]);
    }

    #[test]
    fn test_network_callback_replace_and_remove() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();

        registry.add_network_callback("chat", |_| {});
        assert!(registry.add_network_callback("chat", |_| {}));
        assert!(registry.has_network_callback("chat"));

        assert!(registry.remove_network_callback("chat"));
        assert!(!registry.remove_network_callback("chat"));
        assert!(!registry.has_network_callback("chat"));
    }
}
