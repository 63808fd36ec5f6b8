//! Wire protocol
//!
//! Every send is a single JSON object. Well-known keys carry the roster,
//! departures and the sender's pose; any other key is an application event
//! (or, from the host, a relayed per-peer package keyed by that peer's id).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

use crate::util::dual_quat::DualQuat;

/// Reserved top-level keys
pub mod keys {
    pub const JOINED_PLAYERS: &str = "joinedPlayers";
    pub const JOINED: &str = "joined";
    pub const TRANSFORMS: &str = "transforms";
    pub const DISCONNECT: &str = "disconnect";
    pub const CALL: &str = "call";
}

/// Reserved keys are never dispatched to application callbacks
pub fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        keys::JOINED_PLAYERS | keys::JOINED | keys::TRANSFORMS | keys::DISCONNECT | keys::CALL
    )
}

/// Unique participant name assigned by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Head and hand poses of one participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTransforms {
    pub head: DualQuat,
    pub right_hand: DualQuat,
    pub left_hand: DualQuat,
}

/// Roster announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUpdate {
    pub joined_players: Vec<PeerId>,
    /// Set only on the roster a host sends to a freshly opened connection
    pub joined: bool,
}

/// Errors from encoding or interpreting packages
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Package is not a JSON object")]
    NotAnObject,
    #[error("Malformed `{key}` field: {source}")]
    MalformedField {
        key: String,
        source: serde_json::Error,
    },
}

/// Keyed envelope merged from everything queued before a send
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPackage(Map<String, Value>);

impl DataPackage {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Package holding a single keyed payload
    pub fn single<S: Serialize + ?Sized>(key: impl Into<String>, data: &S) -> Result<Self, CodecError> {
        let mut package = Self::new();
        package.insert(key, data)?;
        Ok(package)
    }

    /// Roster message sent to one connection
    pub fn roster_message(ids: &[PeerId], joined: bool) -> Self {
        let mut package = Self::new();
        package.0.insert(
            keys::JOINED_PLAYERS.to_string(),
            Value::Array(ids.iter().map(|id| Value::String(id.to_string())).collect()),
        );
        if joined {
            package.0.insert(keys::JOINED.to_string(), Value::Bool(true));
        }
        package
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(CodecError::NotAnObject),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Store `data` under `key`, replacing any earlier value
    pub fn insert<S: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        data: &S,
    ) -> Result<(), CodecError> {
        let value = serde_json::to_value(data)?;
        self.0.insert(key.into(), value);
        Ok(())
    }

    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Append `id` to the id list stored under `key`
    pub fn push_id(&mut self, key: &str, id: &PeerId) {
        let entry = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));

        match entry {
            Value::Array(list) => list.push(Value::String(id.to_string())),
            other => *other = Value::Array(vec![Value::String(id.to_string())]),
        }
    }

    /// Take `id` out of the id list under `key`, dropping the key once the
    /// list is empty
    pub fn remove_id(&mut self, key: &str, id: &str) -> bool {
        let Some(Value::Array(list)) = self.0.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.as_str() != Some(id));
        let removed = list.len() != before;
        if list.is_empty() {
            self.0.remove(key);
        }
        removed
    }

    pub fn set_transforms(&mut self, transforms: &PlayerTransforms) -> Result<(), CodecError> {
        self.insert(keys::TRANSFORMS, transforms)
    }

    pub fn transforms(&self) -> Result<Option<PlayerTransforms>, CodecError> {
        self.typed_field(keys::TRANSFORMS)
    }

    /// Roster carried by this package, if any
    pub fn roster(&self) -> Result<Option<RosterUpdate>, CodecError> {
        let joined_players: Option<Vec<PeerId>> = self.typed_field(keys::JOINED_PLAYERS)?;

        Ok(joined_players.map(|joined_players| RosterUpdate {
            joined_players,
            joined: matches!(self.0.get(keys::JOINED), Some(Value::Bool(true))),
        }))
    }

    /// Peers announced as departed
    pub fn disconnected(&self) -> Result<Vec<PeerId>, CodecError> {
        Ok(self.typed_field(keys::DISCONNECT)?.unwrap_or_default())
    }

    /// Copy of this package without the top-level entry `key`
    pub fn without(&self, key: &str) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Move the contents out, leaving this package empty
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_slice(data)?;
        Self::from_value(value)
    }

    fn typed_field<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, CodecError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|source| CodecError::MalformedField {
                    key: key.to_string(),
                    source,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_transforms() -> PlayerTransforms {
        PlayerTransforms {
            head: DualQuat::from_axis_angle_y(0.3, [0.1, 1.7, -0.2]),
            right_hand: DualQuat::from_axis_angle_y(-1.1, [0.3, 1.2, -0.4]),
            left_hand: DualQuat::from([0.1, 0.2, 0.3, 0.9, 1e-7, -3.4e38, 0.333_333_34, -0.0]),
        }
    }

    #[test]
    fn test_roster_message_shape() {
        let ids = vec![PeerId::from("ABC"), PeerId::from("P1")];
        let package = DataPackage::roster_message(&ids, true);

        assert_eq!(
            package.into_value(),
            json!({"joinedPlayers": ["ABC", "P1"], "joined": true})
        );
    }

    #[test]
    fn test_roster_parse_live_update() {
        let package = DataPackage::from_value(json!({"joinedPlayers": ["ABC", "P2"]})).unwrap();
        let roster = package.roster().unwrap().unwrap();

        assert_eq!(roster.joined_players, vec![PeerId::from("ABC"), PeerId::from("P2")]);
        assert!(!roster.joined);
    }

    #[test]
    fn test_roster_absent() {
        let package = DataPackage::from_value(json!({"chat": "hi"})).unwrap();
        assert!(package.roster().unwrap().is_none());
        assert!(package.disconnected().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_roster() {
        let package = DataPackage::from_value(json!({"joinedPlayers": 7})).unwrap();
        assert!(matches!(
            package.roster(),
            Err(CodecError::MalformedField { .. })
        ));
    }

    #[test]
    fn test_push_id_appends() {
        let mut package = DataPackage::new();
        package.push_id(keys::DISCONNECT, &PeerId::from("P1"));
        package.push_id(keys::DISCONNECT, &PeerId::from("P2"));

        assert_eq!(
            package.disconnected().unwrap(),
            vec![PeerId::from("P1"), PeerId::from("P2")]
        );
    }

    #[test]
    fn test_remove_id() {
        let mut package = DataPackage::new();
        package.push_id(keys::DISCONNECT, &PeerId::from("P1"));
        package.push_id(keys::DISCONNECT, &PeerId::from("P2"));

        assert!(package.remove_id(keys::DISCONNECT, "P1"));
        assert!(!package.remove_id(keys::DISCONNECT, "P1"));
        assert_eq!(package.disconnected().unwrap(), vec![PeerId::from("P2")]);

        assert!(package.remove_id(keys::DISCONNECT, "P2"));
        assert!(!package.contains_key(keys::DISCONNECT));
        assert!(!package.remove_id(keys::JOINED_PLAYERS, "P2"));
    }

    #[test]
    fn test_without_drops_only_named_entry() {
        let mut package = DataPackage::new();
        package.insert("ABC", &json!({"transforms": null})).unwrap();
        package.insert("P1", &json!({"score": 3})).unwrap();
        package.push_id(keys::JOINED_PLAYERS, &PeerId::from("P2"));

        let filtered = package.without("P1");
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("P1"));
        assert!(filtered.contains_key("ABC"));
        assert_eq!(package.len(), 3);
    }

    #[test]
    fn test_transforms_bit_exact_through_wire() {
        let transforms = sample_transforms();
        let mut package = DataPackage::new();
        package.set_transforms(&transforms).unwrap();

        let bytes = package.encode().unwrap();
        let decoded = DataPackage::decode(&bytes).unwrap();
        let restored = decoded.transforms().unwrap().unwrap();

        for (a, b) in [
            (transforms.head, restored.head),
            (transforms.right_hand, restored.right_hand),
            (transforms.left_hand, restored.left_hand),
        ] {
            for i in 0..8 {
                assert_eq!(a.0[i].to_bits(), b.0[i].to_bits());
            }
        }
    }

    #[test]
    fn test_transforms_wire_field_names() {
        let mut package = DataPackage::new();
        package.set_transforms(&PlayerTransforms::default()).unwrap();
        let value = package.into_value();

        let transforms = &value["transforms"];
        assert!(transforms.get("head").is_some());
        assert!(transforms.get("rightHand").is_some());
        assert!(transforms.get("leftHand").is_some());
        assert_eq!(transforms["head"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            DataPackage::decode(b"[1, 2, 3]"),
            Err(CodecError::NotAnObject)
        ));
        assert!(matches!(DataPackage::decode(b"{oops"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_take_leaves_empty() {
        let mut package = DataPackage::single("chat", "hello").unwrap();
        let taken = package.take();

        assert!(package.is_empty());
        assert_eq!(taken.get("chat"), Some(&json!("hello")));
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved("joinedPlayers"));
        assert!(is_reserved("disconnect"));
        assert!(is_reserved("call"));
        assert!(!is_reserved("chat"));
    }

    #[test]
    fn test_peer_id_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(PeerId::from("P1"), 1);
        assert_eq!(map.get("P1"), Some(&1));
        assert_eq!(PeerId::new("P1").to_string(), "P1");
    }
}
