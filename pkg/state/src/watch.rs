use pkg_types::meta::parse_registry_key;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Type of event in the watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    /// `(kind, namespace, name)` of the changed object, if the key is a registry key.
    pub fn resource(&self) -> Option<(&str, &str, &str)> {
        parse_registry_key(&self.key)
    }

    /// Decode the written object. `None` for deletes or undecodable values.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.value
            .as_deref()
            .and_then(|v| serde_json::from_slice(v).ok())
    }
}

/// Broadcast of state mutations stamped with monotonic sequence numbers.
/// Controllers subscribe to it to turn store writes into reconcile requests.
#[derive(Clone)]
pub struct EventLog {
    seq: Arc<AtomicU64>,
    sender: broadcast::Sender<WatchEvent>,
}

impl EventLog {
    /// Subscribers lagging more than `capacity` events behind see
    /// `RecvError::Lagged` and must resync.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            sender,
        }
    }

    /// Record a new event. Called by the registry on every put/delete.
    pub fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let event = WatchEvent {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            event_type,
            key,
            value,
        };
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}
