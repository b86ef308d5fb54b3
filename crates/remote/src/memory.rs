use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;

use crate::envelope::{RangePage, RemoteEvent};
use crate::state::{ConnectionStats, ConnectionState};
use crate::{ConnectError, ProtocolError, RemoteStorage};

const PAGE_SIZE: usize = 256;

/// Shared backing store for a set of `MemoryRemote` handles, standing in
/// for the actual remote service in tests: several handles built over the
/// same `Broker` observe each other's writes exactly as peer clients
/// would over a real pubsub subscription.
pub struct Broker {
    store: Mutex<BTreeMap<String, Value>>,
    tx: broadcast::Sender<RemoteEvent>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(1024);
        Arc::new(Self {
            store: Mutex::new(BTreeMap::new()),
            tx,
        })
    }
}

impl Default for Broker {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            store: Mutex::new(BTreeMap::new()),
            tx,
        }
    }
}

/// An in-process `RemoteStorage` backed by a shared [`Broker`]. No
/// network I/O, no reconnect logic: a deterministic test double.
pub struct MemoryRemote {
    broker: Arc<Broker>,
    client_id: String,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    stats: Mutex<ConnectionStats>,
}

impl MemoryRemote {
    pub fn new(broker: Arc<Broker>, client_id: impl Into<String>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            broker,
            client_id: client_id.into(),
            state_tx,
            state_rx,
            stats: Mutex::new(ConnectionStats::default()),
        }
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemote {
    async fn connect(&self) -> Result<(), ConnectError> {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let _ = self.state_tx.send(ConnectionState::Connected);
        let mut stats = self.stats.lock().unwrap();
        stats.last_connected_at = Some(now());
        Ok(())
    }

    async fn disconnect(&self) {
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), ProtocolError> {
        self.broker
            .store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        let _ = self.broker.tx.send(RemoteEvent {
            key: key.to_string(),
            value: Some(value),
            client_id: self.client_id.clone(),
            timestamp: now(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ProtocolError> {
        self.broker.store.lock().unwrap().remove(key);
        let _ = self.broker.tx.send(RemoteEvent {
            key: key.to_string(),
            value: None,
            client_id: self.client_id.clone(),
            timestamp: now(),
        });
        Ok(())
    }

    async fn range(&self, prefix: &str, cursor: Option<String>) -> Result<RangePage, ProtocolError> {
        let store = self.broker.store.lock().unwrap();
        let start = cursor.unwrap_or_else(|| prefix.to_string());
        let mut entries = Vec::new();
        let mut next_cursor = None;

        for (key, value) in store.range(start..) {
            if !key.starts_with(prefix) {
                break;
            }
            if entries.len() == PAGE_SIZE {
                next_cursor = Some(key.clone());
                break;
            }
            entries.push((key.clone(), value.clone()));
        }

        Ok(RangePage {
            entries,
            cursor: next_cursor,
        })
    }

    fn subscribe(&self) -> BroadcastStream<RemoteEvent> {
        BroadcastStream::new(self.broker.tx.subscribe())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn connection_stats(&self) -> ConnectionStats {
        *self.stats.lock().unwrap()
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn peers_observe_each_others_writes() {
        let broker = Broker::new();
        let alice = MemoryRemote::new(broker.clone(), "alice");
        let bob = MemoryRemote::new(broker.clone(), "bob");

        alice.connect().await.unwrap();
        bob.connect().await.unwrap();

        let mut bob_events = bob.subscribe();
        alice.set("todos:1", json!({"text": "write tests"})).await.unwrap();

        let event = bob_events.next().await.unwrap().unwrap();
        assert_eq!(event.key, "todos:1");
        assert_eq!(event.client_id, "alice");
    }

    #[tokio::test]
    async fn range_is_prefix_scoped() {
        let broker = Broker::new();
        let remote = MemoryRemote::new(broker, "solo");
        remote.set("todos:1", json!(1)).await.unwrap();
        remote.set("todos:2", json!(2)).await.unwrap();
        remote.set("settings:theme", json!("dark")).await.unwrap();

        let page = remote.range("todos:", None).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn delete_broadcasts_a_null_value() {
        let broker = Broker::new();
        let owner = MemoryRemote::new(broker.clone(), "owner");
        let watcher = MemoryRemote::new(broker, "watcher");
        let mut events = watcher.subscribe();

        owner.set("todos:1", json!(1)).await.unwrap();
        events.next().await.unwrap().unwrap();

        owner.delete("todos:1").await.unwrap();
        let deletion = events.next().await.unwrap().unwrap();
        assert_eq!(deletion.value, None);
    }
}
