use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;

use multiplayer::{Multiplayer, MultiplayerOptions};
use orchestrator::Store;
use remote::{Broker, MemoryRemote, RemoteStorage};

struct MapStore {
    state: Mutex<Value>,
    tx: watch::Sender<Value>,
    rx: watch::Receiver<Value>,
}

impl MapStore {
    fn new(initial: Value) -> Arc<Self> {
        let (tx, rx) = watch::channel(initial.clone());
        Arc::new(Self {
            state: Mutex::new(initial),
            tx,
            rx,
        })
    }
}

impl Store for MapStore {
    fn snapshot(&self) -> Value {
        self.state.lock().unwrap().clone()
    }

    fn apply(&self, patch: merge::StatePatch) {
        let mut state = self.state.lock().unwrap();
        let obj = state.as_object_mut().expect("root is an object");
        patch.apply(obj);
        let _ = self.tx.send(Value::Object(obj.clone()));
    }

    fn subscribe(&self) -> watch::Receiver<Value> {
        self.rx.clone()
    }
}

fn options() -> MultiplayerOptions {
    MultiplayerOptions {
        namespace: "todos-app".to_string(),
        api_base_url: "https://api.example.com/store/".parse().unwrap(),
        ws_url: "wss://api.example.com/store/ws".parse().unwrap(),
        api_key: Some("c3VwZXJzZWNyZXQ=".to_string()),
        token_generation_url: None,
        sync: vec!["todos".to_string()],
        z_factor: 2,
        log_level: "info".to_string(),
        rate_limit: None,
    }
}

#[tokio::test]
async fn two_peers_converge_on_a_todo_add() {
    let broker = Broker::new();
    let remote_a: Arc<dyn RemoteStorage> = Arc::new(MemoryRemote::new(broker.clone(), "alice"));
    let remote_b: Arc<dyn RemoteStorage> = Arc::new(MemoryRemote::new(broker, "bob"));

    let store_a = MapStore::new(json!({"todos": {}}));
    let store_b = MapStore::new(json!({"todos": {}}));

    let alice = Multiplayer::attach_with_remote(store_a.clone(), remote_a, "alice", options())
        .await
        .unwrap();
    let bob = Multiplayer::attach_with_remote(store_b.clone(), remote_b, "bob", options())
        .await
        .unwrap();

    store_a.apply(merge::StatePatch::Set {
        root: "todos".to_string(),
        value: json!({"1": {"id": "1", "text": "write tests", "completed": false}}),
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        store_b.snapshot(),
        json!({"todos": {"1": {"id": "1", "text": "write tests", "completed": false}}})
    );
    assert!(bob.state().has_hydrated);

    alice.destroy().await;
    bob.destroy().await;
}

#[tokio::test]
async fn late_joiner_hydrates_existing_state() {
    let broker = Broker::new();
    let remote_a: Arc<dyn RemoteStorage> = Arc::new(MemoryRemote::new(broker.clone(), "alice"));

    let store_a = MapStore::new(json!({"todos": {}}));
    let alice = Multiplayer::attach_with_remote(store_a.clone(), remote_a, "alice", options())
        .await
        .unwrap();

    store_a.apply(merge::StatePatch::Set {
        root: "todos".to_string(),
        value: json!({"1": {"id": "1", "text": "pre-existing", "completed": false}}),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let remote_b: Arc<dyn RemoteStorage> = Arc::new(MemoryRemote::new(broker, "bob"));
    let store_b = MapStore::new(json!({"todos": {}}));
    let bob = Multiplayer::attach_with_remote(store_b.clone(), remote_b, "bob", options())
        .await
        .unwrap();

    assert_eq!(
        store_b.snapshot(),
        json!({"todos": {"1": {"id": "1", "text": "pre-existing", "completed": false}}})
    );

    alice.destroy().await;
    bob.destroy().await;
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let broker = Broker::new();
    let remote_a: Arc<dyn RemoteStorage> = Arc::new(MemoryRemote::new(broker.clone(), "alice"));
    let remote_b: Arc<dyn RemoteStorage> = Arc::new(MemoryRemote::new(broker, "bob"));

    let store_a = MapStore::new(json!({"todos": {}}));
    let store_b = MapStore::new(json!({"todos": {}}));

    let mut other_namespace_options = options();
    other_namespace_options.namespace = "other-app".to_string();

    let alice = Multiplayer::attach_with_remote(store_a.clone(), remote_a, "alice", options())
        .await
        .unwrap();
    let bob = Multiplayer::attach_with_remote(
        store_b.clone(),
        remote_b,
        "bob",
        other_namespace_options,
    )
    .await
    .unwrap();

    store_a.apply(merge::StatePatch::Set {
        root: "todos".to_string(),
        value: json!({"1": {"id": "1"}}),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store_b.snapshot(), json!({"todos": {}}));

    alice.destroy().await;
    bob.destroy().await;
}
