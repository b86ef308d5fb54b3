//! Connection, hydration, and bidirectional sync lifecycle tying a
//! local reactive store to a remote key/value and pubsub service.

mod lifecycle;
mod store;

pub use lifecycle::LifecycleState;
pub use store::Store;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use key::KeyManager;
use metrics::{PerformanceMetrics, PerformanceMonitor, RateLimiter};
use remote::{ConnectionState, RemoteEvent, RemoteStorage};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("multiplayer store has been destroyed")]
    Destroyed,
    #[error(transparent)]
    Connect(#[from] remote::ConnectError),
    #[error(transparent)]
    Protocol(#[from] remote::ProtocolError),
}

/// Wires a [`Store`] (the host application's local state container) to
/// a [`RemoteStorage`] (the remote key/value and pubsub service),
/// keeping them converged in both directions.
pub struct Orchestrator<St: Store> {
    store: Arc<St>,
    remote: Arc<dyn RemoteStorage>,
    key_manager: KeyManager,
    client_id: String,
    sync: Vec<String>,
    z_factor: usize,
    rate_limiter: Option<RateLimiter>,
    monitor: Mutex<PerformanceMonitor>,
    lifecycle_tx: watch::Sender<LifecycleState>,
    lifecycle_rx: watch::Receiver<LifecycleState>,
    hydrating: AtomicBool,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<St: Store> Orchestrator<St> {
    /// `sync` is the effective list of root fields kept in sync; `z_factor`
    /// is expected to already be clamped to `[0, 10]` by the caller.
    /// `rate_limit`, if set, caps outbound remote writes to that many
    /// operations per second.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<St>,
        remote: Arc<dyn RemoteStorage>,
        namespace: impl Into<String>,
        client_id: impl Into<String>,
        sync: Vec<String>,
        z_factor: usize,
        rate_limit: Option<u32>,
    ) -> Arc<Self> {
        let (lifecycle_tx, lifecycle_rx) = watch::channel(LifecycleState::Init);
        Arc::new(Self {
            store,
            remote,
            key_manager: KeyManager::new(namespace),
            client_id: client_id.into(),
            sync,
            z_factor,
            rate_limiter: rate_limit.map(RateLimiter::new),
            monitor: Mutex::new(PerformanceMonitor::new()),
            lifecycle_tx,
            lifecycle_rx,
            hydrating: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn guard_destroyed(&self) -> Result<(), Error> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        let _ = self.lifecycle_tx.send(state);
    }

    /// Dial the remote service, start the bidirectional sync loops, and
    /// perform initial hydration.
    pub async fn connect(self: &Arc<Self>) -> Result<(), Error> {
        self.guard_destroyed()?;
        self.set_lifecycle(LifecycleState::Connecting);
        self.remote.connect().await?;

        self.spawn_connection_state_watcher();
        self.spawn_local_change_listener();
        self.spawn_remote_event_listener();

        self.hydrate().await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.guard_destroyed()?;
        self.remote.disconnect().await;
        self.set_lifecycle(LifecycleState::Disconnected);
        Ok(())
    }

    /// Re-run hydration against the remote's current contents, folding
    /// every entry into the local store. Calls while a hydration is
    /// already in flight are ignored.
    pub async fn hydrate(self: &Arc<Self>) -> Result<(), Error> {
        self.guard_destroyed()?;
        if self
            .hydrating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("hydration already in progress, skipping");
            return Ok(());
        }

        let result = self.hydrate_inner().await;
        self.hydrating.store(false, Ordering::SeqCst);
        result?;

        self.set_lifecycle(LifecycleState::Hydrated);
        Ok(())
    }

    async fn hydrate_inner(&self) -> Result<(), Error> {
        let prefix = self.key_manager.namespace_range().start;
        let mut cursor = None;
        let mut acc = self.store.snapshot().as_object().cloned().unwrap_or_default();
        let mut touched_roots = std::collections::BTreeSet::new();

        loop {
            let page = self.remote.range(&prefix, cursor.clone()).await?;
            for (full_key, value) in &page.entries {
                match self.key_manager.parse_key(full_key) {
                    Ok(segments) if !segments.is_empty() => {
                        touched_roots.insert(segments[0].clone());
                        merge::set_nested_value(&mut acc, &segments, unwrap_stored_value(value));
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%full_key, %error, "skipping key outside our namespace"),
                }
            }
            if page.cursor.is_none() {
                break;
            }
            cursor = page.cursor;
        }

        for root in touched_roots {
            if let Some(value) = acc.get(&root) {
                self.store.apply(merge::StatePatch::Set {
                    root: root.clone(),
                    value: value.clone(),
                });
            }
        }
        info!("hydration complete");
        Ok(())
    }

    pub async fn re_hydrate(self: &Arc<Self>) -> Result<(), Error> {
        self.hydrate().await
    }

    /// Delete every key this client owns in the remote namespace.
    pub async fn clear_storage(&self) -> Result<(), Error> {
        self.guard_destroyed()?;
        let prefix = self.key_manager.namespace_range().start;
        let mut cursor = None;
        loop {
            let page = self.remote.range(&prefix, cursor.clone()).await?;
            for (full_key, _) in &page.entries {
                self.remote.delete(full_key).await?;
            }
            if page.cursor.is_none() {
                break;
            }
            cursor = page.cursor;
        }
        Ok(())
    }

    pub fn connection_status(&self) -> LifecycleState {
        *self.lifecycle_rx.borrow()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.monitor.try_lock().map(|m| m.metrics()).unwrap_or(PerformanceMetrics {
            average_sync_time: 0.0,
        })
    }

    /// Tear down all background tasks and the remote connection. Every
    /// other public method returns [`Error::Destroyed`] afterwards.
    /// Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.remote.disconnect().await;
        self.set_lifecycle(LifecycleState::Destroyed);
    }

    fn spawn_connection_state_watcher(self: &Arc<Self>) {
        let this = self.clone();
        let mut remote_state = this.remote.connection_state();
        let handle = tokio::spawn(async move {
            loop {
                if remote_state.changed().await.is_err() {
                    return;
                }
                let transport = *remote_state.borrow();
                let next = this.connection_status().on_transport_state(transport);
                this.set_lifecycle(next);
                if transport == ConnectionState::Connected && next != LifecycleState::Hydrated {
                    if let Err(error) = this.hydrate().await {
                        warn!(%error, "re-hydration after reconnect failed");
                    }
                }
            }
        });
        self.spawn(handle);
    }

    fn spawn_local_change_listener(self: &Arc<Self>) {
        let this = self.clone();
        let mut changes = this.store.subscribe();
        let mut previous = changes.borrow().clone();
        let handle = tokio::spawn(async move {
            loop {
                if changes.changed().await.is_err() {
                    return;
                }
                let next = changes.borrow().clone();
                this.handle_local_state_change(&previous, &next).await;
                previous = next;
            }
        });
        self.spawn(handle);
    }

    fn spawn_remote_event_listener(self: &Arc<Self>) {
        let this = self.clone();
        let mut events = this.remote.subscribe();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => this.handle_remote_event(event),
                    Err(error) => warn!(%error, "remote event stream lagged, some updates dropped"),
                }
            }
        });
        self.spawn(handle);
    }

    fn spawn(&self, handle: JoinHandle<()>) {
        // Best-effort: if the lock is contended, the task still runs
        // and will simply outlive `destroy()`'s abort loop.
        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.push(handle);
        }
    }

    /// For every synced root field that changed, enumerate leaf paths on
    /// both sides up to `z_factor`: a path dropped between `old` and
    /// `new` is deleted remotely; a path whose value actually changed is
    /// set, carrying `diff(oldLeaf, newLeaf)` rather than the whole
    /// field so an unrelated sibling key is never touched.
    async fn handle_local_state_change(&self, old: &Value, new: &Value) {
        let (Some(old_obj), Some(new_obj)) = (old.as_object(), new.as_object()) else {
            warn!("local state root is not an object, cannot sync granularly");
            return;
        };

        for field in &self.sync {
            if field == "multiplayer" {
                continue;
            }
            let old_value = old_obj.get(field).cloned().unwrap_or(Value::Null);
            let new_value = new_obj.get(field).cloned().unwrap_or(Value::Null);
            if old_value == new_value {
                continue;
            }

            let parent = [field.clone()];
            let old_paths: BTreeMap<Vec<String>, Value> =
                merge::extract_paths(&old_value, &parent, self.z_factor)
                    .into_iter()
                    .collect();
            let new_paths: BTreeMap<Vec<String>, Value> =
                merge::extract_paths(&new_value, &parent, self.z_factor)
                    .into_iter()
                    .collect();

            for path in old_paths.keys() {
                if !new_paths.contains_key(path) {
                    self.propagate_delete(path).await;
                }
            }
            for (path, new_leaf) in &new_paths {
                let old_leaf = old_paths.get(path);
                if old_leaf == Some(new_leaf) {
                    continue;
                }
                let base = old_leaf.cloned().unwrap_or(Value::Null);
                self.propagate_set(path, diff_or_full(&base, new_leaf)).await;
            }
        }
    }

    async fn propagate_set(&self, path: &[String], value: Value) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        let full_key = self.key_manager.make_key(path);
        let payload = self.wrap_value(value);
        let started = Instant::now();
        if let Err(error) = self.remote.set(&full_key, payload).await {
            warn!(%full_key, %error, "failed to propagate local change to remote");
            return;
        }
        self.monitor.lock().await.record(started.elapsed());
    }

    async fn propagate_delete(&self, path: &[String]) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        let full_key = self.key_manager.make_key(path);
        let started = Instant::now();
        if let Err(error) = self.remote.delete(&full_key).await {
            warn!(%full_key, %error, "failed to propagate local deletion to remote");
            return;
        }
        self.monitor.lock().await.record(started.elapsed());
    }

    /// Build the stored-value invariant `{ value, clientId, timestamp }`
    /// so the writer is attributable straight off the stored payload,
    /// without relying on any transport-specific side channel.
    fn wrap_value(&self, value: Value) -> Value {
        json!({
            "value": value,
            "clientId": self.client_id,
            "timestamp": now_millis(),
        })
    }

    fn handle_remote_event(&self, event: RemoteEvent) {
        if event.client_id == self.client_id {
            debug!(key = %event.key, "suppressing echo of our own write");
            return;
        }

        let segments = match self.key_manager.parse_key(&event.key) {
            Ok(segments) => segments,
            Err(error) => {
                warn!(key = %event.key, %error, "dropping remote event outside our namespace");
                return;
            }
        };
        let path = segments.join(".");
        let inner_value = event.value.as_ref().map(unwrap_stored_value);

        let current = self.store.snapshot();
        let Some(patch) =
            merge::build_state_update(&path, inner_value.as_ref(), &current, self.z_factor)
        else {
            return;
        };
        self.store.apply(patch);
    }
}

/// Extract the `value` a stored payload wraps, falling back to the raw
/// value itself for entries that predate the wrapper invariant.
fn unwrap_stored_value(value: &Value) -> Value {
    value.get("value").cloned().unwrap_or_else(|| value.clone())
}

/// The value to send for a changed leaf: the whole new value, or a
/// sparse diff against the old one when both sides are mappings - either
/// form is accepted by [`merge::build_state_update`] on the receiving
/// side.
fn diff_or_full(old: &Value, new: &Value) -> Value {
    match diff::diff(old, new) {
        diff::StateDiff::Full(v) => v,
        diff::StateDiff::Diff(map) => Value::Object(map),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
