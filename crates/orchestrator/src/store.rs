use serde_json::Value;
use tokio::sync::watch;

use merge::StatePatch;

/// The contract the orchestrator needs from whatever reactive-store
/// implementation hosts it (Zustand, Redux, a hand-rolled `RwLock`,
/// anything that can hand back a `Value` snapshot and a change feed).
///
/// This is the seam an embedding application implements; the crate
/// ships no concrete `Store` of its own.
pub trait Store: Send + Sync + 'static {
    /// Full current state as a JSON value; always an object.
    fn snapshot(&self) -> Value;

    /// Apply a patch produced by [`merge::build_state_update`] to the
    /// host's state container.
    fn apply(&self, patch: StatePatch);

    /// A channel that emits the full state snapshot on every local
    /// mutation, including ones the orchestrator itself applied.
    fn subscribe(&self) -> watch::Receiver<Value>;
}
