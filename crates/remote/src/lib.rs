//! Transport to the remote key/value and pubsub service: a
//! `RemoteStorage` trait with a real websocket/HTTP implementation and
//! an in-process test double, plus the connection-lifecycle types both
//! share.

mod backoff;
mod envelope;
mod http_ws;
mod memory;
mod state;

pub use backoff::ReconnectBackoff;
pub use envelope::{RangePage, RemoteEnvelope, RemoteEvent};
pub use http_ws::{HttpWsRemote, TokenSource};
pub use memory::{Broker, MemoryRemote};
pub use state::{ConnectionStats, ConnectionState};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid remote endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("websocket transport error")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http transport error")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("not connected to the remote service")]
    NotConnected,
    #[error("remote service rejected the request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("malformed remote payload")]
    Malformed(#[from] serde_json::Error),
}

/// The remote half of the multiplayer store: durable key/value storage
/// plus a pubsub feed of changes other clients make to the same
/// namespace.
///
/// Implementors own their own reconnect policy; callers observe
/// connectivity through [`RemoteStorage::connection_state`] rather than
/// by inspecting the result of individual calls.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn connect(&self) -> Result<(), ConnectError>;

    async fn disconnect(&self);

    async fn set(&self, key: &str, value: Value) -> Result<(), ProtocolError>;

    async fn delete(&self, key: &str) -> Result<(), ProtocolError>;

    /// Enumerate stored keys under `prefix`, paging through `cursor` as
    /// returned by the previous call. Used during hydration.
    async fn range(&self, prefix: &str, cursor: Option<String>) -> Result<RangePage, ProtocolError>;

    /// Subscribe to changes made by any client to this namespace,
    /// including this client's own writes (the orchestrator is
    /// responsible for echo suppression via `RemoteEvent::client_id`).
    fn subscribe(&self) -> BroadcastStream<RemoteEvent>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    fn connection_stats(&self) -> ConnectionStats;
}
