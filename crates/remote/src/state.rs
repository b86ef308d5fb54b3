/// Lifecycle of the transport's connection to the remote service.
///
/// Broadcast over a `watch` channel rather than polled, since the
/// orchestrator needs to react to every transition rather than just the
/// latest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Counters surfaced through `getConnectionStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionStats {
    pub reconnect_count: u32,
    pub last_connected_at: Option<u64>,
}
