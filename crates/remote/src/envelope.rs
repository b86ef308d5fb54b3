use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire shape exchanged with the remote key/value and pubsub service.
/// `value: None` represents a delete of `key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteEnvelope {
    pub key: String,
    pub value: Option<Value>,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub timestamp: u64,
}

/// A change observed over the subscription, ready for echo-suppression
/// and merge by the orchestrator.
pub type RemoteEvent = RemoteEnvelope;

/// One page of a `range` enumeration used during hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePage {
    pub entries: Vec<(String, Value)>,
    pub cursor: Option<String>,
}
