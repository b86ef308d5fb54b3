//! Storage-key encoding and per-store namespacing.

mod codec;
mod manager;

pub use codec::{decode_segment, encode_segment};
pub use manager::{KeyManager, NamespaceRange};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key is not within this store's namespace: '{0}'")]
    InvalidKey(String),
}
