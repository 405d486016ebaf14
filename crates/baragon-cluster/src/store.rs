//! The coordination store abstraction.
//!
//! Distribution and status reporting both go through this trait, so the
//! transport (a consistent key-value store, a message bus, ...) can be
//! swapped without touching coordinator or agent logic.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ClusterError, ClusterResult};

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
    /// Events were dropped; the watcher must re-list its prefix.
    Resync,
}

impl WatchEvent {
    pub fn key(&self) -> Option<&str> {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => Some(key),
            WatchEvent::Resync => None,
        }
    }
}

/// Stream of watch events; ends when the store shuts down.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Minimal key-value interface Baragon needs from its coordination service.
///
/// Delivery through `watch` is at-least-once from the consumer's point of
/// view: a consumer may see a key it has already handled (after a
/// `Resync`, or after a restart) and must treat it idempotently.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> ClusterResult<()>;

    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> ClusterResult<bool>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> ClusterResult<Vec<(String, Vec<u8>)>>;

    /// Changes under `prefix` from now on. Entries that already exist are
    /// not replayed; list them after subscribing.
    async fn watch(&self, prefix: &str) -> ClusterResult<WatchStream>;
}

/// Serialize `value` as JSON and store it at `key`.
pub async fn put_json<T: Serialize>(
    store: &dyn CoordinationStore,
    key: &str,
    value: &T,
) -> ClusterResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| ClusterError::Serialize(e.to_string()))?;
    store.put(key, bytes).await
}

/// Fetch and decode the JSON value at `key`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CoordinationStore,
    key: &str,
) -> ClusterResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

/// Decode a JSON value read from `key`.
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> ClusterResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ClusterError::Deserialize {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
