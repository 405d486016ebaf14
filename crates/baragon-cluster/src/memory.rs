//! In-process coordination store.
//!
//! Entries live in an ordered map; changes fan out to watchers over a
//! broadcast channel. A watcher that falls behind receives
//! [`WatchEvent::Resync`] instead of silently missing events.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::ClusterResult;
use crate::store::{CoordinationStore, WatchEvent, WatchStream};

const EVENT_CAPACITY: usize = 1024;

/// Coordination store held entirely in memory.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("entries lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> ClusterResult<()> {
        self.entries
            .write()
            .expect("entries lock")
            .insert(key.to_string(), value.clone());
        debug!(%key, "put");
        self.publish(WatchEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> ClusterResult<Option<Vec<u8>>> {
        Ok(self.entries.read().expect("entries lock").get(key).cloned())
    }

    async fn delete(&self, key: &str) -> ClusterResult<bool> {
        let existed = self
            .entries
            .write()
            .expect("entries lock")
            .remove(key)
            .is_some();
        if existed {
            self.publish(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn list(&self, prefix: &str) -> ClusterResult<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.read().expect("entries lock");
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch(&self, prefix: &str) -> ClusterResult<WatchStream> {
        let rx = self.events.subscribe();
        let prefix = prefix.to_string();

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watcher lagged, requesting resync");
                    Some((WatchEvent::Resync, rx))
                }
                Err(RecvError::Closed) => None,
            }
        })
        .filter(move |event| {
            let keep = match event.key() {
                Some(key) => key.starts_with(&prefix),
                None => true,
            };
            futures::future::ready(keep)
        });

        Ok(stream.boxed())
    }
}
