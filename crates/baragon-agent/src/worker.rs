//! Agent worker — connects a node applier to the coordination store.
//!
//! The worker registers the node with its group, keeps its heartbeat
//! fresh, and applies every distribution record addressed to it:
//!
//! ```text
//! /requests/{group}/{request_id}/{node_id} ──► NodeApplier ──► /outcomes/{request_id}/{node_id}
//! ```
//!
//! Records are picked up from the watch stream and, on startup or after a
//! resync, from a full listing of the group prefix. Redelivery is safe
//! because the applier returns recorded outcomes for requests it has
//! already applied.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use baragon_cluster::keys::{self, parse_request_key};
use baragon_cluster::store::put_json;
use baragon_cluster::{CoordinationStore, GroupMembership, WatchEvent};
use baragon_core::{AgentMetadata, BaragonRequest, NodeOutcome};

use crate::applier::NodeApplier;
use crate::error::WorkerError;

/// Runs one agent against the coordination store.
pub struct AgentWorker {
    store: Arc<dyn CoordinationStore>,
    membership: GroupMembership,
    applier: Arc<NodeApplier>,
    metadata: AgentMetadata,
    heartbeat_interval: Duration,
}

impl AgentWorker {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        applier: Arc<NodeApplier>,
        metadata: AgentMetadata,
    ) -> Self {
        Self {
            membership: GroupMembership::new(store.clone()),
            store,
            applier,
            metadata,
            heartbeat_interval: Duration::from_secs(5),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Register the node. Separate from [`run`](Self::run) so callers can
    /// wait until the node is targetable.
    pub async fn register(&self) -> Result<(), WorkerError> {
        self.membership.register(&self.metadata).await?;
        Ok(())
    }

    /// Process requests until `shutdown` flips, then leave the group.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let group = self.metadata.group.clone();
        let node_id = self.metadata.agent_id.clone();
        let prefix = keys::group_requests_prefix(&group);

        self.register().await?;
        let mut events = self.store.watch(&prefix).await?;
        self.catch_up(&prefix).await?;

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        info!(%group, %node_id, "agent worker started");

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    match self.membership.heartbeat(&group, &node_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            // Registration gone; come back.
                            if let Err(e) = self.register().await {
                                warn!(%node_id, error = %e, "re-registration failed");
                            }
                        }
                        Err(e) => warn!(%node_id, error = %e, "heartbeat failed"),
                    }
                }
                event = events.next() => {
                    match event {
                        Some(WatchEvent::Put { key, value }) => self.dispatch(key, value),
                        Some(WatchEvent::Delete { .. }) => {}
                        Some(WatchEvent::Resync) => {
                            warn!(%node_id, "watch lagged, re-listing requests");
                            if let Err(e) = self.catch_up(&prefix).await {
                                warn!(%node_id, error = %e, "catch-up failed");
                            }
                        }
                        None => {
                            warn!(%node_id, "watch stream closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!(%node_id, "agent worker shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.membership.leave(&group, &node_id).await {
            warn!(%node_id, error = %e, "failed to leave group");
        }
        Ok(())
    }

    async fn catch_up(&self, prefix: &str) -> Result<(), WorkerError> {
        let pending = self.store.list(prefix).await?;
        debug!(records = pending.len(), "catching up on distribution records");
        for (key, value) in pending {
            self.dispatch(key, value);
        }
        Ok(())
    }

    /// Apply a record addressed to this node in the background.
    fn dispatch(&self, key: String, value: Vec<u8>) {
        let Some(parsed) = parse_request_key(&key) else {
            return;
        };
        if parsed.node_id != self.metadata.agent_id {
            return;
        }
        let request_id = parsed.request_id.to_string();

        let store = self.store.clone();
        let applier = self.applier.clone();
        tokio::spawn(async move {
            let outcome = handle_record(&applier, &request_id, &value).await;
            let out_key = keys::outcome_key(&request_id, applier.node_id());
            if let Err(e) = put_json(store.as_ref(), &out_key, &outcome).await {
                warn!(%request_id, error = %e, "failed to publish outcome");
            }
        });
    }
}

/// Decode and apply one distribution record.
pub async fn handle_record(applier: &NodeApplier, request_id: &str, value: &[u8]) -> NodeOutcome {
    match serde_json::from_slice::<BaragonRequest>(value) {
        Ok(request) if request.request_id() == request_id => applier.apply(&request).await,
        Ok(request) => applier.reject(
            request_id,
            &format!("record carries request id {}", request.request_id()),
        ),
        Err(e) => applier.reject(request_id, &e.to_string()),
    }
}
