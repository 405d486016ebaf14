//! Group membership — which agents a rollout targets.
//!
//! Agents register their [`AgentMetadata`] under their group and keep it
//! fresh with heartbeats. A member whose last heartbeat is older than the
//! dead timeout is `Dead`; a member with an exclusion marker is
//! `Excluded`. Only `Ready` members are targeted.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use baragon_core::{AgentMetadata, NodeId, epoch_millis};

use crate::error::ClusterResult;
use crate::keys;
use crate::store::{CoordinationStore, decode, get_json, put_json};

/// Status of an agent within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Ready,
    Dead,
    Excluded,
}

/// One registered agent.
#[derive(Debug, Clone)]
pub struct Member {
    pub metadata: AgentMetadata,
    pub status: MemberStatus,
}

impl Member {
    pub fn node_id(&self) -> &str {
        &self.metadata.agent_id
    }
}

/// A node a request is distributed to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target {
    pub group: String,
    pub node_id: NodeId,
}

/// Membership of a set of groups at one instant.
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    /// Ready nodes, sorted by (group, node id).
    pub targets: Vec<Target>,
    pub excluded: Vec<Target>,
    pub dead: Vec<Target>,
}

impl MembershipSnapshot {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Reads and writes agent registrations in the coordination store.
#[derive(Clone)]
pub struct GroupMembership {
    store: Arc<dyn CoordinationStore>,
    dead_timeout: Duration,
}

impl GroupMembership {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            dead_timeout: Duration::from_secs(30),
        }
    }

    /// Set the dead node detection timeout.
    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    /// Register (or re-register) an agent, stamping its heartbeat.
    pub async fn register(&self, metadata: &AgentMetadata) -> ClusterResult<()> {
        keys::segment(&metadata.group)?;
        keys::segment(&metadata.agent_id)?;

        let mut metadata = metadata.clone();
        metadata.last_heartbeat_ms = epoch_millis();
        let key = keys::agent_key(&metadata.group, &metadata.agent_id);
        put_json(self.store.as_ref(), &key, &metadata).await?;
        info!(group = %metadata.group, node_id = %metadata.agent_id, "agent registered");
        Ok(())
    }

    /// Refresh an agent's heartbeat. Returns false for an unknown agent.
    pub async fn heartbeat(&self, group: &str, node_id: &str) -> ClusterResult<bool> {
        let key = keys::agent_key(group, node_id);
        match get_json::<AgentMetadata>(self.store.as_ref(), &key).await? {
            Some(mut metadata) => {
                metadata.last_heartbeat_ms = epoch_millis();
                put_json(self.store.as_ref(), &key, &metadata).await?;
                debug!(%group, %node_id, "heartbeat");
                Ok(true)
            }
            None => {
                warn!(%group, %node_id, "heartbeat from unregistered agent");
                Ok(false)
            }
        }
    }

    /// Remove an agent's registration.
    pub async fn leave(&self, group: &str, node_id: &str) -> ClusterResult<bool> {
        let existed = self.store.delete(&keys::agent_key(group, node_id)).await?;
        if existed {
            info!(%group, %node_id, "agent left group");
        }
        Ok(existed)
    }

    /// Stop targeting a node without unregistering it.
    pub async fn exclude(&self, group: &str, node_id: &str) -> ClusterResult<()> {
        keys::segment(group)?;
        keys::segment(node_id)?;
        self.store
            .put(&keys::excluded_key(group, node_id), Vec::new())
            .await?;
        info!(%group, %node_id, "agent excluded");
        Ok(())
    }

    pub async fn include(&self, group: &str, node_id: &str) -> ClusterResult<bool> {
        let existed = self.store.delete(&keys::excluded_key(group, node_id)).await?;
        if existed {
            info!(%group, %node_id, "agent included");
        }
        Ok(existed)
    }

    /// All registered agents of a group with their status, by node id.
    pub async fn list_members(&self, group: &str) -> ClusterResult<Vec<Member>> {
        let excluded: BTreeSet<String> = self
            .store
            .list(&keys::excluded_prefix(group))
            .await?
            .into_iter()
            .map(|(key, _)| keys::last_segment(&key).to_string())
            .collect();

        let now = epoch_millis();
        let dead_after = self.dead_timeout.as_millis() as u64;

        let mut members = Vec::new();
        for (key, value) in self.store.list(&keys::agents_prefix(group)).await? {
            let metadata: AgentMetadata = match decode(&key, &value) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%key, error = %e, "skipping undecodable agent registration");
                    continue;
                }
            };

            let status = if excluded.contains(&metadata.agent_id) {
                MemberStatus::Excluded
            } else if now.saturating_sub(metadata.last_heartbeat_ms) > dead_after {
                MemberStatus::Dead
            } else {
                MemberStatus::Ready
            };
            members.push(Member { metadata, status });
        }

        members.sort_by(|a, b| a.metadata.agent_id.cmp(&b.metadata.agent_id));
        Ok(members)
    }

    /// Membership of every given group. A node registered in more than one
    /// of the groups is targeted once per group.
    pub async fn snapshot(&self, groups: &[String]) -> ClusterResult<MembershipSnapshot> {
        let mut snapshot = MembershipSnapshot::default();
        let groups: BTreeSet<&String> = groups.iter().collect();

        for group in groups {
            for member in self.list_members(group).await? {
                let target = Target {
                    group: group.clone(),
                    node_id: member.metadata.agent_id.clone(),
                };
                match member.status {
                    MemberStatus::Ready => snapshot.targets.push(target),
                    MemberStatus::Excluded => snapshot.excluded.push(target),
                    MemberStatus::Dead => snapshot.dead.push(target),
                }
            }
        }

        snapshot.targets.sort();
        snapshot.targets.dedup();
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn membership() -> (Arc<MemoryStore>, GroupMembership) {
        let store = Arc::new(MemoryStore::new());
        let membership = GroupMembership::new(store.clone());
        (store, membership)
    }

    async fn make_stale(store: &MemoryStore, group: &str, node_id: &str) {
        let key = keys::agent_key(group, node_id);
        let mut metadata: AgentMetadata = get_json(store, &key).await.unwrap().unwrap();
        metadata.last_heartbeat_ms = 1000;
        put_json(store, &key, &metadata).await.unwrap();
    }

    #[tokio::test]
    async fn register_and_list() {
        let (_, membership) = membership();
        membership
            .register(&AgentMetadata::new("node-2", "edge"))
            .await
            .unwrap();
        membership
            .register(&AgentMetadata::new("node-1", "edge").with_domain("lb.example.com"))
            .await
            .unwrap();

        let members = membership.list_members("edge").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].node_id(), "node-1");
        assert_eq!(members[0].status, MemberStatus::Ready);
        assert_eq!(members[0].metadata.domain.as_deref(), Some("lb.example.com"));
        assert!(members[0].metadata.last_heartbeat_ms > 0);
    }

    #[tokio::test]
    async fn register_rejects_bad_segments() {
        let (_, membership) = membership();
        assert!(
            membership
                .register(&AgentMetadata::new("a/b", "edge"))
                .await
                .is_err()
        );
        assert!(membership.register(&AgentMetadata::new("n1", "")).await.is_err());
    }

    #[tokio::test]
    async fn heartbeat_unknown_agent_returns_false() {
        let (_, membership) = membership();
        assert!(!membership.heartbeat("edge", "ghost").await.unwrap());
    }

    #[tokio::test]
    async fn heartbeat_revives_stale_agent() {
        let (store, membership) = membership();
        membership
            .register(&AgentMetadata::new("node-1", "edge"))
            .await
            .unwrap();
        make_stale(&store, "edge", "node-1").await;
        assert_eq!(
            membership.list_members("edge").await.unwrap()[0].status,
            MemberStatus::Dead
        );

        assert!(membership.heartbeat("edge", "node-1").await.unwrap());
        assert_eq!(
            membership.list_members("edge").await.unwrap()[0].status,
            MemberStatus::Ready
        );
    }

    #[tokio::test]
    async fn leave_removes_agent() {
        let (_, membership) = membership();
        membership
            .register(&AgentMetadata::new("node-1", "edge"))
            .await
            .unwrap();
        assert!(membership.leave("edge", "node-1").await.unwrap());
        assert!(!membership.leave("edge", "node-1").await.unwrap());
        assert!(membership.list_members("edge").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_splits_ready_excluded_and_dead() {
        let (store, membership) = membership();
        for node in ["node-1", "node-2", "node-3"] {
            membership
                .register(&AgentMetadata::new(node, "edge"))
                .await
                .unwrap();
        }
        membership
            .register(&AgentMetadata::new("node-9", "internal"))
            .await
            .unwrap();
        membership.exclude("edge", "node-2").await.unwrap();
        make_stale(&store, "edge", "node-3").await;

        let snapshot = membership
            .snapshot(&["edge".to_string(), "internal".to_string()])
            .await
            .unwrap();

        let ready: Vec<_> = snapshot.targets.iter().map(|t| t.node_id.as_str()).collect();
        assert_eq!(ready, ["node-1", "node-9"]);
        assert_eq!(snapshot.excluded[0].node_id, "node-2");
        assert_eq!(snapshot.dead[0].node_id, "node-3");

        membership.include("edge", "node-2").await.unwrap();
        let snapshot = membership.snapshot(&["edge".to_string()]).await.unwrap();
        assert_eq!(snapshot.targets.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_of_unknown_group_is_empty() {
        let (_, membership) = membership();
        let snapshot = membership.snapshot(&["nobody".to_string()]).await.unwrap();
        assert!(snapshot.is_empty());
    }
}
