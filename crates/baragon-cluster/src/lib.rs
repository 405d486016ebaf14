//! baragon-cluster — how the coordinator and the agents talk.
//!
//! The coordination service itself is external. This crate pins down
//! what Baragon needs from it and nothing more:
//!
//! ```text
//! CoordinationStore (trait)
//!   ├── put / get / delete / list(prefix)
//!   └── watch(prefix) → stream of WatchEvent
//!
//! Key layout (keys.rs)
//!   ├── /groups/{group}/agents/{node_id}     agent registration + heartbeat
//!   ├── /groups/{group}/excluded/{node_id}   administrative exclusion
//!   ├── /requests/{group}/{request_id}/{node_id}   distribution record
//!   └── /outcomes/{request_id}/{node_id}     node outcome
//!
//! GroupMembership
//!   ├── Tracks agents per group (Ready, Dead, Excluded)
//!   └── Produces the membership snapshot a rollout targets
//! ```
//!
//! `MemoryStore` is the in-process implementation used by the
//! standalone daemon and by tests.

pub mod error;
pub mod keys;
pub mod membership;
pub mod memory;
pub mod store;

pub use error::{ClusterError, ClusterResult};
pub use membership::{GroupMembership, Member, MemberStatus, MembershipSnapshot, Target};
pub use memory::MemoryStore;
pub use store::{CoordinationStore, WatchEvent, WatchStream};
