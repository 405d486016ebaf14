//! baragon-rollout — fleet-wide rollout of load balancer changes.
//!
//! ```text
//! Coordinator
//!   ├── submit / execute   accept a request, queue it on its lanes
//!   ├── status / cancel
//!   └── per request:
//!         membership snapshot ──► publish records ──► collect outcomes
//!                                                         │
//!                                     aggregate (pure) ◄──┘
//!                                       ├── SUCCESS: advance known-good, purge edge cache
//!                                       └── FAILURE: plan_rollback ──► succeeded nodes
//! ```
//!
//! Aggregation and rollback planning live in [`aggregate`] as pure
//! functions of the collected outcomes; [`coordinator`] does the I/O.

pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod policy;

pub use coordinator::Coordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use policy::{RollbackPolicy, RolloutPolicy, SubmitOptions};
