//! baragon-state — embedded state store for Baragon.
//!
//! Backed by [redb](https://docs.rs/redb). Agents use it as their node
//! ledger (applied service snapshots and recorded outcomes, which make
//! re-delivery of a request a no-op). The coordinator uses it for the
//! known-good state of each service and for request records.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
