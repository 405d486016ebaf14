//! baragon-core — shared model for the Baragon rollout control plane.
//!
//! Everything that crosses a process boundary lives here: the
//! [`BaragonRequest`] operators submit, the service and upstream values it
//! carries, the [`NodeOutcome`] each agent reports, and the
//! [`AggregateStatus`] the coordinator derives from them.
//!
//! All values are immutable once constructed. Transforms such as
//! [`BaragonRequest::with_updated_domains`] return new values.

pub mod config;
pub mod error;
pub mod outcome;
pub mod request;
pub mod types;

pub use config::BaragonConfig;
pub use error::{RequestError, RequestResult};
pub use outcome::*;
pub use request::{BaragonRequest, RequestAction, RequestBuilder};
pub use types::*;

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
