//! baragon-edgecache — invalidating edge caches after a rollout.
//!
//! When a request converges, cached responses for the service may be
//! stale. The coordinator hands the service to an [`EdgeCachePurger`]
//! before the request completes; a failed purge is logged and never
//! affects the rollout result.

pub mod cloudflare;
pub mod error;

use async_trait::async_trait;

use baragon_core::BaragonService;

pub use cloudflare::{CloudflareClient, CloudflareEdgeCache};
pub use error::{EdgeCacheError, EdgeCacheResult};

/// Invalidates cached content for a service.
#[async_trait]
pub trait EdgeCachePurger: Send + Sync {
    /// Purge the service's content. Returns false when some part of the
    /// purge was refused or could not be routed.
    async fn invalidate(&self, service: &BaragonService) -> EdgeCacheResult<bool>;
}
