//! Coordinator error types.

use thiserror::Error;

use baragon_cluster::ClusterError;
use baragon_core::RequestError;
use baragon_state::StateError;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors surfaced to whoever submits, inspects, or cancels a request.
///
/// Node failures are never errors here: they end up as outcomes in the
/// request's `AggregateStatus`.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown request: {0}")]
    UnknownRequest(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("coordination store error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}
