//! Cluster error types.

use thiserror::Error;

/// Errors raised by the coordination layer.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid key segment {0:?}: cannot be empty or contain '/'")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error at {key}: {reason}")]
    Deserialize { key: String, reason: String },
}

pub type ClusterResult<T> = Result<T, ClusterError>;
