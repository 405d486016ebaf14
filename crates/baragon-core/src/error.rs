//! Error types for the request model.

use thiserror::Error;

/// Result type alias for request construction.
pub type RequestResult<T> = Result<T, RequestError>;

/// Errors raised while constructing or validating a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid request id {id:?}: cannot be empty or contain whitespace, '/', or '|'")]
    InvalidRequestId { id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
