use std::path::PathBuf;
use std::time::Duration;

use baragon_core::FailureKind;

/// Errors from loading templates or rendering config files.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template {name} could not be found")]
    MissingTemplate { name: String },

    #[error("failed to load template {name}: {reason}")]
    TemplateLoad { name: String, reason: String },

    #[error("bad filename pattern {pattern:?}: {reason}")]
    Filename { pattern: String, reason: String },

    #[error("template {name} failed to render: {reason}")]
    Template { name: String, reason: String },

    #[error("failed to build render context: {0}")]
    Context(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Errors from the load balancer hooks.
#[derive(Debug, thiserror::Error)]
pub enum LbError {
    #[error("failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
}

pub type LbResult<T> = Result<T, LbError>;

/// Errors writing rendered files under the config root.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("{path} is outside the config root")]
    OutsideRoot { path: PathBuf },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type WriteResult<T> = Result<T, WriteError>;

/// Stage of the apply pipeline that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Reload,
}

/// Why a node failed to apply a request.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("config check failed: {0}")]
    Validation(#[source] LbError),

    #[error("failed to stage config: {0}")]
    Staging(#[source] WriteError),

    #[error("failed to write config: {0}")]
    Write(#[source] WriteError),

    #[error("reload failed: {0}")]
    Reload(#[source] LbError),

    #[error("{stage:?} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("node state: {0}")]
    State(#[from] baragon_state::StateError),
}

pub type ApplyResult<T> = Result<T, ApplyError>;

impl ApplyError {
    /// The outcome failure kind reported for this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ApplyError::Render(RenderError::MissingTemplate { .. }) => FailureKind::MissingTemplate,
            ApplyError::Render(_) => FailureKind::RenderFailed,
            ApplyError::Validation(_) | ApplyError::Staging(_) => FailureKind::ValidationFailed,
            ApplyError::Timeout {
                stage: Stage::Validate,
                ..
            } => FailureKind::ValidationFailed,
            ApplyError::Write(_) | ApplyError::State(_) => FailureKind::WriteFailed,
            ApplyError::Reload(_)
            | ApplyError::Timeout {
                stage: Stage::Reload,
                ..
            } => FailureKind::ReloadFailed,
        }
    }
}

/// Errors that stop the agent worker itself.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Cluster(#[from] baragon_cluster::ClusterError),
}
