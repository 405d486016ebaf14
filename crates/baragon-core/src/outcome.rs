//! Per-node outcomes and the aggregate status derived from them.

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Result of one node applying one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Success,
    Failed,
    /// The node rejected the request before changing anything.
    InvalidRequestNoop,
}

/// Why a node did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRequest,
    MissingTemplate,
    RenderFailed,
    /// Config check refused the rendered files; prior config is still live.
    ValidationFailed,
    /// Files could not be swapped in; a restore was attempted.
    WriteFailed,
    /// Files were swapped but the load balancer did not reload.
    ReloadFailed,
    /// No outcome arrived in time; node state is unknown.
    Timeout,
}

/// Structured failure detail attached to a node outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// What one node reports back for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub request_id: String,
    pub status: NodeStatus,
    pub failure: Option<NodeFailure>,
    /// SHA-256 over the rendered artifact set, when files were rendered.
    #[serde(default)]
    pub config_digest: Option<String>,
    /// Unix millis when the outcome was decided.
    pub timestamp_ms: u64,
}

impl NodeOutcome {
    pub fn success(node_id: &str, request_id: &str, config_digest: Option<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            request_id: request_id.to_string(),
            status: NodeStatus::Success,
            failure: None,
            config_digest,
            timestamp_ms: crate::epoch_millis(),
        }
    }

    pub fn failed(node_id: &str, request_id: &str, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            request_id: request_id.to_string(),
            status: NodeStatus::Failed,
            failure: Some(NodeFailure {
                kind,
                detail: detail.into(),
            }),
            config_digest: None,
            timestamp_ms: crate::epoch_millis(),
        }
    }

    pub fn invalid_request(node_id: &str, request_id: &str, detail: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::InvalidRequestNoop,
            ..Self::failed(node_id, request_id, FailureKind::InvalidRequest, detail)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Fleet-wide verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallResult {
    Success,
    Failure,
    Cancelled,
}

/// Where a request is in its rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    /// Waiting behind another rollout for the same service and group.
    Queued,
    Distributing,
    Collecting,
    RollingBack,
    Completed,
    Cancelled,
}

/// Outcome of the single compensating rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub request_id: String,
    pub outcomes: Vec<NodeOutcome>,
    pub result: OverallResult,
}

/// Everything the submitter gets to see about a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStatus {
    pub request_id: String,
    pub phase: RequestPhase,
    /// One entry per targeted node, in node id order.
    pub outcomes: Vec<NodeOutcome>,
    /// Set once the rollout has finished.
    pub result: Option<OverallResult>,
    pub rollback: Option<RollbackReport>,
    pub message: Option<String>,
}

impl AggregateStatus {
    /// A freshly accepted request.
    pub fn queued(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            phase: RequestPhase::Queued,
            outcomes: Vec::new(),
            result: None,
            rollback: None,
            message: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn outcome_for(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_outcome_is_noop() {
        let outcome = NodeOutcome::invalid_request("n1", "r1", "bad payload");
        assert_eq!(outcome.status, NodeStatus::InvalidRequestNoop);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidRequest));
        assert!(!outcome.is_success());
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&NodeStatus::InvalidRequestNoop).unwrap();
        assert_eq!(json, "\"INVALID_REQUEST_NOOP\"");
        let json = serde_json::to_string(&FailureKind::ReloadFailed).unwrap();
        assert_eq!(json, "\"reload_failed\"");
    }

    #[test]
    fn outcome_lookup() {
        let mut status = AggregateStatus::queued("r1");
        assert!(!status.is_finished());
        status.outcomes.push(NodeOutcome::success("n1", "r1", None));
        assert!(status.outcome_for("n1").is_some());
        assert!(status.outcome_for("n2").is_none());
    }
}
