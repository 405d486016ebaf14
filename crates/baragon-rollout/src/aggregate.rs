//! Outcome aggregation and rollback planning.
//!
//! Pure functions of their inputs: the coordinator feeds them what it
//! collected and acts on what they return.

use std::collections::{BTreeMap, BTreeSet};

use baragon_core::{
    BaragonRequest, FailureKind, NodeId, NodeOutcome, OverallResult, RequestAction, RequestBuilder,
    RequestResult,
};
use baragon_state::ServiceRecord;

/// One outcome per expected node, in node id order. Nodes that did not
/// report are FAILED with kind Timeout; reports from unexpected nodes
/// are dropped.
pub fn complete_outcomes(
    request_id: &str,
    expected: &BTreeSet<NodeId>,
    mut received: BTreeMap<NodeId, NodeOutcome>,
    missing_detail: &str,
) -> Vec<NodeOutcome> {
    expected
        .iter()
        .map(|node| {
            received.remove(node).unwrap_or_else(|| {
                NodeOutcome::failed(node, request_id, FailureKind::Timeout, missing_detail)
            })
        })
        .collect()
}

/// SUCCESS iff every outcome is SUCCESS. No outcomes at all is SUCCESS:
/// there was nothing to converge.
pub fn aggregate(outcomes: &[NodeOutcome]) -> OverallResult {
    if outcomes.iter().all(NodeOutcome::is_success) {
        OverallResult::Success
    } else {
        OverallResult::Failure
    }
}

/// Nodes that applied the request.
pub fn succeeded_nodes(outcomes: &[NodeOutcome]) -> Vec<NodeId> {
    outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| o.node_id.clone())
        .collect()
}

/// Distinct config digests reported by succeeded nodes.
pub fn distinct_digests(outcomes: &[NodeOutcome]) -> BTreeSet<&str> {
    outcomes
        .iter()
        .filter(|o| o.is_success())
        .filter_map(|o| o.config_digest.as_deref())
        .collect()
}

/// Id of the compensating request for `request_id`.
pub fn rollback_id(request_id: &str) -> String {
    format!("{request_id}-rollback")
}

/// The request that returns nodes which applied `request` to the
/// service's last known-good state.
///
/// With a known-good record the rollback is the inverse upstream delta
/// between what `request` produced and the known-good set, rendered with
/// the known-good service snapshot. Without one, the service did not
/// exist before and the rollback deletes it. Either way the rollback
/// carries the original's `no_validate`, `no_reload` and
/// `upstream_update_only` flags, so it goes through the same apply path.
pub fn plan_rollback(
    request: &BaragonRequest,
    known_good: Option<&ServiceRecord>,
) -> RequestResult<BaragonRequest> {
    let id = rollback_id(request.request_id());

    let Some(known) = known_good else {
        return with_flags_of(request, BaragonRequest::builder(&id, request.service().clone()))
            .action(Some(RequestAction::Delete))
            .build();
    };

    let applied = match request.effective_action() {
        RequestAction::Delete => Vec::new(),
        RequestAction::Update | RequestAction::Reload => request.resolve_upstreams(&known.upstreams),
    };

    let remove = applied
        .iter()
        .filter(|u| !known.upstreams.iter().any(|k| k.upstream == u.upstream))
        .cloned()
        .collect();
    let add = known
        .upstreams
        .iter()
        .filter(|k| !applied.contains(k))
        .cloned()
        .collect();

    with_flags_of(request, BaragonRequest::builder(&id, known.service.clone()))
        .add_upstreams(add)
        .remove_upstreams(remove)
        .action(Some(RequestAction::Update))
        .build()
}

fn with_flags_of(request: &BaragonRequest, builder: RequestBuilder) -> RequestBuilder {
    builder
        .no_validate(request.no_validate())
        .no_reload(request.no_reload())
        .upstream_update_only(request.upstream_update_only())
}

/// Final result of a rollout. A request whose distribution was cut
/// short by cancellation is CANCELLED whatever its nodes reported;
/// otherwise the outcomes decide.
pub fn settle(outcomes: &[NodeOutcome], distribution_cut_short: bool) -> OverallResult {
    if distribution_cut_short {
        OverallResult::Cancelled
    } else {
        aggregate(outcomes)
    }
}

/// Known-good record after `request` converged, or `None` when the
/// service no longer exists.
pub fn advance_known_good(
    request: &BaragonRequest,
    known_good: Option<&ServiceRecord>,
    now_ms: u64,
) -> Option<ServiceRecord> {
    match request.effective_action() {
        RequestAction::Delete => None,
        RequestAction::Reload => known_good.cloned(),
        RequestAction::Update => {
            let current = known_good.map(|k| k.upstreams.as_slice()).unwrap_or_default();
            Some(ServiceRecord {
                service: request.service().clone(),
                upstreams: request.resolve_upstreams(current),
                request_id: request.request_id().to_string(),
                updated_at: now_ms,
            })
        }
    }
}
