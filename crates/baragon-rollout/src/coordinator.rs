//! Rollout coordinator — drives one request across every targeted node.
//!
//! ```text
//! submit ──► accept ──► lane queue ──► publish ──► collect ──► aggregate
//!            (dedupe,   (service,      /requests/  /outcomes/      │
//!             persist)   group) FIFO    …/{node}    …/{node}       │
//!                                                     ┌────────────┴────────────┐
//!                                                  SUCCESS                   FAILURE
//!                                             advance known-good        one rollback to
//!                                             purge edge cache          the succeeded nodes
//! ```
//!
//! Each (service, group) pair is a lane. A request holds every lane it
//! touches for the whole rollout, and requests on a lane run in the
//! order they were accepted. A queued request can be cancelled, either
//! explicitly or by a newer full-state request for one of its lanes.
//! Cancelling a running request stops records that have not gone out
//! yet. If that cut distribution short the request is CANCELLED;
//! otherwise the outcomes decide as usual. Nodes that applied it are
//! rolled back either way.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use baragon_cluster::keys;
use baragon_cluster::store::{decode, put_json};
use baragon_cluster::{CoordinationStore, GroupMembership, Target, WatchEvent, WatchStream};
use baragon_core::{
    AggregateStatus, BaragonRequest, BaragonService, FailureKind, NodeId, NodeOutcome,
    OverallResult, RequestPhase, RollbackReport, epoch_millis,
};
use baragon_edgecache::EdgeCachePurger;
use baragon_state::{RequestRecord, StateStore};

use crate::aggregate;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::policy::{RollbackPolicy, RolloutPolicy, SubmitOptions};

/// Distribution records published concurrently per rollout.
const DISTRIBUTION_CONCURRENCY: usize = 32;

/// (service id, group)
type Lane = (String, String);

/// Handle on an accepted request that has not finished yet.
struct Ticket {
    lanes: Vec<Lane>,
    cancel: watch::Sender<bool>,
    /// Set once the request leaves the lane queue.
    started: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl Ticket {
    fn new(lanes: Vec<Lane>) -> Self {
        Self {
            lanes,
            cancel: watch::channel(false).0,
            started: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    /// Cancel the request. The first reason given sticks.
    fn cancel(&self, reason: &str) {
        {
            let mut current = self.reason.lock().expect("ticket lock");
            if current.is_none() {
                *current = Some(reason.to_string());
            }
        }
        self.cancel.send_replace(true);
    }

    fn reason(&self) -> String {
        self.reason
            .lock()
            .expect("ticket lock")
            .clone()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    fn overlaps(&self, lanes: &[Lane]) -> bool {
        self.lanes.iter().any(|lane| lanes.contains(lane))
    }
}

/// Everything `drive` needs to run an accepted request.
struct Accepted {
    record: RequestRecord,
    ticket: Arc<Ticket>,
    /// Done signals of the requests ahead of this one on its lanes.
    predecessors: Vec<watch::Receiver<bool>>,
    done: watch::Sender<bool>,
    rollback: RollbackPolicy,
}

/// Where one request's records went.
#[derive(Default)]
struct Delivery {
    /// Nodes an outcome is expected from.
    expected: BTreeSet<NodeId>,
    delivered: Vec<Target>,
    /// Nodes whose record could not be published.
    failed: BTreeMap<NodeId, NodeOutcome>,
}

/// Accepts requests and rolls them out to the agents of their groups.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn CoordinationStore>,
    membership: GroupMembership,
    state: StateStore,
    policy: RolloutPolicy,
    edge_cache: Option<Arc<dyn EdgeCachePurger>>,
    /// Last accepted request per lane and its done signal.
    lanes: Arc<DashMap<Lane, (String, watch::Receiver<bool>)>>,
    tickets: Arc<DashMap<String, Arc<Ticket>>>,
    admission: Arc<Mutex<()>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, state: StateStore, policy: RolloutPolicy) -> Self {
        Self {
            membership: GroupMembership::new(store.clone()).with_dead_timeout(policy.dead_timeout),
            store,
            state,
            policy,
            edge_cache: None,
            lanes: Arc::new(DashMap::new()),
            tickets: Arc::new(DashMap::new()),
            admission: Arc::new(Mutex::new(())),
        }
    }

    /// Purge edge caches for services whose requests converge.
    pub fn with_edge_cache(mut self, purger: Arc<dyn EdgeCachePurger>) -> Self {
        self.edge_cache = Some(purger);
        self
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn membership(&self) -> &GroupMembership {
        &self.membership
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Accept a request and roll it out in the background.
    ///
    /// Returns the request id once the request is validated and queued.
    /// Submitting an identical request again returns the same id without
    /// a second rollout.
    pub fn submit(&self, request: BaragonRequest, options: SubmitOptions) -> CoordinatorResult<String> {
        let request_id = request.request_id().to_string();
        if let Some(accepted) = self.accept(request, options)? {
            let this = self.clone();
            tokio::spawn(async move {
                this.drive(accepted).await;
            });
        }
        Ok(request_id)
    }

    /// Accept a request and roll it out, returning its final status.
    pub async fn execute(
        &self,
        request: BaragonRequest,
        options: SubmitOptions,
    ) -> CoordinatorResult<AggregateStatus> {
        let request_id = request.request_id().to_string();
        match self.accept(request, options)? {
            Some(accepted) => Ok(self.drive(accepted).await),
            None => self
                .status(&request_id)?
                .ok_or(CoordinatorError::UnknownRequest(request_id)),
        }
    }

    /// Stored status of a request.
    pub fn status(&self, request_id: &str) -> CoordinatorResult<Option<AggregateStatus>> {
        Ok(self.state.get_request(request_id)?.map(|r| r.status))
    }

    /// Cancel a request that has not finished. Returns false if it
    /// already has.
    pub fn cancel(&self, request_id: &str) -> CoordinatorResult<bool> {
        let ticket = self.tickets.get(request_id).map(|t| t.value().clone());
        if let Some(ticket) = ticket {
            info!(%request_id, "cancellation requested");
            ticket.cancel("cancelled by operator");
            return Ok(true);
        }
        match self.state.get_request(request_id)? {
            Some(_) => Ok(false),
            None => Err(CoordinatorError::UnknownRequest(request_id.to_string())),
        }
    }

    /// Validate, deduplicate, persist and enqueue. `None` means the
    /// identical request was accepted before.
    fn accept(&self, request: BaragonRequest, options: SubmitOptions) -> CoordinatorResult<Option<Accepted>> {
        let request_id = request.request_id().to_string();
        let groups: BTreeSet<String> = match options.group_override {
            Some(groups) => groups.into_iter().collect(),
            None => request.service().load_balancer_groups.clone(),
        };
        if groups.is_empty() {
            return Err(CoordinatorError::InvalidRequest(format!(
                "request {request_id} has no target groups"
            )));
        }
        for group in &groups {
            keys::segment(group)?;
        }
        let groups: Vec<String> = groups.into_iter().collect();

        let _admission = self.admission.lock().expect("admission lock");

        if let Some(existing) = self.state.get_request(&request_id)? {
            if existing.request == request && existing.groups == groups {
                debug!(%request_id, "duplicate submission");
                return Ok(None);
            }
            return Err(CoordinatorError::InvalidRequest(format!(
                "request id {request_id} was already used for a different request"
            )));
        }

        let service_id = request.service().service_id.clone();
        let lanes: Vec<Lane> = groups
            .iter()
            .map(|group| (service_id.clone(), group.clone()))
            .collect();

        if request.is_full_state() && self.policy.supersede_queued {
            for entry in self.tickets.iter() {
                let ticket = entry.value();
                if !ticket.started.load(Ordering::SeqCst) && ticket.overlaps(&lanes) {
                    info!(request_id = %entry.key(), superseded_by = %request_id, "superseding queued request");
                    ticket.cancel(&format!("superseded by {request_id}"));
                }
            }
        }

        let record = RequestRecord {
            request,
            groups,
            status: AggregateStatus::queued(&request_id),
        };
        self.state.put_request(&record)?;

        let (done, tail) = watch::channel(false);
        let predecessors = lanes
            .iter()
            .filter_map(|lane| {
                self.lanes
                    .insert(lane.clone(), (request_id.clone(), tail.clone()))
                    .map(|(_, previous)| previous)
            })
            .collect::<Vec<_>>();

        let ticket = Arc::new(Ticket::new(lanes));
        self.tickets.insert(request_id.clone(), ticket.clone());

        info!(
            %request_id,
            service = %service_id,
            groups = ?record.groups,
            queued_behind = predecessors.len(),
            "request accepted"
        );

        Ok(Some(Accepted {
            record,
            ticket,
            predecessors,
            done,
            rollback: options.rollback.unwrap_or(self.policy.rollback),
        }))
    }

    // ── Rollout ─────────────────────────────────────────────────────

    /// Run an accepted request to completion and release its lanes.
    async fn drive(&self, accepted: Accepted) -> AggregateStatus {
        let Accepted {
            mut record,
            ticket,
            predecessors,
            done,
            rollback,
        } = accepted;
        let request_id = record.request.request_id().to_string();

        if let Err(e) = self.run(&mut record, &ticket, predecessors, rollback).await {
            error!(%request_id, error = %e, "rollout aborted");
            record.status.phase = RequestPhase::Completed;
            record.status.result = Some(OverallResult::Failure);
            record.status.message = Some(e.to_string());
            self.persist(&record);
        }

        self.tickets.remove(&request_id);
        for lane in &ticket.lanes {
            self.lanes.remove_if(lane, |_, (owner, _)| *owner == request_id);
        }
        done.send_replace(true);
        record.status
    }

    async fn run(
        &self,
        record: &mut RequestRecord,
        ticket: &Ticket,
        predecessors: Vec<watch::Receiver<bool>>,
        rollback: RollbackPolicy,
    ) -> CoordinatorResult<()> {
        let request_id = record.request.request_id().to_string();
        let mut cancel = ticket.cancel.subscribe();

        let cleared = tokio::select! {
            _ = wait_all(predecessors.clone()) => true,
            _ = async { let _ = cancel.wait_for(|cancelled| *cancelled).await; } => false,
        };
        if !cleared || *cancel.borrow() {
            let reason = ticket.reason();
            info!(%request_id, %reason, "request cancelled before distribution");
            record.status.phase = RequestPhase::Cancelled;
            record.status.result = Some(OverallResult::Cancelled);
            record.status.message = Some(reason);
            self.persist(record);
            // The lanes stay held until everything queued ahead is done.
            wait_all(predecessors).await;
            return Ok(());
        }

        ticket.started.store(true, Ordering::SeqCst);
        record.status.phase = RequestPhase::Distributing;
        self.persist(record);

        let snapshot = self.membership.snapshot(&record.groups).await?;
        let mut notes = Vec::new();
        if !snapshot.excluded.is_empty() {
            notes.push(format!("excluded: {}", target_names(&snapshot.excluded)));
        }
        if !snapshot.dead.is_empty() {
            notes.push(format!("dead: {}", target_names(&snapshot.dead)));
        }
        info!(
            %request_id,
            targets = snapshot.targets.len(),
            excluded = snapshot.excluded.len(),
            dead = snapshot.dead.len(),
            "distributing request"
        );

        let events = self.store.watch(&keys::outcomes_prefix(&request_id)).await?;
        let delivery = self
            .publish(&record.request, &snapshot.targets, Some(&cancel))
            .await;
        let cut_short = delivery.expected.len() < snapshot.targets.len();

        record.status.phase = RequestPhase::Collecting;
        self.persist(record);

        let outcomes = self.collect(&request_id, &delivery, events).await?;
        self.retract(&request_id, &delivery.delivered).await;
        warn_on_divergence(&request_id, &outcomes);
        record.status.outcomes = outcomes;

        if *cancel.borrow() {
            let reason = ticket.reason();
            if cut_short {
                info!(%request_id, %reason, "distribution cut short by cancellation");
                notes.push(reason);
            } else {
                info!(%request_id, %reason, "cancelled after every record went out, outcomes decide");
                notes.push(format!("{reason} after distribution completed"));
            }
        }
        if !notes.is_empty() {
            record.status.message = Some(notes.join("; "));
        }

        let result = aggregate::settle(&record.status.outcomes, cut_short);
        if result == OverallResult::Success {
            info!(%request_id, nodes = record.status.outcomes.len(), "request converged");
            if targets_own_groups(record) {
                self.advance_known_good(&record.request)?;
            } else {
                debug!(%request_id, groups = ?record.groups, "group override, known-good state unchanged");
            }
            self.purge_edge_cache(record.request.service()).await;
        } else {
            let succeeded: BTreeSet<NodeId> =
                aggregate::succeeded_nodes(&record.status.outcomes).into_iter().collect();
            warn!(
                %request_id,
                ?result,
                failed = record.status.outcomes.len() - succeeded.len(),
                succeeded = succeeded.len(),
                "request did not converge"
            );

            // Nodes that applied a failed or cut-short request go back to
            // the known-good state.
            let targets: Vec<Target> = delivery
                .delivered
                .iter()
                .filter(|t| succeeded.contains(&t.node_id))
                .cloned()
                .collect();
            if rollback == RollbackPolicy::OnFailure && !targets.is_empty() {
                record.status.phase = RequestPhase::RollingBack;
                self.persist(record);
                record.status.rollback = Some(self.roll_back(&record.request, &targets).await?);
            }
        }

        record.status.result = Some(result);
        record.status.phase = match result {
            OverallResult::Cancelled => RequestPhase::Cancelled,
            _ => RequestPhase::Completed,
        };
        self.persist(record);
        Ok(())
    }

    /// Send the compensating request to nodes that applied `request`.
    /// Attempted once; a failed rollback is reported, not retried.
    async fn roll_back(&self, request: &BaragonRequest, targets: &[Target]) -> CoordinatorResult<RollbackReport> {
        let known_good = self.state.get_service(&request.service().service_id)?;
        let plan = aggregate::plan_rollback(request, known_good.as_ref())?;
        let rollback_id = plan.request_id().to_string();
        info!(
            request_id = %request.request_id(),
            %rollback_id,
            action = ?plan.effective_action(),
            nodes = targets.len(),
            "rolling back succeeded nodes"
        );

        let events = self.store.watch(&keys::outcomes_prefix(&rollback_id)).await?;
        let delivery = self.publish(&plan, targets, None).await;
        let outcomes = self.collect(&rollback_id, &delivery, events).await?;
        self.retract(&rollback_id, &delivery.delivered).await;

        let result = aggregate::aggregate(&outcomes);
        if result == OverallResult::Success {
            info!(%rollback_id, "rollback converged");
        } else {
            let failed: Vec<&str> = outcomes
                .iter()
                .filter(|o| !o.is_success())
                .map(|o| o.node_id.as_str())
                .collect();
            error!(%rollback_id, ?failed, "rollback failed, nodes may not match the known-good state");
        }

        Ok(RollbackReport {
            request_id: rollback_id,
            outcomes,
            result,
        })
    }

    /// Publish one record per target. Stops publishing once `cancel` flips.
    async fn publish(
        &self,
        request: &BaragonRequest,
        targets: &[Target],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Delivery {
        let request_id = request.request_id();
        let store = self.store.as_ref();

        let results: Vec<_> = futures::stream::iter(targets.iter().cloned())
            .map(|target| async move {
                if cancel.is_some_and(|c| *c.borrow()) {
                    return None;
                }
                let key = keys::request_key(&target.group, request_id, &target.node_id);
                let result = put_json(store, &key, request).await;
                Some((target, result))
            })
            .buffer_unordered(DISTRIBUTION_CONCURRENCY)
            .filter_map(futures::future::ready)
            .collect()
            .await;

        if results.len() < targets.len() {
            info!(
                %request_id,
                skipped = targets.len() - results.len(),
                "distribution stopped by cancellation"
            );
        }

        let mut delivery = Delivery::default();
        for (target, result) in results {
            delivery.expected.insert(target.node_id.clone());
            match result {
                Ok(()) => {
                    debug!(%request_id, group = %target.group, node_id = %target.node_id, "record published");
                    delivery.delivered.push(target);
                }
                Err(e) => {
                    warn!(%request_id, node_id = %target.node_id, error = %e, "failed to publish record");
                    let outcome = NodeOutcome::failed(
                        &target.node_id,
                        request_id,
                        FailureKind::Timeout,
                        format!("not delivered: {e}"),
                    );
                    delivery.failed.insert(target.node_id, outcome);
                }
            }
        }
        delivery
    }

    /// Wait for an outcome from every expected node, up to the outcome
    /// timeout. Returns one outcome per expected node.
    async fn collect(
        &self,
        request_id: &str,
        delivery: &Delivery,
        mut events: WatchStream,
    ) -> CoordinatorResult<Vec<NodeOutcome>> {
        let expected = &delivery.expected;
        let mut received = delivery.failed.clone();
        let prefix = keys::outcomes_prefix(request_id);
        let deadline = tokio::time::Instant::now() + self.policy.outcome_timeout;

        self.relist(&prefix, request_id, expected, &mut received).await?;

        while received.len() < expected.len() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        %request_id,
                        missing = expected.len() - received.len(),
                        "outcome timeout elapsed"
                    );
                    break;
                }
                event = events.next() => match event {
                    Some(WatchEvent::Put { key, value }) => {
                        record_outcome(request_id, expected, &key, &value, &mut received);
                    }
                    Some(WatchEvent::Delete { .. }) => {}
                    Some(WatchEvent::Resync) => {
                        warn!(%request_id, "outcome watch lagged, re-listing");
                        self.relist(&prefix, request_id, expected, &mut received).await?;
                    }
                    None => {
                        warn!(%request_id, "outcome watch closed");
                        break;
                    }
                },
            }
        }

        let missing_detail = format!(
            "no outcome within {}ms",
            self.policy.outcome_timeout.as_millis()
        );
        Ok(aggregate::complete_outcomes(request_id, expected, received, &missing_detail))
    }

    async fn relist(
        &self,
        prefix: &str,
        request_id: &str,
        expected: &BTreeSet<NodeId>,
        received: &mut BTreeMap<NodeId, NodeOutcome>,
    ) -> CoordinatorResult<()> {
        for (key, value) in self.store.list(prefix).await? {
            record_outcome(request_id, expected, &key, &value, received);
        }
        Ok(())
    }

    /// Delete distribution records once their outcomes are in.
    async fn retract(&self, request_id: &str, delivered: &[Target]) {
        for target in delivered {
            let key = keys::request_key(&target.group, request_id, &target.node_id);
            if let Err(e) = self.store.delete(&key).await {
                warn!(%key, error = %e, "failed to delete distribution record");
            }
        }
    }

    // ── Known-good state ────────────────────────────────────────────

    fn advance_known_good(&self, request: &BaragonRequest) -> CoordinatorResult<()> {
        let service_id = &request.service().service_id;
        let known_good = self.state.get_service(service_id)?;
        match aggregate::advance_known_good(request, known_good.as_ref(), epoch_millis()) {
            Some(next) => self.state.put_service(&next)?,
            None => {
                self.state.delete_service(service_id)?;
            }
        }
        if let Some(replaced) = request.replace_service_id() {
            if replaced != service_id {
                self.state.delete_service(replaced)?;
            }
        }
        Ok(())
    }

    /// Best effort: a failed purge is logged and never changes the result.
    async fn purge_edge_cache(&self, service: &BaragonService) {
        let Some(purger) = self.edge_cache.as_ref() else {
            return;
        };
        if service.edge_cache_domains.is_empty() {
            return;
        }

        match purger.invalidate(service).await {
            Ok(true) => info!(service = %service.service_id, "edge cache purged"),
            Ok(false) => warn!(service = %service.service_id, "edge cache purge incomplete"),
            Err(e) => warn!(service = %service.service_id, error = %e, "edge cache purge failed"),
        }
    }

    fn persist(&self, record: &RequestRecord) {
        if let Err(e) = self.state.put_request(record) {
            error!(request_id = %record.request.request_id(), error = %e, "failed to persist request status");
        }
    }
}

/// Whether a request went to exactly its service's own groups. The
/// known-good state is per service, so a rollout to an override set
/// (a canary group, say) leaves it alone.
fn targets_own_groups(record: &RequestRecord) -> bool {
    record
        .groups
        .iter()
        .eq(record.request.service().load_balancer_groups.iter())
}

/// Resolves once every predecessor has signalled done or gone away.
async fn wait_all(predecessors: Vec<watch::Receiver<bool>>) {
    for mut done in predecessors {
        let _ = done.wait_for(|finished| *finished).await;
    }
}

fn record_outcome(
    request_id: &str,
    expected: &BTreeSet<NodeId>,
    key: &str,
    value: &[u8],
    received: &mut BTreeMap<NodeId, NodeOutcome>,
) {
    let node_id = keys::last_segment(key);
    if !expected.contains(node_id) {
        return;
    }
    match decode::<NodeOutcome>(key, value) {
        Ok(outcome) if outcome.request_id == request_id => {
            debug!(%request_id, %node_id, status = ?outcome.status, "outcome received");
            received.insert(node_id.to_string(), outcome);
        }
        Ok(outcome) => warn!(%key, carried = %outcome.request_id, "outcome for another request"),
        Err(e) => warn!(%key, error = %e, "undecodable outcome"),
    }
}

fn warn_on_divergence(request_id: &str, outcomes: &[NodeOutcome]) {
    let digests = aggregate::distinct_digests(outcomes);
    if digests.len() > 1 {
        warn!(%request_id, ?digests, "succeeded nodes rendered different configs");
    }
}

fn target_names(targets: &[Target]) -> String {
    targets
        .iter()
        .map(|t| format!("{}/{}", t.group, t.node_id))
        .collect::<Vec<_>>()
        .join(", ")
}
