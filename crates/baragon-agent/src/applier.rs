//! Node applier — applies one request to this node's load balancer.
//!
//! ```text
//! RECEIVED ──► VALIDATING ──► WRITING ──► RELOADING ──► SUCCESS
//!    │             │             │            │
//!    │ render err  │ check err   │ write err  │ reload err
//!    ▼             ▼             ▼            ▼
//!  FAILED        FAILED        FAILED       FAILED
//!
//! no_validate           skips VALIDATING
//! no_reload             skips RELOADING
//! upstream_update_only  skips everything but the node state update
//! ```
//!
//! Validation checks freshly rendered files in a staging directory, so a
//! refused config never touches the live root. Every outcome goes into
//! the node ledger; a redelivered request returns its recorded outcome
//! without touching files or reloading.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use baragon_core::{
    BaragonRequest, BaragonService, NodeId, NodeOutcome, RequestAction, ServiceContext,
    epoch_millis,
};
use baragon_state::{ServiceRecord, StateStore};

use crate::error::{ApplyError, ApplyResult, Stage};
use crate::files::ConfigWriter;
use crate::lb::LoadBalancer;
use crate::renderer::ConfigRenderer;

/// Applies requests on one node.
pub struct NodeApplier {
    node_id: NodeId,
    renderer: ConfigRenderer,
    writer: ConfigWriter,
    lb: Arc<dyn LoadBalancer>,
    state: StateStore,
    check_timeout: Duration,
    reload_timeout: Duration,
    /// One lock per service id; requests for a service apply serially.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NodeApplier {
    pub fn new(
        node_id: &str,
        renderer: ConfigRenderer,
        lb: Arc<dyn LoadBalancer>,
        state: StateStore,
    ) -> Self {
        let writer = ConfigWriter::new(renderer.root_path());
        Self {
            node_id: node_id.to_string(),
            renderer,
            writer,
            lb,
            state,
            check_timeout: Duration::from_secs(10),
            reload_timeout: Duration::from_secs(10),
            locks: DashMap::new(),
        }
    }

    /// Bound the config check and the reload.
    pub fn with_timeouts(mut self, check: Duration, reload: Duration) -> Self {
        self.check_timeout = check;
        self.reload_timeout = reload;
        self
    }

    pub fn with_writer(mut self, writer: ConfigWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn renderer(&self) -> &ConfigRenderer {
        &self.renderer
    }

    /// Apply a request and report what happened. Never fails: every error
    /// becomes a FAILED outcome.
    pub async fn apply(&self, request: &BaragonRequest) -> NodeOutcome {
        let request_id = request.request_id();
        let _guards = self.lock_services(request).await;

        match self.state.get_outcome(request_id) {
            Ok(Some(recorded)) => {
                debug!(%request_id, "request already applied, returning recorded outcome");
                return recorded;
            }
            Ok(None) => {}
            Err(e) => warn!(%request_id, error = %e, "failed to read node ledger"),
        }

        let action = request.effective_action();
        let result = match action {
            RequestAction::Update => self.apply_update(request).await,
            RequestAction::Delete => self.apply_delete(request).await,
            RequestAction::Reload => self.apply_reload(request).await,
        };

        let outcome = match result {
            Ok(digest) => {
                info!(
                    %request_id,
                    service = %request.service().service_id,
                    ?action,
                    digest = digest.as_deref().unwrap_or("-"),
                    "request applied"
                );
                NodeOutcome::success(&self.node_id, request_id, digest)
            }
            Err(e) => {
                warn!(%request_id, service = %request.service().service_id, error = %e, "request failed");
                NodeOutcome::failed(&self.node_id, request_id, e.failure_kind(), e.to_string())
            }
        };

        self.record(&outcome);
        if outcome.is_success() {
            if action == RequestAction::Delete {
                self.forget_lock(&request.service().service_id);
            }
            if let Some(replaced) = request.replace_service_id() {
                if replaced != request.service().service_id {
                    self.forget_lock(replaced);
                }
            }
        }
        outcome
    }

    /// Record and return INVALID_REQUEST_NOOP for a payload that could not
    /// be decoded into a request.
    pub fn reject(&self, request_id: &str, detail: &str) -> NodeOutcome {
        if let Ok(Some(recorded)) = self.state.get_outcome(request_id) {
            return recorded;
        }
        warn!(%request_id, %detail, "rejecting invalid request");
        let outcome = NodeOutcome::invalid_request(&self.node_id, request_id, detail);
        self.record(&outcome);
        outcome
    }

    fn record(&self, outcome: &NodeOutcome) {
        if let Err(e) = self.state.put_outcome(outcome) {
            warn!(request_id = %outcome.request_id, error = %e, "failed to record outcome");
        }
    }

    /// Take the locks of every service the request touches, in sorted
    /// order.
    async fn lock_services(&self, request: &BaragonRequest) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: BTreeSet<&str> = BTreeSet::new();
        ids.insert(&request.service().service_id);
        if let Some(replaced) = request.replace_service_id() {
            ids.insert(replaced);
        }

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self.locks.entry(id.to_string()).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Drop the lock of a service that no longer exists. Called with its
    /// guard held; a lock someone else is waiting on stays.
    fn forget_lock(&self, service_id: &str) {
        // One reference in the map, one in our guard.
        self.locks.remove_if(service_id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    // ── Actions ────────────────────────────────────────────────────

    async fn apply_update(&self, request: &BaragonRequest) -> ApplyResult<Option<String>> {
        let service = request.service();
        let previous = self.state.get_service(&service.service_id)?;
        let current = previous
            .as_ref()
            .map(|r| r.upstreams.as_slice())
            .unwrap_or_default();

        let record = ServiceRecord {
            service: service.clone(),
            upstreams: request.resolve_upstreams(current),
            request_id: request.request_id().to_string(),
            updated_at: epoch_millis(),
        };

        if request.upstream_update_only() {
            self.state.put_service(&record)?;
            debug!(service = %service.service_id, upstreams = record.upstreams.len(), "upstreams updated");
            return Ok(None);
        }

        let context = ServiceContext::new(record.service.clone(), record.upstreams.clone());
        let files = self.renderer.render(&context)?;
        let digest = ConfigRenderer::digest(&files);

        if !request.no_validate() {
            let staged = self.writer.stage(&files).map_err(ApplyError::Staging)?;
            self.check(Some(staged.path())).await?;
        }

        self.writer.swap(&files).map_err(ApplyError::Write)?;

        // Files of the previous snapshot (and of a replaced service) that
        // this render no longer produces.
        let replaced = match request.replace_service_id() {
            Some(id) if id != service.service_id => self.state.get_service(id)?,
            _ => None,
        };
        let mut stale = BTreeSet::new();
        for old in previous.iter().chain(replaced.iter()) {
            stale.extend(self.paths_of(&old.service));
        }
        for file in &files {
            stale.remove(&file.path);
        }
        let mut keep = vec![service.service_id.as_str()];
        if let Some(r) = &replaced {
            keep.push(r.service.service_id.as_str());
        }
        self.remove_unshared(stale, &keep);

        self.state.put_service(&record)?;
        if let Some(r) = &replaced {
            self.state.delete_service(&r.service.service_id)?;
            info!(replaced = %r.service.service_id, service = %service.service_id, "service replaced");
        }

        if !request.no_reload() {
            self.reload().await?;
        }
        Ok(Some(digest))
    }

    async fn apply_delete(&self, request: &BaragonRequest) -> ApplyResult<Option<String>> {
        let service = request.service();
        let Some(previous) = self.state.get_service(&service.service_id)? else {
            debug!(service = %service.service_id, "delete of unknown service, nothing to do");
            return Ok(None);
        };

        let mut paths = self.renderer.config_paths(service)?;
        paths.extend(self.renderer.config_paths(&previous.service)?);
        self.remove_unshared(paths, &[service.service_id.as_str()]);

        self.state.delete_service(&service.service_id)?;
        if !request.no_reload() {
            self.reload().await?;
        }
        Ok(None)
    }

    async fn apply_reload(&self, request: &BaragonRequest) -> ApplyResult<Option<String>> {
        if !request.no_validate() {
            self.check(None).await?;
        }
        if !request.no_reload() {
            self.reload().await?;
        }
        Ok(None)
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn check(&self, staging: Option<&std::path::Path>) -> ApplyResult<()> {
        match tokio::time::timeout(self.check_timeout, self.lb.check_configs(staging)).await {
            Ok(result) => result.map_err(ApplyError::Validation),
            Err(_) => Err(ApplyError::Timeout {
                stage: Stage::Validate,
                after: self.check_timeout,
            }),
        }
    }

    async fn reload(&self) -> ApplyResult<()> {
        match tokio::time::timeout(self.reload_timeout, self.lb.reload()).await {
            Ok(result) => result.map_err(ApplyError::Reload),
            Err(_) => Err(ApplyError::Timeout {
                stage: Stage::Reload,
                after: self.reload_timeout,
            }),
        }
    }

    fn paths_of(&self, service: &BaragonService) -> BTreeSet<PathBuf> {
        self.renderer.paths_for_service(service).unwrap_or_else(|e| {
            warn!(service = %service.service_id, error = %e, "cannot compute paths");
            BTreeSet::new()
        })
    }

    /// Remove `paths` except those still rendered by a service other than
    /// `owners`.
    fn remove_unshared(&self, mut paths: BTreeSet<PathBuf>, owners: &[&str]) {
        if paths.is_empty() {
            return;
        }
        match self.state.list_services() {
            Ok(records) => {
                for record in records {
                    if owners.contains(&record.service.service_id.as_str()) {
                        continue;
                    }
                    for shared in self.paths_of(&record.service) {
                        paths.remove(&shared);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot list services, keeping files");
                return;
            }
        }

        if let Err(e) = self.writer.remove(&paths) {
            warn!(error = %e, "failed to remove config files");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use baragon_core::{AgentMetadata, FailureKind, FormatType, NodeStatus, UpstreamInfo};

    use crate::error::{LbError, LbResult};
    use crate::templates::{TemplateRegistry, inline};

    const BODY: &str = "{{#each upstreams}}server {{upstream}};\n{{/each}}";

    /// Counts calls; the check refuses any staged file containing `bad`.
    #[derive(Default)]
    struct FakeLb {
        checks: AtomicUsize,
        reloads: AtomicUsize,
        fail_reload: bool,
        hang: bool,
    }

    #[async_trait]
    impl LoadBalancer for FakeLb {
        async fn check_configs(&self, staging: Option<&Path>) -> LbResult<()> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if let Some(dir) = staging {
                for entry in std::fs::read_dir(dir).unwrap() {
                    let content = std::fs::read_to_string(entry.unwrap().path()).unwrap_or_default();
                    if content.contains("bad") {
                        return Err(LbError::CommandFailed {
                            command: "check".to_string(),
                            status: "exit status: 1".to_string(),
                            output: "invalid upstream".to_string(),
                        });
                    }
                }
            }
            Ok(())
        }

        async fn reload(&self) -> LbResult<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reload {
                return Err(LbError::Spawn {
                    command: "reload".to_string(),
                    reason: "no such process".to_string(),
                });
            }
            Ok(())
        }
    }

    struct Fixture {
        root: tempfile::TempDir,
        lb: Arc<FakeLb>,
        applier: NodeApplier,
    }

    fn fixture_with(lb: FakeLb, templates: &[baragon_core::config::TemplateConfig]) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let registry = TemplateRegistry::load(templates, None).unwrap();
        let renderer = ConfigRenderer::new(
            Arc::new(registry),
            root.path(),
            AgentMetadata::new("node-1", "edge"),
        );
        let lb = Arc::new(lb);
        let applier = NodeApplier::new(
            "node-1",
            renderer,
            lb.clone(),
            StateStore::open_in_memory().unwrap(),
        )
        .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        Fixture { root, lb, applier }
    }

    fn fixture() -> Fixture {
        fixture_with(
            FakeLb::default(),
            &[inline("default", "app-%s.conf", FormatType::Service, BODY)],
        )
    }

    fn update(id: &str, service: &str, add: &[&str]) -> BaragonRequest {
        BaragonRequest::new(
            id,
            BaragonService::new(service, &["edge"]),
            add.iter().map(|u| UpstreamInfo::new(u)).collect(),
            vec![],
        )
        .unwrap()
    }

    fn read(f: &Fixture, rel: &str) -> Option<String> {
        std::fs::read_to_string(f.root.path().join(rel)).ok()
    }

    #[tokio::test]
    async fn update_writes_and_reloads() {
        let f = fixture();
        let outcome = f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;

        assert_eq!(outcome.status, NodeStatus::Success);
        assert!(outcome.config_digest.is_some());
        assert_eq!(read(&f, "app-checkout.conf").unwrap(), "server 10.0.0.1:80;\n");
        assert_eq!(f.lb.checks.load(Ordering::SeqCst), 1);
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn updates_accumulate_upstreams() {
        let f = fixture();
        f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;
        let request = BaragonRequest::new(
            "r2",
            BaragonService::new("checkout", &["edge"]),
            vec![UpstreamInfo::new("10.0.0.2:80")],
            vec![UpstreamInfo::new("10.0.0.1:80")],
        )
        .unwrap();
        f.applier.apply(&request).await;

        assert_eq!(read(&f, "app-checkout.conf").unwrap(), "server 10.0.0.2:80;\n");
    }

    #[tokio::test]
    async fn replace_wins_over_add_and_remove() {
        let f = fixture();
        f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;

        let request = BaragonRequest::builder("r2", BaragonService::new("checkout", &["edge"]))
            .add_upstreams(vec![UpstreamInfo::new("10.0.0.7:80")])
            .remove_upstreams(vec![UpstreamInfo::new("10.0.0.1:80")])
            .replace_upstreams(vec![UpstreamInfo::new("10.0.0.9:80")])
            .build()
            .unwrap();
        f.applier.apply(&request).await;

        assert_eq!(read(&f, "app-checkout.conf").unwrap(), "server 10.0.0.9:80;\n");
    }

    #[tokio::test]
    async fn failed_validation_leaves_root_untouched() {
        let f = fixture();
        let outcome = f.applier.apply(&update("r1", "checkout", &["bad:80"])).await;

        assert_eq!(outcome.status, NodeStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ValidationFailed));
        assert!(read(&f, "app-checkout.conf").is_none());
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_validate_skips_check() {
        let f = fixture();
        let request = BaragonRequest::builder("r1", BaragonService::new("checkout", &["edge"]))
            .add_upstreams(vec![UpstreamInfo::new("bad:80")])
            .no_validate(true)
            .build()
            .unwrap();

        let outcome = f.applier.apply(&request).await;
        assert!(outcome.is_success());
        assert_eq!(f.lb.checks.load(Ordering::SeqCst), 0);
        assert_eq!(read(&f, "app-checkout.conf").unwrap(), "server bad:80;\n");
    }

    #[tokio::test]
    async fn no_reload_writes_without_reloading() {
        let f = fixture();
        let request = BaragonRequest::builder("r1", BaragonService::new("checkout", &["edge"]))
            .add_upstreams(vec![UpstreamInfo::new("10.0.0.1:80")])
            .no_reload(true)
            .build()
            .unwrap();

        assert!(f.applier.apply(&request).await.is_success());
        assert!(read(&f, "app-checkout.conf").is_some());
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_update_only_touches_state_only() {
        let f = fixture();
        let request = BaragonRequest::builder("r1", BaragonService::new("checkout", &["edge"]))
            .add_upstreams(vec![UpstreamInfo::new("10.0.0.1:80")])
            .upstream_update_only(true)
            .build()
            .unwrap();

        let outcome = f.applier.apply(&request).await;
        assert!(outcome.is_success());
        assert!(outcome.config_digest.is_none());
        assert!(read(&f, "app-checkout.conf").is_none());
        assert_eq!(f.lb.checks.load(Ordering::SeqCst), 0);
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 0);

        let record = f.applier.state.get_service("checkout").unwrap().unwrap();
        assert_eq!(record.upstreams.len(), 1);
    }

    #[tokio::test]
    async fn missing_template_fails_without_files() {
        let f = fixture();
        let service =
            BaragonService::new("checkout", &["edge"]).with_template_name("unregistered-template");
        let request = BaragonRequest::new("r1", service, vec![], vec![]).unwrap();

        let outcome = f.applier.apply(&request).await;
        assert_eq!(outcome.status, NodeStatus::Failed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MissingTemplate));
        assert_eq!(std::fs::read_dir(f.root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn reload_failure_is_reported() {
        let f = fixture_with(
            FakeLb {
                fail_reload: true,
                ..FakeLb::default()
            },
            &[inline("default", "app-%s.conf", FormatType::Service, BODY)],
        );
        let outcome = f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::ReloadFailed));
        // Files were already swapped in.
        assert!(read(&f, "app-checkout.conf").is_some());
    }

    #[tokio::test]
    async fn hung_check_times_out() {
        let f = fixture_with(
            FakeLb {
                hang: true,
                ..FakeLb::default()
            },
            &[inline("default", "app-%s.conf", FormatType::Service, BODY)],
        );
        let outcome = f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::ValidationFailed));
        assert!(outcome.failure.unwrap().detail.contains("timed out"));
    }

    #[tokio::test]
    async fn redelivery_returns_recorded_outcome() {
        let f = fixture();
        let request = update("r1", "checkout", &["10.0.0.1:80"]);

        let first = f.applier.apply(&request).await;
        let second = f.applier.apply(&request).await;

        assert_eq!(first, second);
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_removes_files_and_state() {
        let f = fixture();
        f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;

        let request = BaragonRequest::builder("r2", BaragonService::new("checkout", &["edge"]))
            .action(Some(RequestAction::Delete))
            .build()
            .unwrap();
        assert!(f.applier.apply(&request).await.is_success());

        assert!(read(&f, "app-checkout.conf").is_none());
        assert!(f.applier.state.get_service("checkout").unwrap().is_none());
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deleted_service_releases_its_lock() {
        let f = fixture();
        f.applier.apply(&update("r1", "checkout", &["10.0.0.1:80"])).await;
        f.applier.apply(&update("r2", "cart", &["10.0.0.2:80"])).await;
        assert_eq!(f.applier.locks.len(), 2);

        let request = BaragonRequest::builder("r3", BaragonService::new("checkout", &["edge"]))
            .action(Some(RequestAction::Delete))
            .build()
            .unwrap();
        assert!(f.applier.apply(&request).await.is_success());

        assert!(!f.applier.locks.contains_key("checkout"));
        assert!(f.applier.locks.contains_key("cart"));
    }

    #[tokio::test]
    async fn delete_of_unknown_service_is_noop() {
        let f = fixture();
        let request = BaragonRequest::builder("r1", BaragonService::new("ghost", &["edge"]))
            .action(Some(RequestAction::Delete))
            .build()
            .unwrap();

        assert!(f.applier.apply(&request).await.is_success());
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_keeps_files_shared_with_other_services() {
        let f = fixture_with(
            FakeLb::default(),
            &[
                inline("default", "app-%s.conf", FormatType::Service, BODY),
                inline("default", "shared.conf", FormatType::None, "shared"),
            ],
        );
        f.applier.apply(&update("r1", "a", &["10.0.0.1:80"])).await;
        f.applier.apply(&update("r2", "b", &["10.0.0.2:80"])).await;

        let request = BaragonRequest::builder("r3", BaragonService::new("a", &["edge"]))
            .action(Some(RequestAction::Delete))
            .build()
            .unwrap();
        f.applier.apply(&request).await;

        assert!(read(&f, "app-a.conf").is_none());
        assert!(read(&f, "app-b.conf").is_some());
        assert!(read(&f, "shared.conf").is_some());
    }

    #[tokio::test]
    async fn replace_service_id_retires_old_service() {
        let f = fixture();
        f.applier.apply(&update("r1", "old", &["10.0.0.1:80"])).await;

        let request = BaragonRequest::builder("r2", BaragonService::new("new", &["edge"]))
            .add_upstreams(vec![UpstreamInfo::new("10.0.0.2:80")])
            .replace_service_id(Some("old".to_string()))
            .build()
            .unwrap();
        assert!(f.applier.apply(&request).await.is_success());

        assert!(read(&f, "app-old.conf").is_none());
        assert!(read(&f, "app-new.conf").is_some());
        assert!(f.applier.state.get_service("old").unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_files_removed_after_domain_change() {
        let f = fixture_with(
            FakeLb::default(),
            &[inline("default", "%s/%s.conf", FormatType::DomainService, BODY)],
        );
        let service = BaragonService::new("checkout", &["edge"])
            .with_domains(["a.example.com".to_string()].into());
        let first = BaragonRequest::new("r1", service.clone(), vec![UpstreamInfo::new("10.0.0.1:80")], vec![]).unwrap();
        f.applier.apply(&first).await;
        assert!(read(&f, "a.example.com/checkout.conf").is_some());

        let moved = first.with_updated_domains(["b.example.com".to_string()].into());
        let moved = BaragonRequest::builder("r2", moved.service().clone())
            .build()
            .unwrap();
        assert!(f.applier.apply(&moved).await.is_success());

        assert!(read(&f, "a.example.com/checkout.conf").is_none());
        assert_eq!(
            read(&f, "b.example.com/checkout.conf").unwrap(),
            "server 10.0.0.1:80;\n"
        );
    }

    #[tokio::test]
    async fn reload_action_checks_live_config() {
        let f = fixture();
        let request = BaragonRequest::builder("r1", BaragonService::new("checkout", &["edge"]))
            .action(Some(RequestAction::Reload))
            .build()
            .unwrap();

        assert!(f.applier.apply(&request).await.is_success());
        assert_eq!(f.lb.checks.load(Ordering::SeqCst), 1);
        assert_eq!(f.lb.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(f.root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn reject_records_invalid_request() {
        let f = fixture();
        let outcome = f.applier.reject("r9", "missing field `service`");
        assert_eq!(outcome.status, NodeStatus::InvalidRequestNoop);
        assert_eq!(f.applier.state.get_outcome("r9").unwrap(), Some(outcome));
    }

    #[tokio::test]
    async fn identical_nodes_write_identical_files() {
        let a = fixture();
        let b = fixture();
        let request = update("r1", "checkout", &["10.0.0.1:80", "10.0.0.2:80"]);

        assert!(a.applier.apply(&request).await.is_success());
        assert!(b.applier.apply(&request).await.is_success());
        assert_eq!(
            read(&a, "app-checkout.conf").unwrap(),
            read(&b, "app-checkout.conf").unwrap()
        );
    }
}
