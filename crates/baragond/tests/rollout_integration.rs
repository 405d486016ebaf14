//! End-to-end rollouts: a coordinator and three real agents sharing an
//! in-memory coordination store, each agent writing into its own
//! temporary config root behind a fake load balancer.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use baragon_agent::error::{LbResult, WorkerError};
use baragon_agent::{AgentWorker, ConfigRenderer, LbError, LoadBalancer, NodeApplier, TemplateRegistry};
use baragon_cluster::MemoryStore;
use baragon_core::config::TemplateConfig;
use baragon_core::{
    AgentMetadata, BaragonRequest, BaragonService, FailureKind, FormatType, NodeStatus,
    OverallResult, RequestAction, UpstreamInfo,
};
use baragon_rollout::{Coordinator, RolloutPolicy, SubmitOptions};
use baragon_state::StateStore;

#[derive(Default)]
struct FakeLb {
    refuse: AtomicBool,
    reloads: AtomicUsize,
}

#[async_trait]
impl LoadBalancer for FakeLb {
    async fn check_configs(&self, staging: Option<&Path>) -> LbResult<()> {
        if staging.is_some() && self.refuse.load(Ordering::SeqCst) {
            return Err(LbError::CommandFailed {
                command: "nginx -t".to_string(),
                status: "exit status: 1".to_string(),
                output: "invalid upstream".to_string(),
            });
        }
        Ok(())
    }

    async fn reload(&self) -> LbResult<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Node {
    root: TempDir,
    lb: Arc<FakeLb>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<Result<(), WorkerError>>,
}

impl Node {
    fn config(&self) -> Option<String> {
        std::fs::read_to_string(self.root.path().join("checkout.conf")).ok()
    }
}

async fn start_node(store: &Arc<MemoryStore>, node_id: &str) -> Node {
    let template = TemplateConfig {
        name: "default".to_string(),
        filename: "%s.conf".to_string(),
        format_type: FormatType::Service,
        template: Some(
            "upstream {{service.serviceId}} {\n{{#each upstreams}}  server {{upstream}};\n{{/each}}}\n"
                .to_string(),
        ),
        path: None,
    };
    let registry = TemplateRegistry::load(&[template], None).unwrap();

    let root = tempfile::tempdir().unwrap();
    let lb = Arc::new(FakeLb::default());
    let metadata = AgentMetadata::new(node_id, "edge");
    let renderer = ConfigRenderer::new(Arc::new(registry), root.path(), metadata.clone());
    let applier = NodeApplier::new(node_id, renderer, lb.clone(), StateStore::open_in_memory().unwrap());

    let worker = AgentWorker::new(store.clone(), Arc::new(applier), metadata)
        .with_heartbeat_interval(Duration::from_millis(100));
    worker.register().await.unwrap();

    let (shutdown, rx) = watch::channel(false);
    let worker = tokio::spawn(worker.run(rx));
    Node {
        root,
        lb,
        shutdown,
        worker,
    }
}

async fn start_fleet(store: &Arc<MemoryStore>) -> Vec<Node> {
    let mut nodes = Vec::new();
    for id in ["n1", "n2", "n3"] {
        nodes.push(start_node(store, id).await);
    }
    nodes
}

async fn stop_fleet(nodes: Vec<Node>) {
    for node in nodes {
        node.shutdown.send(true).unwrap();
        node.worker.await.unwrap().unwrap();
    }
}

fn coordinator(store: &Arc<MemoryStore>) -> Coordinator {
    let policy = RolloutPolicy {
        outcome_timeout: Duration::from_secs(5),
        ..RolloutPolicy::default()
    };
    Coordinator::new(store.clone(), StateStore::open_in_memory().unwrap(), policy)
}

fn add(request_id: &str, upstream: &str) -> BaragonRequest {
    BaragonRequest::new(
        request_id,
        BaragonService::new("checkout", &["edge"]),
        vec![UpstreamInfo::new(upstream)],
        vec![],
    )
    .unwrap()
}

#[tokio::test]
async fn healthy_fleet_converges_on_identical_configs() {
    let store = Arc::new(MemoryStore::new());
    let nodes = start_fleet(&store).await;
    let coordinator = coordinator(&store);

    let status = coordinator
        .execute(add("r1", "10.0.0.1:80"), SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(status.result, Some(OverallResult::Success));
    assert_eq!(status.outcomes.len(), 3);
    let digest = status.outcomes[0].config_digest.clone();
    assert!(digest.is_some());
    assert!(status.outcomes.iter().all(|o| o.config_digest == digest));

    for node in &nodes {
        assert_eq!(
            node.config().unwrap(),
            "upstream checkout {\n  server 10.0.0.1:80;\n}\n"
        );
        assert_eq!(node.lb.reloads.load(Ordering::SeqCst), 1);
    }

    let known = coordinator.state().get_service("checkout").unwrap().unwrap();
    assert_eq!(known.request_id, "r1");

    let delete = BaragonRequest::builder("r2", BaragonService::new("checkout", &["edge"]))
        .action(Some(RequestAction::Delete))
        .build()
        .unwrap();
    let status = coordinator.execute(delete, SubmitOptions::default()).await.unwrap();
    assert_eq!(status.result, Some(OverallResult::Success));
    for node in &nodes {
        assert!(node.config().is_none());
    }
    assert!(coordinator.state().get_service("checkout").unwrap().is_none());

    stop_fleet(nodes).await;
}

#[tokio::test]
async fn refused_config_fails_request_and_restores_known_good() {
    let store = Arc::new(MemoryStore::new());
    let nodes = start_fleet(&store).await;
    let coordinator = coordinator(&store);

    let first = coordinator
        .execute(add("r0", "10.0.0.1:80"), SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(first.result, Some(OverallResult::Success));
    let known_good = nodes[0].config().unwrap();

    nodes[1].lb.refuse.store(true, Ordering::SeqCst);
    let status = coordinator
        .execute(add("r1", "10.0.0.2:80"), SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(status.result, Some(OverallResult::Failure));
    assert_eq!(status.outcomes.len(), 3);
    assert!(status.outcome_for("n1").unwrap().is_success());
    assert!(status.outcome_for("n3").unwrap().is_success());
    let refused = status.outcome_for("n2").unwrap();
    assert_eq!(refused.status, NodeStatus::Failed);
    assert_eq!(refused.failure_kind(), Some(FailureKind::ValidationFailed));
    assert!(refused.failure.as_ref().unwrap().detail.contains("invalid upstream"));

    let rollback = status.rollback.unwrap();
    assert_eq!(rollback.request_id, "r1-rollback");
    assert_eq!(rollback.result, OverallResult::Success);
    let rolled_back: Vec<_> = rollback.outcomes.iter().map(|o| o.node_id.as_str()).collect();
    assert_eq!(rolled_back, ["n1", "n3"]);
    assert_eq!(rollback.outcomes[0].config_digest, first.outcomes[0].config_digest);

    // Every node serves the known-good config again; the refusing node
    // never changed and never reloaded.
    for node in &nodes {
        assert_eq!(node.config().unwrap(), known_good);
    }
    assert_eq!(nodes[1].lb.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(nodes[0].lb.reloads.load(Ordering::SeqCst), 3);

    let known = coordinator.state().get_service("checkout").unwrap().unwrap();
    assert_eq!(known.request_id, "r0");

    stop_fleet(nodes).await;
}
