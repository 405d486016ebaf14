//! Standalone mode: coordinator and one agent in a single process.
//!
//! The two talk through an in-memory coordination store, exactly as they
//! would through an external one:
//!
//! 1. Opens separate state stores for the coordinator and the agent
//! 2. Loads templates and wires the node applier to the load balancer hooks
//! 3. Registers the agent and starts its worker
//! 4. Builds the coordinator, with edge cache purging when configured

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use baragon_agent::{AgentWorker, CommandLoadBalancer, ConfigRenderer, NodeApplier, TemplateRegistry, WorkerError};
use baragon_cluster::{CoordinationStore, MemoryStore};
use baragon_core::BaragonConfig;
use baragon_edgecache::{CloudflareClient, CloudflareEdgeCache};
use baragon_rollout::{Coordinator, RolloutPolicy};
use baragon_state::StateStore;

pub struct Standalone {
    coordinator: Coordinator,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<Result<(), WorkerError>>,
}

impl Standalone {
    pub async fn start(config: &BaragonConfig) -> anyhow::Result<Self> {
        info!("Baragon daemon starting in standalone mode");

        let data_dir = &config.agent.data_dir;
        std::fs::create_dir_all(data_dir)?;
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());

        // ── Agent ───────────────────────────────────────────────────

        let agent_db = data_dir.join("baragon-agent.redb");
        let agent_state = StateStore::open(&agent_db)?;
        info!(path = ?agent_db, "agent state store opened");

        let registry = TemplateRegistry::load(&config.templates, config.templates_dir.as_deref())?;
        info!(templates = registry.names().count(), "templates loaded");

        let renderer = ConfigRenderer::new(
            Arc::new(registry),
            &config.load_balancer.root_path,
            config.agent.metadata(),
        );
        let applier = NodeApplier::new(
            &config.agent.node_id,
            renderer,
            Arc::new(CommandLoadBalancer::new(&config.load_balancer)),
            agent_state,
        )
        .with_timeouts(
            config.load_balancer.check_timeout(),
            config.load_balancer.reload_timeout(),
        );

        let worker = AgentWorker::new(store.clone(), Arc::new(applier), config.agent.metadata())
            .with_heartbeat_interval(config.agent.heartbeat_interval());
        // Targetable before the first request goes out.
        worker.register().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(worker.run(shutdown_rx));

        // ── Coordinator ─────────────────────────────────────────────

        let coordinator_db = data_dir.join("baragon-coordinator.redb");
        let coordinator_state = StateStore::open(&coordinator_db)?;
        info!(path = ?coordinator_db, "coordinator state store opened");

        let mut coordinator = Coordinator::new(
            store,
            coordinator_state,
            RolloutPolicy::from(&config.coordinator),
        );
        if let Some(edge_cache) = config.edge_cache.as_ref().filter(|c| c.enabled) {
            let client = CloudflareClient::new(edge_cache)?;
            coordinator = coordinator.with_edge_cache(Arc::new(CloudflareEdgeCache::new(client)));
            info!(api = %edge_cache.api_base, "edge cache purging enabled");
        }

        Ok(Self {
            coordinator,
            shutdown_tx,
            worker,
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Stop the agent worker and wait for it to leave its group.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        match self.worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "agent worker failed"),
            Err(e) => warn!(error = %e, "agent worker panicked"),
        }
        info!("Baragon daemon stopped");
    }
}
