//! baragond — the Baragon daemon.
//!
//! # Usage
//!
//! ```text
//! baragond render --config baragon.toml --request request.json
//! baragond apply  --config baragon.toml --request request.json [--group edge]
//! ```
//!
//! `render` prints what this node would write for a request without
//! touching anything. `apply` runs a coordinator and this node's agent in
//! one process, rolls the request out and prints the final status.

mod standalone;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use baragon_agent::{ConfigRenderer, TemplateRegistry};
use baragon_core::{BaragonConfig, BaragonRequest, OverallResult, ServiceContext};
use baragon_rollout::SubmitOptions;

const DEFAULT_FILTER: &str = "info,baragond=debug,baragon=debug";

#[derive(Parser)]
#[command(name = "baragond", about = "Baragon load balancer config daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a request's config files and print them with their digest.
    Render {
        /// Path to baragon.toml.
        #[arg(long)]
        config: PathBuf,

        /// Path to a request JSON file.
        #[arg(long)]
        request: PathBuf,
    },

    /// Roll a request out through an in-process coordinator and agent.
    Apply {
        /// Path to baragon.toml.
        #[arg(long)]
        config: PathBuf,

        /// Path to a request JSON file.
        #[arg(long)]
        request: PathBuf,

        /// Target these groups instead of the service's own.
        #[arg(long)]
        group: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Render { config, request } => render(&config, &request),
        Command::Apply {
            config,
            request,
            group,
        } => apply(&config, &request, group).await,
    }
}

fn load(config: &Path, request: &Path) -> anyhow::Result<(BaragonConfig, BaragonRequest)> {
    let config = BaragonConfig::from_file(config)
        .with_context(|| format!("reading config {}", config.display()))?;
    let body = std::fs::read_to_string(request)
        .with_context(|| format!("reading request {}", request.display()))?;
    let request: BaragonRequest = serde_json::from_str(&body).context("parsing request")?;
    Ok((config, request))
}

fn render(config: &Path, request: &Path) -> anyhow::Result<()> {
    let (config, request) = load(config, request)?;

    let registry = TemplateRegistry::load(&config.templates, config.templates_dir.as_deref())?;
    let renderer = ConfigRenderer::new(
        Arc::new(registry),
        &config.load_balancer.root_path,
        config.agent.metadata(),
    );

    let context = ServiceContext::new(request.service().clone(), request.resolve_upstreams(&[]));
    let files = renderer.render(&context)?;

    for file in &files {
        println!("# {}", file.path.display());
        println!("{}", file.content);
    }
    println!("digest: {}", ConfigRenderer::digest(&files));
    Ok(())
}

async fn apply(config: &Path, request: &Path, groups: Vec<String>) -> anyhow::Result<()> {
    let (config, request) = load(config, request)?;
    let request_id = request.request_id().to_string();

    let options = SubmitOptions {
        group_override: (!groups.is_empty()).then_some(groups),
        ..SubmitOptions::default()
    };

    let node = standalone::Standalone::start(&config).await?;
    let status = node.coordinator().execute(request, options).await;
    node.shutdown().await;
    let status = status?;

    println!("{}", serde_json::to_string_pretty(&status)?);

    match status.result {
        Some(OverallResult::Success) => {
            info!(%request_id, "request applied");
            Ok(())
        }
        result => anyhow::bail!("request {request_id} finished with {result:?}"),
    }
}
