//! relay-worker: task execution worker for AI workflow pipelines.
//!
//! Pulls task messages from the durable queue, dispatches them to the
//! built-in agents, persists artifacts to object storage, and reports
//! results to the orchestrator.

mod config;
mod queue;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::agents::AgentContext;
use relay_core::ai::AiClient;
use relay_core::dispatcher::Dispatcher;
use relay_core::metrics::Metrics;
use relay_core::orchestrator::OrchestratorClient;
use relay_core::storage::ObjectStore;
use relay_db::config::DbConfig;
use relay_db::pool;

use config::{METRICS_PORT, WorkerConfig};

#[derive(Parser)]
#[command(name = "relay-worker", about = "Task execution worker for AI workflow pipelines")]
struct Cli {
    /// Database URL (overrides DATABASE_URL env var)
    #[arg(long)]
    database_url: Option<String>,

    /// AMQP URL (overrides RABBIT_URL env var)
    #[arg(long)]
    rabbit_url: Option<String>,

    /// Orchestrator base URL (overrides ORCHESTRATOR_URL env var)
    #[arg(long)]
    orchestrator_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::resolve(
        cli.database_url.as_deref(),
        cli.rabbit_url.as_deref(),
        cli.orchestrator_url.as_deref(),
    );

    info!(
        orchestrator = %config.orchestrator_url,
        bucket = %config.storage.bucket,
        production = config.production,
        "starting relay worker"
    );

    let pool = pool::create_pool_with_retry(&DbConfig::new(config.database_url.clone())).await;
    let storage = ObjectStore::new(&config.storage);
    let orchestrator = OrchestratorClient::new(config.orchestrator_url.clone());
    let ai = Arc::new(AiClient::new(config.ai.clone()));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client construction cannot fail with static options");

    let metrics = Metrics::new();
    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(METRICS_PORT).await {
                error!(error = %e, "metrics server exited");
            }
        });
    }

    let ctx = AgentContext {
        pool,
        storage,
        orchestrator,
        ai,
        email: config.email.clone(),
        http,
        production: config.production,
    };
    let dispatcher = Dispatcher::new(ctx, metrics);

    // Consume until the channel dies, then reconnect. The broker redelivers
    // anything unacked on the dead channel.
    loop {
        let channel = queue::connect(&config.rabbit_url).await;
        if let Err(e) = queue::consume(&channel, &dispatcher).await {
            warn!(error = %e, "consume loop ended, reconnecting");
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}
