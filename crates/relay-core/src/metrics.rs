//! Prometheus metrics: the task-outcome counter and its scrape endpoint.

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::info;

/// Worker metrics, shared by the dispatcher and served over HTTP.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    tasks_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let tasks_total = IntCounterVec::new(
            Opts::new("worker_tasks_total", "Worker task executions"),
            &["result"],
        )
        .expect("counter options are static and valid");
        registry
            .register(Box::new(tasks_total.clone()))
            .expect("first registration cannot conflict");
        Self {
            registry,
            tasks_total,
        }
    }

    pub fn record_success(&self) {
        self.tasks_total.with_label_values(&["success"]).inc();
    }

    pub fn record_failed(&self) {
        self.tasks_total.with_label_values(&["failed"]).inc();
    }

    pub fn record_reviewed(&self) {
        self.tasks_total.with_label_values(&["reviewed"]).inc();
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve `/metrics` on the given port until the process exits.
    pub async fn serve(self, port: u16) -> Result<()> {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = self.clone();
                async move { metrics.render() }
            }),
        );

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind metrics port {port}"))?;
        info!(port, "metrics endpoint listening");
        axum::serve(listener, app)
            .await
            .context("metrics server failed")?;
        Ok(())
    }
}
