use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::inventory::Fetcher;
use crate::prism;
use crate::registry::MetricRegistry;
use crate::scrape::ScrapeLoop;

/// Agent wires the registry, the metrics server and one scrape loop per
/// Prism endpoint.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    registry: Arc<MetricRegistry>,
    loops: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics and the registry.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.listen_addr).context("creating health metrics")?);
        let registry = Arc::new(MetricRegistry::from_config(&cfg.registry));

        Ok(Self {
            cfg,
            health,
            registry,
            loops: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Registry shared by the scrape loops and the metrics server.
    pub fn registry(&self) -> Arc<MetricRegistry> {
        Arc::clone(&self.registry)
    }

    /// Starts the metrics server and the scrape loops. Returns the address
    /// the metrics server is bound to.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        // 1. Serve /metrics before the first cycle so health checks respond.
        let addr = self
            .health
            .start(Arc::clone(&self.registry))
            .await
            .context("starting metrics server")?;

        // 2. One scrape loop per endpoint.
        for base_url in self.cfg.prism.base_urls() {
            let client = self.create_prism_client(&base_url)?;
            let fetcher = Fetcher::new(Arc::new(client), &self.cfg.prism);

            let scrape = ScrapeLoop::new(
                fetcher,
                Arc::clone(&self.registry),
                Arc::clone(&self.health),
                self.cfg.poll_interval,
            );

            info!(
                prism = %scrape.prism(),
                interval = ?self.cfg.poll_interval,
                "starting scrape loop",
            );

            self.loops
                .push(tokio::spawn(scrape.run(self.cancel.child_token())));
        }

        info!(endpoints = self.loops.len(), "agent fully started");

        Ok(addr)
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal all scrape loops to stop after their current cycle.
        self.cancel.cancel();

        for handle in self.loops.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "scrape loop task failed");
            }
        }

        // Stop metrics server.
        self.health.stop().await?;

        Ok(())
    }

    /// Create a Prism client with metrics callback.
    fn create_prism_client(&self, base_url: &str) -> Result<prism::Client> {
        let client = prism::Client::new(&self.cfg.prism, base_url)
            .with_context(|| format!("creating Prism client for {base_url}"))?;

        let health = Arc::clone(&self.health);
        let client = client.with_metrics(Box::new(move |endpoint, status, duration| {
            health
                .api_requests_total
                .with_label_values(&[endpoint, status])
                .inc();
            health
                .api_request_duration
                .with_label_values(&[endpoint])
                .observe(duration.as_secs_f64());
        }));

        Ok(client)
    }
}
