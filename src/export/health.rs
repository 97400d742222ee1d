use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::registry::{MetricRegistry, SeriesFilter};

const NAMESPACE: &str = "nutanix";

/// Exposition content type for the Prometheus text format.
const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metrics describing the exporter itself.
///
/// All metrics use the "nutanix" namespace and live in a dedicated registry,
/// separate from the Prism series held by [`MetricRegistry`]. Both are
/// served from the same `/metrics` endpoint.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    // === Scrape loop ===
    /// Whether the last scrape cycle of an endpoint succeeded (1=yes, 0=no).
    pub up: GaugeVec,
    /// Scrape cycle duration by endpoint.
    pub scrape_duration: HistogramVec,
    /// Scrape cycles by endpoint and result (success/failure).
    pub scrape_cycles: CounterVec,
    /// Ticks skipped because a cycle was still running.
    pub scrape_ticks_skipped: CounterVec,
    /// Unix time of the last successful cycle by endpoint.
    pub last_scrape_success: GaugeVec,
    /// VMs whose stats summary could not be fetched.
    pub vm_stats_failures: CounterVec,

    // === Prism API ===
    /// Prism API requests by endpoint and status.
    pub api_requests_total: CounterVec,
    /// Prism API request duration by endpoint.
    pub api_request_duration: HistogramVec,

    // === Registry ===
    /// Samples rejected because their label keys changed.
    pub registry_rejected_samples: Counter,
    /// Series currently held by the metric registry.
    pub registry_series: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        // === Scrape loop ===
        let up = GaugeVec::new(
            Opts::new(
                "up",
                "Whether the last scrape of the Prism endpoint succeeded (1=yes, 0=no).",
            )
            .namespace(NAMESPACE),
            &["prism"],
        )?;
        let scrape_duration = HistogramVec::new(
            HistogramOpts::new(
                "scrape_duration_seconds",
                "Duration of a full scrape cycle by Prism endpoint.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["prism"],
        )?;
        let scrape_cycles = CounterVec::new(
            Opts::new(
                "scrape_cycles_total",
                "Total scrape cycles by Prism endpoint and result.",
            )
            .namespace(NAMESPACE),
            &["prism", "result"],
        )?;
        let scrape_ticks_skipped = CounterVec::new(
            Opts::new(
                "scrape_ticks_skipped_total",
                "Total scrape ticks skipped because a cycle was still running.",
            )
            .namespace(NAMESPACE),
            &["prism"],
        )?;
        let last_scrape_success = GaugeVec::new(
            Opts::new(
                "last_scrape_success_timestamp_seconds",
                "Unix time of the last successful scrape cycle.",
            )
            .namespace(NAMESPACE),
            &["prism"],
        )?;
        let vm_stats_failures = CounterVec::new(
            Opts::new(
                "vm_stats_failures_total",
                "Total VM stats summary fetches that failed.",
            )
            .namespace(NAMESPACE),
            &["prism"],
        )?;

        // === Prism API ===
        let api_requests_total = CounterVec::new(
            Opts::new(
                "api_requests_total",
                "Total Prism API requests by endpoint and status.",
            )
            .namespace(NAMESPACE),
            &["endpoint", "status"],
        )?;
        let api_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "api_request_duration_seconds",
                "Prism API request duration by endpoint.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["endpoint"],
        )?;

        // === Registry ===
        let registry_rejected_samples = Counter::with_opts(
            Opts::new(
                "registry_rejected_samples_total",
                "Total samples rejected because their label keys changed.",
            )
            .namespace(NAMESPACE),
        )?;
        let registry_series = Gauge::with_opts(
            Opts::new(
                "registry_series",
                "Number of series held by the metric registry.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(scrape_cycles.clone()))?;
        registry.register(Box::new(scrape_ticks_skipped.clone()))?;
        registry.register(Box::new(last_scrape_success.clone()))?;
        registry.register(Box::new(vm_stats_failures.clone()))?;
        registry.register(Box::new(api_requests_total.clone()))?;
        registry.register(Box::new(api_request_duration.clone()))?;
        registry.register(Box::new(registry_rejected_samples.clone()))?;
        registry.register(Box::new(registry_series.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            up,
            scrape_duration,
            scrape_cycles,
            scrape_ticks_skipped,
            last_scrape_success,
            vm_stats_failures,
            api_requests_total,
            api_request_duration,
            registry_rejected_samples,
            registry_series,
        })
    }

    /// Encodes the self-metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("encoding self metrics")?;
        String::from_utf8(buffer).context("converting self metrics to string")
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 is requested.
    pub async fn start(self: &Arc<Self>, metrics: Arc<MetricRegistry>) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9100"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            health: Arc::clone(self),
            metrics,
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    health: Arc<HealthMetrics>,
    metrics: Arc<MetricRegistry>,
}

/// `?vm=<name>&ip=<address>` on /metrics.
#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    vm: Option<String>,
    ip: Option<String>,
}

impl From<MetricsQuery> for SeriesFilter {
    fn from(q: MetricsQuery) -> Self {
        Self {
            vm: q.vm.filter(|v| !v.is_empty()),
            ip: q.ip.filter(|v| !v.is_empty()),
        }
    }
}

/// GET /metrics - Prometheus text format.
///
/// Unfiltered requests get every Prism series followed by the self-metrics.
/// Filtered requests get only the matching VM series.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let filter = SeriesFilter::from(query);
    let mut body = state.metrics.snapshot().render(&filter);

    if filter.is_empty() {
        match state.health.encode() {
            Ok(text) => body.push_str(&text),
            Err(e) => {
                tracing::error!(error = %e, "encoding metrics");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "text/plain")],
                    "encoding error".to_string(),
                );
            }
        }
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body)
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
