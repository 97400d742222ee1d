use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::export::health::HealthMetrics;
use crate::inventory::{CycleError, Fetcher};
use crate::prism::PrismApi;
use crate::registry::{MetricRegistry, PublishReport};

/// Phase of a scrape loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScrapeState {
    Idle = 0,
    Collecting = 1,
    Publishing = 2,
}

impl ScrapeState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Collecting,
            2 => Self::Publishing,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::Publishing => "publishing",
        }
    }
}

/// Periodically scrapes one Prism endpoint into the shared registry.
///
/// Cycles run inline on the ticker, so at most one cycle per endpoint is in
/// flight. Ticks that elapse while a cycle runs are dropped and counted.
pub struct ScrapeLoop<A> {
    fetcher: Fetcher<A>,
    registry: Arc<MetricRegistry>,
    health: Arc<HealthMetrics>,
    interval: Duration,
    state: AtomicU8,
}

impl<A: PrismApi + 'static> ScrapeLoop<A> {
    pub fn new(
        fetcher: Fetcher<A>,
        registry: Arc<MetricRegistry>,
        health: Arc<HealthMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            registry,
            health,
            interval,
            state: AtomicU8::new(ScrapeState::Idle as u8),
        }
    }

    /// Endpoint label used for every series this loop publishes.
    pub fn prism(&self) -> &str {
        self.fetcher.name()
    }

    pub fn state(&self) -> ScrapeState {
        ScrapeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ScrapeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Collects, aggregates and publishes one cycle.
    ///
    /// On error nothing is published and the registry keeps the previous
    /// values for this endpoint.
    pub async fn run_cycle(&self) -> Result<PublishReport, CycleError> {
        self.set_state(ScrapeState::Collecting);

        let inventory = match self.fetcher.collect().await {
            Ok(inventory) => inventory,
            Err(e) => {
                self.set_state(ScrapeState::Idle);
                return Err(e);
            }
        };

        if !inventory.stat_failures.is_empty() {
            self.health
                .vm_stats_failures
                .with_label_values(&[self.prism()])
                .inc_by(inventory.stat_failures.len() as f64);
        }

        self.set_state(ScrapeState::Publishing);

        let samples = aggregate(self.prism(), &inventory);
        let report = self.registry.publish(self.prism(), samples);

        self.set_state(ScrapeState::Idle);

        debug!(
            prism = %self.prism(),
            vms = inventory.vms.len(),
            hosts = inventory.hosts.len(),
            clusters = inventory.clusters.len(),
            stat_failures = inventory.stat_failures.len(),
            "cycle collected",
        );

        Ok(report)
    }

    /// Runs one cycle and records its outcome in the self-metrics.
    pub async fn scrape_once(&self) -> Result<PublishReport, CycleError> {
        let start = Instant::now();
        let result = self.run_cycle().await;
        let elapsed = start.elapsed();

        let prism = self.prism();
        self.health
            .scrape_duration
            .with_label_values(&[prism])
            .observe(elapsed.as_secs_f64());

        match &result {
            Ok(report) => {
                self.health.up.with_label_values(&[prism]).set(1.0);
                self.health
                    .scrape_cycles
                    .with_label_values(&[prism, "success"])
                    .inc();
                self.health
                    .last_scrape_success
                    .with_label_values(&[prism])
                    .set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
                self.health
                    .registry_rejected_samples
                    .inc_by(report.rejected as f64);
                self.health.registry_series.set(report.series as f64);

                info!(
                    prism = %prism,
                    accepted = report.accepted,
                    rejected = report.rejected,
                    evicted = report.evicted,
                    series = report.series,
                    duration_ms = elapsed.as_millis() as u64,
                    "scrape cycle complete",
                );
            }
            Err(e) => {
                self.health.up.with_label_values(&[prism]).set(0.0);
                self.health
                    .scrape_cycles
                    .with_label_values(&[prism, "failure"])
                    .inc();

                warn!(prism = %prism, error = %e, "scrape cycle failed, keeping previous values");
            }
        }

        result
    }

    /// Scrapes on every tick until `cancel` fires. The first cycle starts
    /// immediately.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            prism = %self.prism(),
            interval = ?self.interval,
            "scrape loop started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let start = Instant::now();
                    // Outcome is already recorded in the self-metrics.
                    let _ = self.scrape_once().await;

                    let skipped = skipped_ticks(start.elapsed(), self.interval);
                    if skipped > 0 {
                        self.health
                            .scrape_ticks_skipped
                            .with_label_values(&[self.prism()])
                            .inc_by(skipped as f64);
                        warn!(
                            prism = %self.prism(),
                            skipped,
                            "scrape cycle overran the poll interval",
                        );
                    }
                }
            }
        }

        info!(prism = %self.prism(), "scrape loop stopped");
    }
}

/// Ticks that fell due while a cycle of length `elapsed` was running.
fn skipped_ticks(elapsed: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 0;
    }
    u64::try_from(elapsed.as_nanos() / interval.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrismConfig;
    use crate::prism::types::{
        ClusterRecord, HostRecord, VmMetadata, VmRecord, VmStatsSummary,
    };
    use crate::prism::ApiError;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct FakePrism {
        fail_clusters: AtomicBool,
        vm_count: usize,
        cycles: AtomicUsize,
    }

    impl FakePrism {
        fn new(vm_count: usize) -> Self {
            Self {
                fail_clusters: AtomicBool::new(false),
                vm_count,
                cycles: AtomicUsize::new(0),
            }
        }
    }

    impl PrismApi for FakePrism {
        fn name(&self) -> &str {
            "prism-a:9440"
        }

        async fn list_vms_page(
            &self,
            offset: usize,
            length: usize,
        ) -> Result<Vec<VmRecord>, ApiError> {
            if offset == 0 {
                self.cycles.fetch_add(1, Ordering::SeqCst);
            }
            Ok((offset..self.vm_count.min(offset + length))
                .map(|i| VmRecord {
                    metadata: VmMetadata {
                        uuid: Some(format!("uuid-{i}")),
                    },
                    ..Default::default()
                })
                .collect())
        }

        async fn vm_stats(&self, _uuid: &str) -> Result<VmStatsSummary, ApiError> {
            Ok(VmStatsSummary::default())
        }

        async fn list_clusters(&self) -> Result<Vec<ClusterRecord>, ApiError> {
            if self.fail_clusters.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    path: crate::prism::CLUSTER_LIST_PATH.to_string(),
                    status: 500,
                    body: String::new(),
                });
            }
            Ok(vec![ClusterRecord {
                name: Some("c1".to_string()),
                vm: vec![serde_json::Value::Null; self.vm_count],
                ..Default::default()
            }])
        }

        async fn list_hosts(&self) -> Result<Vec<HostRecord>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn scrape_loop(api: Arc<FakePrism>, interval: Duration) -> ScrapeLoop<FakePrism> {
        let fetcher = Fetcher::new(api, &PrismConfig::default());
        let health = Arc::new(HealthMetrics::new(":0").expect("metrics should register"));
        ScrapeLoop::new(fetcher, Arc::new(MetricRegistry::new(0)), health, interval)
    }

    #[test]
    fn test_skipped_ticks() {
        let interval = Duration::from_secs(30);
        assert_eq!(skipped_ticks(Duration::from_secs(5), interval), 0);
        assert_eq!(skipped_ticks(Duration::from_secs(30), interval), 1);
        assert_eq!(skipped_ticks(Duration::from_secs(95), interval), 3);
        assert_eq!(skipped_ticks(Duration::from_secs(95), Duration::ZERO), 0);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [ScrapeState::Idle, ScrapeState::Collecting, ScrapeState::Publishing] {
            assert_eq!(ScrapeState::from_u8(state as u8), state);
        }
        assert_eq!(ScrapeState::Publishing.as_str(), "publishing");
    }

    #[tokio::test]
    async fn test_scrape_once_success_sets_up() {
        let sl = scrape_loop(Arc::new(FakePrism::new(3)), Duration::from_secs(30));

        let report = sl.scrape_once().await.expect("cycle should succeed");
        assert_eq!(report.rejected, 0);
        assert_eq!(sl.state(), ScrapeState::Idle);

        let snap = sl.registry.snapshot();
        assert_eq!(
            snap.get("nutanix_cluster_vm_count", &["prism-a:9440", "c1"]),
            Some(3.0)
        );
        assert_eq!(sl.health.up.with_label_values(&["prism-a:9440"]).get(), 1.0);
        assert!(
            sl.health
                .last_scrape_success
                .with_label_values(&["prism-a:9440"])
                .get()
                > 0.0
        );
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_snapshot() {
        let api = Arc::new(FakePrism::new(2));
        let sl = scrape_loop(Arc::clone(&api), Duration::from_secs(30));

        sl.scrape_once().await.expect("first cycle should succeed");
        let before = sl.registry.snapshot();
        let up = sl.health.up.with_label_values(&["prism-a:9440"]);
        assert_eq!(up.get(), 1.0);

        api.fail_clusters.store(true, Ordering::SeqCst);
        let err = sl.scrape_once().await.expect_err("second cycle should fail");
        assert!(matches!(err, CycleError::Clusters(_)));
        assert_eq!(sl.state(), ScrapeState::Idle);

        let after = sl.registry.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(up.get(), 0.0, "up must drop after a failed cycle");
        assert_eq!(
            sl.health
                .scrape_cycles
                .with_label_values(&["prism-a:9440", "failure"])
                .get(),
            1.0
        );

        api.fail_clusters.store(false, Ordering::SeqCst);
        sl.scrape_once().await.expect("third cycle should recover");
        assert_eq!(up.get(), 1.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let api = Arc::new(FakePrism::new(1));
        let sl = scrape_loop(Arc::clone(&api), Duration::from_millis(10));
        let registry = Arc::clone(&sl.registry);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(sl.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(55)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit after cancel")
            .expect("loop task should not panic");

        assert!(api.cycles.load(Ordering::SeqCst) >= 2);
        assert!(registry.snapshot().generation() >= 2);
    }
}
