//! Entity fetcher: pulls one cycle's worth of VMs, hosts and clusters from a
//! Prism endpoint and converts the raw records into typed entities.
//!
//! Defaults for missing fields:
//! - VM without a uuid: skipped (no stable identity to key series on).
//! - VM/host/cluster name: `"unknown"`.
//! - Disk or NIC name: `"unknown"`.
//! - Counts, sizes and stats: 0.
//! - Power state: off.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::aggregate::{is_powered_on, vcpu_count};
use crate::config::PrismConfig;
use crate::prism::types::{ClusterRecord, HostRecord, VmRecord, VmStatsSummary};
use crate::prism::{fetch_all_pages, ApiError, PrismApi, VM_LIST_PATH};

const UNKNOWN: &str = "unknown";

/// Runtime stats of one VM could not be fetched. Degrades that VM only.
#[derive(Error, Debug)]
#[error("fetching stats for VM {uuid}: {source}")]
pub struct StatFetchError {
    pub uuid: String,
    #[source]
    pub source: StatFetchCause,
}

#[derive(Error, Debug)]
pub enum StatFetchCause {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("stats task did not complete: {0}")]
    Task(#[from] JoinError),
}

/// A list call every cycle depends on failed; the cycle is abandoned.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("listing VMs: {0}")]
    Vms(#[source] ApiError),

    #[error("listing clusters: {0}")]
    Clusters(#[source] ApiError),

    #[error("listing hosts: {0}")]
    Hosts(#[source] ApiError),
}

/// A VM as observed this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachine {
    pub uuid: String,
    pub name: String,
    pub powered_on: bool,
    pub vcpus: u64,
    pub memory_mib: u64,
    pub ip_addresses: Vec<String>,
    /// `None` when the stats fetch failed this cycle.
    pub runtime: Option<VmRuntime>,
}

/// Runtime counters from the per-VM stats summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmRuntime {
    pub cpu_usage_ppm: f64,
    pub memory_usage_percent: f64,
    /// Disk name to used bytes.
    pub disks: BTreeMap<String, f64>,
    pub nics: BTreeMap<String, NicCounters>,
    pub io: IoCounters,
}

/// Storage controller and hypervisor network I/O of one VM.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoCounters {
    pub iops: f64,
    pub avg_latency_usecs: f64,
    pub read_bandwidth_kbps: f64,
    pub write_bandwidth_kbps: f64,
    pub network_bandwidth_kbps: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NicCounters {
    pub rx_bytes: f64,
    pub tx_bytes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub name: String,
    pub cpu_usage_ppm: f64,
    pub memory_usage_ppm: f64,
    pub io_bandwidth_kbps: f64,
    pub iops: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub vm_count: u64,
    pub host_count: u64,
    pub cpu_usage_ppm: f64,
    pub memory_usage_ppm: f64,
    pub io_bandwidth_kbps: f64,
    pub iops: f64,
    pub storage_total_bytes: f64,
    pub storage_used_bytes: f64,
}

/// Everything one cycle observed on one endpoint.
#[derive(Debug, Default)]
pub struct Inventory {
    pub vms: Vec<VirtualMachine>,
    pub hosts: Vec<Host>,
    pub clusters: Vec<Cluster>,
    /// Per-VM stats failures; those VMs have `runtime: None`.
    pub stat_failures: Vec<StatFetchError>,
}

impl VirtualMachine {
    /// Converts a raw VM record. Returns `None` for records without a uuid.
    pub fn from_record(record: &VmRecord) -> Option<Self> {
        let uuid = record
            .metadata
            .uuid
            .as_deref()
            .filter(|u| !u.is_empty())?
            .to_string();

        let resources = &record.spec.resources;
        let status = &record.status.resources;

        let ip_addresses = status
            .nic_list
            .iter()
            .flat_map(|nic| nic.ip_endpoint_list.iter())
            .filter_map(|ep| ep.ip.clone())
            .filter(|ip| !ip.is_empty())
            .collect();

        Some(Self {
            uuid,
            name: name_or_unknown(record.spec.name.as_deref()),
            powered_on: is_powered_on(status.power_state.as_deref()),
            vcpus: vcpu_count(resources.num_sockets, resources.num_vcpus_per_socket),
            memory_mib: resources.memory_size_mib.unwrap_or(0),
            ip_addresses,
            runtime: None,
        })
    }
}

impl From<&VmStatsSummary> for VmRuntime {
    fn from(summary: &VmStatsSummary) -> Self {
        let disks = summary
            .disk
            .iter()
            .map(|d| {
                (
                    name_or_unknown(d.name.as_deref()),
                    d.used_bytes.unwrap_or(0.0),
                )
            })
            .collect();

        let nics = summary
            .nic
            .iter()
            .map(|n| {
                (
                    name_or_unknown(n.name.as_deref()),
                    NicCounters {
                        rx_bytes: n.rx_bytes.unwrap_or(0.0),
                        tx_bytes: n.tx_bytes.unwrap_or(0.0),
                    },
                )
            })
            .collect();

        Self {
            cpu_usage_ppm: summary.cpu.usage_ppm.unwrap_or(0.0),
            memory_usage_percent: summary.memory.usage_percent.unwrap_or(0.0),
            disks,
            nics,
            io: IoCounters {
                iops: summary.controller.num_ops.unwrap_or(0.0),
                avg_latency_usecs: summary.controller.avg_io_latency_usecs.unwrap_or(0.0),
                read_bandwidth_kbps: summary.controller.read_io_bandwidth_kbps.unwrap_or(0.0),
                write_bandwidth_kbps: summary.controller.write_io_bandwidth_kbps.unwrap_or(0.0),
                network_bandwidth_kbps: summary.hypervisor.network_io_bandwidth_kbps.unwrap_or(0.0),
            },
        }
    }
}

impl From<&HostRecord> for Host {
    fn from(record: &HostRecord) -> Self {
        Self {
            name: name_or_unknown(record.name.as_deref()),
            cpu_usage_ppm: record.stats.cpu_usage_ppm.unwrap_or(0.0),
            memory_usage_ppm: record.stats.memory_usage_ppm.unwrap_or(0.0),
            io_bandwidth_kbps: record.stats.io_bandwidth_kbps.unwrap_or(0.0),
            iops: record.stats.iops.unwrap_or(0.0),
        }
    }
}

impl From<&ClusterRecord> for Cluster {
    fn from(record: &ClusterRecord) -> Self {
        Self {
            name: name_or_unknown(record.name.as_deref()),
            vm_count: record.vm.len() as u64,
            host_count: record.hosts.len() as u64,
            cpu_usage_ppm: record.stats.cpu_usage_ppm.unwrap_or(0.0),
            memory_usage_ppm: record.stats.memory_usage_ppm.unwrap_or(0.0),
            io_bandwidth_kbps: record.stats.io_bandwidth_kbps.unwrap_or(0.0),
            iops: record.stats.iops.unwrap_or(0.0),
            storage_total_bytes: record.storage.capacity_bytes.unwrap_or(0.0),
            storage_used_bytes: record.storage.usage_bytes.unwrap_or(0.0),
        }
    }
}

fn name_or_unknown(name: Option<&str>) -> String {
    match name {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// Fetches entities from one Prism endpoint.
pub struct Fetcher<A> {
    api: Arc<A>,
    page_size: usize,
    max_pages: usize,
    stats_concurrency: usize,
}

impl<A: PrismApi + 'static> Fetcher<A> {
    pub fn new(api: Arc<A>, cfg: &PrismConfig) -> Self {
        Self {
            api,
            page_size: cfg.page_size.max(1),
            max_pages: cfg.max_pages.max(1),
            stats_concurrency: cfg.stats_concurrency.max(1),
        }
    }

    /// Endpoint label of the underlying API.
    pub fn name(&self) -> &str {
        self.api.name()
    }

    /// Fetches the full VM inventory, page by page.
    pub async fn list_vms(&self) -> Result<Vec<VmRecord>, ApiError> {
        let api = self.api.as_ref();
        let page_size = self.page_size;

        fetch_all_pages(VM_LIST_PATH, page_size, self.max_pages, move |offset| {
            api.list_vms_page(offset, page_size)
        })
        .await
    }

    /// Fetches the stats summary of one VM.
    pub async fn fetch_vm_stats(&self, uuid: &str) -> Result<VmStatsSummary, StatFetchError> {
        fetch_stats(self.api.as_ref(), uuid).await
    }

    pub async fn list_clusters(&self) -> Result<Vec<ClusterRecord>, ApiError> {
        self.api.list_clusters().await
    }

    pub async fn list_hosts(&self) -> Result<Vec<HostRecord>, ApiError> {
        self.api.list_hosts().await
    }

    /// Runs one fetch pass: VMs (paged), per-VM stats, clusters and hosts.
    ///
    /// Stats are fetched concurrently, at most `stats_concurrency` at a time.
    /// A failed stats call leaves that VM with `runtime: None` and is
    /// reported in [`Inventory::stat_failures`]; a failed list call fails the
    /// whole pass.
    pub async fn collect(&self) -> Result<Inventory, CycleError> {
        let records = self.list_vms().await.map_err(CycleError::Vms)?;

        let mut vms: Vec<VirtualMachine> = records
            .iter()
            .filter_map(|r| {
                let vm = VirtualMachine::from_record(r);
                if vm.is_none() {
                    debug!(prism = %self.name(), name = ?r.spec.name, "skipping VM without uuid");
                }
                vm
            })
            .collect();

        let stat_failures = self.attach_runtime(&mut vms).await;

        let clusters = self
            .list_clusters()
            .await
            .map_err(CycleError::Clusters)?
            .iter()
            .map(Cluster::from)
            .collect();

        let hosts = self
            .list_hosts()
            .await
            .map_err(CycleError::Hosts)?
            .iter()
            .map(Host::from)
            .collect();

        Ok(Inventory {
            vms,
            hosts,
            clusters,
            stat_failures,
        })
    }

    /// Fetches stats for every VM and fills in `runtime` where it succeeded.
    async fn attach_runtime(&self, vms: &mut [VirtualMachine]) -> Vec<StatFetchError> {
        let semaphore = Arc::new(Semaphore::new(self.stats_concurrency));
        let mut tasks = JoinSet::new();

        // Task id to VM index; a panicked task only reports its id.
        let mut task_vms = HashMap::with_capacity(vms.len());

        for (idx, vm) in vms.iter().enumerate() {
            let api = Arc::clone(&self.api);
            let semaphore = Arc::clone(&semaphore);
            let uuid = vm.uuid.clone();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, fetch_stats(api.as_ref(), &uuid).await)
            });
            task_vms.insert(handle.id(), idx);
        }

        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((idx, Ok(summary))) => {
                    if let Some(vm) = vms.get_mut(idx) {
                        vm.runtime = Some(VmRuntime::from(&summary));
                    }
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) => {
                    let uuid = task_vms
                        .get(&e.id())
                        .and_then(|&idx| vms.get(idx))
                        .map(|vm| vm.uuid.clone())
                        .unwrap_or_else(|| UNKNOWN.to_string());
                    StatFetchError {
                        uuid,
                        source: StatFetchCause::Task(e),
                    }
                }
            };

            warn!(prism = %self.name(), error = %failure, "VM stats fetch failed");
            failures.push(failure);
        }

        failures.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        failures
    }
}

async fn fetch_stats<A: PrismApi>(
    api: &A,
    uuid: &str,
) -> Result<VmStatsSummary, StatFetchError> {
    api.vm_stats(uuid).await.map_err(|e| StatFetchError {
        uuid: uuid.to_string(),
        source: e.into(),
    })
}
