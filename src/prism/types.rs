//! Wire schema for the Prism v2/v3 endpoints the exporter reads.
//!
//! Every field is optional on the wire. Absent or `null` fields deserialize
//! to `None` (or an empty list / default object), and the documented
//! defaults are applied when records are converted into inventory entities,
//! not here.

use serde::{Deserialize, Deserializer, Serialize};

/// Generic `{"entities": [...]}` list envelope shared by all list endpoints.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct EntityList<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_default")]
    pub entities: Vec<T>,
}

/// Body of a paged `vms/list` request.
#[derive(Debug, Clone, Serialize)]
pub struct VmListRequest {
    pub kind: &'static str,
    pub offset: usize,
    pub length: usize,
}

impl VmListRequest {
    pub fn page(offset: usize, length: usize) -> Self {
        Self {
            kind: "vm",
            offset,
            length,
        }
    }
}

// --- VM inventory (v3) ---

/// One entity from the v3 VM list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmRecord {
    #[serde(default, deserialize_with = "null_default")]
    pub metadata: VmMetadata,
    #[serde(default, deserialize_with = "null_default")]
    pub spec: VmSpec,
    #[serde(default, deserialize_with = "null_default")]
    pub status: VmStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmMetadata {
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmSpec {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub resources: VmSpecResources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmSpecResources {
    pub num_sockets: Option<u64>,
    pub num_vcpus_per_socket: Option<u64>,
    pub memory_size_mib: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmStatus {
    #[serde(default, deserialize_with = "null_default")]
    pub resources: VmStatusResources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmStatusResources {
    /// "ON", "OFF", ... as reported by Prism.
    pub power_state: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub nic_list: Vec<VmNicRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmNicRecord {
    #[serde(default, deserialize_with = "null_default")]
    pub ip_endpoint_list: Vec<IpEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpEndpoint {
    pub ip: Option<String>,
}

// --- VM runtime stats summary ---

/// Per-VM runtime stats summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmStatsSummary {
    #[serde(default, deserialize_with = "null_default")]
    pub cpu: CpuStats,
    #[serde(default, deserialize_with = "null_default")]
    pub memory: MemoryStats,
    #[serde(default, deserialize_with = "null_default")]
    pub disk: Vec<DiskStats>,
    #[serde(default, deserialize_with = "null_default")]
    pub nic: Vec<NicStats>,
    #[serde(default, deserialize_with = "null_default")]
    pub controller: ControllerStats,
    #[serde(default, deserialize_with = "null_default")]
    pub hypervisor: HypervisorStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    /// Parts per million of allocated vCPU capacity.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub usage_ppm: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    /// Already a percentage (0-100).
    #[serde(default, deserialize_with = "lenient_f64")]
    pub usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskStats {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub used_bytes: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NicStats {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rx_bytes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tx_bytes: Option<f64>,
}

/// Storage controller I/O counters of one VM.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControllerStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub num_ops: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub avg_io_latency_usecs: Option<f64>,
    #[serde(
        rename = "read_io_bandwidth_kBps",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub read_io_bandwidth_kbps: Option<f64>,
    #[serde(
        rename = "write_io_bandwidth_kBps",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub write_io_bandwidth_kbps: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HypervisorStats {
    #[serde(
        rename = "network_io_bandwidth_kBps",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub network_io_bandwidth_kbps: Option<f64>,
}

// --- Clusters and hosts (v2) ---

/// Performance counters shared by v2 cluster and host records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityStats {
    #[serde(
        rename = "hypervisor_cpu_usage_ppm",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub cpu_usage_ppm: Option<f64>,

    #[serde(
        rename = "hypervisor_memory_usage_ppm",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub memory_usage_ppm: Option<f64>,

    #[serde(
        rename = "controller_io_bandwidth_kBps",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub io_bandwidth_kbps: Option<f64>,

    #[serde(
        rename = "controller_num_iops",
        default,
        deserialize_with = "lenient_f64"
    )]
    pub iops: Option<f64>,
}

/// One entity from the v2 cluster list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterRecord {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub stats: EntityStats,
    /// Member VMs; only the count is used.
    #[serde(default, deserialize_with = "null_default")]
    pub vm: Vec<serde_json::Value>,
    /// Member hosts; only the count is used.
    #[serde(default, deserialize_with = "null_default")]
    pub hosts: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "null_default")]
    pub storage: StorageStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub capacity_bytes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub usage_bytes: Option<f64>,
}

/// One entity from the v2 host list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostRecord {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub stats: EntityStats,
}

/// Treats an explicit `null` like a missing key. Prism sends `null` for empty
/// lists and absent sub-objects.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Accepts a JSON number, a numeric string (v2 stats are string-encoded) or
/// null. Strings that do not parse as a number become `None`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(match value {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::String(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    })
}
