//! Every metric the exporter publishes from Prism data.
//!
//! Each definition fixes its label keys and the one conversion applied to
//! its raw upstream value. Usage metrics reported by Prism in parts per
//! million are exposed as percent; values Prism already reports in percent
//! pass through unchanged.

use crate::registry::metric::{MetricDef, Normalization, Unit};

const VM_LABELS: &[&str] = &["prism", "uuid", "vm"];
const VM_IP_LABELS: &[&str] = &["prism", "uuid", "vm", "ip"];
const VM_DISK_LABELS: &[&str] = &["prism", "uuid", "vm", "disk"];
const VM_NIC_LABELS: &[&str] = &["prism", "uuid", "vm", "nic"];
const HOST_LABELS: &[&str] = &["prism", "host"];
const CLUSTER_LABELS: &[&str] = &["prism", "cluster"];
const PRISM_LABELS: &[&str] = &["prism"];

// --- VM config ---

pub static VM_POWER_STATE: MetricDef = MetricDef {
    name: "nutanix_vm_power_state",
    help: "Whether the VM is powered on (1=on, 0=off).",
    labels: VM_LABELS,
    unit: Unit::State,
    normalization: Normalization::None,
};

pub static VM_VCPUS: MetricDef = MetricDef {
    name: "nutanix_vm_vcpus",
    help: "Number of vCPUs (sockets x vCPUs per socket).",
    labels: VM_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

pub static VM_MEMORY_BYTES: MetricDef = MetricDef {
    name: "nutanix_vm_memory_bytes",
    help: "Configured VM memory in bytes.",
    labels: VM_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::MibToBytes,
};

pub static VM_IP_INFO: MetricDef = MetricDef {
    name: "nutanix_vm_ip_info",
    help: "IP addresses reported on the VM's NICs (always 1).",
    labels: VM_IP_LABELS,
    unit: Unit::State,
    normalization: Normalization::None,
};

// --- VM runtime ---

pub static VM_CPU_USAGE_PERCENT: MetricDef = MetricDef {
    name: "nutanix_vm_cpu_usage_percent",
    help: "VM CPU usage in percent.",
    labels: VM_LABELS,
    unit: Unit::Percent,
    normalization: Normalization::PpmToPercent,
};

pub static VM_MEMORY_USAGE_PERCENT: MetricDef = MetricDef {
    name: "nutanix_vm_memory_usage_percent",
    help: "VM memory usage in percent.",
    labels: VM_LABELS,
    unit: Unit::Percent,
    normalization: Normalization::None,
};

pub static VM_DISK_USED_BYTES: MetricDef = MetricDef {
    name: "nutanix_vm_disk_used_bytes",
    help: "Bytes used on a VM disk.",
    labels: VM_DISK_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::None,
};

pub static VM_NIC_RECEIVE_BYTES: MetricDef = MetricDef {
    name: "nutanix_vm_nic_receive_bytes",
    help: "Bytes received on a VM NIC.",
    labels: VM_NIC_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::None,
};

pub static VM_NIC_TRANSMIT_BYTES: MetricDef = MetricDef {
    name: "nutanix_vm_nic_transmit_bytes",
    help: "Bytes transmitted on a VM NIC.",
    labels: VM_NIC_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::None,
};

// --- VM I/O ---

pub static VM_IOPS: MetricDef = MetricDef {
    name: "nutanix_vm_iops",
    help: "VM storage controller I/O operations per second.",
    labels: VM_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

pub static VM_IO_LATENCY_USECS: MetricDef = MetricDef {
    name: "nutanix_vm_io_latency_usecs",
    help: "VM storage controller average I/O latency in microseconds.",
    labels: VM_LABELS,
    unit: Unit::Microseconds,
    normalization: Normalization::None,
};

pub static VM_READ_IO_BANDWIDTH_KBPS: MetricDef = MetricDef {
    name: "nutanix_vm_read_io_bandwidth_kbps",
    help: "VM storage controller read bandwidth in kB/s.",
    labels: VM_LABELS,
    unit: Unit::Bandwidth,
    normalization: Normalization::None,
};

pub static VM_WRITE_IO_BANDWIDTH_KBPS: MetricDef = MetricDef {
    name: "nutanix_vm_write_io_bandwidth_kbps",
    help: "VM storage controller write bandwidth in kB/s.",
    labels: VM_LABELS,
    unit: Unit::Bandwidth,
    normalization: Normalization::None,
};

pub static VM_NETWORK_IO_BANDWIDTH_KBPS: MetricDef = MetricDef {
    name: "nutanix_vm_network_io_bandwidth_kbps",
    help: "VM hypervisor network bandwidth in kB/s.",
    labels: VM_LABELS,
    unit: Unit::Bandwidth,
    normalization: Normalization::None,
};

// --- Hosts ---

pub static HOST_CPU_USAGE_PERCENT: MetricDef = MetricDef {
    name: "nutanix_host_cpu_usage_percent",
    help: "Hypervisor CPU usage in percent.",
    labels: HOST_LABELS,
    unit: Unit::Percent,
    normalization: Normalization::PpmToPercent,
};

pub static HOST_MEMORY_USAGE_PERCENT: MetricDef = MetricDef {
    name: "nutanix_host_memory_usage_percent",
    help: "Hypervisor memory usage in percent.",
    labels: HOST_LABELS,
    unit: Unit::Percent,
    normalization: Normalization::PpmToPercent,
};

pub static HOST_IO_BANDWIDTH_KBPS: MetricDef = MetricDef {
    name: "nutanix_host_io_bandwidth_kbps",
    help: "Controller I/O bandwidth in kB/s.",
    labels: HOST_LABELS,
    unit: Unit::Bandwidth,
    normalization: Normalization::None,
};

pub static HOST_IOPS: MetricDef = MetricDef {
    name: "nutanix_host_iops",
    help: "Controller I/O operations per second.",
    labels: HOST_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

// --- Clusters ---

pub static CLUSTER_VM_COUNT: MetricDef = MetricDef {
    name: "nutanix_cluster_vm_count",
    help: "VMs listed as members of the cluster.",
    labels: CLUSTER_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

pub static CLUSTER_HOST_COUNT: MetricDef = MetricDef {
    name: "nutanix_cluster_host_count",
    help: "Hosts listed as members of the cluster.",
    labels: CLUSTER_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

pub static CLUSTER_CPU_USAGE_PERCENT: MetricDef = MetricDef {
    name: "nutanix_cluster_cpu_usage_percent",
    help: "Cluster hypervisor CPU usage in percent.",
    labels: CLUSTER_LABELS,
    unit: Unit::Percent,
    normalization: Normalization::PpmToPercent,
};

pub static CLUSTER_MEMORY_USAGE_PERCENT: MetricDef = MetricDef {
    name: "nutanix_cluster_memory_usage_percent",
    help: "Cluster hypervisor memory usage in percent.",
    labels: CLUSTER_LABELS,
    unit: Unit::Percent,
    normalization: Normalization::PpmToPercent,
};

pub static CLUSTER_IO_BANDWIDTH_KBPS: MetricDef = MetricDef {
    name: "nutanix_cluster_io_bandwidth_kbps",
    help: "Cluster controller I/O bandwidth in kB/s.",
    labels: CLUSTER_LABELS,
    unit: Unit::Bandwidth,
    normalization: Normalization::None,
};

pub static CLUSTER_IOPS: MetricDef = MetricDef {
    name: "nutanix_cluster_iops",
    help: "Cluster controller I/O operations per second.",
    labels: CLUSTER_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

pub static CLUSTER_STORAGE_TOTAL_BYTES: MetricDef = MetricDef {
    name: "nutanix_cluster_storage_total_bytes",
    help: "Cluster storage capacity in bytes.",
    labels: CLUSTER_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::None,
};

pub static CLUSTER_STORAGE_USED_BYTES: MetricDef = MetricDef {
    name: "nutanix_cluster_storage_used_bytes",
    help: "Cluster storage used in bytes.",
    labels: CLUSTER_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::None,
};

pub static CLUSTER_STORAGE_FREE_BYTES: MetricDef = MetricDef {
    name: "nutanix_cluster_storage_free_bytes",
    help: "Cluster storage free in bytes (capacity minus used).",
    labels: CLUSTER_LABELS,
    unit: Unit::Bytes,
    normalization: Normalization::None,
};

// --- Endpoint rollups ---

pub static VM_COUNT: MetricDef = MetricDef {
    name: "nutanix_vm_count",
    help: "Sum of cluster VM counts for the Prism endpoint.",
    labels: PRISM_LABELS,
    unit: Unit::Count,
    normalization: Normalization::None,
};

/// All definitions, in catalog order.
pub static ALL: &[&MetricDef] = &[
    &VM_POWER_STATE,
    &VM_VCPUS,
    &VM_MEMORY_BYTES,
    &VM_IP_INFO,
    &VM_CPU_USAGE_PERCENT,
    &VM_MEMORY_USAGE_PERCENT,
    &VM_DISK_USED_BYTES,
    &VM_NIC_RECEIVE_BYTES,
    &VM_NIC_TRANSMIT_BYTES,
    &VM_IOPS,
    &VM_IO_LATENCY_USECS,
    &VM_READ_IO_BANDWIDTH_KBPS,
    &VM_WRITE_IO_BANDWIDTH_KBPS,
    &VM_NETWORK_IO_BANDWIDTH_KBPS,
    &HOST_CPU_USAGE_PERCENT,
    &HOST_MEMORY_USAGE_PERCENT,
    &HOST_IO_BANDWIDTH_KBPS,
    &HOST_IOPS,
    &CLUSTER_VM_COUNT,
    &CLUSTER_HOST_COUNT,
    &CLUSTER_CPU_USAGE_PERCENT,
    &CLUSTER_MEMORY_USAGE_PERCENT,
    &CLUSTER_IO_BANDWIDTH_KBPS,
    &CLUSTER_IOPS,
    &CLUSTER_STORAGE_TOTAL_BYTES,
    &CLUSTER_STORAGE_USED_BYTES,
    &CLUSTER_STORAGE_FREE_BYTES,
    &VM_COUNT,
];
