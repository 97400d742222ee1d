pub mod catalog;

use crate::inventory::{Cluster, Host, Inventory, IoCounters, VirtualMachine};
use crate::registry::metric::MetricSample;

use self::catalog::*;

/// Power state as a gauge value: 1 on, 0 off.
pub fn power_state_value(powered_on: bool) -> f64 {
    if powered_on {
        1.0
    } else {
        0.0
    }
}

/// Case-insensitive "on". Anything else, including a missing state, is off.
pub fn is_powered_on(power_state: Option<&str>) -> bool {
    power_state.is_some_and(|s| s.trim().eq_ignore_ascii_case("on"))
}

/// `sockets x vcpus_per_socket`; missing fields count as 0.
pub fn vcpu_count(sockets: Option<u64>, vcpus_per_socket: Option<u64>) -> u64 {
    sockets
        .unwrap_or(0)
        .saturating_mul(vcpus_per_socket.unwrap_or(0))
}

/// Free storage derived from capacity and usage, clamped at 0 when upstream
/// reports more used than total.
pub fn storage_free(total: f64, used: f64) -> f64 {
    (total - used).max(0.0)
}

/// Converts one cycle's inventory into normalized samples for the `prism`
/// endpoint, including cluster rollups.
pub fn aggregate(prism: &str, inventory: &Inventory) -> Vec<MetricSample> {
    let mut samples = Vec::with_capacity(
        inventory.vms.len() * 11 + inventory.hosts.len() * 4 + inventory.clusters.len() * 9 + 1,
    );

    for vm in &inventory.vms {
        vm_samples(prism, vm, &mut samples);
    }

    for host in &inventory.hosts {
        host_samples(prism, host, &mut samples);
    }

    let mut vm_total = 0u64;
    for cluster in &inventory.clusters {
        vm_total += cluster.vm_count;
        cluster_samples(prism, cluster, &mut samples);
    }

    samples.push(VM_COUNT.sample(&[prism], vm_total as f64));

    samples
}

fn vm_samples(prism: &str, vm: &VirtualMachine, out: &mut Vec<MetricSample>) {
    let labels = [prism, vm.uuid.as_str(), vm.name.as_str()];

    out.push(VM_POWER_STATE.sample(&labels, power_state_value(vm.powered_on)));
    out.push(VM_VCPUS.sample(&labels, vm.vcpus as f64));
    out.push(VM_MEMORY_BYTES.sample(&labels, vm.memory_mib as f64));

    for ip in &vm.ip_addresses {
        let ip_labels = [prism, vm.uuid.as_str(), vm.name.as_str(), ip.as_str()];
        out.push(VM_IP_INFO.sample(&ip_labels, 1.0));
    }

    // Stats fetch failed this cycle: config samples only.
    let Some(runtime) = &vm.runtime else {
        return;
    };

    out.push(VM_CPU_USAGE_PERCENT.sample(&labels, runtime.cpu_usage_ppm));
    out.push(VM_MEMORY_USAGE_PERCENT.sample(&labels, runtime.memory_usage_percent));

    for (disk, used) in &runtime.disks {
        let disk_labels = [prism, vm.uuid.as_str(), vm.name.as_str(), disk.as_str()];
        out.push(VM_DISK_USED_BYTES.sample(&disk_labels, *used));
    }

    for (nic, counters) in &runtime.nics {
        let nic_labels = [prism, vm.uuid.as_str(), vm.name.as_str(), nic.as_str()];
        out.push(VM_NIC_RECEIVE_BYTES.sample(&nic_labels, counters.rx_bytes));
        out.push(VM_NIC_TRANSMIT_BYTES.sample(&nic_labels, counters.tx_bytes));
    }

    io_samples(&labels, &runtime.io, out);
}

fn io_samples(labels: &[&str], io: &IoCounters, out: &mut Vec<MetricSample>) {
    out.push(VM_IOPS.sample(labels, io.iops));
    out.push(VM_IO_LATENCY_USECS.sample(labels, io.avg_latency_usecs));
    out.push(VM_READ_IO_BANDWIDTH_KBPS.sample(labels, io.read_bandwidth_kbps));
    out.push(VM_WRITE_IO_BANDWIDTH_KBPS.sample(labels, io.write_bandwidth_kbps));
    out.push(VM_NETWORK_IO_BANDWIDTH_KBPS.sample(labels, io.network_bandwidth_kbps));
}

fn host_samples(prism: &str, host: &Host, out: &mut Vec<MetricSample>) {
    let labels = [prism, host.name.as_str()];

    out.push(HOST_CPU_USAGE_PERCENT.sample(&labels, host.cpu_usage_ppm));
    out.push(HOST_MEMORY_USAGE_PERCENT.sample(&labels, host.memory_usage_ppm));
    out.push(HOST_IO_BANDWIDTH_KBPS.sample(&labels, host.io_bandwidth_kbps));
    out.push(HOST_IOPS.sample(&labels, host.iops));
}

fn cluster_samples(prism: &str, cluster: &Cluster, out: &mut Vec<MetricSample>) {
    let labels = [prism, cluster.name.as_str()];

    out.push(CLUSTER_VM_COUNT.sample(&labels, cluster.vm_count as f64));
    out.push(CLUSTER_HOST_COUNT.sample(&labels, cluster.host_count as f64));
    out.push(CLUSTER_CPU_USAGE_PERCENT.sample(&labels, cluster.cpu_usage_ppm));
    out.push(CLUSTER_MEMORY_USAGE_PERCENT.sample(&labels, cluster.memory_usage_ppm));
    out.push(CLUSTER_IO_BANDWIDTH_KBPS.sample(&labels, cluster.io_bandwidth_kbps));
    out.push(CLUSTER_IOPS.sample(&labels, cluster.iops));
    out.push(CLUSTER_STORAGE_TOTAL_BYTES.sample(&labels, cluster.storage_total_bytes));
    out.push(CLUSTER_STORAGE_USED_BYTES.sample(&labels, cluster.storage_used_bytes));
    out.push(CLUSTER_STORAGE_FREE_BYTES.sample(
        &labels,
        storage_free(cluster.storage_total_bytes, cluster.storage_used_bytes),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{NicCounters, VmRuntime};
    use std::collections::BTreeMap;

    fn vm(uuid: &str, name: &str, runtime: Option<VmRuntime>) -> VirtualMachine {
        VirtualMachine {
            uuid: uuid.to_string(),
            name: name.to_string(),
            powered_on: true,
            vcpus: 4,
            memory_mib: 2048,
            ip_addresses: vec!["10.0.0.5".to_string()],
            runtime,
        }
    }

    fn runtime() -> VmRuntime {
        let mut disks = BTreeMap::new();
        disks.insert("scsi.0".to_string(), 1_000.0);
        let mut nics = BTreeMap::new();
        nics.insert(
            "eth0".to_string(),
            NicCounters {
                rx_bytes: 10.0,
                tx_bytes: 20.0,
            },
        );
        VmRuntime {
            cpu_usage_ppm: 550_000.0,
            memory_usage_percent: 55.0,
            disks,
            nics,
            io: IoCounters {
                iops: 180.0,
                avg_latency_usecs: 950.0,
                read_bandwidth_kbps: 2_048.0,
                write_bandwidth_kbps: 1_024.0,
                network_bandwidth_kbps: 300.0,
            },
        }
    }

    fn cluster(name: &str, vms: u64, hosts: u64) -> Cluster {
        Cluster {
            name: name.to_string(),
            vm_count: vms,
            host_count: hosts,
            cpu_usage_ppm: 250_000.0,
            memory_usage_ppm: 500_000.0,
            io_bandwidth_kbps: 1_200.0,
            iops: 300.0,
            storage_total_bytes: 1000.0,
            storage_used_bytes: 400.0,
        }
    }

    fn find<'a>(samples: &'a [MetricSample], name: &str) -> Vec<&'a MetricSample> {
        samples.iter().filter(|s| s.name() == name).collect()
    }

    #[test]
    fn test_power_state_mapping() {
        for on in ["ON", "on", "On", " on "] {
            assert_eq!(power_state_value(is_powered_on(Some(on))), 1.0, "{on:?}");
        }
        for off in ["OFF", "off", "", "powered_on", "unknown"] {
            assert_eq!(power_state_value(is_powered_on(Some(off))), 0.0, "{off:?}");
        }
        assert_eq!(power_state_value(is_powered_on(None)), 0.0);
    }

    #[test]
    fn test_vcpu_count() {
        assert_eq!(vcpu_count(Some(2), Some(4)), 8);
        assert_eq!(vcpu_count(None, Some(4)), 0);
        assert_eq!(vcpu_count(Some(2), None), 0);
        assert_eq!(vcpu_count(None, None), 0);
    }

    #[test]
    fn test_storage_free() {
        assert_eq!(storage_free(1000.0, 400.0), 600.0);
        assert_eq!(storage_free(1000.0, 1000.0), 0.0);
        assert_eq!(storage_free(0.0, 0.0), 0.0);
        assert_eq!(storage_free(400.0, 1000.0), 0.0);
    }

    #[test]
    fn test_vm_full_samples() {
        let inventory = Inventory {
            vms: vec![vm("u1", "web", Some(runtime()))],
            ..Default::default()
        };
        let samples = aggregate("p1", &inventory);

        let cpu = find(&samples, "nutanix_vm_cpu_usage_percent");
        assert_eq!(cpu.len(), 1);
        assert_eq!(cpu[0].value, 55.0);

        let mem = find(&samples, "nutanix_vm_memory_usage_percent");
        assert_eq!(mem[0].value, 55.0, "percent input must not be divided");

        let memory_bytes = find(&samples, "nutanix_vm_memory_bytes");
        assert_eq!(memory_bytes[0].value, 2048.0 * 1024.0 * 1024.0);

        let disk = find(&samples, "nutanix_vm_disk_used_bytes");
        assert_eq!(disk[0].label("disk"), Some("scsi.0"));
        assert_eq!(disk[0].value, 1_000.0);

        let rx = find(&samples, "nutanix_vm_nic_receive_bytes");
        let tx = find(&samples, "nutanix_vm_nic_transmit_bytes");
        assert_eq!(rx[0].value, 10.0);
        assert_eq!(tx[0].value, 20.0);
        assert_eq!(tx[0].label("nic"), Some("eth0"));

        let ip = find(&samples, "nutanix_vm_ip_info");
        assert_eq!(ip[0].label("ip"), Some("10.0.0.5"));

        assert_eq!(find(&samples, "nutanix_vm_iops")[0].value, 180.0);
        assert_eq!(find(&samples, "nutanix_vm_io_latency_usecs")[0].value, 950.0);
        assert_eq!(
            find(&samples, "nutanix_vm_read_io_bandwidth_kbps")[0].value,
            2_048.0
        );
        assert_eq!(
            find(&samples, "nutanix_vm_write_io_bandwidth_kbps")[0].value,
            1_024.0
        );
        let net = find(&samples, "nutanix_vm_network_io_bandwidth_kbps");
        assert_eq!(net[0].value, 300.0);
        assert_eq!(net[0].label("vm"), Some("web"));
    }

    #[test]
    fn test_vm_without_runtime_emits_config_only() {
        let inventory = Inventory {
            vms: vec![vm("u1", "web", None)],
            ..Default::default()
        };
        let samples = aggregate("p1", &inventory);

        assert_eq!(find(&samples, "nutanix_vm_power_state").len(), 1);
        assert_eq!(find(&samples, "nutanix_vm_vcpus")[0].value, 4.0);
        assert_eq!(find(&samples, "nutanix_vm_memory_bytes").len(), 1);
        assert!(find(&samples, "nutanix_vm_cpu_usage_percent").is_empty());
        assert!(find(&samples, "nutanix_vm_memory_usage_percent").is_empty());
        assert!(find(&samples, "nutanix_vm_disk_used_bytes").is_empty());
        assert!(find(&samples, "nutanix_vm_nic_receive_bytes").is_empty());
        assert!(find(&samples, "nutanix_vm_iops").is_empty());
        assert!(find(&samples, "nutanix_vm_io_latency_usecs").is_empty());
    }

    #[test]
    fn test_cluster_rollups() {
        let inventory = Inventory {
            clusters: vec![cluster("c1", 3, 2), cluster("c2", 5, 4)],
            ..Default::default()
        };
        let samples = aggregate("p1", &inventory);

        let vm_counts = find(&samples, "nutanix_cluster_vm_count");
        assert_eq!(vm_counts.len(), 2);
        assert_eq!(vm_counts[0].value, 3.0);
        assert_eq!(vm_counts[1].label("cluster"), Some("c2"));

        let free = find(&samples, "nutanix_cluster_storage_free_bytes");
        assert_eq!(free[0].value, 600.0);

        let cpu = find(&samples, "nutanix_cluster_cpu_usage_percent");
        assert_eq!(cpu[0].value, 25.0);

        let total = find(&samples, "nutanix_vm_count");
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].value, 8.0);
        assert_eq!(total[0].label("prism"), Some("p1"));
    }

    #[test]
    fn test_host_samples() {
        let inventory = Inventory {
            hosts: vec![Host {
                name: "h1".to_string(),
                cpu_usage_ppm: 123_400.0,
                memory_usage_ppm: 0.0,
                io_bandwidth_kbps: 42.0,
                iops: 7.0,
            }],
            ..Default::default()
        };
        let samples = aggregate("p1", &inventory);

        let cpu = find(&samples, "nutanix_host_cpu_usage_percent");
        assert!((cpu[0].value - 12.34).abs() < 1e-9);
        assert_eq!(find(&samples, "nutanix_host_io_bandwidth_kbps")[0].value, 42.0);
        assert_eq!(find(&samples, "nutanix_host_iops")[0].value, 7.0);
    }

    #[test]
    fn test_empty_inventory_still_reports_total() {
        let samples = aggregate("p1", &Inventory::default());
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "nutanix_vm_count");
        assert_eq!(samples[0].value, 0.0);
    }
}
