use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nutanix_exporter::aggregate::aggregate;
use nutanix_exporter::inventory::{
    Cluster, Host, Inventory, IoCounters, NicCounters, VirtualMachine, VmRuntime,
};
use nutanix_exporter::registry::{MetricRegistry, SeriesFilter};

const PRISM: &str = "prism-a:9440";

fn build_inventory(vms: usize) -> Inventory {
    let vms = (0..vms)
        .map(|i| {
            let mut disks = BTreeMap::new();
            disks.insert("scsi.0".to_string(), 1_073_741_824.0);
            disks.insert("scsi.1".to_string(), 536_870_912.0);

            let mut nics = BTreeMap::new();
            nics.insert(
                "eth0".to_string(),
                NicCounters {
                    rx_bytes: 1_000.0 * i as f64,
                    tx_bytes: 2_000.0 * i as f64,
                },
            );

            VirtualMachine {
                uuid: format!("00000000-0000-0000-0000-{i:012}"),
                name: format!("vm-{i}"),
                powered_on: i % 5 != 0,
                vcpus: 4,
                memory_mib: 8192,
                ip_addresses: vec![format!("10.0.{}.{}", i / 256, i % 256)],
                runtime: Some(VmRuntime {
                    cpu_usage_ppm: 125_000.0,
                    memory_usage_percent: 42.0,
                    disks,
                    nics,
                    io: IoCounters {
                        iops: 120.0,
                        avg_latency_usecs: 800.0,
                        read_bandwidth_kbps: 4_096.0,
                        write_bandwidth_kbps: 2_048.0,
                        network_bandwidth_kbps: 512.0,
                    },
                }),
            }
        })
        .collect::<Vec<_>>();

    let hosts = (0..16)
        .map(|i| Host {
            name: format!("host-{i}"),
            cpu_usage_ppm: 300_000.0,
            memory_usage_ppm: 700_000.0,
            io_bandwidth_kbps: 1_200.0,
            iops: 350.0,
        })
        .collect();

    let clusters = vec![Cluster {
        name: "cluster-1".to_string(),
        vm_count: vms.len() as u64,
        host_count: 16,
        cpu_usage_ppm: 300_000.0,
        memory_usage_ppm: 700_000.0,
        io_bandwidth_kbps: 19_200.0,
        iops: 5_600.0,
        storage_total_bytes: 1e13,
        storage_used_bytes: 4e12,
    }];

    Inventory {
        vms,
        hosts,
        clusters,
        stat_failures: Vec::new(),
    }
}

fn bench_aggregate(c: &mut Criterion) {
    let inventory = build_inventory(1_000);

    c.bench_function("aggregate/1000_vms", |b| {
        b.iter(|| black_box(aggregate(PRISM, black_box(&inventory))).len())
    });
}

fn bench_publish(c: &mut Criterion) {
    let inventory = build_inventory(1_000);
    let registry = MetricRegistry::new(10);
    registry.publish(PRISM, aggregate(PRISM, &inventory));

    c.bench_function("registry/publish_1000_vms", |b| {
        b.iter(|| {
            let report = registry.publish(PRISM, aggregate(PRISM, &inventory));
            black_box(report.series)
        })
    });
}

fn bench_render(c: &mut Criterion) {
    let inventory = build_inventory(1_000);
    let registry = MetricRegistry::new(10);
    registry.publish(PRISM, aggregate(PRISM, &inventory));
    let snapshot = registry.snapshot();

    c.bench_function("registry/render_all", |b| {
        b.iter(|| black_box(snapshot.render(black_box(&SeriesFilter::default()))).len())
    });

    let by_ip = SeriesFilter {
        vm: None,
        ip: Some("10.0.1.44".to_string()),
    };
    c.bench_function("registry/render_by_ip", |b| {
        b.iter(|| black_box(snapshot.render(black_box(&by_ip))).len())
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_aggregate(c);
    bench_publish(c);
    bench_render(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
